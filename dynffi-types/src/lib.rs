//! Self-describing, arena-allocated C type descriptor graph: §3/§4.2 of the
//! dynffi specification.
//!
//! Descriptors are a tagged variant (sum type, [`TypeKind`]) stored in an
//! arena-backed slab ([`dynffi_arena::Arena`]) and referred to by children
//! through lifetime-parameterised references rather than per-node reference
//! counting, per the Design Notes: "Represent descriptors as tagged variants
//! ... do not use per-node reference counting."

mod layout;
mod primitive;

pub use layout::{struct_layout, union_layout, LayoutError};
pub use primitive::PrimitiveKind;

use dynffi_arena::Arena;
use std::fmt;

/// A type descriptor. Cheap to copy (it's a pointer into an arena), never
/// outlives the arena it came from.
#[derive(Clone, Copy)]
pub struct Type<'a>(&'a TypeData<'a>);

impl<'a> Type<'a> {
    pub fn size(self) -> u32 {
        self.0.size
    }

    pub fn align(self) -> u32 {
        self.0.align
    }

    pub fn kind(self) -> &'a TypeKind<'a> {
        &self.0.kind
    }

    fn new(arena: &'a Arena, size: u32, align: u32, kind: TypeKind<'a>) -> Type<'a> {
        Type(arena.alloc(TypeData { size, align, kind }))
    }
}

impl<'a> fmt::Debug for Type<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Type({:?}, size={}, align={})", self.0.kind, self.0.size, self.0.align)
    }
}

impl<'a> PartialEq for Type<'a> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}

struct TypeData<'a> {
    size: u32,
    align: u32,
    kind: TypeKind<'a>,
}

/// One struct or union member: name, byte offset, and descriptor.
#[derive(Debug, Clone, Copy)]
pub struct Member<'a> {
    pub name: &'a str,
    pub offset: u32,
    pub ty: Type<'a>,
}

/// Shared shape of `struct`/`union` descriptors.
#[derive(Debug)]
pub struct Aggregate<'a> {
    pub members: &'a [Member<'a>],
    pub packed: bool,
}

/// A C function signature: no size of its own, used only as the callee of a
/// forward binding or the shape of a reverse callback.
#[derive(Debug)]
pub struct FunctionSig<'a> {
    pub ret: Type<'a>,
    pub args: &'a [Type<'a>],
    /// Number of leading arguments that are *not* variadic. `args.len()` for
    /// a non-variadic function.
    pub fixed_args: usize,
}

impl<'a> FunctionSig<'a> {
    pub fn is_variadic(&self) -> bool {
        self.fixed_args < self.args.len()
    }
}

#[derive(Debug)]
pub enum TypeKind<'a> {
    Void,
    Primitive(PrimitiveKind),
    /// `None` pointee means an opaque pointer (`void*`).
    Pointer(Option<Type<'a>>),
    /// `z` — pointer to a NUL-terminated UTF-8 C string. Same size/align as
    /// `Pointer`, but tagged distinctly so the marshaller (and the signature
    /// emitter) round-trip it as a string rather than a raw `u8*`.
    CString,
    /// `Z` — pointer to a NUL-terminated platform-wide-char string.
    WString,
    Array { element: Type<'a>, count: usize },
    Struct(Aggregate<'a>),
    Union(Aggregate<'a>),
    Function(FunctionSig<'a>),
}

/// `primitive(kind)` per §4.2: a shared, immutable descriptor — no arena
/// needed. Built once per kind behind a `OnceLock` so repeated calls return
/// the same address, which is all callers should ever rely on for identity.
pub fn primitive(kind: PrimitiveKind) -> Type<'static> {
    use std::sync::OnceLock;
    // One cell per discriminant, indexed by the enum's declaration order.
    static CELLS: [OnceLock<TypeData<'static>>; 14] = [
        OnceLock::new(), OnceLock::new(), OnceLock::new(), OnceLock::new(),
        OnceLock::new(), OnceLock::new(), OnceLock::new(), OnceLock::new(),
        OnceLock::new(), OnceLock::new(), OnceLock::new(), OnceLock::new(),
        OnceLock::new(), OnceLock::new(),
    ];
    let index = match kind {
        PrimitiveKind::Bool => 0,
        PrimitiveKind::S8 => 1,
        PrimitiveKind::U8 => 2,
        PrimitiveKind::S16 => 3,
        PrimitiveKind::U16 => 4,
        PrimitiveKind::S32 => 5,
        PrimitiveKind::U32 => 6,
        PrimitiveKind::S64 => 7,
        PrimitiveKind::U64 => 8,
        PrimitiveKind::Long => 9,
        PrimitiveKind::ULong => 10,
        PrimitiveKind::F32 => 11,
        PrimitiveKind::F64 => 12,
        PrimitiveKind::F80 => 13,
        PrimitiveKind::PointerSizedInt => {
            // Aliases U64/U32 width-for-width; doesn't need its own cell.
            return Type(CELLS[if std::mem::size_of::<usize>() == 8 { 8 } else { 6 }].get_or_init(|| TypeData {
                size: kind.size_of(),
                align: kind.align_of(),
                kind: TypeKind::Primitive(kind),
            }));
        }
    };
    Type(CELLS[index].get_or_init(|| TypeData {
        size: kind.size_of(),
        align: kind.align_of(),
        kind: TypeKind::Primitive(kind),
    }))
}

/// `void`: size 0, only valid as a return type (enforced by `dynffi-sig` and
/// `dynffi-abi`, not here — the descriptor graph itself doesn't know where a
/// type is used).
pub fn void() -> Type<'static> {
    static VOID: TypeData<'static> = TypeData {
        size: 0,
        align: 1,
        kind: TypeKind::Void,
    };
    Type(&VOID)
}

/// `pointer(arena, pointee)` per §4.2.
pub fn pointer<'a>(arena: &'a Arena, pointee: Option<Type<'a>>) -> Type<'a> {
    let word = std::mem::size_of::<usize>() as u32;
    Type::new(arena, word, word, TypeKind::Pointer(pointee))
}

/// `z`: UTF-8 C string — a shared static, since it carries no nested
/// pointee descriptor.
pub fn cstring() -> Type<'static> {
    let word = std::mem::size_of::<usize>() as u32;
    static CELL: std::sync::OnceLock<TypeData<'static>> = std::sync::OnceLock::new();
    Type(CELL.get_or_init(|| TypeData { size: word, align: word, kind: TypeKind::CString }))
}

/// `Z`: wide-char C string.
pub fn wstring() -> Type<'static> {
    let word = std::mem::size_of::<usize>() as u32;
    static CELL: std::sync::OnceLock<TypeData<'static>> = std::sync::OnceLock::new();
    Type(CELL.get_or_init(|| TypeData { size: word, align: word, kind: TypeKind::WString }))
}

/// `array(arena, element, count)` per §4.2. `size = element.size * count`;
/// `align = element.align`.
pub fn array<'a>(arena: &'a Arena, element: Type<'a>, count: usize) -> Result<Type<'a>, LayoutError> {
    let size = (element.size() as u64)
        .checked_mul(count as u64)
        .ok_or(LayoutError::CountOverflow)?;
    let size: u32 = size.try_into().map_err(|_| LayoutError::CountOverflow)?;
    Ok(Type::new(arena, size, element.align().max(1), TypeKind::Array { element, count }))
}

/// `function(arena, ret, args, fixed_arg_count)` per §4.2. A pure descriptor
/// — it has no size of its own.
pub fn function<'a>(
    arena: &'a Arena,
    ret: Type<'a>,
    args: &[Type<'a>],
    fixed_args: usize,
) -> Type<'a> {
    let args = arena.alloc_slice_copy(args);
    Type::new(
        arena,
        0,
        1,
        TypeKind::Function(FunctionSig { ret, args, fixed_args }),
    )
}

/// Builder for `struct_begin(arena) / add_member(name, descriptor) /
/// struct_end(packed?)` (and the union equivalent) per §4.2.
pub struct AggregateBuilder<'a> {
    arena: &'a Arena,
    members: Vec<(String, Type<'a>)>,
    is_union: bool,
}

impl<'a> AggregateBuilder<'a> {
    pub fn struct_begin(arena: &'a Arena) -> Self {
        AggregateBuilder { arena, members: Vec::new(), is_union: false }
    }

    pub fn union_begin(arena: &'a Arena) -> Self {
        AggregateBuilder { arena, members: Vec::new(), is_union: true }
    }

    pub fn add_member(&mut self, name: &str, ty: Type<'a>) -> Result<(), LayoutError> {
        if self.members.iter().any(|(n, _)| n == name) {
            return Err(LayoutError::DuplicateField(name.to_string()));
        }
        self.members.push((name.to_string(), ty));
        Ok(())
    }

    pub fn end(self, packed: bool) -> Result<Type<'a>, LayoutError> {
        let (laid_out, size, align) = if self.is_union {
            union_layout(&self.members, packed)?
        } else {
            struct_layout(&self.members, packed)?
        };
        let members: Vec<Member<'a>> = laid_out
            .into_iter()
            .map(|(name, offset, ty)| Member { name: self.arena.alloc_str(&name), offset, ty })
            .collect();
        let members = self.arena.alloc_slice_copy(&members);
        let agg = Aggregate { members, packed };
        let kind = if self.is_union { TypeKind::Union(agg) } else { TypeKind::Struct(agg) };
        Ok(Type::new(self.arena, size, align, kind))
    }
}
