//! Maps a function descriptor to a platform call plan, per spec §4.4. One
//! module per ABI (`isa::sysv`, `isa::win64`, `isa::aarch64`) behind the
//! [`Abi`] trait, selected at runtime the way `cranelift-native::builder()`
//! picks an ISA backend from `target_lexicon::Triple::host()`.

pub mod isa;

use dynffi_types::{FunctionSig, Type, TypeKind};
use target_lexicon::{Architecture, OperatingSystem, Triple};

/// Where one argument (or one half of a split argument) lives at the call
/// instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    IntReg(u8),
    FloatReg(u8),
    Stack(u32),
    /// Value lives in memory; its address is passed in the given int
    /// register.
    ByRefIntReg(u8),
    /// Value lives in memory; its address is pushed on the stack at the
    /// given offset.
    ByRefStack(u32),
}

/// Classification of an argument, possibly split across two slots (e.g. a
/// 16-byte SysV aggregate classified INTEGER+SSE).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgClass {
    pub slots: Vec<Slot>,
    /// `true` if the callee receives a pointer to a caller-owned copy
    /// rather than the value itself.
    pub by_reference: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetClass {
    Void,
    Int,
    Float,
    /// Hidden pointer passed as an implicit first argument.
    Mem,
    /// Small aggregate returned across two integer registers (SysV
    /// INTEGER+INTEGER case without SSE members).
    StructRegPair,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallPlan {
    pub args: Vec<ArgClass>,
    pub ret: RetClass,
    pub frame_size: u32,
    pub frame_align: u32,
}

/// Explicit calling-convention override (`original_source`'s `Affix/Type.c`
/// supports selecting the convention independent of host ABI default).
/// `Default` defers entirely to the platform's own ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallingConvention {
    #[default]
    Default,
    Cdecl,
    Stdcall,
    Fastcall,
    Thiscall,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AbiError {
    #[error("unsupported ABI form: {reason}")]
    UnsupportedAbi { reason: String },
}

pub trait Abi {
    fn classify(&self, func: &FunctionSig<'_>, conv: CallingConvention) -> Result<CallPlan, AbiError>;
}

/// Picks the ABI for the running host, mirroring the flat
/// architecture/operating-system match `cranelift-native` uses to pick a
/// backend.
pub fn host_abi() -> Box<dyn Abi> {
    let triple = Triple::host();
    match (&triple.architecture, &triple.operating_system) {
        (Architecture::Aarch64(_), _) => Box::new(isa::aarch64::Aarch64Abi),
        (Architecture::X86_64, OperatingSystem::Windows) => Box::new(isa::win64::Win64Abi),
        (Architecture::X86_64, _) => Box::new(isa::sysv::SysVAbi),
        _ => Box::new(isa::sysv::SysVAbi),
    }
}

/// A leaf scalar inside a descriptor, at a byte offset relative to the
/// enclosing aggregate, used by every ISA's eightbyte/HFA classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScalarKind {
    Integer,
    Float,
}

/// Recursively flattens a descriptor into `(offset, ScalarKind, size)`
/// leaves. Structs/unions/arrays recurse; a pointer or `void`/string is
/// always an integer-class leaf (it's carried in a GP register).
pub(crate) fn flatten_scalars(ty: Type<'_>, base: u32, out: &mut Vec<(u32, ScalarKind, u32)>) {
    match ty.kind() {
        TypeKind::Primitive(p) if p.is_float() => out.push((base, ScalarKind::Float, ty.size())),
        TypeKind::Primitive(_) => out.push((base, ScalarKind::Integer, ty.size())),
        TypeKind::Void => {}
        TypeKind::Pointer(_) | TypeKind::CString | TypeKind::WString => {
            out.push((base, ScalarKind::Integer, ty.size()))
        }
        TypeKind::Array { element, count } => {
            for i in 0..*count {
                flatten_scalars(*element, base + (i as u32) * element.size(), out);
            }
        }
        TypeKind::Struct(agg) => {
            for m in agg.members {
                flatten_scalars(m.ty, base + m.offset, out);
            }
        }
        TypeKind::Union(agg) => {
            // All members overlap at the same offset; take the widest to
            // decide register class conservatively (matches SysV: a union
            // eightbyte is MEMORY unless every member agrees on class, but
            // for classification purposes we only need one representative
            // leaf per overlapping byte range).
            if let Some(widest) = agg.members.iter().max_by_key(|m| m.ty.size()) {
                flatten_scalars(widest.ty, base + widest.offset, out);
            }
        }
        TypeKind::Function(_) => out.push((base, ScalarKind::Integer, ty.size())),
    }
}

pub(crate) fn round_up(n: u32, align: u32) -> u32 {
    if align == 0 {
        return n;
    }
    (n + align - 1) & !(align - 1)
}
