//! Pretty-prints a descriptor back into the grammar `parse` accepts, used to
//! round-trip test parser totality (Testable Property 3): every descriptor
//! that parses from a string must re-emit to a string that parses back to an
//! equivalent descriptor.

use dynffi_types::{PrimitiveKind, Type, TypeKind};

pub fn emit(ty: Type<'_>) -> String {
    let mut out = String::new();
    match ty.kind() {
        TypeKind::Function(sig) => {
            let (fixed, variadic) = sig.args.split_at(sig.fixed_args);
            push_arg_list(&mut out, fixed);
            if !variadic.is_empty() {
                out.push(';');
                push_arg_list(&mut out, variadic);
            }
            out.push(';');
            out.push_str(&emit(sig.ret));
        }
        _ => emit_type(&mut out, ty),
    }
    out
}

fn push_arg_list(out: &mut String, args: &[Type<'_>]) {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        emit_type(out, *arg);
    }
}

fn emit_type(out: &mut String, ty: Type<'_>) {
    match ty.kind() {
        TypeKind::Void => out.push('v'),
        TypeKind::CString => out.push('z'),
        TypeKind::WString => out.push('Z'),
        TypeKind::Primitive(kind) => out.push(prim_char(*kind)),
        TypeKind::Pointer(None) => out.push('p'),
        TypeKind::Pointer(Some(inner)) => {
            out.push('*');
            emit_type(out, *inner);
        }
        TypeKind::Array { element, count } => {
            out.push('[');
            emit_type(out, *element);
            out.push(';');
            out.push_str(&count.to_string());
            out.push(']');
        }
        TypeKind::Struct(agg) => {
            out.push('{');
            emit_members(out, agg.members);
            out.push('}');
        }
        TypeKind::Union(agg) => {
            out.push('<');
            emit_members(out, agg.members);
            out.push('>');
        }
        TypeKind::Function(_) => {
            // Only reachable as a pointer's pointee (`*(args;ret)`); the
            // caller already emitted the leading `*`.
            out.push('(');
            out.push_str(&emit(ty));
            out.push(')');
        }
    }
}

fn emit_members(out: &mut String, members: &[dynffi_types::Member<'_>]) {
    for (i, m) in members.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(m.name);
        out.push(':');
        emit_type(out, m.ty);
    }
}

fn prim_char(kind: PrimitiveKind) -> char {
    match kind {
        PrimitiveKind::Bool => 'b',
        PrimitiveKind::S8 => 'c',
        PrimitiveKind::U8 => 'C',
        PrimitiveKind::S16 => 's',
        PrimitiveKind::U16 => 'S',
        PrimitiveKind::S32 => 'i',
        PrimitiveKind::U32 => 'I',
        PrimitiveKind::S64 => 'q',
        PrimitiveKind::U64 => 'Q',
        PrimitiveKind::Long => 'l',
        PrimitiveKind::ULong => 'L',
        PrimitiveKind::F32 => 'f',
        PrimitiveKind::F64 => 'd',
        PrimitiveKind::F80 => 'e',
        PrimitiveKind::PointerSizedInt => 'L',
    }
}
