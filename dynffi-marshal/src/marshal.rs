//! `marshal`/`unmarshal`: the two directions of §4.7, implemented as one
//! `match` over `TypeKind` each (Design Notes "polymorphic marshalling" —
//! no per-type vtable, no trait object per descriptor category).

use crate::error::MarshalError;
use crate::value::DynValue;
use dynffi_types::{PrimitiveKind, Type, TypeKind};
use indexmap::IndexMap;
use std::ffi::CString;

/// Writes `value` to `dst` according to `ty`. `dst` must point to at least
/// `ty.size()` writable, naturally aligned bytes (flexible arrays are the
/// one exception: the caller-provided buffer must be sized for the actual
/// element count, since a `count == 0` descriptor carries no size of its
/// own).
///
/// # Safety
/// `dst` must be valid for `ty.size()` (or more, for a flexible array)
/// bytes of exclusive access for the duration of this call.
pub unsafe fn marshal(dst: *mut u8, value: &DynValue, ty: Type<'_>) -> Result<(), MarshalError> {
    match ty.kind() {
        TypeKind::Void => Err(MarshalError::Void),
        TypeKind::Primitive(p) => marshal_primitive(dst, value, *p),
        TypeKind::Pointer(_) | TypeKind::Function(_) => marshal_pointer(dst, value),
        TypeKind::CString => marshal_cstring(dst, value),
        TypeKind::WString => marshal_wstring(dst, value),
        TypeKind::Array { element, count } => marshal_array(dst, value, *element, *count),
        TypeKind::Struct(agg) => {
            std::ptr::write_bytes(dst, 0, ty.size() as usize);
            match value {
                DynValue::Struct(fields) => {
                    for m in agg.members {
                        if let Some(v) = fields.get(m.name) {
                            marshal(dst.add(m.offset as usize), v, m.ty)?;
                        }
                    }
                    Ok(())
                }
                _ => Err(MarshalError::InvalidValue { expected: "struct" }),
            }
        }
        TypeKind::Union(agg) => {
            std::ptr::write_bytes(dst, 0, ty.size() as usize);
            match value {
                DynValue::Union { tag, value } => {
                    let member = agg
                        .members
                        .iter()
                        .find(|m| m.name == tag.as_str())
                        .ok_or_else(|| MarshalError::UnknownUnionMember(tag.clone()))?;
                    marshal(dst, value, member.ty)
                }
                _ => Err(MarshalError::UnionNotASingleton),
            }
        }
    }
}

unsafe fn marshal_primitive(dst: *mut u8, value: &DynValue, p: PrimitiveKind) -> Result<(), MarshalError> {
    if p.is_float() {
        let f = value.as_f64().ok_or(MarshalError::InvalidValue { expected: "number" })?;
        match p.size_of() {
            4 => write_bytes(dst, &(f as f32).to_ne_bytes()),
            // f80 has no native Rust representation; the low 8 bytes carry
            // the nearest f64 and the rest stay zero, an approximation
            // good enough for round-tripping doubles through a `long
            // double` slot but not full 80-bit precision.
            _ => write_bytes(dst, &f.to_ne_bytes()),
        }
        return Ok(());
    }
    if matches!(p, PrimitiveKind::Bool) {
        let b = match value {
            DynValue::Bool(b) => *b,
            _ => value.as_i128().ok_or(MarshalError::InvalidValue { expected: "bool" })? != 0,
        };
        write_bytes(dst, &[b as u8]);
        return Ok(());
    }
    let size = p.size_of();
    if p.is_signed() {
        let v = value.as_i128().ok_or(MarshalError::InvalidValue { expected: "integer" })?;
        write_signed(dst, size, v);
    } else {
        let v = value.as_u128().ok_or(MarshalError::InvalidValue { expected: "unsigned integer" })?;
        write_unsigned(dst, size, v);
    }
    Ok(())
}

unsafe fn write_bytes(dst: *mut u8, bytes: &[u8]) {
    std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
}

unsafe fn write_signed(dst: *mut u8, size: u32, v: i128) {
    match size {
        1 => write_bytes(dst, &(v as i8).to_ne_bytes()),
        2 => write_bytes(dst, &(v as i16).to_ne_bytes()),
        4 => write_bytes(dst, &(v as i32).to_ne_bytes()),
        8 => write_bytes(dst, &(v as i64).to_ne_bytes()),
        _ => write_bytes(dst, &(v as i64).to_ne_bytes()),
    }
}

unsafe fn write_unsigned(dst: *mut u8, size: u32, v: u128) {
    match size {
        1 => write_bytes(dst, &(v as u8).to_ne_bytes()),
        2 => write_bytes(dst, &(v as u16).to_ne_bytes()),
        4 => write_bytes(dst, &(v as u32).to_ne_bytes()),
        8 => write_bytes(dst, &(v as u64).to_ne_bytes()),
        _ => write_bytes(dst, &(v as u64).to_ne_bytes()),
    }
}

unsafe fn marshal_pointer(dst: *mut u8, value: &DynValue) -> Result<(), MarshalError> {
    let addr = match value {
        DynValue::Null => 0usize,
        DynValue::Pointer(p) => *p as usize,
        _ => return Err(MarshalError::InvalidValue { expected: "pointer" }),
    };
    write_bytes(dst, &addr.to_ne_bytes());
    Ok(())
}

/// Allocates a fresh NUL-terminated C string and writes its address; the
/// allocation is handed to the callee as `CString::into_raw`, so it's
/// freed by round-tripping through `CString::from_raw` (the pin/binding
/// layer that owns this argument's lifetime is responsible for that).
unsafe fn marshal_cstring(dst: *mut u8, value: &DynValue) -> Result<(), MarshalError> {
    let addr = match value {
        DynValue::Null => 0usize,
        DynValue::Str(s) => {
            let c = CString::new(s.as_str()).map_err(|_| MarshalError::InvalidUtf8("interior NUL".into()))?;
            c.into_raw() as usize
        }
        _ => return Err(MarshalError::InvalidValue { expected: "string" }),
    };
    write_bytes(dst, &addr.to_ne_bytes());
    Ok(())
}

unsafe fn marshal_wstring(dst: *mut u8, value: &DynValue) -> Result<(), MarshalError> {
    let addr = match value {
        DynValue::Null => 0usize,
        DynValue::Str(s) => {
            let mut units: Vec<u32> = s.chars().map(|c| c as u32).collect();
            units.push(0);
            let boxed = units.into_boxed_slice();
            Box::into_raw(boxed) as *mut u32 as usize
        }
        DynValue::WStr(units) => {
            let mut units = units.clone();
            units.push(0);
            let boxed = units.into_boxed_slice();
            Box::into_raw(boxed) as *mut u32 as usize
        }
        _ => return Err(MarshalError::InvalidValue { expected: "string" }),
    };
    write_bytes(dst, &addr.to_ne_bytes());
    Ok(())
}

unsafe fn marshal_array(
    dst: *mut u8,
    value: &DynValue,
    element: Type<'_>,
    count: usize,
) -> Result<(), MarshalError> {
    match value {
        DynValue::Array(items) => {
            if count != 0 && items.len() != count {
                return Err(MarshalError::LengthMismatch { expected: count, got: items.len() });
            }
            let stride = element.size() as usize;
            for (i, item) in items.iter().enumerate() {
                marshal(dst.add(i * stride), item, element)?;
            }
            Ok(())
        }
        _ => Err(MarshalError::InvalidValue { expected: "array" }),
    }
}

/// Reads a value out of `src` per `ty`, per §4.7's C→host direction.
///
/// # Safety
/// `src` must point to at least `ty.size()` readable, naturally aligned
/// bytes (flexible arrays can't be read generically — see the `Array`
/// arm's doc note).
pub unsafe fn unmarshal(src: *const u8, ty: Type<'_>) -> Result<DynValue, MarshalError> {
    match ty.kind() {
        TypeKind::Void => Err(MarshalError::Void),
        TypeKind::Primitive(p) => Ok(unmarshal_primitive(src, *p)),
        TypeKind::Pointer(_) | TypeKind::Function(_) => Ok(unmarshal_pointer(src)),
        TypeKind::CString => unmarshal_cstring(src),
        TypeKind::WString => Ok(unmarshal_wstring(src)),
        TypeKind::Array { element, count } => unmarshal_array(src, *element, *count),
        TypeKind::Struct(agg) => {
            let mut fields = IndexMap::new();
            for m in agg.members {
                fields.insert(m.name.to_string(), unmarshal(src.add(m.offset as usize), m.ty)?);
            }
            Ok(DynValue::Struct(fields))
        }
        TypeKind::Union(agg) => {
            // The active member can't be known from bytes alone; return
            // every member's view of the same address, per §4.7.
            let mut fields = IndexMap::new();
            for m in agg.members {
                fields.insert(m.name.to_string(), unmarshal(src, m.ty)?);
            }
            Ok(DynValue::Struct(fields))
        }
    }
}

unsafe fn read_bytes(src: *const u8, len: usize) -> Vec<u8> {
    std::slice::from_raw_parts(src, len).to_vec()
}

unsafe fn unmarshal_primitive(src: *const u8, p: PrimitiveKind) -> DynValue {
    let size = p.size_of() as usize;
    if p.is_float() {
        return match size {
            4 => DynValue::Float(f32::from_ne_bytes(read_bytes(src, 4).try_into().unwrap()) as f64),
            _ => DynValue::Float(f64::from_ne_bytes(read_bytes(src, 8).try_into().unwrap())),
        };
    }
    if matches!(p, PrimitiveKind::Bool) {
        return DynValue::Bool(*src != 0);
    }
    if p.is_signed() {
        let v: i128 = match size {
            1 => i8::from_ne_bytes(read_bytes(src, 1).try_into().unwrap()) as i128,
            2 => i16::from_ne_bytes(read_bytes(src, 2).try_into().unwrap()) as i128,
            4 => i32::from_ne_bytes(read_bytes(src, 4).try_into().unwrap()) as i128,
            _ => i64::from_ne_bytes(read_bytes(src, 8).try_into().unwrap()) as i128,
        };
        DynValue::Int(v)
    } else {
        let v: u128 = match size {
            1 => read_bytes(src, 1)[0] as u128,
            2 => u16::from_ne_bytes(read_bytes(src, 2).try_into().unwrap()) as u128,
            4 => u32::from_ne_bytes(read_bytes(src, 4).try_into().unwrap()) as u128,
            _ => u64::from_ne_bytes(read_bytes(src, 8).try_into().unwrap()) as u128,
        };
        DynValue::UInt(v)
    }
}

unsafe fn unmarshal_pointer(src: *const u8) -> DynValue {
    let addr = usize::from_ne_bytes(read_bytes(src, std::mem::size_of::<usize>()).try_into().unwrap());
    if addr == 0 {
        DynValue::Null
    } else {
        DynValue::Pointer(addr as *mut u8)
    }
}

unsafe fn unmarshal_cstring(src: *const u8) -> Result<DynValue, MarshalError> {
    let addr = usize::from_ne_bytes(read_bytes(src, std::mem::size_of::<usize>()).try_into().unwrap());
    if addr == 0 {
        return Ok(DynValue::Null);
    }
    let cstr = std::ffi::CStr::from_ptr(addr as *const std::os::raw::c_char);
    let s = cstr.to_str().map_err(|e| MarshalError::InvalidUtf8(e.to_string()))?;
    Ok(DynValue::Str(s.to_string()))
}

unsafe fn unmarshal_wstring(src: *const u8) -> DynValue {
    let addr = usize::from_ne_bytes(read_bytes(src, std::mem::size_of::<usize>()).try_into().unwrap());
    if addr == 0 {
        return DynValue::Null;
    }
    let mut units = Vec::new();
    let mut p = addr as *const u32;
    loop {
        let unit = *p;
        if unit == 0 {
            break;
        }
        units.push(unit);
        p = p.add(1);
    }
    DynValue::WStr(units)
}

unsafe fn unmarshal_array(src: *const u8, element: Type<'_>, count: usize) -> Result<DynValue, MarshalError> {
    let stride = element.size() as usize;
    let mut items = Vec::with_capacity(count);
    for i in 0..count {
        items.push(unmarshal(src.add(i * stride), element)?);
    }
    Ok(DynValue::Array(items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynffi_arena::Arena;
    use dynffi_types::{array, primitive, AggregateBuilder};

    #[test]
    fn int_round_trips() {
        let ty = primitive(PrimitiveKind::S32);
        let mut buf = [0u8; 4];
        unsafe {
            marshal(buf.as_mut_ptr(), &DynValue::Int(-7), ty).unwrap();
            assert_eq!(unmarshal(buf.as_ptr(), ty).unwrap(), DynValue::Int(-7));
        }
    }

    #[test]
    fn bool_round_trips() {
        let ty = primitive(PrimitiveKind::Bool);
        let mut buf = [0u8; 1];
        unsafe {
            marshal(buf.as_mut_ptr(), &DynValue::Bool(true), ty).unwrap();
            assert_eq!(unmarshal(buf.as_ptr(), ty).unwrap(), DynValue::Bool(true));
        }
    }

    #[test]
    fn float_round_trips() {
        let ty = primitive(PrimitiveKind::F64);
        let mut buf = [0u8; 8];
        unsafe {
            marshal(buf.as_mut_ptr(), &DynValue::Float(1.5), ty).unwrap();
            assert_eq!(unmarshal(buf.as_ptr(), ty).unwrap(), DynValue::Float(1.5));
        }
    }

    #[test]
    fn struct_missing_keys_leave_zero() {
        let arena = Arena::create();
        let mut b = AggregateBuilder::struct_begin(&arena);
        b.add_member("a", primitive(PrimitiveKind::S32)).unwrap();
        b.add_member("b", primitive(PrimitiveKind::S32)).unwrap();
        let ty = b.end(false).unwrap();
        let mut fields = IndexMap::new();
        fields.insert("a".to_string(), DynValue::Int(9));
        let mut buf = vec![0xffu8; ty.size() as usize];
        unsafe {
            marshal(buf.as_mut_ptr(), &DynValue::Struct(fields), ty).unwrap();
            let DynValue::Struct(out) = unmarshal(buf.as_ptr(), ty).unwrap() else { panic!() };
            assert_eq!(out["a"], DynValue::Int(9));
            assert_eq!(out["b"], DynValue::Int(0));
        }
    }

    #[test]
    fn array_length_mismatch_is_rejected() {
        let arena = Arena::create();
        let ty = array(&arena, primitive(PrimitiveKind::S32), 3).unwrap();
        let mut buf = [0u8; 12];
        let items = vec![DynValue::Int(1), DynValue::Int(2)];
        unsafe {
            let err = marshal(buf.as_mut_ptr(), &DynValue::Array(items), ty).unwrap_err();
            assert_eq!(err, MarshalError::LengthMismatch { expected: 3, got: 2 });
        }
    }

    #[test]
    fn flexible_array_accepts_any_length() {
        let arena = Arena::create();
        let ty = array(&arena, primitive(PrimitiveKind::S32), 0).unwrap();
        let mut buf = [0u8; 8];
        let items = vec![DynValue::Int(1), DynValue::Int(2)];
        unsafe {
            assert!(marshal(buf.as_mut_ptr(), &DynValue::Array(items), ty).is_ok());
        }
    }

    #[test]
    fn union_selects_member_by_tag() {
        let arena = Arena::create();
        let mut b = AggregateBuilder::union_begin(&arena);
        b.add_member("i", primitive(PrimitiveKind::S32)).unwrap();
        b.add_member("f", primitive(PrimitiveKind::F32)).unwrap();
        let ty = b.end(false).unwrap();
        let mut buf = [0u8; 4];
        unsafe {
            marshal(buf.as_mut_ptr(), &DynValue::Union { tag: "i".into(), value: Box::new(DynValue::Int(42)) }, ty)
                .unwrap();
            let DynValue::Struct(out) = unmarshal(buf.as_ptr(), ty).unwrap() else { panic!() };
            assert_eq!(out["i"], DynValue::Int(42));
        }
    }

    #[test]
    fn unknown_union_member_is_rejected() {
        let arena = Arena::create();
        let mut b = AggregateBuilder::union_begin(&arena);
        b.add_member("i", primitive(PrimitiveKind::S32)).unwrap();
        let ty = b.end(false).unwrap();
        let mut buf = [0u8; 4];
        unsafe {
            let err = marshal(
                buf.as_mut_ptr(),
                &DynValue::Union { tag: "nope".into(), value: Box::new(DynValue::Int(1)) },
                ty,
            )
            .unwrap_err();
            assert_eq!(err, MarshalError::UnknownUnionMember("nope".into()));
        }
    }

    #[test]
    fn cstring_round_trips_and_is_freeable() {
        let ty = dynffi_types::cstring();
        let mut buf = [0u8; 8];
        unsafe {
            marshal(buf.as_mut_ptr(), &DynValue::Str("hi".into()), ty).unwrap();
            assert_eq!(unmarshal(buf.as_ptr(), ty).unwrap(), DynValue::Str("hi".into()));
            let addr = usize::from_ne_bytes(buf[..8].try_into().unwrap());
            drop(CString::from_raw(addr as *mut std::os::raw::c_char));
        }
    }

    #[test]
    fn null_pointer_round_trips() {
        let arena = Arena::create();
        let ty = dynffi_types::pointer(&arena, None);
        let mut buf = [0u8; 8];
        unsafe {
            marshal(buf.as_mut_ptr(), &DynValue::Null, ty).unwrap();
            assert_eq!(unmarshal(buf.as_ptr(), ty).unwrap(), DynValue::Null);
        }
    }
}
