//! C layout rules from spec §3: member placement, struct/union size and
//! alignment. Kept separate from the graph builders in `lib.rs` so the pure
//! arithmetic is independently testable (Testable Property 1).

use crate::{Type, TypeKind};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum LayoutError {
    #[error("member `{0}` has size 0 and is not a trailing flexible array")]
    InvalidLayout(String),
    #[error("duplicate field `{0}`")]
    DuplicateField(String),
    #[error("array element count overflows size computation")]
    CountOverflow,
}

fn round_up(offset: u32, align: u32) -> u32 {
    (offset + align - 1) & !(align - 1)
}

fn is_flexible_array(ty: Type<'_>) -> bool {
    matches!(ty.kind(), TypeKind::Array { count: 0, .. })
}

/// `struct_end` layout: member *i* sits at the smallest offset ≥ the running
/// offset that is a multiple of its alignment; trailing padding rounds the
/// total size up to a multiple of the struct's alignment (= max member
/// alignment) unless `packed`.
pub fn struct_layout<'a>(
    members: &[(String, Type<'a>)],
    packed: bool,
) -> Result<(Vec<(String, u32, Type<'a>)>, u32, u32), LayoutError> {
    let mut offset = 0u32;
    let mut max_align = 1u32;
    let mut laid_out = Vec::with_capacity(members.len());

    for (i, (name, ty)) in members.iter().enumerate() {
        let is_last = i + 1 == members.len();
        if ty.size() == 0 && !(is_last && is_flexible_array(*ty)) {
            return Err(LayoutError::InvalidLayout(name.clone()));
        }
        let align = if packed { 1 } else { ty.align().max(1) };
        let this_offset = round_up(offset, align);
        laid_out.push((name.clone(), this_offset, *ty));
        offset = this_offset + ty.size();
        max_align = max_align.max(align);
    }

    let struct_align = if packed { 1 } else { max_align };
    let size = round_up(offset, struct_align);
    Ok((laid_out, size, struct_align))
}

/// Union layout: every member at offset 0; size = max(member.size), rounded
/// up to the struct alignment (= max member alignment).
pub fn union_layout<'a>(
    members: &[(String, Type<'a>)],
    packed: bool,
) -> Result<(Vec<(String, u32, Type<'a>)>, u32, u32), LayoutError> {
    let mut max_size = 0u32;
    let mut max_align = 1u32;
    let n = members.len();

    for (i, (name, ty)) in members.iter().enumerate() {
        let is_last = i + 1 == n;
        if ty.size() == 0 && !(is_last && is_flexible_array(*ty)) {
            return Err(LayoutError::InvalidLayout(name.clone()));
        }
        max_size = max_size.max(ty.size());
        if !packed {
            max_align = max_align.max(ty.align().max(1));
        }
    }

    let align = if packed { 1 } else { max_align };
    let size = round_up(max_size, align);
    let laid_out = members.iter().map(|(n, t)| (n.clone(), 0u32, *t)).collect();
    Ok((laid_out, size, align))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{primitive, PrimitiveKind};

    #[test]
    fn round_up_is_identity_on_multiples() {
        assert_eq!(round_up(8, 4), 8);
        assert_eq!(round_up(9, 4), 12);
        assert_eq!(round_up(0, 8), 0);
    }

    #[test]
    fn empty_struct_has_size_zero_align_one() {
        let empty: Vec<(String, Type)> = Vec::new();
        let (members, size, align) = struct_layout(&empty, false).unwrap();
        assert!(members.is_empty());
        assert_eq!(size, 0);
        assert_eq!(align, 1);
    }

    #[test]
    fn packed_struct_has_no_padding() {
        let members = vec![
            ("a".to_string(), primitive(PrimitiveKind::S8)),
            ("b".to_string(), primitive(PrimitiveKind::S32)),
        ];
        let (laid_out, size, align) = struct_layout(&members, true).unwrap();
        assert_eq!(laid_out[0].1, 0);
        assert_eq!(laid_out[1].1, 1);
        assert_eq!(size, 5);
        assert_eq!(align, 1);
    }
}
