//! The host-neutral dynamic value, per §4.7: what `marshal`/`unmarshal`
//! convert to and from raw bytes. No embedding host's own value type leaks
//! in here — that translation is the `Host` trait's job, one layer up.

use indexmap::IndexMap;

#[derive(Debug, Clone, PartialEq)]
pub enum DynValue {
    Null,
    Bool(bool),
    Int(i128),
    UInt(u128),
    Float(f64),
    Str(String),
    WStr(Vec<u32>),
    Bytes(Vec<u8>),
    Array(Vec<DynValue>),
    Struct(IndexMap<String, DynValue>),
    Union { tag: String, value: Box<DynValue> },
    /// A raw address: either borrowed from C memory (`unmarshal`'s view of a
    /// pointer member) or a value the host is handing back down (`marshal`).
    Pointer(*mut u8),
}

// `Pointer` carries a raw address, not borrowed data; moving a `DynValue`
// between threads is exactly as sound as moving the `*mut u8` itself, which
// is the caller's problem the same way it is for any FFI pointer.
unsafe impl Send for DynValue {}
unsafe impl Sync for DynValue {}

impl DynValue {
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            DynValue::Int(v) => Some(*v),
            DynValue::UInt(v) => i128::try_from(*v).ok(),
            DynValue::Bool(b) => Some(*b as i128),
            DynValue::Float(f) => Some(*f as i128),
            _ => None,
        }
    }

    pub fn as_u128(&self) -> Option<u128> {
        match self {
            DynValue::UInt(v) => Some(*v),
            DynValue::Int(v) => u128::try_from(*v).ok(),
            DynValue::Bool(b) => Some(*b as u128),
            DynValue::Float(f) => Some(*f as u128),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DynValue::Float(f) => Some(*f),
            DynValue::Int(v) => Some(*v as f64),
            DynValue::UInt(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DynValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_coercions_cross_variants() {
        assert_eq!(DynValue::UInt(7).as_i128(), Some(7));
        assert_eq!(DynValue::Int(-1).as_u128(), None);
        assert_eq!(DynValue::Bool(true).as_i128(), Some(1));
        assert_eq!(DynValue::Float(2.5).as_f64(), Some(2.5));
    }
}
