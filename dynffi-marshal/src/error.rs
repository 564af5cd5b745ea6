#[derive(Debug, thiserror::Error, PartialEq)]
pub enum MarshalError {
    #[error("array length mismatch: descriptor expects {expected}, got {got}")]
    LengthMismatch { expected: usize, got: usize },
    #[error("unknown union member {0:?}")]
    UnknownUnionMember(String),
    #[error("union value must select exactly one member")]
    UnionNotASingleton,
    #[error("value is not a valid {expected} for this descriptor")]
    InvalidValue { expected: &'static str },
    #[error("string is not valid UTF-8: {0}")]
    InvalidUtf8(String),
    #[error("void has no representable value")]
    Void,
}
