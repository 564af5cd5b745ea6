//! Top-level error taxonomy, per §7: one variant per row of the table,
//! aggregating every sub-crate's own `thiserror` enum via `#[from]`.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] dynffi_sig::ParseError),
    #[error(transparent)]
    Abi(#[from] dynffi_abi::AbiError),
    #[error(transparent)]
    Jit(#[from] dynffi_jit::JitError),
    #[error(transparent)]
    Marshal(#[from] dynffi_marshal::MarshalError),
    #[error("library not found: {0}")]
    LibraryNotFound(String),
    #[error("symbol not found: {0}")]
    SymbolNotFound(String),
    #[error("index {index} out of bounds for {count} elements")]
    OutOfBounds { index: usize, count: usize },
    #[error("operation invalid for a binding in state {state}")]
    InvalidState { state: &'static str },
    #[error("host call failed: {0}")]
    Host(String),
}

impl From<crate::host::HostError> for Error {
    fn from(e: crate::host::HostError) -> Self {
        Error::Host(e.0)
    }
}
