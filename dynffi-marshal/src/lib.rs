//! Host-neutral value marshalling and pin semantics, per §4.7/§4.8.

mod error;
mod marshal;
mod pin;
mod value;

pub use error::MarshalError;
pub use marshal::{marshal, unmarshal};
pub use pin::{unpin, Pin};
pub use value::DynValue;
