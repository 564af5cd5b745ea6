//! Dynamic FFI engine: bind to and expose native C functions from a runtime
//! type and signature description, without any per-target compiled glue.
//!
//! A [`Binding`] turns a signature string plus a resolved symbol into a
//! callable trampoline (§3/§4.1-§4.5). A [`ReverseBinding`] does the
//! opposite: wraps a host callable as a raw function pointer native code
//! can invoke (§4.6). [`dynffi_marshal::Pin`] keeps a host scalar and a
//! typed C address in sync (§4.8). Everything below the facade — arenas,
//! the type graph, the signature grammar, ABI classification, trampoline
//! emission, and value marshalling — lives in its own crate; this one wires
//! them together and owns the state machines from §4.9.

mod binding;
mod error;
mod host;
mod library;
mod memory;
mod reverse;
mod state;

pub use binding::Binding;
pub use dynffi_abi::CallingConvention;
pub use dynffi_arena::Arena;
pub use dynffi_marshal::{unpin, DynValue, Pin};
pub use dynffi_sig::TypedefResolver;
pub use dynffi_types::{Type, TypeKind};
pub use error::Error;
pub use host::{Host, HostError, HostGuard, TestHost};
pub use library::Library;
pub use memory::{alloc, cast, free, get, memchr, memcmp, memcpy, memmove, memset, set, strdup};
pub use reverse::ReverseBinding;
pub use state::{BindingState, ReverseBindingState};

/// Parses `input` against a fresh [`dynffi_arena::Arena`], returning the
/// root [`Type`] (§4.2/§6's `parse_signature`). Most callers go through
/// [`Binding::bind`]/[`ReverseBinding::callback`] instead, which own the
/// arena for the lifetime of the binding; this is exposed for inspecting a
/// signature (e.g. to read argument types) without committing to one.
pub fn parse_signature<'a>(
    arena: &'a dynffi_arena::Arena,
    input: &str,
    resolver: Option<&dyn TypedefResolver<'a>>,
) -> Result<Type<'a>, Error> {
    Ok(dynffi_sig::parse(arena, input, resolver)?)
}
