//! The embedding collaborator boundary (§ADDED-1). `dynffi` itself never
//! ships an implementation of [`Host`] — attaching a real scripting
//! language's object model and reference counting is explicitly out of
//! scope (§1 non-goals) — but the reverse-call path is written and tested
//! against this trait rather than against any one host. Mirrors
//! `wasmtime-api`'s `Callable` trait: a host-supplied function value plus
//! the hook needed to invoke it.

use dynffi_marshal::DynValue;

#[derive(Debug, thiserror::Error)]
#[error("host call failed: {0}")]
pub struct HostError(pub String);

/// The `host_attach()`/`host_detach()` hook (§5) threaded through a single
/// reverse-trampoline dispatch. Held only for the duration of one callback
/// invocation; an embedder with a GIL or a fiber stack enters it here and
/// leaves it on drop.
pub struct HostGuard<'a> {
    _marker: std::marker::PhantomData<&'a ()>,
}

impl<'a> HostGuard<'a> {
    fn new() -> Self {
        HostGuard { _marker: std::marker::PhantomData }
    }
}

pub trait Host {
    /// The host's own representation of a callable (a closure, a bound
    /// method, whatever the embedding language uses).
    type Value;

    fn attach(&self) -> HostGuard<'_>;

    fn call(&self, callable: &Self::Value, args: &[DynValue]) -> Result<DynValue, HostError>;
}

/// Trivial in-process host standing in for "the embedding scripting
/// environment" in this crate's own tests (§8): a boxed Rust closure plays
/// the role a real host's callable value would.
pub struct TestHost<F: Fn(&[DynValue]) -> DynValue> {
    f: F,
}

impl<F: Fn(&[DynValue]) -> DynValue> TestHost<F> {
    pub fn new(f: F) -> Self {
        TestHost { f }
    }
}

impl<F: Fn(&[DynValue]) -> DynValue> Host for TestHost<F> {
    type Value = ();

    fn attach(&self) -> HostGuard<'_> {
        HostGuard::new()
    }

    fn call(&self, _callable: &(), args: &[DynValue]) -> Result<DynValue, HostError> {
        Ok((self.f)(args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_calls_the_wrapped_closure() {
        let host = TestHost::new(|args: &[DynValue]| {
            DynValue::Int(args[0].as_i128().unwrap() + args[1].as_i128().unwrap())
        });
        let _guard = host.attach();
        let result = host.call(&(), &[DynValue::Int(2), DynValue::Int(3)]).unwrap();
        assert_eq!(result, DynValue::Int(5));
    }
}
