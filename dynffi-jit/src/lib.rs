//! Trampoline code generation and executable-memory management (§4.5/§4.6).
//!
//! [`Jit`] owns one [`code_memory::CodeMemory`] (the W^X-flipped arena
//! trampolines live in) and one [`cache::TrampolineCache`] (shape-keyed, so
//! structurally identical forward calls share a trampoline). Which ISA
//! backend emits the bytes is picked the same way `dynffi-abi::host_abi`
//! picks a classifier: from `target_lexicon::Triple::host()`.

pub mod aarch64;
pub mod cache;
pub mod code_memory;
pub mod mmap;
pub mod x64;

use cache::TrampolineCache;
use code_memory::{CodeMemory, ExecutableMemory};
use dynffi_abi::CallPlan;
use target_lexicon::{Architecture, OperatingSystem, Triple};

pub use code_memory::JitError;

/// Which native instruction encoder this process should use for trampolines
/// it emits for itself (as opposed to `dynffi-abi`'s `Abi`, which decides
/// how a *target* function's arguments are classified; this only decides
/// how the trampoline bytes are written).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostIsa {
    X64(x64::Convention),
    Aarch64,
}

fn host_isa() -> HostIsa {
    let triple = Triple::host();
    match (&triple.architecture, &triple.operating_system) {
        (Architecture::Aarch64(_), _) => HostIsa::Aarch64,
        (Architecture::X86_64, OperatingSystem::Windows) => HostIsa::X64(x64::Convention::Win64),
        (Architecture::X86_64, _) => HostIsa::X64(x64::Convention::SysV),
        _ => HostIsa::X64(x64::Convention::SysV),
    }
}

/// Context pointer + dispatcher passed through to a reverse trampoline,
/// matching `x64::reverse`/`aarch64::reverse`'s `DispatchFn` signature.
pub type DispatchFn = unsafe extern "C" fn(*mut u8, *mut *mut u8, *mut u8);

pub struct Jit {
    isa: HostIsa,
    code: CodeMemory,
    cache: TrampolineCache,
}

impl Jit {
    pub fn new() -> Self {
        Jit { isa: host_isa(), code: CodeMemory::new(), cache: TrampolineCache::new() }
    }

    /// Emits (or reuses, by shape) a forward trampoline for `plan` and
    /// returns a pointer to it. The pointer is only valid for calling
    /// through after [`Jit::publish`].
    pub fn forward_trampoline(&mut self, plan: &CallPlan) -> Result<*const u8, JitError> {
        let isa = self.isa;
        let bytes = self.cache.get_or_emit(plan, || match isa {
            HostIsa::X64(conv) => x64::forward::emit(plan, conv),
            HostIsa::Aarch64 => aarch64::forward::emit(plan),
        });
        self.code.allocate(&bytes)
    }

    /// Emits a one-off reverse trampoline bound to `ctx`/`dispatch`. Never
    /// shared across bindings, since the context pointer is baked in as an
    /// immediate.
    pub fn reverse_trampoline(
        &mut self,
        plan: &CallPlan,
        dispatch: DispatchFn,
        ctx: *mut u8,
    ) -> Result<*const u8, JitError> {
        let bytes = match self.isa {
            HostIsa::X64(conv) => x64::reverse::emit(plan, conv, dispatch, ctx),
            HostIsa::Aarch64 => aarch64::reverse::emit(plan, dispatch, ctx),
        };
        self.code.allocate(&bytes)
    }

    /// Flips all code allocated so far to read-execute. No further
    /// trampolines can be emitted afterward (mirrors `CodeMemory::publish`).
    pub fn publish(&mut self) -> Result<(), JitError> {
        self.code.publish()
    }

    pub fn trampoline_count(&self) -> usize {
        self.cache.len()
    }
}

impl Default for Jit {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynffi_abi::{Abi, CallingConvention};
    use dynffi_arena::Arena;
    use dynffi_types::{function, primitive, PrimitiveKind};

    fn sample_plan() -> CallPlan {
        let arena = Arena::create();
        let args = [primitive(PrimitiveKind::S32)];
        let sig = function(&arena, primitive(PrimitiveKind::S32), &args, args.len());
        let dynffi_types::TypeKind::Function(f) = sig.kind() else { unreachable!() };
        dynffi_abi::host_abi().classify(f, CallingConvention::Default).unwrap()
    }

    #[test]
    fn forward_trampoline_is_nonnull_before_publish() {
        let mut jit = Jit::new();
        let plan = sample_plan();
        let ptr = jit.forward_trampoline(&plan).unwrap();
        assert!(!ptr.is_null());
    }

    #[test]
    fn identical_shapes_reuse_one_trampoline() {
        let mut jit = Jit::new();
        let plan = sample_plan();
        jit.forward_trampoline(&plan).unwrap();
        jit.forward_trampoline(&plan).unwrap();
        assert_eq!(jit.trampoline_count(), 1);
    }

    #[test]
    fn publish_then_allocate_fails() {
        let mut jit = Jit::new();
        let plan = sample_plan();
        jit.forward_trampoline(&plan).unwrap();
        jit.publish().unwrap();
        assert!(jit.forward_trampoline(&CallPlan {
            args: vec![dynffi_abi::ArgClass { slots: vec![dynffi_abi::Slot::IntReg(1)], by_reference: false }],
            ret: dynffi_abi::RetClass::Void,
            frame_size: 0,
            frame_align: 16,
        })
        .is_err());
    }
}
