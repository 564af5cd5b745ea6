//! Reverse bindings / callbacks (§4.6/§4.9): wraps a host callable as a raw
//! C function pointer another library can invoke directly.
//!
//! Each emitted stub bakes a context pointer and a single non-generic
//! dispatcher in as immediates (`dynffi-jit`'s own doc comment: "never
//! shared across bindings, since the context pointer is baked in"). The
//! dispatcher here is the one place that has to reconcile an asymmetry in
//! how `x64::reverse` hands arguments back, noted below on [`dispatch`].

use crate::error::Error;
use crate::host::HostError;
use crate::state::ReverseBindingState;
use dynffi_abi::{Abi, CallPlan, CallingConvention};
use dynffi_arena::Arena;
use dynffi_jit::Jit;
use dynffi_marshal::DynValue;
use dynffi_types::{Type, TypeKind};

struct ReverseContext {
    sig: Type<'static>,
    plan: CallPlan,
    handler: Box<dyn Fn(&[DynValue]) -> Result<DynValue, HostError>>,
}

/// The dispatcher baked into every reverse trampoline. `arg_ptrs[i]` always
/// points at 8 bytes of scratch holding *some* representation of argument
/// `i`. For a register/stack (non-by-reference) scalar argument those 8
/// bytes are the value itself, same as a forward call's argument buffer.
/// For a by-reference argument, the trampoline only had room for one
/// eightbyte of scratch per argument, so it stores the incoming pointer
/// there instead of the pointee. An array argument needs the same extra
/// hop even though it isn't by-reference: arrays decay to a pointer at the
/// call boundary, so the eightbyte the trampoline captured is itself the
/// address of the real element data, not the data.
unsafe extern "C" fn dispatch(ctx: *mut u8, arg_ptrs: *mut *mut u8, ret_buf: *mut u8) {
    let ctx = &*(ctx as *const ReverseContext);
    let TypeKind::Function(sig) = ctx.sig.kind() else { unreachable!("checked in ReverseBinding::callback") };

    let mut args = Vec::with_capacity(sig.args.len());
    for (i, (arg_ty, class)) in sig.args.iter().zip(ctx.plan.args.iter()).enumerate() {
        let slot = *arg_ptrs.add(i);
        let needs_hop = class.by_reference || matches!(arg_ty.kind(), TypeKind::Array { .. });
        let data = if needs_hop {
            let addr = usize::from_ne_bytes(std::slice::from_raw_parts(slot, 8).try_into().unwrap());
            addr as *const u8
        } else {
            slot as *const u8
        };
        args.push(dynffi_marshal::unmarshal(data, *arg_ty).unwrap_or(DynValue::Null));
    }

    let result = (ctx.handler)(&args).unwrap_or(DynValue::Null);
    if !matches!(sig.ret.kind(), TypeKind::Void) {
        let _ = dynffi_marshal::marshal(ret_buf, &result, sig.ret);
    }
}

pub struct ReverseBinding {
    state: ReverseBindingState,
    arena: Option<Box<Arena>>,
    jit: Option<Jit>,
    ctx: Option<Box<ReverseContext>>,
    entry_point: *const u8,
}

impl ReverseBinding {
    /// `callback(handler, signature)` per §6/§4.6: emits and RX-publishes
    /// the trampoline, handing back a `ReverseBinding` already in PUBLISHED
    /// state — the function pointer is live the moment this returns.
    ///
    /// Only signatures whose non-by-reference arguments fit in a single
    /// eightbyte (≤8 bytes, no multi-register aggregates passed by value)
    /// are supported; see `dynffi-jit::x64::reverse`. Pointer/by-reference
    /// arguments of any size are fine, which covers the common case of a
    /// callback taking pointers to its real arguments (e.g. a comparator).
    pub fn callback(
        signature: &str,
        conv: CallingConvention,
        handler: impl Fn(&[DynValue]) -> Result<DynValue, HostError> + 'static,
    ) -> Result<ReverseBinding, Error> {
        let arena = Box::new(Arena::create());
        let ty = dynffi_sig::parse(&arena, signature, None)?;
        if !matches!(ty.kind(), TypeKind::Function(_)) {
            return Err(Error::InvalidState { state: "not a function signature" });
        }
        // SAFETY: same contract as `Binding::parse` — `arena` is heap-boxed
        // and owned by this struct for at least as long as `sig` is read.
        let sig: Type<'static> = unsafe { std::mem::transmute(ty) };

        let TypeKind::Function(func_sig) = sig.kind() else { unreachable!() };
        let plan = dynffi_abi::host_abi().classify(func_sig, conv)?;

        let ctx = Box::new(ReverseContext { sig, plan: plan.clone(), handler: Box::new(handler) });
        let ctx_ptr = Box::into_raw(ctx);

        let mut jit = Jit::new();
        let entry_point = match jit.reverse_trampoline(&plan, dispatch, ctx_ptr as *mut u8) {
            Ok(p) => p,
            Err(e) => {
                // Reclaim the context box before surfacing the error; no
                // trampoline exists that could ever read through it.
                drop(unsafe { Box::from_raw(ctx_ptr) });
                return Err(e.into());
            }
        };
        jit.publish()?;

        Ok(ReverseBinding {
            state: ReverseBindingState::Published,
            arena: Some(arena),
            jit: Some(jit),
            ctx: Some(unsafe { Box::from_raw(ctx_ptr) }),
            entry_point,
        })
    }

    pub fn state(&self) -> ReverseBindingState {
        self.state
    }

    /// The raw function pointer other native code can call through. Only
    /// valid while this binding is PUBLISHED; calling through it after
    /// [`ReverseBinding::retire`] is undefined, same as any dangling
    /// function pointer.
    pub fn entry_point(&self) -> Result<*const u8, Error> {
        if self.state != ReverseBindingState::Published {
            return Err(Error::InvalidState { state: self.state.name() });
        }
        Ok(self.entry_point)
    }

    /// `retire(reverse_binding)` per §6: PUBLISHED → RETIRED, unmapping the
    /// trampoline page and dropping the dispatch context. Handing the raw
    /// pointer out in the first place means native code may still be
    /// holding it; the caller is responsible for knowing no one will call
    /// through it again before retiring.
    pub fn retire(&mut self) -> Result<(), Error> {
        if self.state != ReverseBindingState::Published {
            return Err(Error::InvalidState { state: self.state.name() });
        }
        self.state = ReverseBindingState::Retired;
        self.jit = None;
        self.arena = None;
        self.ctx = None;
        Ok(())
    }
}
