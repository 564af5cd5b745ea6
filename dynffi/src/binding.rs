//! Forward bindings (§3/§4.1-§4.5): a parsed function signature, classified
//! into a [`CallPlan`], with one emitted trampoline ready to call through.
//!
//! Each `Binding` owns a private [`Jit`] rather than sharing one across
//! bindings. `Jit::publish` (mirroring `CodeMemory::publish`) is one-way —
//! once a `Jit` is published no further trampoline can be emitted into it —
//! so a shared `Jit` would let only the first binding ever reach ACTIVE.
//! The cost is that structurally identical signatures no longer share a
//! cached trampoline across bindings, only within one (see DESIGN.md).

use crate::error::Error;
use crate::library::Library;
use crate::state::BindingState;
use dynffi_abi::{Abi, CallPlan, CallingConvention, RetClass};
use dynffi_arena::Arena;
use dynffi_jit::Jit;
use dynffi_marshal::DynValue;
use dynffi_types::{FunctionSig, Type, TypeKind};

pub struct Binding {
    state: BindingState,
    arena: Option<Box<Arena>>,
    sig: Type<'static>,
    symbol: *const u8,
    plan: Option<CallPlan>,
    jit: Option<Jit>,
    trampoline: Option<*const u8>,
}

impl Binding {
    /// `bind(library, name, signature)` per §6. Walks
    /// UNBOUND → PARSED → CLASSIFIED → EMITTED → ACTIVE in one call; a real
    /// embedding might pause between these to inspect the plan, but this
    /// crate has no caller that needs to.
    pub fn bind(lib: &Library, name: &str, signature: &str, conv: CallingConvention) -> Result<Binding, Error> {
        let symbol = lib.find_symbol(name)?;
        let mut b = Binding {
            state: BindingState::Unbound,
            arena: Some(Box::new(Arena::create())),
            sig: dynffi_types::void(),
            symbol,
            plan: None,
            jit: Some(Jit::new()),
            trampoline: None,
        };
        b.parse(signature)?;
        b.classify(conv)?;
        b.emit()?;
        b.activate()?;
        Ok(b)
    }

    /// `wrap(library, name, signature)` per §6: in this crate there is no
    /// concrete host-namespace glue to install the result into, so `wrap`
    /// and `bind` run the identical sequence. A real embedding's `wrap`
    /// would additionally register the callable under its own name.
    pub fn wrap(lib: &Library, name: &str, signature: &str, conv: CallingConvention) -> Result<Binding, Error> {
        Binding::bind(lib, name, signature, conv)
    }

    pub fn state(&self) -> BindingState {
        self.state
    }

    fn require(&self, expected: BindingState) -> Result<(), Error> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::InvalidState { state: self.state.name() })
        }
    }

    fn parse(&mut self, signature: &str) -> Result<(), Error> {
        self.require(BindingState::Unbound)?;
        let arena = self.arena.as_ref().expect("present until RELEASED");
        let ty = dynffi_sig::parse(arena, signature, None)?;
        if !matches!(ty.kind(), TypeKind::Function(_)) {
            return Err(Error::InvalidState { state: "not a function signature" });
        }
        // SAFETY: `ty` borrows from `*arena`. `arena` is heap-boxed so its
        // chunks' addresses are stable across any move of `Binding` itself,
        // and `self.arena` lives at least as long as `self.sig` is read
        // (dropped together in `release`) — the same "handed off whole"
        // contract `dynffi-arena` documents for its consumers.
        self.sig = unsafe { std::mem::transmute::<Type<'_>, Type<'static>>(ty) };
        self.state = BindingState::Parsed;
        Ok(())
    }

    fn classify(&mut self, conv: CallingConvention) -> Result<(), Error> {
        self.require(BindingState::Parsed)?;
        let TypeKind::Function(sig) = self.sig.kind() else { unreachable!("checked in parse()") };
        let plan = dynffi_abi::host_abi().classify(sig, conv)?;
        self.plan = Some(plan);
        self.state = BindingState::Classified;
        Ok(())
    }

    fn emit(&mut self) -> Result<(), Error> {
        self.require(BindingState::Classified)?;
        let plan = self.plan.as_ref().expect("set in classify()");
        let jit = self.jit.as_mut().expect("present until RELEASED");
        let trampoline = jit.forward_trampoline(plan)?;
        jit.publish()?;
        self.trampoline = Some(trampoline);
        self.state = BindingState::Emitted;
        Ok(())
    }

    fn activate(&mut self) -> Result<(), Error> {
        self.require(BindingState::Emitted)?;
        self.state = BindingState::Active;
        Ok(())
    }

    fn function_sig(&self) -> &FunctionSig<'static> {
        match self.sig.kind() {
            TypeKind::Function(sig) => sig,
            _ => unreachable!("checked in parse()"),
        }
    }

    /// `call(binding, args)` per §6/§4.5. Marshals every argument into its
    /// own scratch buffer first; any marshal failure drops `scratch` (and
    /// everything marshalled into it so far) before the trampoline is ever
    /// reached, per §7's "no native side-effects on a partial failure".
    pub fn call(&self, args: &[DynValue]) -> Result<DynValue, Error> {
        self.require(BindingState::Active)?;
        let sig = self.function_sig();
        let plan = self.plan.as_ref().expect("set by classify()");
        if args.len() != sig.args.len() {
            return Err(dynffi_marshal::MarshalError::LengthMismatch { expected: sig.args.len(), got: args.len() }.into());
        }

        // Backing storage for arguments whose value is an address into
        // separately-marshalled data (arrays decaying to a pointer at the
        // call boundary); kept alive alongside `scratch` but never itself
        // referenced by `arg_ptrs`.
        let mut backing: Vec<Vec<u8>> = Vec::new();
        let mut scratch: Vec<Vec<u8>> = Vec::with_capacity(args.len());
        for (class, (arg_ty, value)) in plan.args.iter().zip(sig.args.iter().zip(args)) {
            let buf = if class.by_reference {
                // The trampoline takes this slot's own address as the
                // pointer argument, so it must hold the real bytes directly.
                let mut b = vec![0u8; (arg_ty.size() as usize).max(1)];
                unsafe { dynffi_marshal::marshal(b.as_mut_ptr(), value, *arg_ty)? };
                b
            } else if matches!(arg_ty.kind(), TypeKind::Array { .. }) {
                // Classified as a single pointer-sized slot (arrays decay at
                // the call boundary), but `marshal` writes an array's actual
                // element bytes, not an address — marshal into backing
                // storage of its own and pass that storage's address as the
                // 8-byte slot value the trampoline loads into the register.
                let mut pointee = vec![0u8; (arg_ty.size() as usize).max(1)];
                unsafe { dynffi_marshal::marshal(pointee.as_mut_ptr(), value, *arg_ty)? };
                let addr = pointee.as_mut_ptr() as usize;
                backing.push(pointee);
                addr.to_ne_bytes().to_vec()
            } else {
                // The trampoline always loads 8-byte-granular chunks per
                // slot (see x64::forward), so buffers need room for every
                // slot regardless of the scalar's true width.
                let len = (class.slots.len() * 8).max(8);
                let mut b = vec![0u8; len];
                unsafe { dynffi_marshal::marshal(b.as_mut_ptr(), value, *arg_ty)? };
                b
            };
            scratch.push(buf);
        }
        let mut arg_ptrs: Vec<*mut u8> = scratch.iter_mut().map(|b| b.as_mut_ptr()).collect();

        let ret_len = match plan.ret {
            RetClass::Void | RetClass::Int | RetClass::Float => 8,
            RetClass::StructRegPair => 16,
            RetClass::Mem => (sig.ret.size() as usize).max(1),
        };
        let mut ret_buf = vec![0u8; ret_len];

        type ForwardFn = unsafe extern "C" fn(*const u8, *mut u8, *mut *mut u8);
        let f: ForwardFn = unsafe { std::mem::transmute(self.trampoline.expect("set by emit()")) };
        unsafe { f(self.symbol, ret_buf.as_mut_ptr(), arg_ptrs.as_mut_ptr()) };

        if matches!(sig.ret.kind(), TypeKind::Void) {
            return Ok(DynValue::Null);
        }
        Ok(unsafe { dynffi_marshal::unmarshal(ret_buf.as_ptr(), sig.ret)? })
    }

    /// `release(binding)` per §6: ACTIVE → RELEASED, unmapping the
    /// trampoline page and freeing the signature graph's arena.
    pub fn release(&mut self) -> Result<(), Error> {
        self.require(BindingState::Active)?;
        self.state = BindingState::Released;
        self.jit = None;
        self.arena = None;
        self.plan = None;
        self.trampoline = None;
        Ok(())
    }
}
