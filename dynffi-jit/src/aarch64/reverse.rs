//! Reverse trampoline emission for AAPCS64 (§4.6): mirrors
//! `x64::reverse`, repacking incoming argument registers/stack into a
//! `void** arg_ptrs` buffer before calling a fixed-signature dispatcher.

use super::asm::{Asm, FP, LR, SP, X0, X1, X19, X20, X21, X22, X8, X9};
use super::{float_arg_reg, int_arg_reg};
use dynffi_abi::{ArgClass, CallPlan, RetClass, Slot};

pub type DispatchFn = unsafe extern "C" fn(*mut u8, *mut *mut u8, *mut u8);

pub fn emit(plan: &CallPlan, dispatch: DispatchFn, ctx: *mut u8) -> Vec<u8> {
    let mut a = Asm::new();

    let arg_count = plan.args.len() as i32;
    let arg_ptrs_off = -8 * arg_count;
    let values_off = arg_ptrs_off - 8 * arg_count;
    let ret_buf_off = values_off - 16;
    let frame_size = round_up16((-ret_buf_off) as u32);

    a.stp_pre(FP, LR, SP, -16);
    a.mov_reg(FP, SP);
    a.stp_pre(X19, X20, SP, -16);
    a.stp_pre(X21, X22, SP, -16);
    if frame_size > 0 {
        a.sub_imm(SP, SP, frame_size);
    }

    for (i, ArgClass { slots, by_reference }) in plan.args.iter().enumerate() {
        let value_slot_off = values_off + (i as i32) * 8;
        if *by_reference {
            match slots.as_slice() {
                [Slot::IntReg(n)] | [Slot::ByRefIntReg(n)] => a.stur(int_arg_reg(*n), FP, value_slot_off),
                [Slot::Stack(off)] | [Slot::ByRefStack(off)] => {
                    a.ldur(X9, FP, caller_stack_disp(*off));
                    a.stur(X9, FP, value_slot_off);
                }
                _ => {}
            }
        } else {
            match slots.first() {
                Some(Slot::IntReg(n)) => a.stur(int_arg_reg(*n), FP, value_slot_off),
                Some(Slot::FloatReg(n)) => a.stur_d(float_arg_reg(*n), FP, value_slot_off),
                Some(Slot::Stack(off)) => {
                    a.ldur(X9, FP, caller_stack_disp(*off));
                    a.stur(X9, FP, value_slot_off);
                }
                _ => {}
            }
        }
        // `add_imm` only encodes positive immediates; value_slot_off is
        // negative (below fp), so compute the address via fp - |off|.
        a.sub_imm(X9, FP, (-value_slot_off) as u32);
        a.stur(X9, FP, arg_ptrs_off + (i as i32) * 8);
    }

    a.sub_imm(X19, FP, (-arg_ptrs_off) as u32);
    if plan.ret == RetClass::Mem {
        // x8 carried the caller's result-buffer address in untouched
        // through the arg-repacking loop above; hand that straight to
        // the dispatcher instead of our local scratch slot.
        a.mov_reg(X20, X8);
    } else {
        a.sub_imm(X20, FP, (-ret_buf_off) as u32);
    }
    a.mov_imm64(X21, ctx as u64);
    a.mov_imm64(X22, dispatch as usize as u64);

    a.mov_reg(X0, X21);
    a.mov_reg(X1, X19);
    a.mov_reg(super::asm::X2, X20);
    a.blr(X22);

    match plan.ret {
        RetClass::Void => {}
        RetClass::Int => a.ldur(X0, FP, ret_buf_off),
        RetClass::Float => a.ldur_d(0, FP, ret_buf_off),
        RetClass::StructRegPair => {
            a.ldur(X0, FP, ret_buf_off);
            a.ldur(X1, FP, ret_buf_off + 8);
        }
        // AAPCS64, unlike x86-64, doesn't require echoing the hidden
        // pointer back in a register.
        RetClass::Mem => {}
    }

    if frame_size > 0 {
        a.add_imm(SP, SP, frame_size);
    }
    a.ldp_post(X21, X22, SP, 16);
    a.ldp_post(X19, X20, SP, 16);
    a.ldp_post(FP, LR, SP, 16);
    a.ret();

    a.bytes()
}

fn round_up16(n: u32) -> u32 {
    (n + 15) & !15
}

/// Stack args sit above our saved-register block; `off` is relative to
/// the incoming `sp`, so add back the 48 bytes of `stp`-pushed registers
/// between the caller's view of the stack and our `fp`-relative frame.
fn caller_stack_disp(off: u32) -> i32 {
    off as i32 + 48
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "C" fn dummy_dispatch(_ctx: *mut u8, _args: *mut *mut u8, _ret: *mut u8) {}

    #[test]
    fn void_no_args_callback_stub_builds() {
        let plan = CallPlan { args: vec![], ret: RetClass::Void, frame_size: 0, frame_align: 16 };
        let code = emit(&plan, dummy_dispatch, std::ptr::null_mut());
        assert!(!code.is_empty());
        assert_eq!(code.len() % 4, 0);
    }

    #[test]
    fn single_int_arg_callback_stub_builds() {
        let plan = CallPlan {
            args: vec![ArgClass { slots: vec![Slot::IntReg(0)], by_reference: false }],
            ret: RetClass::Int,
            frame_size: 0,
            frame_align: 16,
        };
        let code = emit(&plan, dummy_dispatch, std::ptr::null_mut());
        assert!(code.len() > 16);
    }
}
