//! Forward trampoline emission for AAPCS64: `void trampoline(void* symbol,
//! void* ret_buf, void** arg_ptrs)` per §4.5, with `x0`/`x1`/`x2` as the
//! trampoline's own entry registers (AAPCS64 has one convention, so unlike
//! `x64::forward` there's no `Convention` parameter here).

use super::asm::{Asm, FP, LR, X0, X1, X2, X9, X10, X19, X20, X21, X22};
use super::{float_arg_reg, int_arg_reg, HIDDEN_RET_PTR_REG};
use dynffi_abi::{ArgClass, CallPlan, RetClass, Slot};

pub fn emit(plan: &CallPlan) -> Vec<u8> {
    let mut a = Asm::new();

    a.stp_pre(FP, LR, super::asm::SP, -16);
    a.mov_reg(FP, super::asm::SP);
    a.stp_pre(X19, X20, super::asm::SP, -16);
    a.stp_pre(X21, X22, super::asm::SP, -16);

    a.mov_reg(X19, X0); // symbol
    a.mov_reg(X20, X1); // ret_buf
    a.mov_reg(X21, X2);

    if plan.frame_size > 0 {
        a.sub_imm(super::asm::SP, super::asm::SP, plan.frame_size);
    }

    if plan.ret == RetClass::Mem {
        a.mov_reg(HIDDEN_RET_PTR_REG, X20);
    }

    for (i, ArgClass { slots, by_reference }) in plan.args.iter().enumerate() {
        a.ldur(X9, X21, (i * 8) as i32);
        if *by_reference {
            match slots.as_slice() {
                [Slot::IntReg(n)] | [Slot::ByRefIntReg(n)] => a.mov_reg(int_arg_reg(*n), X9),
                [Slot::Stack(off)] | [Slot::ByRefStack(off)] => a.stur(X9, super::asm::SP, *off as i32),
                _ => {}
            }
            continue;
        }
        for (j, slot) in slots.iter().enumerate() {
            let sub_off = (j * 8) as i32;
            match slot {
                Slot::IntReg(n) => a.ldur(int_arg_reg(*n), X9, sub_off),
                Slot::FloatReg(n) => a.ldur_d(float_arg_reg(*n), X9, sub_off),
                Slot::Stack(off) => {
                    a.ldur(X10, X9, sub_off);
                    a.stur(X10, super::asm::SP, *off as i32);
                }
                Slot::ByRefIntReg(_) | Slot::ByRefStack(_) => unreachable!("handled above"),
            }
        }
    }

    a.blr(X19);

    match plan.ret {
        RetClass::Void => {}
        RetClass::Int => a.stur(X0, X20, 0),
        RetClass::Float => a.stur_d(0, X20, 0),
        RetClass::StructRegPair => {
            a.stur(X0, X20, 0);
            a.stur(X1, X20, 8);
        }
        RetClass::Mem => {}
    }

    if plan.frame_size > 0 {
        a.add_imm(super::asm::SP, super::asm::SP, plan.frame_size);
    }
    a.ldp_post(X21, X22, super::asm::SP, 16);
    a.ldp_post(X19, X20, super::asm::SP, 16);
    a.ldp_post(FP, LR, super::asm::SP, 16);
    a.ret();

    a.bytes()
}
