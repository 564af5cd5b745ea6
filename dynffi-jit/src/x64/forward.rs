//! Forward trampoline emission for x86-64 (both System V and Win64; the
//! two conventions only differ in which physical register each `Slot`
//! index names, already resolved by `dynffi-abi`'s `CallPlan`).
//!
//! Emits a function of C signature
//! `void trampoline(void* symbol, void* ret_buf, void** arg_ptrs)` per §4.5.

use super::asm::{Asm, Reg, R12, R13, RAX, RBP, RBX, RDX, RSP};
use super::Convention;
use dynffi_abi::{ArgClass, CallPlan, RetClass, Slot};

/// `arg_ptrs[i]` is loaded into `RAX` as scratch, then the value's bytes
/// (at `sub_offset` eightbytes in) are read from `[RAX + sub_offset]`.
fn load_arg_ptr(a: &mut Asm, conv: Convention, arg_ptrs_reg: Reg, index: usize) {
    a.mov_reg_mem(RAX, arg_ptrs_reg, (index * 8) as i32);
    let _ = conv;
}

pub fn emit(plan: &CallPlan, conv: Convention) -> Vec<u8> {
    let mut a = Asm::new();

    let (symbol_in, ret_buf_in, arg_ptrs_in) = (
        conv.int_arg_reg(0),
        conv.int_arg_reg(1),
        conv.int_arg_reg(2),
    );

    a.push_reg(RBP);
    a.mov_reg_reg(RBP, RSP);
    a.push_reg(RBX);
    a.push_reg(R12);
    a.push_reg(R13);
    a.mov_reg_reg(RBX, symbol_in);
    a.mov_reg_reg(R12, ret_buf_in);
    a.mov_reg_reg(R13, arg_ptrs_in);

    if plan.frame_size > 0 {
        a.sub_rsp_imm32(plan.frame_size as i32);
    }

    if plan.ret == RetClass::Mem {
        a.mov_reg_reg(conv.hidden_ret_ptr_reg(), R12);
    }

    for (i, ArgClass { slots, by_reference }) in plan.args.iter().enumerate() {
        if *by_reference {
            // The arg_ptrs[i] entry already holds the address of a
            // caller-made copy; pass that address itself (§4.5 step 2).
            load_arg_ptr(&mut a, conv, R13, i);
            match slots.as_slice() {
                [Slot::IntReg(n)] => a.mov_reg_reg(conv.int_arg_reg(*n), RAX),
                [Slot::Stack(off)] | [Slot::ByRefStack(off)] => a.mov_mem_reg(RSP, *off as i32, RAX),
                [Slot::ByRefIntReg(n)] => a.mov_reg_reg(conv.int_arg_reg(*n), RAX),
                _ => {}
            }
            continue;
        }

        load_arg_ptr(&mut a, conv, R13, i);
        for (j, slot) in slots.iter().enumerate() {
            let sub_off = (j * 8) as i32;
            match slot {
                Slot::IntReg(n) => a.mov_reg_mem(conv.int_arg_reg(*n), RAX, sub_off),
                Slot::FloatReg(n) => a.movsd_xmm_mem(conv.float_arg_reg(*n), RAX, sub_off),
                Slot::Stack(off) => {
                    a.mov_reg_mem(RDX, RAX, sub_off);
                    a.mov_mem_reg(RSP, *off as i32, RDX);
                }
                Slot::ByRefIntReg(_) | Slot::ByRefStack(_) => unreachable!("handled above"),
            }
        }
    }

    a.call_reg(RBX);

    match plan.ret {
        RetClass::Void => {}
        RetClass::Int => a.mov_mem_reg(R12, 0, RAX),
        RetClass::Float => a.movsd_mem_xmm(R12, 0, 0),
        RetClass::StructRegPair => {
            a.mov_mem_reg(R12, 0, RAX);
            a.mov_mem_reg(R12, 8, RDX);
        }
        RetClass::Mem => {}
    }

    if plan.frame_size > 0 {
        a.add_rsp_imm32(plan.frame_size as i32);
    }
    a.pop_reg(R13);
    a.pop_reg(R12);
    a.pop_reg(RBX);
    a.pop_reg(RBP);
    a.ret();

    a.bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn void_no_args_trampoline_has_matched_prologue_epilogue() {
        let plan = CallPlan { args: vec![], ret: RetClass::Void, frame_size: 0, frame_align: 16 };
        let code = emit(&plan, Convention::SysV);
        assert_eq!(code[0], 0x55); // push rbp
        assert_eq!(*code.last().unwrap(), 0xc3); // ret
    }

    #[test]
    fn int_return_is_stored_through_ret_buf_register() {
        let plan = CallPlan {
            args: vec![ArgClass { slots: vec![Slot::IntReg(0)], by_reference: false }],
            ret: RetClass::Int,
            frame_size: 0,
            frame_align: 16,
        };
        let code = emit(&plan, Convention::SysV);
        assert!(!code.is_empty());
    }

    #[test]
    fn win64_and_sysv_trampolines_differ_in_register_selection() {
        let plan = CallPlan {
            args: vec![ArgClass { slots: vec![Slot::IntReg(0)], by_reference: false }],
            ret: RetClass::Int,
            frame_size: 0,
            frame_align: 16,
        };
        let sysv = emit(&plan, Convention::SysV);
        let win64 = emit(&plan, Convention::Win64);
        assert_ne!(sysv, win64);
    }
}
