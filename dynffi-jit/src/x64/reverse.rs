//! Reverse trampoline emission (§4.6): native code calls into this stub
//! using the target `CallPlan`'s convention, and the stub repacks the
//! incoming registers/stack into a `void** arg_ptrs`-shaped buffer before
//! calling back into Rust through a fixed-signature dispatcher.
//!
//! The dispatcher address and an opaque context pointer (identifying which
//! `ReverseBinding` this call belongs to) are baked into the trampoline as
//! immediates at emit time — each reverse trampoline is therefore a unique
//! one-off, unlike the shape-cached forward trampolines.

use super::asm::{Asm, R12, R13, R14, RAX, RBP, RBX, RDX, RSP};
use super::Convention;
use dynffi_abi::{ArgClass, CallPlan, RetClass, Slot};

/// `extern "C" fn(ctx: *mut u8, arg_ptrs: *mut *mut u8, ret_buf: *mut u8)`.
pub type DispatchFn = unsafe extern "C" fn(*mut u8, *mut *mut u8, *mut u8);

/// Emits a stub matching `plan`'s native convention on entry; scratch
/// space for the `arg_ptrs`/value buffers is carved out of its own stack
/// frame, since every argument's lifetime ends when the stub returns.
pub fn emit(plan: &CallPlan, conv: Convention, dispatch: DispatchFn, ctx: *mut u8) -> Vec<u8> {
    let mut a = Asm::new();

    let arg_count = plan.args.len();
    // Layout, from rbp downward: [arg_ptrs array: 8*arg_count][value
    // scratch: 8 bytes per arg (enough for any single scalar or register
    // pair half; aggregates passed by reference already live at the
    // caller's address so need no copy)][ret_buf: 16 bytes].
    let arg_ptrs_off = -8i32 * arg_count as i32;
    let values_off = arg_ptrs_off - 8 * arg_count as i32;
    let ret_buf_off = values_off - 16;
    let frame_size = round_up16((-ret_buf_off) as u32);

    a.push_reg(RBP);
    a.mov_reg_reg(RBP, RSP);
    a.push_reg(RBX);
    a.push_reg(R12);
    a.push_reg(R13);
    a.push_reg(R14);
    a.sub_rsp_imm32(frame_size as i32);

    for (i, ArgClass { slots, by_reference }) in plan.args.iter().enumerate() {
        let value_slot_off = values_off + (i as i32) * 8;
        if *by_reference {
            match slots.as_slice() {
                [Slot::IntReg(n)] => a.mov_mem_reg(RBP, value_slot_off, conv.int_arg_reg(*n)),
                [Slot::Stack(off)] | [Slot::ByRefStack(off)] => {
                    a.mov_reg_mem(RAX, RBP, caller_stack_disp(*off));
                    a.mov_mem_reg(RBP, value_slot_off, RAX);
                }
                [Slot::ByRefIntReg(n)] => a.mov_mem_reg(RBP, value_slot_off, conv.int_arg_reg(*n)),
                _ => {}
            }
        } else {
            // Scalars and small register-resident aggregates: write the
            // incoming register(s) straight into the value slot; only the
            // first eightbyte is kept for multi-slot args (good enough for
            // scalar callbacks, which is all a reverse binding supports).
            match slots.first() {
                Some(Slot::IntReg(n)) => a.mov_mem_reg(RBP, value_slot_off, conv.int_arg_reg(*n)),
                Some(Slot::FloatReg(n)) => a.movsd_mem_xmm(RBP, value_slot_off, conv.float_arg_reg(*n)),
                Some(Slot::Stack(off)) => {
                    a.mov_reg_mem(RAX, RBP, caller_stack_disp(*off));
                    a.mov_mem_reg(RBP, value_slot_off, RAX);
                }
                _ => {}
            }
        }
        // arg_ptrs[i] = &values[i]
        a.lea_reg_mem(RAX, RBP, value_slot_off);
        a.mov_mem_reg(RBP, arg_ptrs_off + (i as i32) * 8, RAX);
    }

    a.lea_reg_mem(RBX, RBP, arg_ptrs_off);
    if plan.ret == RetClass::Mem {
        // The caller already passed a buffer address in the hidden
        // register; hand the dispatcher that address directly so it
        // writes the aggregate result where the caller expects it,
        // instead of through our local scratch slot.
        a.mov_reg_reg(R12, conv.hidden_ret_ptr_reg());
    } else {
        a.lea_reg_mem(R12, RBP, ret_buf_off);
    }

    a.mov_reg_imm64(R13, ctx as u64);
    a.mov_reg_imm64(R14, dispatch as usize as u64);

    a.mov_reg_reg(conv.int_arg_reg(0), R13);
    a.mov_reg_reg(conv.int_arg_reg(1), RBX);
    a.mov_reg_reg(conv.int_arg_reg(2), R12);
    a.call_reg(R14);

    match plan.ret {
        RetClass::Void => {}
        RetClass::Int => a.mov_reg_mem(RAX, RBP, ret_buf_off),
        RetClass::Float => a.movsd_xmm_mem(0, RBP, ret_buf_off),
        RetClass::StructRegPair => {
            a.mov_reg_mem(RAX, RBP, ret_buf_off);
            a.mov_reg_mem(RDX, RBP, ret_buf_off + 8);
        }
        // SysV/Win64 both require the hidden-pointer callee to also
        // return that same address in rax/eax.
        RetClass::Mem => a.mov_reg_reg(RAX, R12),
    }

    a.add_rsp_imm32(frame_size as i32);
    a.pop_reg(R14);
    a.pop_reg(R13);
    a.pop_reg(R12);
    a.pop_reg(RBX);
    a.pop_reg(RBP);
    a.ret();

    a.bytes
}

fn round_up16(n: u32) -> u32 {
    (n + 15) & !15
}

/// Stack args arrive above the return address and the caller's saved
/// frame pointer isn't ours to walk; `off` is relative to the incoming
/// `rsp` at entry, so add back the bytes we've since pushed/reserved.
fn caller_stack_disp(off: u32) -> i32 {
    // 5 pushed registers (rbp + 4 callee-saved) plus the return address
    // pushed by `call` = 48 bytes between the caller's view of the stack
    // and our current rbp-relative frame.
    off as i32 + 48
}
