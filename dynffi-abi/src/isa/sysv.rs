//! System V AMD64 classification (Linux, macOS x86_64, *BSD). Six integer
//! argument registers (rdi, rsi, rdx, rcx, r8, r9), eight SSE registers
//! (xmm0-7); aggregates ≤16 bytes are classified per-eightbyte as
//! INTEGER/SSE/MEMORY per rule 1 (§4.4); anything larger is copied directly
//! onto the outgoing stack (SysV's MEMORY class is a direct copy, not a
//! pointer indirection — unlike Win64/AAPCS64's large-aggregate handling).

use crate::{round_up, flatten_scalars, Abi, AbiError, ArgClass, CallPlan, CallingConvention, RetClass, ScalarKind, Slot};
use dynffi_types::{FunctionSig, PrimitiveKind, Type, TypeKind};

const INT_REGS: u8 = 6;
const SSE_REGS: u8 = 8;
const EIGHTBYTE: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Eightbyte {
    Integer,
    Sse,
}

/// Classifies a ≤16-byte struct/union per-eightbyte (rule 1): an eightbyte
/// containing any integer/pointer leaf is INTEGER; one containing only
/// float leaves, or none at all (pure padding), is SSE.
fn classify_eightbytes(ty: Type<'_>) -> Vec<Eightbyte> {
    let mut leaves = Vec::new();
    flatten_scalars(ty, 0, &mut leaves);
    let count = ((ty.size() + EIGHTBYTE - 1) / EIGHTBYTE).max(1);
    (0..count)
        .map(|i| {
            let lo = i * EIGHTBYTE;
            let hi = lo + EIGHTBYTE;
            let has_int_leaf = leaves
                .iter()
                .any(|&(offset, kind, size)| offset < hi && offset + size > lo && kind == ScalarKind::Integer);
            if has_int_leaf {
                Eightbyte::Integer
            } else {
                Eightbyte::Sse
            }
        })
        .collect()
}

struct Cursor {
    int_used: u8,
    sse_used: u8,
    stack_off: u32,
}

impl Cursor {
    fn take_int(&mut self) -> Option<u8> {
        if self.int_used < INT_REGS {
            let r = self.int_used;
            self.int_used += 1;
            Some(r)
        } else {
            None
        }
    }

    fn take_sse(&mut self) -> Option<u8> {
        if self.sse_used < SSE_REGS {
            let r = self.sse_used;
            self.sse_used += 1;
            Some(r)
        } else {
            None
        }
    }

    fn push_stack(&mut self, size: u32) -> u32 {
        let off = round_up(self.stack_off, 8);
        self.stack_off = off + size.max(8);
        off
    }
}

fn classify_arg(cur: &mut Cursor, ty: Type<'_>) -> Result<ArgClass, AbiError> {
    match ty.kind() {
        TypeKind::Struct(_) | TypeKind::Union(_) if ty.size() <= 16 && ty.size() > 0 => {
            let classes = classify_eightbytes(ty);
            // SysV only commits registers if *every* eightbyte can be
            // satisfied; otherwise the whole aggregate spills to the stack.
            let needs_int = classes.iter().filter(|c| **c == Eightbyte::Integer).count() as u8;
            let needs_sse = classes.iter().filter(|c| **c == Eightbyte::Sse).count() as u8;
            if cur.int_used + needs_int <= INT_REGS && cur.sse_used + needs_sse <= SSE_REGS {
                let mut slots = Vec::with_capacity(classes.len());
                for class in &classes {
                    slots.push(match class {
                        Eightbyte::Integer => Slot::IntReg(cur.take_int().expect("reserved above")),
                        Eightbyte::Sse => Slot::FloatReg(cur.take_sse().expect("reserved above")),
                    });
                }
                Ok(ArgClass { slots, by_reference: false })
            } else {
                let off = cur.push_stack(ty.size());
                Ok(ArgClass { slots: vec![Slot::Stack(off)], by_reference: false })
            }
        }
        TypeKind::Struct(_) | TypeKind::Union(_) => {
            // >16 bytes: MEMORY class, copied directly onto the stack as
            // consecutive eightbytes (rule 1).
            let count = (ty.size() + EIGHTBYTE - 1) / EIGHTBYTE;
            let mut slots = Vec::with_capacity(count as usize);
            for _ in 0..count {
                slots.push(Slot::Stack(cur.push_stack(EIGHTBYTE)));
            }
            Ok(ArgClass { slots, by_reference: false })
        }
        TypeKind::Array { .. } => {
            // Arrays decay to a pointer at the call boundary; never passed
            // by value directly in this grammar's calling convention.
            classify_scalar(cur, false)
        }
        TypeKind::Primitive(p) if p.is_float() => classify_scalar(cur, true),
        TypeKind::Void => Ok(ArgClass { slots: vec![], by_reference: false }),
        _ => classify_scalar(cur, false),
    }
}

fn classify_scalar(cur: &mut Cursor, is_float: bool) -> Result<ArgClass, AbiError> {
    let slot = if is_float {
        cur.take_sse().map(Slot::FloatReg)
    } else {
        cur.take_int().map(Slot::IntReg)
    };
    let slot = slot.unwrap_or_else(|| Slot::Stack(cur.push_stack(8)));
    Ok(ArgClass { slots: vec![slot], by_reference: false })
}

fn classify_ret(ret: Type<'_>) -> RetClass {
    match ret.kind() {
        TypeKind::Void => RetClass::Void,
        TypeKind::Primitive(p) if p.is_float() => RetClass::Float,
        TypeKind::Struct(_) | TypeKind::Union(_) if ret.size() <= 16 && ret.size() > 0 => RetClass::StructRegPair,
        TypeKind::Struct(_) | TypeKind::Union(_) => RetClass::Mem,
        _ => RetClass::Int,
    }
}

pub struct SysVAbi;

impl Abi for SysVAbi {
    fn classify(&self, func: &FunctionSig<'_>, conv: CallingConvention) -> Result<CallPlan, AbiError> {
        if !matches!(conv, CallingConvention::Default | CallingConvention::Cdecl) {
            return Err(AbiError::UnsupportedAbi {
                reason: format!("{conv:?} is not a System V calling convention"),
            });
        }
        if matches!(func.ret.kind(), TypeKind::Primitive(PrimitiveKind::F80)) {
            return Err(AbiError::UnsupportedAbi {
                reason: "long double (80-bit x87) return is not supported".to_string(),
            });
        }

        let mut cur = Cursor { int_used: 0, sse_used: 0, stack_off: 0 };
        let ret = classify_ret(func.ret);
        // A MEM return consumes the first integer register for the hidden
        // pointer before any argument is classified.
        if ret == RetClass::Mem {
            cur.take_int();
        }
        let mut args = Vec::with_capacity(func.args.len());
        for arg in func.args {
            args.push(classify_arg(&mut cur, *arg)?);
        }
        Ok(CallPlan {
            args,
            ret,
            frame_size: round_up(cur.stack_off, 16),
            frame_align: 16,
        })
    }
}
