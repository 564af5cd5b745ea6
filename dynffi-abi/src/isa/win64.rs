//! Microsoft x64 classification. Four argument slots (rcx/rdx/r8/r9 paired
//! positionally with xmm0-3): argument position, not type, picks the slot
//! index, and whether it's the integer or float register at that index
//! depends on the argument's own type (rule 2, §4.4). A 32-byte shadow space
//! is reserved by the caller ahead of the first stack argument regardless of
//! how many registers are actually used.

use crate::{round_up, Abi, AbiError, ArgClass, CallPlan, CallingConvention, RetClass, Slot};
use dynffi_types::{FunctionSig, PrimitiveKind, Type, TypeKind};

const ARG_SLOTS: u8 = 4;
const SHADOW_SPACE: u32 = 32;

fn is_pass_in_register_size(size: u32) -> bool {
    matches!(size, 1 | 2 | 4 | 8)
}

fn is_single_float_aggregate(ty: Type<'_>) -> bool {
    match ty.kind() {
        TypeKind::Struct(agg) | TypeKind::Union(agg) => {
            agg.members.len() == 1 && matches!(agg.members[0].ty.kind(), TypeKind::Primitive(p) if p.is_float())
        }
        _ => false,
    }
}

struct Cursor {
    position: u8,
    stack_off: u32,
}

impl Cursor {
    fn next_slot(&mut self, is_float: bool) -> Option<Slot> {
        if self.position < ARG_SLOTS {
            let i = self.position;
            self.position += 1;
            Some(if is_float { Slot::FloatReg(i) } else { Slot::IntReg(i) })
        } else {
            None
        }
    }

    fn push_stack(&mut self) -> u32 {
        let off = round_up(self.stack_off, 8);
        self.stack_off = off + 8;
        off
    }
}

fn classify_arg(cur: &mut Cursor, ty: Type<'_>) -> ArgClass {
    match ty.kind() {
        TypeKind::Void => ArgClass { slots: vec![], by_reference: false },
        TypeKind::Primitive(p) if p.is_float() => {
            let slot = cur.next_slot(true).unwrap_or_else(|| Slot::Stack(cur.push_stack()));
            ArgClass { slots: vec![slot], by_reference: false }
        }
        TypeKind::Struct(_) | TypeKind::Union(_) if is_pass_in_register_size(ty.size()) => {
            let is_float = is_single_float_aggregate(ty);
            let slot = cur.next_slot(is_float).unwrap_or_else(|| Slot::Stack(cur.push_stack()));
            ArgClass { slots: vec![slot], by_reference: false }
        }
        TypeKind::Struct(_) | TypeKind::Union(_) => {
            // Rule 2: every other aggregate size passes by reference — the
            // caller makes a hidden copy and passes its address.
            let slot = match cur.next_slot(false) {
                Some(Slot::IntReg(i)) => Slot::ByRefIntReg(i),
                _ => Slot::ByRefStack(cur.push_stack()),
            };
            ArgClass { slots: vec![slot], by_reference: true }
        }
        _ => {
            let slot = cur.next_slot(false).unwrap_or_else(|| Slot::Stack(cur.push_stack()));
            ArgClass { slots: vec![slot], by_reference: false }
        }
    }
}

fn classify_ret(ret: Type<'_>) -> RetClass {
    match ret.kind() {
        TypeKind::Void => RetClass::Void,
        TypeKind::Primitive(p) if p.is_float() => RetClass::Float,
        TypeKind::Struct(_) | TypeKind::Union(_) if is_pass_in_register_size(ret.size()) => {
            if is_single_float_aggregate(ret) {
                RetClass::Float
            } else {
                RetClass::Int
            }
        }
        TypeKind::Struct(_) | TypeKind::Union(_) => RetClass::Mem,
        _ => RetClass::Int,
    }
}

pub struct Win64Abi;

impl Abi for Win64Abi {
    fn classify(&self, func: &FunctionSig<'_>, conv: CallingConvention) -> Result<CallPlan, AbiError> {
        if matches!(conv, CallingConvention::Thiscall) {
            return Err(AbiError::UnsupportedAbi {
                reason: "thiscall requires an implicit this-pointer receiver dynffi does not model".to_string(),
            });
        }
        if matches!(func.ret.kind(), TypeKind::Primitive(PrimitiveKind::F80)) {
            return Err(AbiError::UnsupportedAbi {
                reason: "long double aliases double on Win64; 80-bit x87 forms are not supported".to_string(),
            });
        }

        let mut cur = Cursor { position: 0, stack_off: 0 };
        let ret = classify_ret(func.ret);
        if ret == RetClass::Mem {
            cur.position += 1; // hidden return pointer occupies the first slot (rcx)
        }

        let mut args = Vec::with_capacity(func.args.len());
        for (i, arg) in func.args.iter().enumerate() {
            let mut class = classify_arg(&mut cur, *arg);
            // Rule 4: in a variadic call, Microsoft x64 duplicates a
            // floating argument into the matching GP register as well, so a
            // vararg callee reading `va_arg` via the integer path still
            // sees the bits.
            if i >= func.fixed_args {
                if let [Slot::FloatReg(r)] = class.slots[..] {
                    class.slots.push(Slot::IntReg(r));
                }
            }
            args.push(class);
        }

        Ok(CallPlan {
            args,
            ret,
            frame_size: round_up(cur.stack_off, 16) + SHADOW_SPACE,
            frame_align: 16,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynffi_arena::Arena;
    use dynffi_types::primitive;

    fn sig<'a>(arena: &'a Arena, args: &[Type<'a>], ret: Type<'a>, fixed: usize) -> FunctionSig<'a> {
        let args = arena.alloc_slice_copy(args);
        FunctionSig { ret, args, fixed_args: fixed }
    }

    #[test]
    fn int_abi_sig() {
        let arena = Arena::create();
        let args = [primitive(PrimitiveKind::S32), primitive(PrimitiveKind::S32)];
        let len = args.len();
        let s = sig(&arena, &args, primitive(PrimitiveKind::S32), len);
        let plan = Win64Abi.classify(&s, CallingConvention::Default).unwrap();
        assert_eq!(plan.args[0].slots, vec![Slot::IntReg(0)]);
        assert_eq!(plan.args[1].slots, vec![Slot::IntReg(1)]);
    }

    #[test]
    fn float_abi_sig() {
        let arena = Arena::create();
        let args = [primitive(PrimitiveKind::F64)];
        let len = args.len();
        let s = sig(&arena, &args, primitive(PrimitiveKind::F64), len);
        let plan = Win64Abi.classify(&s, CallingConvention::Default).unwrap();
        assert_eq!(plan.args[0].slots, vec![Slot::FloatReg(0)]);
        assert_eq!(plan.ret, RetClass::Float);
    }

    #[test]
    fn fastcall_call_conv() {
        let arena = Arena::create();
        let args = [primitive(PrimitiveKind::S32)];
        let len = args.len();
        let s = sig(&arena, &args, primitive(PrimitiveKind::S32), len);
        assert!(Win64Abi.classify(&s, CallingConvention::Fastcall).is_ok());
        assert!(Win64Abi.classify(&s, CallingConvention::Thiscall).is_err());
    }

    #[test]
    fn position_determines_slot_not_type() {
        let arena = Arena::create();
        // int, float, int, float -> positions 0..4 regardless of type mix.
        let args = [
            primitive(PrimitiveKind::S32),
            primitive(PrimitiveKind::F64),
            primitive(PrimitiveKind::S32),
            primitive(PrimitiveKind::F64),
        ];
        let len = args.len();
        let s = sig(&arena, &args, dynffi_types::void(), len);
        let plan = Win64Abi.classify(&s, CallingConvention::Default).unwrap();
        assert_eq!(plan.args[0].slots, vec![Slot::IntReg(0)]);
        assert_eq!(plan.args[1].slots, vec![Slot::FloatReg(1)]);
        assert_eq!(plan.args[2].slots, vec![Slot::IntReg(2)]);
        assert_eq!(plan.args[3].slots, vec![Slot::FloatReg(3)]);
    }

    #[test]
    fn variadic_float_duplicated_into_gp_register() {
        let arena = Arena::create();
        let args = [dynffi_types::cstring(), primitive(PrimitiveKind::F64)];
        let s = sig(&arena, &args, primitive(PrimitiveKind::S32), 1);
        let plan = Win64Abi.classify(&s, CallingConvention::Default).unwrap();
        assert_eq!(plan.args[1].slots, vec![Slot::FloatReg(1), Slot::IntReg(1)]);
    }
}
