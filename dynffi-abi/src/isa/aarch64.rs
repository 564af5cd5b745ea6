//! AAPCS64 classification (64-bit Arm). Eight integer (`x0`-`x7`) and eight
//! vector (`v0`-`v7`) argument registers; composite types ≤16 bytes pass by
//! value across consecutive `x` registers unless they're a homogeneous
//! float aggregate (HFA) of ≤4 identical members, which instead takes one
//! `v` register per member (rule 3, §4.4). Larger composites pass by
//! invisible reference: the caller makes a copy and passes its address.
//! Rule 4: once a call is variadic, every variadic argument is routed to
//! the stack regardless of free registers.

use crate::{round_up, Abi, AbiError, ArgClass, CallPlan, CallingConvention, RetClass, Slot};
use dynffi_types::{FunctionSig, PrimitiveKind, Type, TypeKind};

const INT_REGS: u8 = 8;
const VEC_REGS: u8 = 8;
const MAX_HFA_MEMBERS: usize = 4;

fn hfa_member_count(ty: Type<'_>) -> Option<usize> {
    let agg = match ty.kind() {
        TypeKind::Struct(agg) | TypeKind::Union(agg) => agg,
        _ => return None,
    };
    if agg.members.is_empty() || agg.members.len() > MAX_HFA_MEMBERS {
        return None;
    }
    let first_kind = match agg.members[0].ty.kind() {
        TypeKind::Primitive(p) if p.is_float() => *p,
        _ => return None,
    };
    let all_same = agg.members.iter().all(|m| matches!(m.ty.kind(), TypeKind::Primitive(p) if *p == first_kind));
    if all_same {
        Some(agg.members.len())
    } else {
        None
    }
}

struct Cursor {
    int_used: u8,
    vec_used: u8,
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

    fn take_vec(&mut self) -> Option<u8> {
        if self.vec_used < VEC_REGS {
            let r = self.vec_used;
            self.vec_used += 1;
            Some(r)
        } else {
            None
        }
    }

    fn push_stack(&mut self, align: u32) -> u32 {
        let off = round_up(self.stack_off, align.max(8));
        self.stack_off = off + align.max(8);
        off
    }
}

fn classify_arg(cur: &mut Cursor, ty: Type<'_>, force_stack: bool) -> ArgClass {
    if force_stack {
        return ArgClass { slots: vec![Slot::Stack(cur.push_stack(ty.align().max(8)))], by_reference: false };
    }
    match ty.kind() {
        TypeKind::Void => ArgClass { slots: vec![], by_reference: false },
        TypeKind::Primitive(p) if p.is_float() => {
            let slot = cur.take_vec().map(Slot::FloatReg).unwrap_or_else(|| Slot::Stack(cur.push_stack(8)));
            ArgClass { slots: vec![slot], by_reference: false }
        }
        TypeKind::Struct(_) | TypeKind::Union(_) => {
            if let Some(n) = hfa_member_count(ty) {
                if cur.vec_used + n as u8 <= VEC_REGS {
                    let slots = (0..n).map(|_| Slot::FloatReg(cur.take_vec().expect("reserved above"))).collect();
                    return ArgClass { slots, by_reference: false };
                }
                return ArgClass { slots: vec![Slot::Stack(cur.push_stack(ty.align()))], by_reference: false };
            }
            if ty.size() <= 16 {
                let words = ((ty.size() + 7) / 8).max(1);
                if cur.int_used + words as u8 <= INT_REGS {
                    let slots = (0..words).map(|_| Slot::IntReg(cur.take_int().expect("reserved above"))).collect();
                    return ArgClass { slots, by_reference: false };
                }
                return ArgClass { slots: vec![Slot::Stack(cur.push_stack(ty.align()))], by_reference: false };
            }
            // >16 bytes: passed by invisible reference (rule: AAPCS64
            // composites beyond two registers are copied by the caller).
            let slot = cur.take_int().map(Slot::ByRefIntReg).unwrap_or_else(|| Slot::ByRefStack(cur.push_stack(8)));
            ArgClass { slots: vec![slot], by_reference: true }
        }
        _ => {
            let slot = cur.take_int().map(Slot::IntReg).unwrap_or_else(|| Slot::Stack(cur.push_stack(8)));
            ArgClass { slots: vec![slot], by_reference: false }
        }
    }
}

fn classify_ret(ret: Type<'_>) -> RetClass {
    match ret.kind() {
        TypeKind::Void => RetClass::Void,
        TypeKind::Primitive(p) if p.is_float() => RetClass::Float,
        TypeKind::Struct(_) | TypeKind::Union(_) if hfa_member_count(ret).is_some() => RetClass::StructRegPair,
        TypeKind::Struct(_) | TypeKind::Union(_) if ret.size() <= 16 && ret.size() > 0 => RetClass::StructRegPair,
        TypeKind::Struct(_) | TypeKind::Union(_) => RetClass::Mem,
        _ => RetClass::Int,
    }
}

pub struct Aarch64Abi;

impl Abi for Aarch64Abi {
    fn classify(&self, func: &FunctionSig<'_>, conv: CallingConvention) -> Result<CallPlan, AbiError> {
        if !matches!(conv, CallingConvention::Default | CallingConvention::Cdecl) {
            return Err(AbiError::UnsupportedAbi {
                reason: format!("{conv:?} is not meaningful on AAPCS64"),
            });
        }
        if matches!(func.ret.kind(), TypeKind::Primitive(PrimitiveKind::F80)) && func.ret.size() != 16 {
            return Err(AbiError::UnsupportedAbi {
                reason: "long double form doesn't match AAPCS64's 128-bit binary128 layout".to_string(),
            });
        }

        let mut cur = Cursor { int_used: 0, vec_used: 0, stack_off: 0 };
        let ret = classify_ret(func.ret);
        if ret == RetClass::Mem {
            cur.take_int();
        }

        let mut args = Vec::with_capacity(func.args.len());
        for (i, arg) in func.args.iter().enumerate() {
            let force_stack = i >= func.fixed_args;
            args.push(classify_arg(&mut cur, *arg, force_stack));
        }

        Ok(CallPlan {
            args,
            ret,
            frame_size: round_up(cur.stack_off, 16),
            frame_align: 16,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynffi_arena::Arena;
    use dynffi_types::{primitive, AggregateBuilder};

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
        let plan = Aarch64Abi.classify(&s, CallingConvention::Default).unwrap();
        assert_eq!(plan.args[0].slots, vec![Slot::IntReg(0)]);
        assert_eq!(plan.args[1].slots, vec![Slot::IntReg(1)]);
    }

    #[test]
    fn float_abi_sig() {
        let arena = Arena::create();
        let args = [primitive(PrimitiveKind::F64)];
        let len = args.len();
        let s = sig(&arena, &args, primitive(PrimitiveKind::F64), len);
        let plan = Aarch64Abi.classify(&s, CallingConvention::Default).unwrap();
        assert_eq!(plan.args[0].slots, vec![Slot::FloatReg(0)]);
    }

    #[test]
    fn hfa_of_four_floats_uses_consecutive_vector_registers() {
        let arena = Arena::create();
        let mut b = AggregateBuilder::struct_begin(&arena);
        b.add_member("x", primitive(PrimitiveKind::F32)).unwrap();
        b.add_member("y", primitive(PrimitiveKind::F32)).unwrap();
        b.add_member("z", primitive(PrimitiveKind::F32)).unwrap();
        b.add_member("w", primitive(PrimitiveKind::F32)).unwrap();
        let vec4 = b.end(false).unwrap();
        let args = [vec4];
        let s = sig(&arena, &args, dynffi_types::void(), 1);
        let plan = Aarch64Abi.classify(&s, CallingConvention::Default).unwrap();
        assert_eq!(plan.args[0].slots, vec![Slot::FloatReg(0), Slot::FloatReg(1), Slot::FloatReg(2), Slot::FloatReg(3)]);
    }

    #[test]
    fn non_hfa_small_struct_uses_integer_registers() {
        let arena = Arena::create();
        let mut b = AggregateBuilder::struct_begin(&arena);
        b.add_member("a", primitive(PrimitiveKind::S32)).unwrap();
        b.add_member("b", primitive(PrimitiveKind::F32)).unwrap();
        let mixed = b.end(false).unwrap();
        let args = [mixed];
        let s = sig(&arena, &args, dynffi_types::void(), 1);
        let plan = Aarch64Abi.classify(&s, CallingConvention::Default).unwrap();
        assert_eq!(plan.args[0].slots, vec![Slot::IntReg(0)]);
    }

    #[test]
    fn large_struct_passed_by_invisible_reference() {
        let arena = Arena::create();
        let mut b = AggregateBuilder::struct_begin(&arena);
        b.add_member("a", primitive(PrimitiveKind::S64)).unwrap();
        b.add_member("b", primitive(PrimitiveKind::S64)).unwrap();
        b.add_member("c", primitive(PrimitiveKind::S64)).unwrap();
        let big = b.end(false).unwrap();
        let args = [big];
        let s = sig(&arena, &args, dynffi_types::void(), 1);
        let plan = Aarch64Abi.classify(&s, CallingConvention::Default).unwrap();
        assert!(plan.args[0].by_reference);
        assert_eq!(plan.args[0].slots, vec![Slot::ByRefIntReg(0)]);
    }

    #[test]
    fn variadic_argument_forced_to_stack() {
        let arena = Arena::create();
        let args = [dynffi_types::cstring(), primitive(PrimitiveKind::S32)];
        let s = sig(&arena, &args, primitive(PrimitiveKind::S32), 1);
        let plan = Aarch64Abi.classify(&s, CallingConvention::Default).unwrap();
        assert_eq!(plan.args[0].slots, vec![Slot::IntReg(0)]);
        assert!(matches!(plan.args[1].slots[..], [Slot::Stack(_)]));
    }
}
