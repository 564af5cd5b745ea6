//! Caches emitted trampoline bytes by call-plan shape: two functions whose
//! descriptors differ only in, say, field names still classify to the same
//! register/stack layout and so can share one trampoline.

use dynffi_abi::{ArgClass, CallPlan, RetClass, Slot};
use indexmap::IndexMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShapeKey(u64);

fn hash_slot(state: &mut u64, slot: &Slot) {
    let (tag, value): (u64, u64) = match slot {
        Slot::IntReg(r) => (0, *r as u64),
        Slot::FloatReg(r) => (1, *r as u64),
        Slot::Stack(off) => (2, *off as u64),
        Slot::ByRefIntReg(r) => (3, *r as u64),
        Slot::ByRefStack(off) => (4, *off as u64),
    };
    // FNV-1a, one byte-ish mix per field; collisions only cost a cache miss
    // and a redundant (but correct) re-emit, never a wrong trampoline,
    // since the cache key is advisory and callers always hold the plan too.
    for b in [tag, value] {
        *state ^= b;
        *state = state.wrapping_mul(0x100000001b3);
    }
}

/// Derives the shape hash (§4.5/4.6: "cache by shape hash") from everything
/// that actually affects the emitted bytes: slot kinds/indices, by-reference
/// flags, the return classification, and the frame layout.
pub fn shape_hash(plan: &CallPlan) -> ShapeKey {
    let mut state: u64 = 0xcbf29ce484222325; // FNV offset basis
    for ArgClass { slots, by_reference } in &plan.args {
        for slot in slots {
            hash_slot(&mut state, slot);
        }
        state ^= *by_reference as u64;
        state = state.wrapping_mul(0x100000001b3);
    }
    let ret_tag: u64 = match plan.ret {
        RetClass::Void => 0,
        RetClass::Int => 1,
        RetClass::Float => 2,
        RetClass::Mem => 3,
        RetClass::StructRegPair => 4,
    };
    state ^= ret_tag;
    state = state.wrapping_mul(0x100000001b3);
    state ^= plan.frame_size as u64;
    state = state.wrapping_mul(0x100000001b3);
    ShapeKey(state)
}

/// Process-wide trampoline cache, keyed by shape rather than by the
/// descriptor that produced the plan.
#[derive(Default)]
pub struct TrampolineCache {
    entries: IndexMap<ShapeKey, Arc<[u8]>>,
}

impl TrampolineCache {
    pub fn new() -> Self {
        TrampolineCache { entries: IndexMap::new() }
    }

    pub fn get_or_emit(&mut self, plan: &CallPlan, emit: impl FnOnce() -> Vec<u8>) -> Arc<[u8]> {
        let key = shape_hash(plan);
        if let Some(bytes) = self.entries.get(&key) {
            return Arc::clone(bytes);
        }
        let bytes: Arc<[u8]> = emit().into();
        self.entries.insert(key, Arc::clone(&bytes));
        bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(args: Vec<ArgClass>, ret: RetClass) -> CallPlan {
        CallPlan { args, ret, frame_size: 0, frame_align: 16 }
    }

    #[test]
    fn identical_shapes_hash_equal() {
        let a = plan(vec![ArgClass { slots: vec![Slot::IntReg(0)], by_reference: false }], RetClass::Int);
        let b = plan(vec![ArgClass { slots: vec![Slot::IntReg(0)], by_reference: false }], RetClass::Int);
        assert_eq!(shape_hash(&a), shape_hash(&b));
    }

    #[test]
    fn different_shapes_hash_differently() {
        let a = plan(vec![ArgClass { slots: vec![Slot::IntReg(0)], by_reference: false }], RetClass::Int);
        let b = plan(vec![ArgClass { slots: vec![Slot::FloatReg(0)], by_reference: false }], RetClass::Int);
        assert_ne!(shape_hash(&a), shape_hash(&b));
    }

    #[test]
    fn cache_reuses_bytes_for_the_same_shape() {
        let mut cache = TrampolineCache::new();
        let p = plan(vec![ArgClass { slots: vec![Slot::IntReg(0)], by_reference: false }], RetClass::Int);
        let mut emits = 0;
        let a = cache.get_or_emit(&p, || {
            emits += 1;
            vec![0xc3]
        });
        let b = cache.get_or_emit(&p, || {
            emits += 1;
            vec![0xc3]
        });
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(emits, 1);
        assert_eq!(cache.len(), 1);
    }
}
