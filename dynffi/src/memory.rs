//! Raw memory helpers from the Binding API (§6): one-line wrappers with no
//! marshalling logic of their own, except `get`/`set`, which use
//! `dynffi-marshal` to read or write a single element by descriptor.

use crate::error::Error;
use dynffi_marshal::DynValue;
use dynffi_types::{Type, TypeKind};
use std::os::raw::c_void;

/// `alloc(descriptor, count)` per §6: `count` zeroed, contiguous elements of
/// `descriptor`. Paired with libc's allocator (not Rust's `std::alloc`, which
/// would require `free` to be told the original layout back) so `free` can
/// stay a plain single-pointer call, like C's.
pub fn alloc(descriptor: Type<'_>, count: usize) -> *mut u8 {
    let size = (descriptor.size() as usize).max(1) * count.max(1);
    unsafe { libc::calloc(size, 1) as *mut u8 }
}

/// `free(pointer)` per §6.
pub fn free(pointer: *mut u8) {
    if !pointer.is_null() {
        unsafe { libc::free(pointer as *mut c_void) };
    }
}

/// # Safety
/// `dst`/`src` must each be valid for `n` bytes and must not overlap.
pub unsafe fn memcpy(dst: *mut u8, src: *const u8, n: usize) {
    std::ptr::copy_nonoverlapping(src, dst, n);
}

/// # Safety
/// `dst`/`src` must each be valid for `n` bytes; overlap is fine.
pub unsafe fn memmove(dst: *mut u8, src: *const u8, n: usize) {
    std::ptr::copy(src, dst, n);
}

/// # Safety
/// `dst` must be valid for `n` bytes.
pub unsafe fn memset(dst: *mut u8, value: u8, n: usize) {
    std::ptr::write_bytes(dst, value, n);
}

/// # Safety
/// `a`/`b` must each be valid for `n` bytes.
pub unsafe fn memcmp(a: *const u8, b: *const u8, n: usize) -> i32 {
    match std::slice::from_raw_parts(a, n).cmp(std::slice::from_raw_parts(b, n)) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }
}

/// # Safety
/// `ptr` must be valid for `n` bytes.
pub unsafe fn memchr(ptr: *const u8, value: u8, n: usize) -> Option<*const u8> {
    std::slice::from_raw_parts(ptr, n).iter().position(|&b| b == value).map(|i| ptr.add(i))
}

/// `strdup(pointer)` per §6: duplicates a NUL-terminated C string into a
/// fresh `malloc`-style allocation, freed with [`free`] like any other
/// `alloc`-obtained pointer.
///
/// # Safety
/// `s` must point at a valid NUL-terminated C string.
pub unsafe fn strdup(s: *const std::os::raw::c_char) -> *mut std::os::raw::c_char {
    libc::strdup(s)
}

/// `cast(pointer, new_signature)` per §6: a dynamic FFI pointer carries no
/// static type of its own, so casting just pairs the same address with a
/// different descriptor. No bytes move.
pub fn cast<'a>(pointer: *mut u8, new_descriptor: Type<'a>) -> (*mut u8, Type<'a>) {
    (pointer, new_descriptor)
}

fn element_and_bound(descriptor: Type<'_>) -> (Type<'_>, usize) {
    match descriptor.kind() {
        TypeKind::Array { element, count } => (*element, *count),
        _ => (descriptor, 0),
    }
}

/// `get(pointer, index)` per §6. `descriptor` is the element (or bounded
/// array) type at `pointer`; a `count` of zero (a bare element type, or a
/// flexible array) means no static bound to check.
pub fn get(pointer: *const u8, index: usize, descriptor: Type<'_>) -> Result<DynValue, Error> {
    let (element, bound) = element_and_bound(descriptor);
    if bound != 0 && index >= bound {
        return Err(Error::OutOfBounds { index, count: bound });
    }
    let stride = (element.size() as usize).max(1);
    Ok(unsafe { dynffi_marshal::unmarshal(pointer.add(index * stride), element)? })
}

/// `set(pointer, index, value)` per §6.
pub fn set(pointer: *mut u8, index: usize, value: &DynValue, descriptor: Type<'_>) -> Result<(), Error> {
    let (element, bound) = element_and_bound(descriptor);
    if bound != 0 && index >= bound {
        return Err(Error::OutOfBounds { index, count: bound });
    }
    let stride = (element.size() as usize).max(1);
    Ok(unsafe { dynffi_marshal::marshal(pointer.add(index * stride), value, element)? })
}
