//! A pin (§3, §4.8): a live two-way binding between a host scalar and a
//! typed C address. This crate only implements the `read`/`write` hooks; a
//! host glue layer calls them from its own property-magic (the `Host`
//! trait boundary is one layer up, in `dynffi`).

use crate::error::MarshalError;
use crate::marshal::{marshal, unmarshal};
use crate::value::DynValue;
use dynffi_types::Type;

/// Couples `(address, descriptor, owns_memory)` per §3. `'a` ties the pin
/// to the arena its descriptor came from; a pin never outlives that arena.
pub struct Pin<'a> {
    address: *mut u8,
    ty: Type<'a>,
    owns_memory: bool,
}

impl<'a> Pin<'a> {
    /// `pin(address, descriptor, owns_memory)` per §4.8. `owns_memory`
    /// means this `Pin` allocated `address` itself (via
    /// [`Pin::new_owned`]) and must free it on drop; a pin over an
    /// existing C global never owns its memory.
    pub fn new(address: *mut u8, ty: Type<'a>, owns_memory: bool) -> Self {
        Pin { address, ty, owns_memory }
    }

    /// Allocates fresh zeroed storage sized for `ty` and pins it,
    /// `owns_memory = true`.
    pub fn new_owned(ty: Type<'a>) -> Self {
        let size = ty.size().max(1) as usize;
        let layout = std::alloc::Layout::from_size_align(size, ty.align().max(1) as usize)
            .expect("descriptor size/align are always valid for Layout");
        let address = unsafe { std::alloc::alloc_zeroed(layout) };
        Pin { address, ty, owns_memory: true }
    }

    pub fn address(&self) -> *mut u8 {
        self.address
    }

    pub fn ty(&self) -> Type<'a> {
        self.ty
    }

    /// Read side: `unmarshal(address, descriptor)`.
    pub fn read(&self) -> Result<DynValue, MarshalError> {
        unsafe { unmarshal(self.address, self.ty) }
    }

    /// Write side: `marshal(address, value, descriptor)`.
    pub fn write(&self, value: &DynValue) -> Result<(), MarshalError> {
        unsafe { marshal(self.address, value, self.ty) }
    }
}

impl<'a> Drop for Pin<'a> {
    fn drop(&mut self) {
        if self.owns_memory && !self.address.is_null() {
            let size = self.ty.size().max(1) as usize;
            let layout = std::alloc::Layout::from_size_align(size, self.ty.align().max(1) as usize)
                .expect("descriptor size/align are always valid for Layout");
            unsafe { std::alloc::dealloc(self.address, layout) };
        }
    }
}

/// `unpin(scalar)` per §4.8: detaches and, if `owns_memory`, frees
/// `address`. Modeled as plain ownership transfer — dropping the `Pin`
/// does the work.
pub fn unpin(pin: Pin<'_>) {
    drop(pin);
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynffi_types::{primitive, PrimitiveKind};

    #[test]
    fn read_then_write_then_read_yields_written_value() {
        let pin = Pin::new_owned(primitive(PrimitiveKind::S32));
        assert_eq!(pin.read().unwrap(), DynValue::Int(0));
        pin.write(&DynValue::Int(42)).unwrap();
        assert_eq!(pin.read().unwrap(), DynValue::Int(42));
    }

    #[test]
    fn pin_over_existing_address_does_not_own_memory() {
        let mut backing = 7i32;
        let pin = Pin::new(&mut backing as *mut i32 as *mut u8, primitive(PrimitiveKind::S32), false);
        assert_eq!(pin.read().unwrap(), DynValue::Int(7));
        pin.write(&DynValue::Int(-1)).unwrap();
        assert_eq!(backing, -1);
        unpin(pin);
        assert_eq!(backing, -1);
    }
}
