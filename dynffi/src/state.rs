//! Binding lifecycle state machines, per §4.9. Transitions are forward-only;
//! every public entry point on [`crate::Binding`]/[`crate::ReverseBinding`]
//! checks its state before doing anything and fails with
//! [`crate::Error::InvalidState`] rather than silently no-oping.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    Unbound,
    Parsed,
    Classified,
    Emitted,
    Active,
    Released,
}

impl BindingState {
    pub fn name(self) -> &'static str {
        match self {
            BindingState::Unbound => "UNBOUND",
            BindingState::Parsed => "PARSED",
            BindingState::Classified => "CLASSIFIED",
            BindingState::Emitted => "EMITTED",
            BindingState::Active => "ACTIVE",
            BindingState::Released => "RELEASED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReverseBindingState {
    Prepared,
    Published,
    Retired,
}

impl ReverseBindingState {
    pub fn name(self) -> &'static str {
        match self {
            ReverseBindingState::Prepared => "PREPARED",
            ReverseBindingState::Published => "PUBLISHED",
            ReverseBindingState::Retired => "RETIRED",
        }
    }
}
