pub mod asm;
pub mod forward;
pub mod reverse;

/// Which x86-64 calling convention register table to use. The byte-level
/// moves in `asm` are the same either way; only which physical register a
/// `Slot::IntReg(n)`/`Slot::FloatReg(n)` index maps to differs, and
/// `dynffi-abi` has already picked `n` according to the right convention —
/// this table just names the physical register at each index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convention {
    SysV,
    Win64,
}

impl Convention {
    pub(crate) fn int_arg_reg(self, index: u8) -> asm::Reg {
        match self {
            Convention::SysV => [asm::RDI, asm::RSI, asm::RDX, asm::RCX, asm::R8, asm::R9][index as usize],
            Convention::Win64 => [asm::RCX, asm::RDX, asm::R8, asm::R9][index as usize],
        }
    }

    pub(crate) fn float_arg_reg(self, index: u8) -> u8 {
        // xmm0..xmm7 on both conventions; index space differs only in how
        // many are actually addressable per the classifier (8 vs 4).
        index
    }

    pub(crate) fn hidden_ret_ptr_reg(self) -> asm::Reg {
        match self {
            Convention::SysV => asm::RDI,
            Convention::Win64 => asm::RCX,
        }
    }
}
