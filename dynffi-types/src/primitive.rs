//! Primitive kinds and their platform-fixed size/alignment, per spec §6.

/// One of the fixed-size primitive kinds. `Long`/`ULong` carry the
/// platform's native `long` width (4 bytes on LLP64 Windows, 8 elsewhere),
/// resolved once at `PrimitiveKind::size_of` time rather than baked into the
/// variant, mirroring how `l`/`L` are the only signature characters whose
/// size isn't fixed across every supported platform (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Bool,
    S8,
    U8,
    S16,
    U16,
    S32,
    U32,
    S64,
    U64,
    Long,
    ULong,
    F32,
    F64,
    /// `long double` / extended precision. Width is platform-dependent; an
    /// implementation may reject it outright (§6) — `dynffi-abi` does so on
    /// any target whose ABI for extended precision isn't the one form this
    /// crate supports (80-bit x87 on SysV/Win64, 128-bit on AArch64).
    F80,
    /// Pointer-sized integer (used for `size_t`-like values distinct from an
    /// actual pointer type).
    PointerSizedInt,
}

impl PrimitiveKind {
    pub fn size_of(self) -> u32 {
        match self {
            PrimitiveKind::Bool | PrimitiveKind::S8 | PrimitiveKind::U8 => 1,
            PrimitiveKind::S16 | PrimitiveKind::U16 => 2,
            PrimitiveKind::S32 | PrimitiveKind::U32 | PrimitiveKind::F32 => 4,
            PrimitiveKind::S64 | PrimitiveKind::U64 | PrimitiveKind::F64 => 8,
            PrimitiveKind::Long | PrimitiveKind::ULong => native_long_width(),
            PrimitiveKind::F80 => extended_float_width(),
            PrimitiveKind::PointerSizedInt => std::mem::size_of::<usize>() as u32,
        }
    }

    pub fn align_of(self) -> u32 {
        // On every platform this crate supports, scalar alignment equals
        // scalar size, including `long double`.
        self.size_of()
    }

    pub fn is_float(self) -> bool {
        matches!(self, PrimitiveKind::F32 | PrimitiveKind::F64 | PrimitiveKind::F80)
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            PrimitiveKind::S8
                | PrimitiveKind::S16
                | PrimitiveKind::S32
                | PrimitiveKind::S64
                | PrimitiveKind::Long
        )
    }
}

/// `long`/`unsigned long` width: 8 bytes everywhere dynffi supports except
/// Windows, whose LLP64 data model keeps `long` at 4 bytes even on 64-bit.
#[cfg(windows)]
fn native_long_width() -> u32 {
    4
}
#[cfg(not(windows))]
fn native_long_width() -> u32 {
    8
}

/// `long double` width. x86/x86_64 SysV and Win64 both use 8-byte doubles in
/// practice for ABI purposes here (Win64 `long double` literally aliases
/// `double`); AArch64's `long double` is IEEE-754 binary128 (16 bytes). This
/// crate stores whichever width the host actually uses so `sizeof`
/// round-trips; `dynffi-abi` is what decides whether a given target's
/// `long double` form is supported for a *call*.
#[cfg(target_arch = "aarch64")]
fn extended_float_width() -> u32 {
    16
}
#[cfg(not(target_arch = "aarch64"))]
fn extended_float_width() -> u32 {
    8
}
