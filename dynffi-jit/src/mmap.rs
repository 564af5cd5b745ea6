//! A single page-granularity mapping that starts read-write and can be
//! flipped read-execute once its contents are finalized. Carried in spirit
//! from `wasmtime-runtime`'s `Mmap`, rebuilt on top of the `region` crate's
//! `alloc`/`protect` instead of hand-rolled `libc::mmap`/`VirtualAlloc`
//! calls, since `region` already abstracts that split for us.

use region::{protect, Allocation, Protection};

#[derive(Debug, thiserror::Error)]
pub enum MmapError {
    #[error("failed to reserve {size} bytes of memory: {source}")]
    Alloc { size: usize, #[source] source: region::Error },
    #[error("failed to change memory protection: {source}")]
    Protect { #[source] source: region::Error },
}

fn round_up_to_page_size(size: usize, page_size: usize) -> usize {
    (size + (page_size - 1)) & !(page_size - 1)
}

/// Page-aligned read-write memory that can later be flipped to
/// read-execute. Once flipped it is never written to again — the
/// allocator that owns it hands out no more pointers into it.
pub struct Mmap {
    alloc: Allocation,
    executable: bool,
}

impl Mmap {
    /// Reserve at least `size` bytes of zero-filled, page-aligned,
    /// read-write memory.
    pub fn with_at_least(size: usize) -> Result<Self, MmapError> {
        let page_size = region::page::size();
        let rounded = round_up_to_page_size(size.max(1), page_size);
        let alloc = region::alloc(rounded, Protection::READ_WRITE)
            .map_err(|source| MmapError::Alloc { size: rounded, source })?;
        Ok(Mmap { alloc, executable: false })
    }

    pub fn len(&self) -> usize {
        self.alloc.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alloc.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.alloc
    }

    /// Writable view. Panics are the caller's problem if called after
    /// `make_executable` — callers are expected to respect the W^X
    /// discipline `CodeMemory` enforces around this type.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.alloc
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.alloc.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.alloc.as_mut_ptr::<u8>()
    }

    pub fn is_executable(&self) -> bool {
        self.executable
    }

    /// Flip the whole mapping from read-write to read-execute. This is the
    /// mprotect-flip W^X model: correct on Linux, non-hardened BSD, and
    /// Windows; it is not the dual-mapped model Apple Silicon and OpenBSD
    /// require (`MAP_JIT` + `pthread_jit_write_protect_np` on macOS,
    /// `mimmutable`/separate mappings on OpenBSD) — that backend is not
    /// implemented, tracked as a documented gap rather than silently
    /// producing pages the host will refuse to execute.
    pub fn make_executable(&mut self) -> Result<(), MmapError> {
        unsafe { protect(self.alloc.as_ptr::<u8>(), self.alloc.len(), Protection::READ_EXECUTE) }
            .map_err(|source| MmapError::Protect { source })?;
        self.executable = true;
        Ok(())
    }
}
