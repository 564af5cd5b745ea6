//! Bump-allocates emitted trampoline bytes into growable RW chunks, then
//! flips every chunk RX on `publish()`. Structure carried from
//! `wasmtime-jit`'s `CodeMemory`: a `Vec<Mmap>` of chunks rather than one
//! big mapping, so a chunk never needs to move once handed out (trampoline
//! pointers must stay stable for the lifetime of the binding that owns
//! them).

use crate::mmap::{Mmap, MmapError};

/// Minimum chunk size, matching the "at least 0x10000 bytes or the
/// request, whichever is larger" growth policy carried over from the
/// teacher's code-memory chunking.
const MIN_CHUNK_SIZE: usize = 0x10000;

#[derive(Debug, thiserror::Error)]
pub enum JitError {
    #[error("failed to allocate executable memory: {0}")]
    Alloc(#[from] MmapError),
    #[error("code memory is already published; no further trampolines can be emitted")]
    AlreadyPublished,
}

/// Backend abstraction for executable-memory management, so an
/// Apple-Silicon/OpenBSD dual-map backend can be slotted in later without
/// touching `dynffi-jit`'s callers. `CodeMemory` is the only implementation
/// today (the mprotect-flip model).
pub trait ExecutableMemory {
    fn allocate(&mut self, bytes: &[u8]) -> Result<*const u8, JitError>;
    fn publish(&mut self) -> Result<(), JitError>;
}

struct Chunk {
    mmap: Mmap,
    used: usize,
}

pub struct CodeMemory {
    chunks: Vec<Chunk>,
    published: bool,
}

impl CodeMemory {
    pub fn new() -> Self {
        CodeMemory { chunks: Vec::new(), published: false }
    }

    fn current_chunk_with_room(&mut self, len: usize) -> Result<&mut Chunk, JitError> {
        let fits = self.chunks.last().map_or(false, |c| c.mmap.len() - c.used >= len);
        if !fits {
            let size = len.max(MIN_CHUNK_SIZE);
            let mmap = Mmap::with_at_least(size)?;
            self.chunks.push(Chunk { mmap, used: 0 });
        }
        Ok(self.chunks.last_mut().expect("just pushed or already fits"))
    }
}

impl Default for CodeMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutableMemory for CodeMemory {
    /// Copies `bytes` into a chunk with enough remaining room and returns a
    /// stable pointer to the copy. Only valid before `publish()`.
    fn allocate(&mut self, bytes: &[u8]) -> Result<*const u8, JitError> {
        if self.published {
            return Err(JitError::AlreadyPublished);
        }
        let chunk = self.current_chunk_with_room(bytes.len())?;
        let start = chunk.used;
        chunk.mmap.as_mut_slice()[start..start + bytes.len()].copy_from_slice(bytes);
        chunk.used += bytes.len();
        Ok(unsafe { chunk.mmap.as_ptr().add(start) })
    }

    /// Flips every chunk RX. Idempotent; once published, `allocate` always
    /// fails.
    fn publish(&mut self) -> Result<(), JitError> {
        for chunk in &mut self.chunks {
            if !chunk.mmap.is_executable() {
                chunk.mmap.make_executable()?;
            }
        }
        self.published = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_returns_distinct_stable_pointers() {
        let mut mem = CodeMemory::new();
        let a = mem.allocate(&[0xc3]).unwrap();
        let b = mem.allocate(&[0x90, 0xc3]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn allocate_after_publish_fails() {
        let mut mem = CodeMemory::new();
        mem.allocate(&[0xc3]).unwrap();
        mem.publish().unwrap();
        assert!(matches!(mem.allocate(&[0xc3]), Err(JitError::AlreadyPublished)));
    }

    #[test]
    fn large_request_grows_a_fresh_chunk() {
        let mut mem = CodeMemory::new();
        let big = vec![0x90u8; MIN_CHUNK_SIZE + 16];
        assert!(mem.allocate(&big).is_ok());
        assert_eq!(mem.chunks.len(), 1);
    }
}
