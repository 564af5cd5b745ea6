//! `Library` wraps `dlopen`/`LoadLibrary` behind `libloading` (§6). The
//! teacher workspace has no use for dynamic symbol resolution at all; this
//! is the one dependency sourced from the broader example pack rather than
//! the teacher itself — see DESIGN.md. Deliberately trivial, per §1's
//! non-goals: no caching, no reference counting beyond what `libloading`
//! already does via `Drop`.

use crate::error::Error;
use std::ffi::c_void;

pub struct Library {
    display_name: String,
    raw: libloading::Library,
}

impl Library {
    /// `load_library(path?)` per §6. `None` resolves symbols already linked
    /// into the current process image, the way `dlopen(NULL, ...)` does.
    pub fn load(path: Option<&str>) -> Result<Self, Error> {
        let raw = match path {
            Some(p) => unsafe { libloading::Library::new(p) }
                .map_err(|_| Error::LibraryNotFound(p.to_string()))?,
            None => Self::open_current_process()
                .map_err(|_| Error::LibraryNotFound("<current process>".to_string()))?,
        };
        Ok(Library { display_name: path.unwrap_or("<current process>").to_string(), raw })
    }

    #[cfg(unix)]
    fn open_current_process() -> Result<libloading::Library, libloading::Error> {
        Ok(unsafe { libloading::os::unix::Library::this() }.into())
    }

    #[cfg(windows)]
    fn open_current_process() -> Result<libloading::Library, libloading::Error> {
        Ok(libloading::os::windows::Library::this()?.into())
    }

    /// `find_symbol(lib_handle, name) → void*` per §6.
    pub fn find_symbol(&self, name: &str) -> Result<*const u8, Error> {
        unsafe {
            let sym: libloading::Symbol<*const c_void> =
                self.raw.get(name.as_bytes()).map_err(|_| Error::SymbolNotFound(name.to_string()))?;
            Ok(*sym as *const u8)
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_resolves_libc_symbols() {
        let lib = Library::load(None).unwrap();
        assert!(lib.find_symbol("abs").is_ok());
    }

    #[test]
    fn unknown_symbol_is_not_found() {
        let lib = Library::load(None).unwrap();
        assert!(matches!(lib.find_symbol("this_symbol_does_not_exist_anywhere"), Err(Error::SymbolNotFound(_))));
    }

    #[test]
    fn unknown_library_path_is_not_found() {
        assert!(matches!(Library::load(Some("/no/such/library.so")), Err(Error::LibraryNotFound(_))));
    }
}
