//! Shared libraries exporting bridge entry points
//!
//! A [`Library`] keeps its OS handle open until dropped. Entries resolved
//! from it are plain function pointers, so the bridge holds every library it
//! binds from for as long as it lives.

use std::ffi::{c_void, CString};
use std::path::Path;

use natbridge_sdk::BridgeError;
use thiserror::Error;

use crate::dispatch::NativeEntry;

/// Failures opening a library or resolving an entry
#[derive(Debug, Error)]
pub enum LoadError {
    /// The OS loader refused the file
    #[error("cannot open {path}: {reason}")]
    Open { path: String, reason: String },

    /// The library does not export the symbol
    #[error("{library} does not export {symbol}: {reason}")]
    MissingSymbol {
        symbol: String,
        library: String,
        reason: String,
    },

    /// Path or symbol that cannot be handed to the OS loader
    #[error("unusable name {0:?}")]
    BadName(String),
}

impl From<LoadError> for BridgeError {
    fn from(e: LoadError) -> Self {
        BridgeError::Load(e.to_string())
    }
}

/// An open shared library (.so, .dylib, .dll)
pub struct Library {
    handle: sys::Handle,
    path: String,
}

impl Library {
    /// Open the library at `path`, resolving all of its symbols immediately.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let path_str = path
            .to_str()
            .ok_or_else(|| LoadError::BadName(path.display().to_string()))?
            .to_string();
        let handle = sys::open(&path_str).map_err(|reason| LoadError::Open {
            path: path_str.clone(),
            reason,
        })?;
        tracing::debug!(path = %path_str, "opened native library");
        Ok(Library {
            handle,
            path: path_str,
        })
    }

    /// Resolve `symbol` as a [`NativeEntry`].
    ///
    /// The exported routine must actually have the entry signature; nothing
    /// here can check that.
    pub fn entry(&self, symbol: &str) -> Result<NativeEntry, LoadError> {
        let address = self.address_of(symbol)?;
        // SAFETY: non-null code address; the signature is the exporter's contract.
        Ok(unsafe { std::mem::transmute::<*mut c_void, NativeEntry>(address) })
    }

    pub fn has_symbol(&self, symbol: &str) -> bool {
        self.address_of(symbol).is_ok()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn address_of(&self, symbol: &str) -> Result<*mut c_void, LoadError> {
        let name = CString::new(symbol).map_err(|_| LoadError::BadName(symbol.to_string()))?;
        sys::lookup(&self.handle, &name).map_err(|reason| LoadError::MissingSymbol {
            symbol: symbol.to_string(),
            library: self.path.clone(),
            reason,
        })
    }
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Library").field(&self.path).finish()
    }
}

#[cfg(unix)]
mod sys {
    use std::ffi::{c_void, CStr, CString};

    pub struct Handle(*mut c_void);

    // dlopen handles are process-global and usable from any thread
    unsafe impl Send for Handle {}
    unsafe impl Sync for Handle {}

    pub fn open(path: &str) -> Result<Handle, String> {
        let c_path = CString::new(path).map_err(|e| e.to_string())?;
        let raw = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
        if raw.is_null() {
            Err(dl_error())
        } else {
            Ok(Handle(raw))
        }
    }

    pub fn lookup(handle: &Handle, name: &CStr) -> Result<*mut c_void, String> {
        let address = unsafe {
            libc::dlerror();
            libc::dlsym(handle.0, name.as_ptr())
        };
        if address.is_null() {
            Err(dl_error())
        } else {
            Ok(address)
        }
    }

    fn dl_error() -> String {
        let message = unsafe { libc::dlerror() };
        if message.is_null() {
            "no loader diagnostic".to_string()
        } else {
            unsafe { CStr::from_ptr(message) }
                .to_string_lossy()
                .into_owned()
        }
    }

    impl Drop for Handle {
        fn drop(&mut self) {
            unsafe { libc::dlclose(self.0) };
        }
    }
}

#[cfg(windows)]
mod sys {
    use std::ffi::{c_void, CStr, OsStr};
    use std::os::windows::ffi::OsStrExt;

    pub struct Handle(*mut c_void);

    unsafe impl Send for Handle {}
    unsafe impl Sync for Handle {}

    extern "system" {
        fn LoadLibraryW(name: *const u16) -> *mut c_void;
        fn GetProcAddress(module: *mut c_void, name: *const i8) -> *mut c_void;
        fn FreeLibrary(module: *mut c_void) -> i32;
        fn GetLastError() -> u32;
    }

    pub fn open(path: &str) -> Result<Handle, String> {
        let wide: Vec<u16> = OsStr::new(path).encode_wide().chain([0]).collect();
        let raw = unsafe { LoadLibraryW(wide.as_ptr()) };
        if raw.is_null() {
            Err(last_error())
        } else {
            Ok(Handle(raw))
        }
    }

    pub fn lookup(handle: &Handle, name: &CStr) -> Result<*mut c_void, String> {
        let address = unsafe { GetProcAddress(handle.0, name.as_ptr()) };
        if address.is_null() {
            Err(last_error())
        } else {
            Ok(address)
        }
    }

    fn last_error() -> String {
        format!("os error {}", unsafe { GetLastError() })
    }

    impl Drop for Handle {
        fn drop(&mut self) {
            unsafe { FreeLibrary(self.0) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_open_missing_file() {
        match Library::open("/nonexistent/libnatbridge_missing.so") {
            Err(LoadError::Open { path, .. }) => assert!(path.contains("libnatbridge_missing")),
            other => panic!("expected Open error, got {:?}", other),
        }
    }

    #[test]
    fn test_open_non_library() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not an object file").unwrap();
        assert!(matches!(
            Library::open(file.path()),
            Err(LoadError::Open { .. })
        ));
    }

    #[test]
    fn test_load_error_into_bridge_error() {
        let err: BridgeError = LoadError::MissingSymbol {
            symbol: "Point_length".to_string(),
            library: "libgeom.so".to_string(),
            reason: "undefined".to_string(),
        }
        .into();
        assert!(matches!(err, BridgeError::Load(msg) if msg.contains("Point_length")));
    }
}
