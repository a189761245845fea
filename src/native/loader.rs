//! Cross-platform load, symbol lookup, and unload of shared libraries.

#![allow(unsafe_code)]

use std::cell::Cell;
use std::ffi::c_void;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use libloading::{Library, Symbol};
use tracing::debug;
use uuid::Uuid;

use super::com::{self, DllGetClassObjectFn, FACTORY_LOOKUP_SYMBOL};
use crate::{AppError, Result};

/// A mapped shared library.
///
/// Unloading consumes the handle, so a library cannot be released twice and
/// objects activated from it cannot outlive it. The handle is deliberately
/// `!Sync`: one owner drives load, activation, and unload.
#[derive(Debug)]
pub struct NativeLibrary {
    library: Library,
    path: PathBuf,
    _single_owner: PhantomData<Cell<()>>,
}

/// Object pointer produced by [`NativeLibrary::activate_instance`].
#[derive(Debug)]
pub struct ActivatedObject<'lib> {
    ptr: NonNull<c_void>,
    _library: PhantomData<&'lib NativeLibrary>,
}

impl ActivatedObject<'_> {
    /// Raw interface pointer.
    #[must_use]
    pub fn as_ptr(&self) -> *mut c_void {
        self.ptr.as_ptr()
    }

    /// Drop the reference `CreateInstance` handed out.
    ///
    /// Returns the reference count the object reports afterwards, or `None`
    /// if its dispatch table has no `Release` entry.
    #[allow(clippy::must_use_candidate)]
    pub fn release(self) -> Option<u32> {
        // SAFETY: the pointer came from a successful `CreateInstance` on a
        // library that is still mapped (the lifetime ties it to the handle),
        // and `self` is consumed so the reference is not reused.
        unsafe { com::release(self.ptr) }
    }
}

impl NativeLibrary {
    /// Map the library at `path`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::LoadFailure` if the file is missing, unreadable, or
    /// not a loadable library for this platform.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        // SAFETY: initialisers of the agent library run here; the agent is
        // built to be loaded into arbitrary processes.
        let library = unsafe { Library::new(path) }.map_err(|err| AppError::LoadFailure {
            path: path.to_owned(),
            cause: err.to_string(),
        })?;
        debug!(path = %path.display(), "loaded native library");
        Ok(Self {
            library,
            path: path.to_owned(),
            _single_owner: PhantomData,
        })
    }

    /// Path the library was loaded from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve an exported symbol.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SymbolNotFound` if the export does not exist.
    ///
    /// # Safety
    ///
    /// `T` must match the actual type of the export.
    pub unsafe fn symbol<T>(&self, name: &str) -> Result<Symbol<'_, T>> {
        self.library
            .get::<T>(name.as_bytes())
            .map_err(|_| AppError::SymbolNotFound {
                name: name.to_owned(),
            })
    }

    /// Whether the library exports `name`.
    #[must_use]
    pub fn has_symbol(&self, name: &str) -> bool {
        // SAFETY: the symbol is only probed, never called or dereferenced.
        unsafe { self.symbol::<*const c_void>(name) }.is_ok()
    }

    /// Obtain an object of `class_id` exposing `interface_id` by walking the
    /// class factory returned by the library's `DllGetClassObject` export.
    ///
    /// # Errors
    ///
    /// - `AppError::SymbolNotFound` if the factory-lookup export is missing.
    /// - `AppError::FactoryNotFound` if no factory exists for `class_id`.
    /// - `AppError::ActivationFailed` if the factory yields no object.
    pub fn activate_instance(
        &self,
        class_id: Uuid,
        interface_id: Uuid,
    ) -> Result<ActivatedObject<'_>> {
        // SAFETY: `DllGetClassObject` has a fixed, documented signature.
        let get_class_object =
            unsafe { self.symbol::<DllGetClassObjectFn>(FACTORY_LOOKUP_SYMBOL)? };
        // SAFETY: the export follows the COM class-object contract.
        let ptr = unsafe { com::activate_with(*get_class_object, class_id, interface_id)? };
        debug!(%class_id, %interface_id, object = ?ptr, "activated instance");
        Ok(ActivatedObject {
            ptr,
            _library: PhantomData,
        })
    }

    /// Release the mapping.
    ///
    /// # Errors
    ///
    /// Returns `AppError::LoadFailure` if the platform loader reports failure.
    pub fn unload(self) -> Result<()> {
        let path = self.path;
        self.library.close().map_err(|err| AppError::LoadFailure {
            path: path.clone(),
            cause: format!("unload failed: {err}"),
        })?;
        debug!(path = %path.display(), "unloaded native library");
        Ok(())
    }
}
