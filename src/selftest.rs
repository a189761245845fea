//! In-host verification that a staged agent build is ABI compatible.
//!
//! The harness maps the staged library into this process, activates the
//! profiler class through its class factory, and unmaps it again. Cycles
//! against the same staged path are serialized; concurrent reloads of one
//! path are exactly the hazard version-unique staging avoids.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::native::com::IID_ICORPROFILERCALLBACK8;
use crate::native::NativeLibrary;
use crate::staging::LibraryStager;
use crate::Result;

/// Outcome of one load, activate, unload cycle.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SelfTestReport {
    /// Staged library exercised.
    pub path: PathBuf,
    /// Build version staged.
    pub version: String,
    /// SHA-256 of the staged bytes.
    pub sha256: String,
    /// Whether this run staged the file.
    pub freshly_staged: bool,
    /// Class activated.
    pub class_id: Uuid,
    /// Interface requested.
    pub interface_id: Uuid,
}

/// Runs self-test cycles against staged builds.
#[derive(Debug)]
pub struct SelfTestHarness {
    stager: LibraryStager,
    path_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl SelfTestHarness {
    /// Harness staging through `stager`.
    #[must_use]
    pub fn new(stager: LibraryStager) -> Self {
        Self {
            stager,
            path_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Stage `build_version` and activate `class_id` with the profiler
    /// callback interface.
    ///
    /// # Errors
    ///
    /// Any staging, load, symbol, or activation error. The activated object
    /// is released and the library unloaded before an activation error is
    /// returned.
    pub fn run(&self, build_version: &str, class_id: Uuid) -> Result<SelfTestReport> {
        self.run_with_interface(build_version, class_id, IID_ICORPROFILERCALLBACK8)
    }

    /// As [`run`](Self::run) with an explicit interface.
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run).
    pub fn run_with_interface(
        &self,
        build_version: &str,
        class_id: Uuid,
        interface_id: Uuid,
    ) -> Result<SelfTestReport> {
        let staged = self.stager.stage(build_version)?;
        let _span = info_span!(
            "self_test",
            path = %staged.path.display(),
            %class_id,
        )
        .entered();

        let lock = self.lock_for(&staged.path);
        let outcome = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            cycle(&staged.path, class_id, interface_id)
        };
        self.forget_lock(&staged.path, lock);
        outcome?;

        let report = SelfTestReport {
            sha256: staged.sha256()?,
            path: staged.path,
            version: staged.version,
            freshly_staged: staged.freshly_staged,
            class_id,
            interface_id,
        };
        info!(sha256 = %report.sha256, "self-test passed");
        Ok(report)
    }

    /// Number of staged paths with a cycle running or waiting.
    #[must_use]
    pub fn active_paths(&self) -> usize {
        self.path_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self
            .path_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(path.to_path_buf()).or_default())
    }

    /// Drop the map entry for `path` once no other cycle holds or awaits it.
    fn forget_lock(&self, path: &Path, lock: Arc<Mutex<()>>) {
        let mut locks = self
            .path_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Clones are only taken under the map lock, so the count is stable here.
        let unshared = Arc::strong_count(&lock) == 2
            && locks.get(path).is_some_and(|held| Arc::ptr_eq(held, &lock));
        if unshared {
            locks.remove(path);
        }
    }
}

/// Load, activate, release, unload. The library is unloaded on every path
/// after a successful load.
fn cycle(path: &Path, class_id: Uuid, interface_id: Uuid) -> Result<()> {
    let library = NativeLibrary::load(path)?;
    let activation = library
        .activate_instance(class_id, interface_id)
        .map(|object| {
            let remaining = object.release();
            debug!(?remaining, "released activated object");
        });
    if let Err(err) = &activation {
        warn!(%err, "activation failed");
    }
    library.unload()?;
    activation
}
