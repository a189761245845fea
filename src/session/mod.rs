//! Observing sessions once the agent owns their directories.
//!
//! The host never writes into a session directory after creating it; it only
//! watches for the manifest and lists what the agent produced.

pub mod discovery;
pub mod tracker;

use std::io;
use std::path::Path;

use crate::models::report::ReportFile;
use crate::models::session::{
    SessionDescriptor, SessionManifest, SessionStatus, MANIFEST_FILE_NAME,
};
use crate::{AppError, Result};

pub use discovery::SessionDiscovery;
pub use tracker::SessionTracker;

/// A session whose manifest has been observed and parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedSession {
    /// Descriptor in `Completed` status.
    pub session: SessionDescriptor,
    /// Manifest as written by the agent.
    pub manifest: SessionManifest,
}

impl CompletedSession {
    /// Mark `session` completed with the observed `manifest`.
    ///
    /// The profiler and process snapshots are taken from the manifest, which
    /// carries what the agent actually ran with.
    #[must_use]
    pub fn new(mut session: SessionDescriptor, manifest: SessionManifest) -> Self {
        session.profiler = manifest.profiler.clone();
        session.process = manifest.process.clone();
        session.status = SessionStatus::Completed;
        Self { session, manifest }
    }
}

/// Files in `directory` other than the manifest, ordered by name.
///
/// A missing directory yields an empty list.
///
/// # Errors
///
/// Returns `AppError::Io` if the directory exists but cannot be listed.
pub fn list_reports(directory: &Path) -> Result<Vec<ReportFile>> {
    let entries = match std::fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(AppError::Io(format!(
                "cannot list {}: {err}",
                directory.display()
            )))
        }
    };

    let mut reports = Vec::new();
    for entry in entries {
        let entry = entry
            .map_err(|err| AppError::Io(format!("cannot list {}: {err}", directory.display())))?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name == MANIFEST_FILE_NAME {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        reports.push(ReportFile {
            name,
            path: entry.path(),
            size: metadata.len(),
        });
    }
    reports.sort();
    Ok(reports)
}
