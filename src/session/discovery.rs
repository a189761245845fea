//! Listing completed sessions from the session root.

use std::io;
use std::path::PathBuf;

use tracing::warn;
use uuid::Uuid;

use super::CompletedSession;
use crate::models::session::{
    session_directory, SessionDescriptor, SessionManifest, SessionStatus, MANIFEST_FILE_NAME,
};
use crate::{AppError, Result};

/// Finds sessions whose agent has written a manifest.
#[derive(Debug, Clone)]
pub struct SessionDiscovery {
    root: PathBuf,
}

impl SessionDiscovery {
    /// Search under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Every completed session, oldest first.
    ///
    /// Directories without a manifest are still in progress and skipped.
    /// Unreadable manifests are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the root exists but cannot be listed.
    pub fn list(&self) -> Result<Vec<CompletedSession>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(AppError::Io(format!(
                    "cannot list {}: {err}",
                    self.root.display()
                )))
            }
        };

        let mut sessions = Vec::new();
        for entry in entries.filter_map(std::result::Result::ok) {
            let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| Uuid::parse_str(name).ok())
            else {
                continue;
            };
            match self.get(id) {
                Ok(session) => sessions.push(session),
                Err(AppError::NotFound(_)) => {}
                Err(err) => warn!(session_id = %id, %err, "skipping unreadable session"),
            }
        }
        sessions.sort_by_key(|completed| completed.manifest.timestamp);
        Ok(sessions)
    }

    /// The completed session `id`.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if the session has no manifest.
    /// - `AppError::ManifestUnreadable` if the manifest does not parse or
    ///   names another session.
    pub fn get(&self, id: Uuid) -> Result<CompletedSession> {
        let directory = session_directory(&self.root, id);
        let path = directory.join(MANIFEST_FILE_NAME);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(AppError::NotFound(format!("completed session {id}")));
            }
            Err(err) => {
                return Err(AppError::ManifestUnreadable {
                    path,
                    reason: err.to_string(),
                })
            }
        };

        let manifest = SessionManifest::from_json_bytes(&raw, &path)?;
        if manifest.uuid != id {
            return Err(AppError::ManifestUnreadable {
                path,
                reason: format!("manifest belongs to session {}", manifest.uuid),
            });
        }

        let session = SessionDescriptor {
            id,
            profiler: manifest.profiler.clone(),
            process: manifest.process.clone(),
            created_at: manifest.timestamp,
            directory,
            status: SessionStatus::Completed,
        };
        Ok(CompletedSession { session, manifest })
    }
}
