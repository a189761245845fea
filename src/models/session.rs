//! Session model, lifecycle helpers, and the manifest schema shared with the agent.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::process::ProcessDescriptor;
use super::profiler::ProfilerDescriptor;
use crate::{AppError, Result};

/// File name of the manifest the agent writes once a session completes.
pub const MANIFEST_FILE_NAME: &str = "session.json";

/// Manifest and payload schema version understood by this host.
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// Lifecycle status for a profiling session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Descriptor built, attach not yet issued.
    Created,
    /// Target runtime acknowledged the attach request.
    Attached,
    /// Agent running, manifest not yet written.
    InProgress,
    /// Manifest observed and parsed.
    Completed,
}

/// Session directory for `id` under `root`.
#[must_use]
pub fn session_directory(root: &Path, id: Uuid) -> PathBuf {
    root.join(id.to_string())
}

/// Host-side record of one attach-and-collect cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct SessionDescriptor {
    /// Host-generated session identifier.
    pub id: Uuid,
    /// Profiler snapshot, parameters resolved.
    pub profiler: ProfilerDescriptor,
    /// Target process snapshot.
    pub process: ProcessDescriptor,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Directory the agent writes into.
    pub directory: PathBuf,
    /// Current lifecycle status.
    pub status: SessionStatus,
}

impl SessionDescriptor {
    /// Construct a new session with a generated identifier.
    #[must_use]
    pub fn new(root: &Path, profiler: ProfilerDescriptor, process: ProcessDescriptor) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            profiler,
            process,
            created_at: Utc::now(),
            directory: session_directory(root, id),
            status: SessionStatus::Created,
        }
    }

    /// Location of the completion manifest.
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.directory.join(MANIFEST_FILE_NAME)
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        matches!(
            (self.status, next),
            (SessionStatus::Created, SessionStatus::Attached)
                | (SessionStatus::Attached, SessionStatus::InProgress | SessionStatus::Completed)
                | (SessionStatus::InProgress, SessionStatus::Completed)
        )
    }

    /// Move to `next`, or leave the status unchanged if the move is not allowed.
    ///
    /// Returns whether the transition happened.
    pub fn transition_to(&mut self, next: SessionStatus) -> bool {
        if self.status == next {
            return true;
        }
        if self.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }

    /// Build the manifest/payload document describing this session.
    #[must_use]
    pub fn to_manifest(&self) -> SessionManifest {
        SessionManifest {
            format_version: MANIFEST_FORMAT_VERSION,
            uuid: self.id,
            profiler: self.profiler.clone(),
            process: self.process.clone(),
            timestamp: self.created_at,
            output_directory: self.directory.clone(),
        }
    }
}

fn default_format_version() -> u32 {
    MANIFEST_FORMAT_VERSION
}

/// Session metadata exchanged with the agent.
///
/// Sent as the attach payload and written back by the agent as the
/// completion manifest. Field order is fixed, so serialization is byte-stable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct SessionManifest {
    /// Schema version.
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    /// Session identifier.
    pub uuid: Uuid,
    /// Profiler with resolved parameters.
    pub profiler: ProfilerDescriptor,
    /// Process snapshot taken at attach time.
    pub process: ProcessDescriptor,
    /// ISO-8601 session timestamp.
    pub timestamp: DateTime<Utc>,
    /// Directory reports are written to.
    #[serde(default)]
    pub output_directory: PathBuf,
}

impl SessionManifest {
    /// Serialize to compact JSON.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if serialization fails.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|err| AppError::Io(format!("failed to serialize session manifest: {err}")))
    }

    /// Parse a manifest read from `path`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ManifestUnreadable` for malformed JSON or an
    /// unsupported `format_version`.
    pub fn from_json_bytes(raw: &[u8], path: &Path) -> Result<Self> {
        let manifest: Self =
            serde_json::from_slice(raw).map_err(|err| AppError::ManifestUnreadable {
                path: path.to_owned(),
                reason: err.to_string(),
            })?;
        if manifest.format_version > MANIFEST_FORMAT_VERSION {
            return Err(AppError::ManifestUnreadable {
                path: path.to_owned(),
                reason: format!(
                    "format_version {} is newer than supported {MANIFEST_FORMAT_VERSION}",
                    manifest.format_version
                ),
            });
        }
        Ok(manifest)
    }
}
