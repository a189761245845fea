//! Target process snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Read-only snapshot of a managed process, re-fetched on every lookup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProcessDescriptor {
    /// Operating-system process id.
    pub pid: u32,
    /// Managed entry-point assembly name.
    #[serde(default)]
    pub managed_entrypoint: String,
    /// Runtime product version string.
    #[serde(default)]
    pub runtime_version: String,
    /// Process start time, when the platform exposes it.
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
}

impl ProcessDescriptor {
    /// Snapshot carrying only a pid.
    #[must_use]
    pub fn from_pid(pid: u32) -> Self {
        Self {
            pid,
            managed_entrypoint: String::new(),
            runtime_version: String::new(),
            start_time: None,
        }
    }
}
