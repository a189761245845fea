//! Report files produced by the agent.

use std::path::PathBuf;

use serde::Serialize;

/// One artifact found in a session directory.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReportFile {
    /// File name relative to the session directory.
    pub name: String,
    /// Absolute path.
    pub path: PathBuf,
    /// Size in bytes at listing time.
    pub size: u64,
}
