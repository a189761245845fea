//! Process catalog backed by published diagnostics endpoints.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use tracing::warn;

use super::ProcessCatalog;
use crate::diagnostics::{endpoint, DiagnosticsClient};
use crate::models::process::ProcessDescriptor;
use crate::Result;

/// Lists runtimes by their diagnostics endpoints and queries each with
/// `ProcessInfo2`.
#[derive(Debug, Clone)]
pub struct DiagnosticsProcessCatalog {
    diagnostics_dir: PathBuf,
    own_pid: u32,
}

impl DiagnosticsProcessCatalog {
    /// Look for endpoints under `diagnostics_dir`. The host's own pid is
    /// never listed.
    #[must_use]
    pub fn new(diagnostics_dir: impl Into<PathBuf>) -> Self {
        Self {
            diagnostics_dir: diagnostics_dir.into(),
            own_pid: std::process::id(),
        }
    }

    async fn describe(&self, pid: u32) -> Result<ProcessDescriptor> {
        let client = DiagnosticsClient::locate(&self.diagnostics_dir, pid)?;
        let info = client.process_info().await?;
        Ok(ProcessDescriptor {
            pid,
            managed_entrypoint: info.managed_entrypoint,
            runtime_version: info.clr_version,
            start_time: endpoint::process_start_time(pid),
        })
    }
}

impl ProcessCatalog for DiagnosticsProcessCatalog {
    fn list(&self) -> Pin<Box<dyn Future<Output = Result<Vec<ProcessDescriptor>>> + Send + '_>> {
        Box::pin(async move {
            let mut processes = Vec::new();
            for pid in endpoint::published_pids(&self.diagnostics_dir)? {
                if pid == self.own_pid || !endpoint::process_alive(pid) {
                    continue;
                }
                match self.describe(pid).await {
                    Ok(process) => processes.push(process),
                    Err(err) => warn!(pid, %err, "skipping unqueryable process"),
                }
            }
            Ok(processes)
        })
    }

    fn get(&self, pid: u32) -> Pin<Box<dyn Future<Output = Result<ProcessDescriptor>> + Send + '_>> {
        Box::pin(self.describe(pid))
    }
}
