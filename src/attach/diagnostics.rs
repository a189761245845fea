//! [`AttachPrimitive`] backed by the runtime diagnostics IPC channel.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use tracing::debug;

use super::{AttachPrimitive, AttachRequest};
use crate::diagnostics::{endpoint, DiagnosticsClient};
use crate::{AppError, Result};

/// Attaches through `AttachProfiler` on the target's diagnostics endpoint.
#[derive(Debug, Clone)]
pub struct DiagnosticsAttach {
    diagnostics_dir: PathBuf,
}

impl DiagnosticsAttach {
    /// Look for endpoints under `diagnostics_dir`.
    #[must_use]
    pub fn new(diagnostics_dir: impl Into<PathBuf>) -> Self {
        Self {
            diagnostics_dir: diagnostics_dir.into(),
        }
    }
}

impl AttachPrimitive for DiagnosticsAttach {
    fn probe(&self, pid: u32) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if !endpoint::process_alive(pid) {
                return Err(AppError::ProcessUnreachable {
                    pid,
                    reason: "no such process".into(),
                });
            }
            let client = DiagnosticsClient::locate(&self.diagnostics_dir, pid)?;
            debug!(pid, endpoint = %client.endpoint().display(), "diagnostics endpoint found");
            Ok(())
        })
    }

    fn attach(
        &self,
        request: AttachRequest,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let client = DiagnosticsClient::locate(&self.diagnostics_dir, request.pid)?;
            client
                .attach_profiler(
                    request.timeout,
                    request.profiler_id,
                    &request.agent_path,
                    &request.payload,
                )
                .await
        })
    }
}
