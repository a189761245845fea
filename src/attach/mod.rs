//! Attaching the staged agent to a running process.
//!
//! The [`AttachPrimitive`] trait separates the coordinator from the
//! transport that actually asks a runtime to load the agent, so tests and
//! alternative runtimes can substitute their own.

pub mod coordinator;
pub mod diagnostics;
pub mod payload;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use uuid::Uuid;

use crate::Result;

pub use coordinator::{AttachCoordinator, PreparedAttach};
pub use diagnostics::DiagnosticsAttach;

/// Everything the runtime needs to load the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachRequest {
    /// Target process.
    pub pid: u32,
    /// Class identifier the runtime instantiates.
    pub profiler_id: Uuid,
    /// Staged, version-unique agent path.
    pub agent_path: PathBuf,
    /// Session payload delivered to the agent on attach.
    pub payload: Vec<u8>,
    /// Upper bound for the runtime to acknowledge the request.
    pub timeout: Duration,
}

/// Mechanism that asks a running process to load a profiler agent.
pub trait AttachPrimitive: Send + Sync {
    /// Check that `pid` exists and can receive an attach request.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ProcessUnreachable`](crate::AppError::ProcessUnreachable)
    /// if the process is gone or exposes no attach channel.
    fn probe(&self, pid: u32) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Issue the attach request and wait for the runtime's answer.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::AttachTimeout`](crate::AppError::AttachTimeout),
    /// [`AppError::ProfilerRejected`](crate::AppError::ProfilerRejected), or
    /// [`AppError::AttachFailed`](crate::AppError::AttachFailed) on failure.
    fn attach(
        &self,
        request: AttachRequest,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}
