//! Providers of process and profiler descriptors.

pub mod process;
pub mod profiler;

use std::future::Future;
use std::pin::Pin;

use uuid::Uuid;

use crate::models::process::ProcessDescriptor;
use crate::models::profiler::ProfilerDescriptor;
use crate::{AppError, Result};

pub use process::DiagnosticsProcessCatalog;
pub use profiler::StaticProfilerCatalog;

/// Yields fresh snapshots of attachable managed processes.
pub trait ProcessCatalog: Send + Sync {
    /// Every process that currently exposes an attach channel.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if enumeration fails outright. Individual
    /// processes that cannot be queried are skipped.
    fn list(&self) -> Pin<Box<dyn Future<Output = Result<Vec<ProcessDescriptor>>> + Send + '_>>;

    /// Snapshot of one process.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ProcessUnreachable`] if it cannot be queried.
    fn get(&self, pid: u32) -> Pin<Box<dyn Future<Output = Result<ProcessDescriptor>> + Send + '_>>;
}

/// Yields the profilers the host can attach.
pub trait ProfilerCatalog: Send + Sync {
    /// Profilers, optionally including unreleased ones.
    fn profilers(&self, include_unreleased: bool) -> Vec<ProfilerDescriptor>;

    /// A fresh copy of one profiler, released or not.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for an unknown id.
    fn get(&self, id: Uuid) -> Result<ProfilerDescriptor> {
        self.profilers(true)
            .into_iter()
            .find(|profiler| profiler.id == id)
            .ok_or_else(|| AppError::NotFound(format!("profiler {id}")))
    }
}
