//! Attach orchestration: stage, describe, probe, then ask the runtime.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, info_span, warn, Instrument};

use super::payload::{encode_payload, ensure_fits};
use super::{AttachPrimitive, AttachRequest};
use crate::config::GlobalConfig;
use crate::models::process::ProcessDescriptor;
use crate::models::profiler::ProfilerDescriptor;
use crate::models::session::{SessionDescriptor, SessionStatus};
use crate::staging::{LibraryStager, StagedLibrary};
use crate::{AppError, Result};

/// A session described and its agent staged, attach not yet issued.
///
/// The descriptor exists from this point on, so callers can record it before
/// the attach call resolves.
#[derive(Debug, Clone)]
pub struct PreparedAttach {
    /// Session in `Created` status.
    pub session: SessionDescriptor,
    /// Staged agent for this build.
    pub library: StagedLibrary,
    /// Serialized session payload.
    pub payload: Vec<u8>,
}

/// Drives one attach per call; holds no per-session state.
pub struct AttachCoordinator {
    stager: LibraryStager,
    primitive: Arc<dyn AttachPrimitive>,
    session_root: PathBuf,
    build_version: String,
}

impl std::fmt::Debug for AttachCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachCoordinator")
            .field("stager", &self.stager)
            .field("session_root", &self.session_root)
            .field("build_version", &self.build_version)
            .finish_non_exhaustive()
    }
}

impl AttachCoordinator {
    /// Construct a coordinator.
    #[must_use]
    pub fn new(
        stager: LibraryStager,
        primitive: Arc<dyn AttachPrimitive>,
        session_root: impl Into<PathBuf>,
        build_version: impl Into<String>,
    ) -> Self {
        Self {
            stager,
            primitive,
            session_root: session_root.into(),
            build_version: build_version.into(),
        }
    }

    /// Construct a coordinator from the global configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the bundled library directory cannot be
    /// resolved.
    pub fn from_config(config: &GlobalConfig, primitive: Arc<dyn AttachPrimitive>) -> Result<Self> {
        Ok(Self::new(
            LibraryStager::from_config(config)?,
            primitive,
            config.session_root.clone(),
            config.build_version.clone(),
        ))
    }

    /// Root under which session directories are created.
    #[must_use]
    pub fn session_root(&self) -> &Path {
        &self.session_root
    }

    /// Generate a session, stage the agent, and serialize the payload.
    ///
    /// # Errors
    ///
    /// - `AppError::LibraryNotFound` or `AppError::StagingIo` from staging.
    /// - `AppError::PayloadTooLarge` if the request cannot fit one message.
    pub fn prepare(
        &self,
        process: ProcessDescriptor,
        profiler: ProfilerDescriptor,
    ) -> Result<PreparedAttach> {
        let session = SessionDescriptor::new(&self.session_root, profiler, process);
        let library = self.stager.stage(&self.build_version)?;
        let payload = encode_payload(&session)?;
        ensure_fits(&library.path, &payload)?;
        Ok(PreparedAttach {
            session,
            library,
            payload,
        })
    }

    /// Probe the target, create the session directory, and issue the attach.
    ///
    /// The session directory is left in place when the attach fails.
    ///
    /// # Errors
    ///
    /// - `AppError::ProcessUnreachable` if the probe fails; no directory is
    ///   created in that case.
    /// - `AppError::Io` if the session directory cannot be created.
    /// - `AppError::AttachTimeout` if the primitive does not answer within
    ///   `timeout`.
    /// - Any error of [`AttachPrimitive::attach`].
    pub async fn issue(&self, prepared: PreparedAttach, timeout: Duration) -> Result<SessionDescriptor> {
        let PreparedAttach {
            mut session,
            library,
            payload,
        } = prepared;

        let span = info_span!(
            "attach",
            session_id = %session.id,
            pid = session.process.pid,
            profiler_id = %session.profiler.id,
        );

        async move {
            self.primitive.probe(session.process.pid).await?;

            tokio::fs::create_dir_all(&session.directory)
                .await
                .map_err(|err| {
                    AppError::Io(format!(
                        "cannot create session directory {}: {err}",
                        session.directory.display()
                    ))
                })?;

            let request = AttachRequest {
                pid: session.process.pid,
                profiler_id: session.profiler.id,
                agent_path: library.path.clone(),
                payload,
                timeout,
            };

            let pid = request.pid;
            let outcome = tokio::time::timeout(timeout, self.primitive.attach(request))
                .await
                .unwrap_or_else(|_| Err(AppError::AttachTimeout { pid, timeout }));
            if let Err(err) = outcome {
                warn!(
                    %err,
                    directory = %session.directory.display(),
                    "attach failed; session directory kept"
                );
                return Err(err);
            }

            session.transition_to(SessionStatus::Attached);
            info!(
                agent = %library.path.display(),
                directory = %session.directory.display(),
                "profiler attached"
            );
            Ok(session)
        }
        .instrument(span)
        .await
    }

    /// [`prepare`](Self::prepare) then [`issue`](Self::issue).
    ///
    /// # Errors
    ///
    /// Any error of either step.
    pub async fn attach(
        &self,
        process: ProcessDescriptor,
        profiler: ProfilerDescriptor,
        timeout: Duration,
    ) -> Result<SessionDescriptor> {
        let prepared = self.prepare(process, profiler)?;
        self.issue(prepared, timeout).await
    }
}
