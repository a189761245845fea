//! Completion tracking for attached sessions.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::{list_reports, CompletedSession};
use crate::config::GlobalConfig;
use crate::models::report::ReportFile;
use crate::models::session::{SessionDescriptor, SessionManifest, SessionStatus};
use crate::{AppError, Result};

/// Poll intervals an unparseable manifest must stay byte-for-byte unchanged
/// before it is declared broken.
pub const UNREADABLE_STABLE_POLLS: u32 = 3;

/// Watches session directories for the agent's manifest.
///
/// Stateless apart from its settings: every call works on the session
/// passed in, so one tracker serves any number of concurrent sessions.
#[derive(Debug, Clone)]
pub struct SessionTracker {
    poll_interval: Duration,
    file_events: bool,
}

impl SessionTracker {
    /// Poll every `poll_interval`.
    #[must_use]
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            file_events: false,
        }
    }

    /// Tracker using the configured poll interval.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self::new(config.poll_interval())
    }

    /// Also wake on file-system events for the session directory.
    ///
    /// Polling stays in place; events only shorten the wait.
    #[must_use]
    pub fn with_file_events(mut self, enabled: bool) -> Self {
        self.file_events = enabled;
        self
    }

    /// Poll interval in use.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Whether the manifest exists. Never blocks.
    #[must_use]
    pub fn is_completed(&self, session: &SessionDescriptor) -> bool {
        session.manifest_path().is_file()
    }

    /// Status as observable right now.
    #[must_use]
    pub fn status(&self, session: &SessionDescriptor) -> SessionStatus {
        match session.status {
            SessionStatus::Created => SessionStatus::Created,
            SessionStatus::Completed => SessionStatus::Completed,
            SessionStatus::Attached | SessionStatus::InProgress => {
                if self.is_completed(session) {
                    SessionStatus::Completed
                } else {
                    SessionStatus::InProgress
                }
            }
        }
    }

    /// Report files of the session, excluding the manifest, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the session directory cannot be listed.
    pub fn enumerate_reports(&self, session: &SessionDescriptor) -> Result<Vec<ReportFile>> {
        list_reports(&session.directory)
    }

    /// Wait until the manifest exists and parses.
    ///
    /// There is no implicit timeout. A manifest that fails to parse is
    /// re-read on later polls and file events; it is only reported as broken
    /// once the same bytes have stayed unparseable for
    /// [`UNREADABLE_STABLE_POLLS`] poll intervals of wall-clock time.
    /// Event wake-ups shorten the wait but never the stability window.
    ///
    /// # Errors
    ///
    /// - `AppError::Cancelled` when `cancel` fires.
    /// - `AppError::ManifestUnreadable` for a stable, unparseable manifest
    ///   or one that names a different session.
    pub async fn await_completion(
        &self,
        session: &SessionDescriptor,
        cancel: &CancellationToken,
    ) -> Result<CompletedSession> {
        let span = info_span!("await_completion", session_id = %session.id);
        self.wait_for_manifest(session, cancel)
            .instrument(span)
            .await
            .map(|manifest| CompletedSession::new(session.clone(), manifest))
    }

    async fn wait_for_manifest(
        &self,
        session: &SessionDescriptor,
        cancel: &CancellationToken,
    ) -> Result<SessionManifest> {
        let manifest_path = session.manifest_path();
        let wake = Arc::new(Notify::new());
        let _watcher = if self.file_events {
            watch_directory(&session.directory, Arc::clone(&wake))
        } else {
            None
        };

        let stable_after = self.poll_interval * UNREADABLE_STABLE_POLLS;
        let mut failing: Option<(Vec<u8>, Instant)> = None;

        loop {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled(format!(
                    "stopped waiting for session {}",
                    session.id
                )));
            }

            if let Some(manifest) =
                read_manifest(session, &manifest_path, stable_after, &mut failing).await?
            {
                info!(reports_dir = %session.directory.display(), "session completed");
                return Ok(manifest);
            }

            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(self.poll_interval) => {}
                () = wake.notified() => {}
            }
        }
    }
}

/// One poll. `Ok(None)` means "not yet".
async fn read_manifest(
    session: &SessionDescriptor,
    path: &Path,
    stable_after: Duration,
    failing: &mut Option<(Vec<u8>, Instant)>,
) -> Result<Option<SessionManifest>> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            // Sharing violations while the agent still holds the file.
            debug!(%err, "manifest not readable yet");
            return Ok(None);
        }
    };

    match SessionManifest::from_json_bytes(&raw, path) {
        Ok(manifest) if manifest.uuid == session.id => Ok(Some(manifest)),
        Ok(manifest) => Err(AppError::ManifestUnreadable {
            path: path.to_owned(),
            reason: format!(
                "manifest belongs to session {}, expected {}",
                manifest.uuid, session.id
            ),
        }),
        Err(err) => {
            let now = Instant::now();
            let first_seen = match failing.take() {
                Some((previous, since)) if previous == raw => since,
                _ => now,
            };
            let unchanged_for = now.duration_since(first_seen);
            if unchanged_for >= stable_after {
                return Err(err);
            }
            debug!(
                unchanged = ?unchanged_for,
                %err,
                "manifest incomplete, retrying"
            );
            *failing = Some((raw, first_seen));
            Ok(None)
        }
    }
}

fn watch_directory(directory: &Path, wake: Arc<Notify>) -> Option<RecommendedWatcher> {
    let handler = move |event: notify::Result<Event>| {
        if let Ok(event) = event {
            if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                wake.notify_one();
            }
        }
    };

    let mut watcher = match notify::recommended_watcher(handler) {
        Ok(watcher) => watcher,
        Err(err) => {
            warn!(%err, "file watcher unavailable, polling only");
            return None;
        }
    };
    if let Err(err) = watcher.watch(directory, RecursiveMode::NonRecursive) {
        warn!(%err, directory = %directory.display(), "cannot watch session directory, polling only");
        return None;
    }
    Some(watcher)
}
