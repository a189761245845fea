//! Global configuration parsing and validation.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::models::profiler::ProfilerDescriptor;
use crate::{AppError, Result};

/// Directory name used under the system temp dir for sessions and staging.
pub const DEFAULT_ROOT_NAME: &str = "profiler-host";

/// Lower bound for the manifest poll interval.
pub const MIN_POLL_INTERVAL_MS: u64 = 50;

/// Upper bound for the manifest poll interval.
pub const MAX_POLL_INTERVAL_MS: u64 = 5000;

/// Configurable timeout values for attach and completion tracking.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Time the target runtime is given to acknowledge an attach request.
    #[serde(default = "default_attach_seconds")]
    pub attach_seconds: u64,
    /// Interval between manifest existence checks.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            attach_seconds: default_attach_seconds(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_attach_seconds() -> u64 {
    10
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_session_root() -> PathBuf {
    env::temp_dir().join(DEFAULT_ROOT_NAME)
}

fn default_library_base_name() -> String {
    "profilers".into()
}

fn default_build_version() -> String {
    env!("CARGO_PKG_VERSION").into()
}

fn default_diagnostics_dir() -> PathBuf {
    env::var_os("TMPDIR").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from)
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Root directory holding one sub-directory per session.
    #[serde(default = "default_session_root")]
    pub session_root: PathBuf,
    /// Directory receiving version-tagged copies of the agent library.
    /// Falls back to `session_root` when unset.
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
    /// Directory containing the canonical bundled agent library.
    /// Falls back to the directory of the running executable when unset.
    #[serde(default)]
    pub bundled_library_dir: Option<PathBuf>,
    /// Base name of the agent library, without platform prefix or suffix.
    #[serde(default = "default_library_base_name")]
    pub library_base_name: String,
    /// Version token embedded in staged library file names.
    #[serde(default = "default_build_version")]
    pub build_version: String,
    /// Directory where target runtimes publish their diagnostics sockets.
    #[serde(default = "default_diagnostics_dir")]
    pub diagnostics_dir: PathBuf,
    /// Timeout configuration.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Profilers offered by the bundled agent.
    #[serde(default)]
    pub profilers: Vec<ProfilerDescriptor>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Directory receiving staged agent libraries.
    #[must_use]
    pub fn staging_dir(&self) -> &Path {
        self.staging_dir.as_deref().unwrap_or(&self.session_root)
    }

    /// Directory holding the canonical bundled agent library.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if no directory is configured and the
    /// location of the running executable cannot be determined.
    pub fn bundled_library_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.bundled_library_dir {
            return Ok(dir.clone());
        }
        let exe = env::current_exe()
            .map_err(|err| AppError::Config(format!("cannot locate executable: {err}")))?;
        exe.parent().map(Path::to_path_buf).ok_or_else(|| {
            AppError::Config(format!("executable has no parent: {}", exe.display()))
        })
    }

    /// Attach acknowledgment timeout.
    #[must_use]
    pub fn attach_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.attach_seconds)
    }

    /// Manifest poll interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.timeouts.poll_interval_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.timeouts.attach_seconds == 0 {
            return Err(AppError::Config(
                "attach_seconds must be greater than zero".into(),
            ));
        }

        let poll = self.timeouts.poll_interval_ms;
        if !(MIN_POLL_INTERVAL_MS..=MAX_POLL_INTERVAL_MS).contains(&poll) {
            return Err(AppError::Config(format!(
                "poll_interval_ms must be within {MIN_POLL_INTERVAL_MS}..={MAX_POLL_INTERVAL_MS}, got {poll}"
            )));
        }

        validate_version_token(&self.build_version)?;

        if self.library_base_name.is_empty()
            || self.library_base_name.contains(std::path::is_separator)
        {
            return Err(AppError::Config(format!(
                "library_base_name is not a plain file name: '{}'",
                self.library_base_name
            )));
        }

        let mut seen = HashSet::new();
        for profiler in &self.profilers {
            if !seen.insert(profiler.id) {
                return Err(AppError::Config(format!(
                    "duplicate profiler id {}",
                    profiler.id
                )));
            }
        }

        if self.profilers.is_empty() {
            warn!("no profilers configured; the profiler catalog is empty");
        }

        Ok(())
    }
}

/// Check that a build version only uses file-name-safe characters.
///
/// Other characters are rejected rather than rewritten so that distinct
/// versions always map to distinct staged paths.
///
/// # Errors
///
/// Returns `AppError::Config` for an empty token or a disallowed character.
pub fn validate_version_token(version: &str) -> Result<()> {
    if version.is_empty() {
        return Err(AppError::Config("build_version must not be empty".into()));
    }
    if let Some(bad) = version
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '-')))
    {
        return Err(AppError::Config(format!(
            "build_version '{version}' contains disallowed character '{bad}'"
        )));
    }
    Ok(())
}
