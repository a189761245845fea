//! Error types shared across the application.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// The canonical bundled agent library is absent.
    LibraryNotFound {
        /// Expected location of the bundled library.
        path: PathBuf,
    },
    /// Copying the bundled library into the staging directory failed.
    StagingIo {
        /// Destination that was being written.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
    /// The dynamic loader refused to map a library.
    LoadFailure {
        /// Library that failed to load.
        path: PathBuf,
        /// Loader diagnostic.
        cause: String,
    },
    /// A named export is missing from a loaded library.
    SymbolNotFound {
        /// Export name that was looked up.
        name: String,
    },
    /// The factory-lookup export signalled failure or returned null.
    FactoryNotFound {
        /// Class identifier passed to the factory lookup.
        class_id: Uuid,
        /// HRESULT returned by the export.
        hresult: i32,
    },
    /// `CreateInstance` on the class factory produced no object.
    ActivationFailed {
        /// Class identifier being activated.
        class_id: Uuid,
        /// Interface identifier requested.
        interface_id: Uuid,
        /// HRESULT returned by `CreateInstance`.
        hresult: i32,
    },
    /// The diagnostics channel of the target process cannot be reached.
    ProcessUnreachable {
        /// Target process id.
        pid: u32,
        /// Human-readable reason.
        reason: String,
    },
    /// The target did not acknowledge the attach request in time.
    AttachTimeout {
        /// Target process id.
        pid: u32,
        /// Timeout that elapsed.
        timeout: Duration,
    },
    /// The target runtime refused the profiler.
    ProfilerRejected {
        /// Target process id.
        pid: u32,
        /// HRESULT reported by the runtime.
        hresult: u32,
    },
    /// The attach primitive failed for any other reason.
    AttachFailed {
        /// Target process id.
        pid: u32,
        /// HRESULT reported by the runtime.
        hresult: u32,
    },
    /// The attach message exceeds what the diagnostics protocol can carry.
    PayloadTooLarge {
        /// Encoded message size in bytes.
        size: usize,
        /// Protocol limit in bytes.
        limit: usize,
    },
    /// A session manifest exists but cannot be parsed.
    ManifestUnreadable {
        /// Manifest location.
        path: PathBuf,
        /// Parse diagnostic.
        reason: String,
    },
    /// A profiler parameter value does not convert to the requested type.
    InvalidParameter(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Diagnostics wire-protocol violation.
    Ipc(String),
    /// The operation was cancelled by its caller.
    Cancelled(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::LibraryNotFound { path } => {
                write!(f, "library not found: {}", path.display())
            }
            Self::StagingIo { path, source } => {
                write!(f, "staging io: {}: {source}", path.display())
            }
            Self::LoadFailure { path, cause } => {
                write!(f, "load failure: {}: {cause}", path.display())
            }
            Self::SymbolNotFound { name } => write!(f, "symbol not found: {name}"),
            Self::FactoryNotFound { class_id, hresult } => {
                write!(f, "factory not found: {class_id} (hresult {hresult:#010x})")
            }
            Self::ActivationFailed {
                class_id,
                interface_id,
                hresult,
            } => write!(
                f,
                "activation failed: {class_id} as {interface_id} (hresult {hresult:#010x})"
            ),
            Self::ProcessUnreachable { pid, reason } => {
                write!(f, "process unreachable: {pid}: {reason}")
            }
            Self::AttachTimeout { pid, timeout } => {
                write!(f, "attach timeout: {pid} after {}ms", timeout.as_millis())
            }
            Self::ProfilerRejected { pid, hresult } => {
                write!(f, "profiler rejected: {pid} (hresult {hresult:#010x})")
            }
            Self::AttachFailed { pid, hresult } => {
                write!(f, "attach failed: {pid} (hresult {hresult:#010x})")
            }
            Self::PayloadTooLarge { size, limit } => {
                write!(f, "payload too large: {size} bytes exceeds {limit}")
            }
            Self::ManifestUnreadable { path, reason } => {
                write!(f, "manifest unreadable: {}: {reason}", path.display())
            }
            Self::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Ipc(msg) => write!(f, "ipc: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::StagingIo { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}
