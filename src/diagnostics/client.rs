//! Request/response client for one runtime's diagnostics endpoint.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use interprocess::local_socket::tokio::Stream;
use interprocess::local_socket::traits::tokio::Stream as _;
use interprocess::local_socket::{GenericFilePath, ToFsName};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

use super::codec::{
    self, IpcHeader, PayloadReader, COMMAND_SET_PROCESS, COMMAND_SET_SERVER, HEADER_LEN,
    PROCESS_INFO2, SERVER_ERROR, SERVER_OK,
};
use super::endpoint;
use crate::{AppError, Result};

/// The profiler was loaded but refused to attach.
pub const CORPROF_E_PROFILER_NOT_ATTACHABLE: u32 = 0x8013_1368;
/// A profiler is already active in the target.
pub const CORPROF_E_PROFILER_ALREADY_ACTIVE: u32 = 0x8013_136A;
/// The target process could not be found by the runtime.
pub const CORPROF_E_PROFILEE_PROCESS_NOT_FOUND: u32 = 0x8013_136D;
/// The profiler cancelled its own activation.
pub const CORPROF_E_PROFILER_CANCEL_ACTIVATION: u32 = 0x8013_1375;

/// Process details answered by `ProcessInfo2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeProcessInfo {
    /// Process id as reported by the runtime.
    pub pid: u64,
    /// Per-runtime-instance cookie.
    pub runtime_cookie: Uuid,
    /// Full command line.
    pub command_line: String,
    /// Operating system name.
    pub os: String,
    /// Processor architecture.
    pub arch: String,
    /// Managed entry-point assembly name.
    pub managed_entrypoint: String,
    /// Runtime version string.
    pub clr_version: String,
}

/// Client bound to one process's diagnostics endpoint.
#[derive(Debug, Clone)]
pub struct DiagnosticsClient {
    pid: u32,
    endpoint: PathBuf,
}

impl DiagnosticsClient {
    /// Locate the endpoint of `pid` under `diagnostics_dir`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ProcessUnreachable` if no endpoint is published.
    pub fn locate(diagnostics_dir: &Path, pid: u32) -> Result<Self> {
        let endpoint = endpoint::resolve(diagnostics_dir, pid)?;
        Ok(Self { pid, endpoint })
    }

    /// Bind to an explicit endpoint path.
    #[must_use]
    pub fn with_endpoint(pid: u32, endpoint: impl Into<PathBuf>) -> Self {
        Self {
            pid,
            endpoint: endpoint.into(),
        }
    }

    /// Target pid.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Endpoint path.
    #[must_use]
    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    /// Ask the runtime to load `agent_path` as profiler `profiler_id`,
    /// handing it `client_data`.
    ///
    /// `timeout` bounds the whole exchange and is also passed to the runtime
    /// as its own attach timeout.
    ///
    /// # Errors
    ///
    /// - `AppError::PayloadTooLarge` if the request does not fit one message.
    /// - `AppError::ProcessUnreachable` if the endpoint cannot be reached.
    /// - `AppError::AttachTimeout` if no reply arrives within `timeout`.
    /// - `AppError::ProfilerRejected` or `AppError::AttachFailed` on an error reply.
    pub async fn attach_profiler(
        &self,
        timeout: Duration,
        profiler_id: Uuid,
        agent_path: &Path,
        client_data: &[u8],
    ) -> Result<()> {
        let message =
            codec::encode_attach_profiler(timeout, profiler_id, agent_path, client_data)?;

        let (header, body) = tokio::time::timeout(timeout, self.round_trip(&message))
            .await
            .map_err(|_| AppError::AttachTimeout {
                pid: self.pid,
                timeout,
            })??;

        let hresult = self.server_status(header, &body)?;
        if hresult & 0x8000_0000 != 0 {
            return Err(map_attach_hresult(self.pid, hresult));
        }
        debug!(pid = self.pid, %profiler_id, "runtime accepted attach request");
        Ok(())
    }

    /// Query the runtime for process details.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ProcessUnreachable` if the endpoint cannot be
    /// reached, or `AppError::Ipc` if the reply is malformed or an error.
    pub async fn process_info(&self) -> Result<RuntimeProcessInfo> {
        let message = codec::encode_message(COMMAND_SET_PROCESS, PROCESS_INFO2, &[])?;
        let (header, body) = self.round_trip(&message).await?;

        if header.command_set != COMMAND_SET_SERVER || header.command_id != SERVER_OK {
            let hresult = PayloadReader::new(&body).get_u32().unwrap_or(0);
            return Err(AppError::Ipc(format!(
                "process info for pid {} refused with hresult {hresult:#010x}",
                self.pid
            )));
        }

        let mut reader = PayloadReader::new(&body);
        Ok(RuntimeProcessInfo {
            pid: reader.get_u64()?,
            runtime_cookie: reader.get_guid()?,
            command_line: reader.get_string()?,
            os: reader.get_string()?,
            arch: reader.get_string()?,
            managed_entrypoint: reader.get_string()?,
            clr_version: reader.get_string()?,
        })
    }

    /// Extract the HRESULT carried by a server-set reply.
    fn server_status(&self, header: IpcHeader, body: &[u8]) -> Result<u32> {
        if header.command_set != COMMAND_SET_SERVER {
            return Err(AppError::Ipc(format!(
                "unexpected reply command set {:#04x}",
                header.command_set
            )));
        }
        let mut reader = PayloadReader::new(body);
        match header.command_id {
            SERVER_OK if reader.remaining() == 0 => Ok(0),
            SERVER_OK => reader.get_u32(),
            SERVER_ERROR => {
                let hresult = reader.get_u32()?;
                warn!(pid = self.pid, hresult = %format_args!("{hresult:#010x}"), "runtime returned error");
                Ok(hresult | 0x8000_0000)
            }
            other => Err(AppError::Ipc(format!("unexpected reply command id {other:#04x}"))),
        }
    }

    async fn connect(&self) -> Result<Stream> {
        let name = self
            .endpoint
            .as_path()
            .to_fs_name::<GenericFilePath>()
            .map_err(|err| AppError::ProcessUnreachable {
                pid: self.pid,
                reason: format!("invalid endpoint name {}: {err}", self.endpoint.display()),
            })?;
        Stream::connect(name)
            .await
            .map_err(|err| AppError::ProcessUnreachable {
                pid: self.pid,
                reason: format!("cannot connect to {}: {err}", self.endpoint.display()),
            })
    }

    async fn round_trip(&self, message: &[u8]) -> Result<(IpcHeader, Bytes)> {
        let mut stream = self.connect().await?;
        let ipc_err = |err: std::io::Error| AppError::Ipc(format!("pid {}: {err}", self.pid));

        stream.write_all(message).await.map_err(ipc_err)?;
        stream.flush().await.map_err(ipc_err)?;

        let mut raw = [0_u8; HEADER_LEN];
        stream.read_exact(&mut raw).await.map_err(ipc_err)?;
        let header = codec::decode_header(&raw)?;

        let mut body = vec![0_u8; header.payload_len()];
        stream.read_exact(&mut body).await.map_err(ipc_err)?;
        Ok((header, Bytes::from(body)))
    }
}

/// Map a failing attach HRESULT to the host's error taxonomy.
#[must_use]
pub fn map_attach_hresult(pid: u32, hresult: u32) -> AppError {
    match hresult {
        CORPROF_E_PROFILER_NOT_ATTACHABLE
        | CORPROF_E_PROFILER_ALREADY_ACTIVE
        | CORPROF_E_PROFILER_CANCEL_ACTIVATION => AppError::ProfilerRejected { pid, hresult },
        CORPROF_E_PROFILEE_PROCESS_NOT_FOUND => AppError::ProcessUnreachable {
            pid,
            reason: "runtime reports the profilee is gone".into(),
        },
        _ => AppError::AttachFailed { pid, hresult },
    }
}
