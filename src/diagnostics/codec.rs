//! Binary framing for the runtime diagnostics IPC protocol.
//!
//! Every message starts with a 20-byte header:
//!
//! | offset | size | field                         |
//! |--------|------|-------------------------------|
//! | 0      | 14   | magic `DOTNET_IPC_V1\0`       |
//! | 14     | 2    | total size incl. header (LE)  |
//! | 16     | 1    | command set                   |
//! | 17     | 1    | command id                    |
//! | 18     | 2    | reserved, zero                |
//!
//! Payload integers are little endian, GUIDs use the mixed-endian native
//! layout, and strings are a `u32` count of UTF-16 code units (including the
//! terminating NUL) followed by the code units.

use std::path::Path;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::{AppError, Result};

/// Protocol magic.
pub const MAGIC: &[u8; 14] = b"DOTNET_IPC_V1\0";

/// Header length in bytes.
pub const HEADER_LEN: usize = 20;

/// Largest message the 16-bit size field can describe.
pub const MAX_MESSAGE_LEN: usize = u16::MAX as usize;

/// Command set of server responses.
pub const COMMAND_SET_SERVER: u8 = 0xFF;
/// Command set of process queries.
pub const COMMAND_SET_PROCESS: u8 = 0x04;
/// Command set of profiler commands.
pub const COMMAND_SET_PROFILER: u8 = 0x03;

/// Server response: success.
pub const SERVER_OK: u8 = 0x00;
/// Server response: error, payload carries an HRESULT.
pub const SERVER_ERROR: u8 = 0xFF;

/// `Profiler/AttachProfiler`.
pub const PROFILER_ATTACH: u8 = 0x01;
/// `Process/ProcessInfo2`.
pub const PROCESS_INFO2: u8 = 0x04;

/// Decoded message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpcHeader {
    /// Total message size, header included.
    pub size: u16,
    /// Command set.
    pub command_set: u8,
    /// Command id within the set.
    pub command_id: u8,
}

impl IpcHeader {
    /// Length of the payload following the header.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        usize::from(self.size).saturating_sub(HEADER_LEN)
    }
}

/// Frame `payload` as a complete message.
///
/// # Errors
///
/// Returns `AppError::PayloadTooLarge` if the message exceeds [`MAX_MESSAGE_LEN`].
pub fn encode_message(command_set: u8, command_id: u8, payload: &[u8]) -> Result<Bytes> {
    let total = HEADER_LEN + payload.len();
    let size = u16::try_from(total).map_err(|_| AppError::PayloadTooLarge {
        size: total,
        limit: MAX_MESSAGE_LEN,
    })?;

    let mut buf = BytesMut::with_capacity(total);
    buf.put_slice(MAGIC);
    buf.put_u16_le(size);
    buf.put_u8(command_set);
    buf.put_u8(command_id);
    buf.put_u16_le(0);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Parse and validate a message header.
///
/// # Errors
///
/// Returns `AppError::Ipc` on a bad magic or a size smaller than the header.
pub fn decode_header(raw: &[u8; HEADER_LEN]) -> Result<IpcHeader> {
    if &raw[..MAGIC.len()] != MAGIC {
        return Err(AppError::Ipc("response header has an unknown magic".into()));
    }
    let size = u16::from_le_bytes([raw[14], raw[15]]);
    if usize::from(size) < HEADER_LEN {
        return Err(AppError::Ipc(format!(
            "response size {size} is smaller than the header"
        )));
    }
    Ok(IpcHeader {
        size,
        command_set: raw[16],
        command_id: raw[17],
    })
}

/// Number of bytes `s` occupies as a protocol string.
#[must_use]
pub fn string_len(s: &str) -> usize {
    4 + 2 * (s.encode_utf16().count() + 1)
}

/// Append a protocol string.
pub fn put_string(buf: &mut BytesMut, s: &str) {
    let units: Vec<u16> = s.encode_utf16().chain(std::iter::once(0)).collect();
    // Bounded by MAX_MESSAGE_LEN at framing time.
    buf.put_u32_le(u32::try_from(units.len()).unwrap_or(u32::MAX));
    for unit in units {
        buf.put_u16_le(unit);
    }
}

/// Append a GUID in native layout.
pub fn put_guid(buf: &mut BytesMut, id: Uuid) {
    buf.put_slice(&id.to_bytes_le());
}

/// Total framed size of an `AttachProfiler` message.
#[must_use]
pub fn attach_message_len(agent_path: &Path, client_data_len: usize) -> usize {
    HEADER_LEN + 4 + 16 + string_len(&agent_path.to_string_lossy()) + 4 + client_data_len
}

/// Build a framed `AttachProfiler` request.
///
/// # Errors
///
/// Returns `AppError::PayloadTooLarge` if the message does not fit the
/// protocol's 16-bit size field.
pub fn encode_attach_profiler(
    timeout: Duration,
    profiler_id: Uuid,
    agent_path: &Path,
    client_data: &[u8],
) -> Result<Bytes> {
    let total = attach_message_len(agent_path, client_data.len());
    if total > MAX_MESSAGE_LEN {
        return Err(AppError::PayloadTooLarge {
            size: total,
            limit: MAX_MESSAGE_LEN,
        });
    }

    let mut payload = BytesMut::with_capacity(total - HEADER_LEN);
    payload.put_u32_le(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
    put_guid(&mut payload, profiler_id);
    put_string(&mut payload, &agent_path.to_string_lossy());
    payload.put_u32_le(u32::try_from(client_data.len()).unwrap_or(u32::MAX));
    payload.put_slice(client_data);

    encode_message(COMMAND_SET_PROFILER, PROFILER_ATTACH, &payload)
}

/// Cursor over a response payload.
#[derive(Debug)]
pub struct PayloadReader<'a> {
    buf: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    /// Start reading at the beginning of `buf`.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.buf.len() < len {
            return Err(AppError::Ipc(format!(
                "truncated payload: wanted {len} bytes, {} left",
                self.buf.len()
            )));
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    /// Read a little-endian `u32`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ipc` if the payload is truncated.
    pub fn get_u32(&mut self) -> Result<u32> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    /// Read a little-endian `u64`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ipc` if the payload is truncated.
    pub fn get_u64(&mut self) -> Result<u64> {
        let raw = self.take(8)?;
        let mut bytes = [0_u8; 8];
        bytes.copy_from_slice(raw);
        Ok(u64::from_le_bytes(bytes))
    }

    /// Read a native-layout GUID.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ipc` if the payload is truncated.
    pub fn get_guid(&mut self) -> Result<Uuid> {
        let raw = self.take(16)?;
        let mut bytes = [0_u8; 16];
        bytes.copy_from_slice(raw);
        Ok(Uuid::from_bytes_le(bytes))
    }

    /// Read a protocol string, dropping the terminating NUL.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ipc` if the payload is truncated or the string is
    /// not valid UTF-16.
    pub fn get_string(&mut self) -> Result<String> {
        let units = usize::try_from(self.get_u32()?)
            .map_err(|_| AppError::Ipc("string length overflows usize".into()))?;
        let raw = self.take(units.checked_mul(2).ok_or_else(|| {
            AppError::Ipc("string length overflows usize".into())
        })?)?;
        let mut decoded: Vec<u16> = raw
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        if decoded.last() == Some(&0) {
            decoded.pop();
        }
        String::from_utf16(&decoded)
            .map_err(|err| AppError::Ipc(format!("string is not valid UTF-16: {err}")))
    }
}
