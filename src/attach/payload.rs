//! Session payload handed to the agent at attach time.
//!
//! The payload is the same JSON document the agent writes back as the
//! completion manifest, so one schema serves both directions.

use std::path::Path;

use crate::diagnostics::codec::{attach_message_len, MAX_MESSAGE_LEN};
use crate::models::session::{SessionDescriptor, SessionManifest};
use crate::{AppError, Result};

/// Serialize the session for delivery to the agent.
///
/// # Errors
///
/// Returns `AppError::Io` if serialization fails.
pub fn encode_payload(session: &SessionDescriptor) -> Result<Vec<u8>> {
    session.to_manifest().to_json_bytes()
}

/// Parse a payload produced by [`encode_payload`].
///
/// # Errors
///
/// Returns `AppError::ManifestUnreadable` if the bytes are not a valid
/// session document.
pub fn decode_payload(raw: &[u8]) -> Result<SessionManifest> {
    SessionManifest::from_json_bytes(raw, Path::new("<attach payload>"))
}

/// Check that an attach request carrying `payload` fits one IPC message.
///
/// # Errors
///
/// Returns `AppError::PayloadTooLarge` if it does not.
pub fn ensure_fits(agent_path: &Path, payload: &[u8]) -> Result<()> {
    let size = attach_message_len(agent_path, payload.len());
    if size > MAX_MESSAGE_LEN {
        return Err(AppError::PayloadTooLarge {
            size,
            limit: MAX_MESSAGE_LEN,
        });
    }
    Ok(())
}
