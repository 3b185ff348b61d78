//! Binary-to-text transport encoding for media payloads.
//!
//! The session carries audio inside JSON messages, so PCM bytes travel as
//! standard (padded) base64.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::CodecError;

/// Encodes bytes for a text-only transport.
pub fn bytes_to_transport_text(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decodes transport text back into bytes.
///
/// # Errors
///
/// Returns [`CodecError::InvalidBase64`] if the text is not standard base64.
pub fn transport_text_to_bytes(text: &str) -> Result<Vec<u8>, CodecError> {
    Ok(STANDARD.decode(text.trim())?)
}
