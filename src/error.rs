//! Error types for companion-voice.
//!
//! Errors are split by concern:
//! - **Call errors** ([`VoiceCallError`]): prevent a call from starting or end it
//! - **Transport errors** ([`TransportError`]): session connection and wire failures
//! - **Codec errors** ([`CodecError`]): malformed inbound audio payloads
//! - **Sink errors** ([`SinkError`]): outbound frame submission failures
//!
//! Recoverable runtime issues (dropped frames, malformed chunks) are surfaced
//! via [`EventCallback`](crate::EventCallback) instead.

/// Fatal errors that prevent a voice call from starting or keep it running.
///
/// These are returned from [`CallController::start()`] and are always mirrored
/// into the controller's state and status line before being returned.
///
/// [`CallController::start()`]: crate::CallController::start
#[derive(Debug, thiserror::Error)]
pub enum VoiceCallError {
    /// The requested audio device was not found.
    #[error("device not found: {name}")]
    DeviceNotFound {
        /// Name of the device that wasn't found.
        name: String,
    },

    /// The requested device exists but is unavailable.
    #[error("device unavailable: {name} - {reason}")]
    DeviceUnavailable {
        /// Name of the unavailable device.
        name: String,
        /// Reason the device is unavailable.
        reason: String,
    },

    /// No default input device is configured on this system.
    #[error("no default input device configured")]
    NoDefaultDevice,

    /// No default output device is configured on this system.
    #[error("no default output device configured")]
    NoDefaultOutputDevice,

    /// Permission to capture audio was denied.
    ///
    /// On macOS, check System Settings > Privacy & Security > Microphone.
    #[error("permission denied for audio capture (check OS settings)")]
    PermissionDenied,

    /// The device delivers a sample format this crate cannot convert.
    #[error("unsupported sample format: {format}")]
    UnsupportedFormat {
        /// The format that wasn't supported.
        format: String,
    },

    /// An error from the underlying audio library (CPAL).
    #[error("audio backend error: {0}")]
    BackendError(String),

    /// No credential was configured for the live session endpoint.
    #[error("no API key configured (set GEMINI_API_KEY or API_KEY)")]
    MissingApiKey,

    /// The session transport failed to connect or failed mid-call.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl VoiceCallError {
    /// Returns `true` for microphone and speaker failures.
    pub fn is_device_error(&self) -> bool {
        !matches!(self, Self::MissingApiKey | Self::Transport(_))
    }
}

/// Errors raised by a session [`Connector`](crate::transport::Connector).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("connection failed: {reason}")]
    Connect {
        /// Description of what went wrong.
        reason: String,
    },

    /// The remote endpoint refused the session.
    #[error("session rejected: {reason}")]
    Rejected {
        /// Reason reported by the remote, if any.
        reason: String,
    },

    /// The remote did not acknowledge the session in time.
    #[error("session setup timed out after {seconds}s")]
    SetupTimeout {
        /// How long the connector waited.
        seconds: u64,
    },

    /// The session closed before the operation completed.
    #[error("session closed")]
    Closed,

    /// WebSocket-level failure.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// A wire message could not be serialized or parsed.
    #[error("invalid message: {0}")]
    Json(#[from] serde_json::Error),
}

impl TransportError {
    /// Returns `true` if retrying the connection might succeed.
    ///
    /// Explicit rejections and malformed messages are not retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::SetupTimeout { .. } | Self::WebSocket(_) | Self::Closed
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

/// Errors decoding an inbound audio payload.
///
/// A payload that fails to decode is dropped; the session keeps running.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The payload is not valid standard base64.
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    /// The decoded payload does not hold a whole number of 16-bit samples.
    #[error("PCM16 payload has odd length {len}")]
    OddByteLength {
        /// Length of the decoded payload in bytes.
        len: usize,
    },
}

/// Errors that can occur when submitting a frame to a [`FrameSink`](crate::FrameSink).
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The outbound queue is full; the frame was not accepted.
    #[error("outbound queue full")]
    Full,

    /// The receiving side was closed.
    #[error("sink closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_call_error_display() {
        let err = VoiceCallError::DeviceNotFound {
            name: "USB Mic".to_string(),
        };
        assert_eq!(err.to_string(), "device not found: USB Mic");
    }

    #[test]
    fn test_transport_error_is_transparent() {
        let err: VoiceCallError = TransportError::Rejected {
            reason: "bad model".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "session rejected: bad model");
        assert!(!err.is_device_error());
    }

    #[test]
    fn test_device_error_classification() {
        assert!(VoiceCallError::PermissionDenied.is_device_error());
        assert!(VoiceCallError::NoDefaultOutputDevice.is_device_error());
        assert!(!VoiceCallError::MissingApiKey.is_device_error());
    }

    #[test]
    fn test_retryable_transport_errors() {
        assert!(TransportError::Connect {
            reason: "dns".to_string()
        }
        .is_retryable());
        assert!(!TransportError::Rejected {
            reason: "quota".to_string()
        }
        .is_retryable());
        assert!(TransportError::Closed.is_retryable());
        let garbage = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(!TransportError::Json(garbage).is_retryable());
    }

    #[test]
    fn test_codec_error_odd_length() {
        let err = CodecError::OddByteLength { len: 3 };
        assert_eq!(err.to_string(), "PCM16 payload has odd length 3");
    }

    #[test]
    fn test_sink_error_display() {
        assert_eq!(SinkError::Full.to_string(), "outbound queue full");
        assert_eq!(SinkError::Closed.to_string(), "sink closed");
    }
}
