//! Frame sink trait for outbound audio.
//!
//! A [`FrameSink`] is any destination that accepts captured frames. The
//! session's [`TransportHandle`](crate::transport::TransportHandle) is the
//! sink used during a call.

use crate::{AudioFrame, SinkError};

/// A destination for captured frames.
///
/// # Implementation Notes
///
/// - `submit` is called from the capture bridge and must never wait: queue
///   the frame or refuse it with [`SinkError::Full`]
/// - Returning [`SinkError::Closed`] stops the capture bridge
///
/// # Example
///
/// ```
/// use companion_voice::{AudioFrame, FrameSink, SinkError};
///
/// struct PrintSink;
///
/// impl FrameSink for PrintSink {
///     fn name(&self) -> &str {
///         "print"
///     }
///
///     fn submit(&self, frame: AudioFrame) -> Result<(), SinkError> {
///         println!("Captured {} samples", frame.len());
///         Ok(())
///     }
/// }
/// ```
pub trait FrameSink: Send + Sync {
    /// Human-readable name for logging and error messages.
    fn name(&self) -> &str;

    /// Queues a frame for delivery without blocking.
    fn submit(&self, frame: AudioFrame) -> Result<(), SinkError>;
}
