//! Session transport: one bidirectional streaming session with the voice model.
//!
//! A [`Connector`] opens the session and hands back two halves:
//!
//! - [`TransportHandle`]: non-blocking outbound frame submission and `close()`
//! - [`TransportEvents`]: the ordered stream of inbound [`TransportEvent`]s
//!
//! ```text
//! Capture Bridge → TransportHandle → outbound queue → writer task → remote
//! remote → reader task → event queue → TransportEvents → dispatch loop
//! ```
//!
//! Events are delivered in the order the remote produced them and are never
//! coalesced. Once [`TransportHandle::close()`] returns, no further events
//! are delivered.

mod live;
mod mock;
mod protocol;
mod retry;

pub use live::LiveConnector;
pub use mock::MockConnector;
pub use retry::{RetryPolicy, RetryingConnector};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::chunk::parse_pcm_rate;
use crate::format::transport_text_to_bytes;
use crate::sink::FrameSink;
use crate::{AudioChunk, AudioFrame, CodecError, SinkError, TransportError};

/// What the model should answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseModality {
    /// Spoken audio.
    #[default]
    Audio,
    /// Text.
    Text,
}

/// Parameters sent when a session is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Model name.
    pub model: String,
    /// Persona instruction for the whole session.
    pub system_instruction: String,
    /// Prebuilt voice the model speaks with.
    pub voice_name: String,
    /// Output modality.
    pub response_modality: ResponseModality,
}

/// A base64 audio payload received from the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPayload {
    /// Standard base64 of little-endian 16-bit PCM.
    pub data: String,
    /// Encoding tag, e.g. `audio/pcm;rate=24000`.
    pub mime_type: Option<String>,
}

impl AudioPayload {
    /// Creates a payload from raw samples, tagged with their rate.
    pub fn pcm16(samples: &[i16], sample_rate: u32) -> Self {
        let bytes = crate::format::samples_to_le_bytes(samples);
        Self {
            data: crate::format::bytes_to_transport_text(&bytes),
            mime_type: Some(crate::chunk::pcm_mime_type(sample_rate)),
        }
    }

    /// Decodes the payload into a chunk.
    ///
    /// The sample rate comes from the `rate=` tag when present, otherwise
    /// `default_rate` is assumed.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid base64 or the decoded
    /// bytes are not a whole number of samples.
    pub fn decode(&self, default_rate: u32, channels: u16) -> Result<AudioChunk, CodecError> {
        let bytes = transport_text_to_bytes(&self.data)?;
        if bytes.len() % 2 != 0 {
            return Err(CodecError::OddByteLength { len: bytes.len() });
        }
        let sample_rate = self
            .mime_type
            .as_deref()
            .and_then(parse_pcm_rate)
            .unwrap_or(default_rate);
        Ok(AudioChunk::from_le_bytes(&bytes, sample_rate, channels))
    }
}

/// Inbound session events, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The session is established.
    Open,
    /// A chunk of model speech.
    Audio(AudioPayload),
    /// The user spoke over the model; queued speech is void.
    Interrupted,
    /// The model finished its turn.
    TurnComplete,
    /// The session failed.
    Error(String),
    /// The remote closed the session.
    Closed,
}

impl TransportEvent {
    /// Returns `true` for events after which nothing else is delivered.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error(_) | Self::Closed)
    }
}

/// Opens sessions with a voice model.
///
/// `connect` suspends until the remote acknowledges the session or rejects it.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be established.
    async fn connect(
        &self,
        config: SessionConfig,
    ) -> Result<(TransportHandle, TransportEvents), TransportError>;
}

struct Link {
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
}

/// Outbound half of a session.
///
/// Clones share the same session. Closing any clone closes the session.
#[derive(Clone)]
pub struct TransportHandle {
    outbound: mpsc::Sender<AudioFrame>,
    link: Arc<Link>,
}

impl TransportHandle {
    /// Queues a frame for the remote without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Full`] if the outbound queue is full and
    /// [`SinkError::Closed`] once the session is closed.
    pub fn send(&self, frame: AudioFrame) -> Result<(), SinkError> {
        if self.is_closed() {
            return Err(SinkError::Closed);
        }
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }

    /// Closes the session. Safe to call more than once.
    pub fn close(&self) {
        if !self.link.closed.swap(true, Ordering::SeqCst) {
            self.link.shutdown.send_replace(true);
            tracing::debug!("session transport closed");
        }
    }

    /// Returns `true` once [`close()`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.link.closed.load(Ordering::SeqCst)
    }
}

impl FrameSink for TransportHandle {
    fn name(&self) -> &str {
        "session"
    }

    fn submit(&self, frame: AudioFrame) -> Result<(), SinkError> {
        self.send(frame)
    }
}

impl std::fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportHandle")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Inbound half of a session.
pub struct TransportEvents {
    rx: mpsc::Receiver<TransportEvent>,
    link: Arc<Link>,
    shutdown: watch::Receiver<bool>,
}

impl TransportEvents {
    /// Waits for the next event.
    ///
    /// Returns `None` once the session is closed locally or every producer
    /// is gone.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        if self.link.closed.load(Ordering::SeqCst) {
            return None;
        }

        tokio::select! {
            biased;
            _ = self.shutdown.wait_for(|closed| *closed) => None,
            event = self.rx.recv() => {
                if self.link.closed.load(Ordering::SeqCst) {
                    None
                } else {
                    event
                }
            }
        }
    }
}

impl std::fmt::Debug for TransportEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportEvents")
            .field("closed", &self.link.closed.load(Ordering::SeqCst))
            .finish()
    }
}

/// Both halves of a session plus the ends a connector drives.
///
/// Connectors use this to wire their writer and reader tasks to the
/// public handle and event stream.
pub struct SessionLink {
    /// Outbound half handed to the caller.
    pub handle: TransportHandle,
    /// Inbound half handed to the caller.
    pub events: TransportEvents,
    /// Frames queued by [`TransportHandle::send()`].
    pub outbound: mpsc::Receiver<AudioFrame>,
    /// Where the connector delivers inbound events.
    pub event_tx: mpsc::Sender<TransportEvent>,
    /// Becomes `true` when the session is closed locally.
    pub shutdown: watch::Receiver<bool>,
}

/// Creates the queues of a new session.
pub fn session_link(outbound_capacity: usize, event_capacity: usize) -> SessionLink {
    let (outbound_tx, outbound_rx) = mpsc::channel(outbound_capacity.max(1));
    let (event_tx, event_rx) = mpsc::channel(event_capacity.max(1));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let link = Arc::new(Link {
        closed: AtomicBool::new(false),
        shutdown: shutdown_tx,
    });

    SessionLink {
        handle: TransportHandle {
            outbound: outbound_tx,
            link: link.clone(),
        },
        events: TransportEvents {
            rx: event_rx,
            link,
            shutdown: shutdown_rx.clone(),
        },
        outbound: outbound_rx,
        event_tx,
        shutdown: shutdown_rx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn frame() -> AudioFrame {
        AudioFrame::pcm16(vec![0; 4], 16000, Duration::ZERO)
    }

    #[test]
    fn test_payload_decode_uses_rate_tag() {
        let payload = AudioPayload::pcm16(&[100, -100, 0], 16000);
        let chunk = payload.decode(24000, 1).unwrap();

        assert_eq!(chunk.sample_rate, 16000);
        assert_eq!(*chunk.samples, vec![100, -100, 0]);
    }

    #[test]
    fn test_payload_decode_default_rate() {
        let payload = AudioPayload {
            data: "AQACAA==".to_string(),
            mime_type: None,
        };
        let chunk = payload.decode(24000, 1).unwrap();

        assert_eq!(chunk.sample_rate, 24000);
        assert_eq!(*chunk.samples, vec![1, 2]);
    }

    #[test]
    fn test_payload_decode_errors() {
        let invalid = AudioPayload {
            data: "not base64!".to_string(),
            mime_type: None,
        };
        assert!(matches!(
            invalid.decode(24000, 1),
            Err(CodecError::InvalidBase64(_))
        ));

        let odd = AudioPayload {
            data: "AQID".to_string(),
            mime_type: None,
        };
        assert!(matches!(
            odd.decode(24000, 1),
            Err(CodecError::OddByteLength { len: 3 })
        ));
    }

    #[test]
    fn test_terminal_events() {
        assert!(TransportEvent::Closed.is_terminal());
        assert!(TransportEvent::Error("boom".to_string()).is_terminal());
        assert!(!TransportEvent::Interrupted.is_terminal());
    }

    #[test]
    fn test_send_is_non_blocking() {
        let link = session_link(1, 4);

        link.handle.send(frame()).unwrap();
        assert!(matches!(link.handle.send(frame()), Err(SinkError::Full)));
    }

    #[test]
    fn test_send_after_close() {
        let link = session_link(4, 4);
        link.handle.close();
        link.handle.close();

        assert!(link.handle.is_closed());
        assert!(matches!(link.handle.send(frame()), Err(SinkError::Closed)));
        assert!(*link.shutdown.borrow());
    }

    #[tokio::test]
    async fn test_events_in_order() {
        let mut link = session_link(4, 4);
        link.event_tx.send(TransportEvent::Open).await.unwrap();
        link.event_tx.send(TransportEvent::Interrupted).await.unwrap();
        link.event_tx.send(TransportEvent::TurnComplete).await.unwrap();

        assert_eq!(link.events.recv().await, Some(TransportEvent::Open));
        assert_eq!(link.events.recv().await, Some(TransportEvent::Interrupted));
        assert_eq!(link.events.recv().await, Some(TransportEvent::TurnComplete));
    }

    #[tokio::test]
    async fn test_no_events_after_close() {
        let mut link = session_link(4, 4);
        link.event_tx.send(TransportEvent::Open).await.unwrap();

        link.handle.close();
        assert_eq!(link.events.recv().await, None);
    }

    #[tokio::test]
    async fn test_close_wakes_pending_recv() {
        let mut link = session_link(4, 4);
        let handle = link.handle.clone();

        let waiter = tokio::spawn(async move { link.events.recv().await });
        tokio::task::yield_now().await;
        handle.close();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, None);
    }
}
