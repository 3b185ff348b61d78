//! Scripted connector for testing without a network.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::transport::{
    session_link, Connector, SessionConfig, TransportEvent, TransportEvents, TransportHandle,
};
use crate::{AudioFrame, TransportError};

/// A connector that replays scripted events and records what it is sent.
///
/// Clones share state, so a test can keep one clone to drive and inspect
/// the session after handing another to a controller.
///
/// # Example
///
/// ```
/// use companion_voice::transport::{MockConnector, TransportEvent};
///
/// let connector = MockConnector::new().with_events([TransportEvent::TurnComplete]);
/// assert_eq!(connector.connect_count(), 0);
/// ```
#[derive(Clone, Default)]
pub struct MockConnector {
    shared: Arc<Mutex<Shared>>,
}

#[derive(Default)]
struct Shared {
    rejection: Option<String>,
    script: Vec<TransportEvent>,
    close_after_script: bool,
    connects: usize,
    last_config: Option<SessionConfig>,
    sent: Vec<AudioFrame>,
    live: Option<mpsc::Sender<TransportEvent>>,
}

impl MockConnector {
    /// Creates a connector that accepts every session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a connector that refuses every session.
    pub fn rejecting(reason: impl Into<String>) -> Self {
        let connector = Self::new();
        connector.shared.lock().rejection = Some(reason.into());
        connector
    }

    /// Events delivered right after `Open` on every session.
    #[must_use]
    pub fn with_events(self, events: impl IntoIterator<Item = TransportEvent>) -> Self {
        self.shared.lock().script.extend(events);
        self
    }

    /// Ends each session with `Closed` once the script has been delivered.
    #[must_use]
    pub fn close_after_script(self) -> Self {
        self.shared.lock().close_after_script = true;
        self
    }

    /// Injects an event into the current session.
    ///
    /// Returns `false` if no session is open or it no longer listens.
    pub async fn emit(&self, event: TransportEvent) -> bool {
        let sender = self.shared.lock().live.clone();
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Number of `connect` calls so far.
    pub fn connect_count(&self) -> usize {
        self.shared.lock().connects
    }

    /// Configuration of the most recent `connect` call.
    pub fn last_config(&self) -> Option<SessionConfig> {
        self.shared.lock().last_config.clone()
    }

    /// Frames the sessions have sent, in order.
    pub fn sent_frames(&self) -> Vec<AudioFrame> {
        self.shared.lock().sent.clone()
    }

    /// Number of frames the sessions have sent.
    pub fn sent_count(&self) -> usize {
        self.shared.lock().sent.len()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        config: SessionConfig,
    ) -> Result<(TransportHandle, TransportEvents), TransportError> {
        let (script, close_after_script) = {
            let mut shared = self.shared.lock();
            shared.connects += 1;
            shared.last_config = Some(config);

            if let Some(reason) = shared.rejection.clone() {
                return Err(TransportError::Rejected { reason });
            }
            (shared.script.clone(), shared.close_after_script)
        };

        let link = session_link(64, 64 + script.len());

        let scripted = std::iter::once(TransportEvent::Open)
            .chain(script)
            .chain(close_after_script.then_some(TransportEvent::Closed));
        for event in scripted {
            link.event_tx
                .try_send(event)
                .map_err(|_| TransportError::Closed)?;
        }
        let session_tx = link.event_tx.clone();
        self.shared.lock().live = Some(link.event_tx);

        let shared = self.shared.clone();
        let mut outbound = link.outbound;
        let mut shutdown = link.shutdown;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.wait_for(|closed| *closed) => break,
                    frame = outbound.recv() => match frame {
                        Some(frame) => shared.lock().sent.push(frame),
                        None => break,
                    },
                }
            }
            let mut shared = shared.lock();
            if shared
                .live
                .as_ref()
                .is_some_and(|live| live.same_channel(&session_tx))
            {
                shared.live = None;
            }
        });

        Ok((link.handle, link.events))
    }
}

impl std::fmt::Debug for MockConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.shared.lock();
        f.debug_struct("MockConnector")
            .field("connects", &shared.connects)
            .field("sent", &shared.sent.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ResponseModality;
    use std::time::Duration;

    fn config() -> SessionConfig {
        SessionConfig {
            model: "m".to_string(),
            system_instruction: "i".to_string(),
            voice_name: "Kore".to_string(),
            response_modality: ResponseModality::Audio,
        }
    }

    #[tokio::test]
    async fn test_script_follows_open() {
        let connector = MockConnector::new()
            .with_events([TransportEvent::TurnComplete])
            .close_after_script();
        let (_handle, mut events) = connector.connect(config()).await.unwrap();

        assert_eq!(events.recv().await, Some(TransportEvent::Open));
        assert_eq!(events.recv().await, Some(TransportEvent::TurnComplete));
        assert_eq!(events.recv().await, Some(TransportEvent::Closed));
        assert_eq!(connector.last_config(), Some(config()));
    }

    #[tokio::test]
    async fn test_rejection() {
        let connector = MockConnector::rejecting("nope");
        let result = connector.connect(config()).await;

        assert!(matches!(result, Err(TransportError::Rejected { .. })));
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_records_frames_and_emits() {
        let connector = MockConnector::new();
        let (handle, mut events) = connector.connect(config()).await.unwrap();
        assert_eq!(events.recv().await, Some(TransportEvent::Open));

        handle
            .send(AudioFrame::pcm16(vec![7; 4], 16000, Duration::ZERO))
            .unwrap();
        assert!(connector.emit(TransportEvent::Interrupted).await);
        assert_eq!(events.recv().await, Some(TransportEvent::Interrupted));

        tokio::time::timeout(Duration::from_secs(1), async {
            while connector.sent_count() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(connector.sent_frames()[0].samples, vec![7; 4]);
    }
}
