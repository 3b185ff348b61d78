//! WebSocket connector for the live generate-content service.

use std::time::Duration;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::transport::protocol::{decode_message, Inbound, RealtimeInputMessage, SetupMessage};
use crate::transport::{session_link, Connector, SessionConfig, TransportEvent, TransportEvents, TransportHandle};
use crate::{AudioFrame, CallConfig, TransportError, VoiceCallError};

/// How long to wait for the socket to open and the server to acknowledge setup.
const DEFAULT_SETUP_TIMEOUT: Duration = Duration::from_secs(15);

/// Connects to the live generate-content WebSocket.
///
/// The setup message carries the model, voice and persona instruction;
/// `connect` returns once the server answers with `setupComplete`.
///
/// # Example
///
/// ```no_run
/// use companion_voice::transport::LiveConnector;
///
/// let connector = LiveConnector::new("my-api-key");
/// ```
#[derive(Clone)]
pub struct LiveConnector {
    endpoint: String,
    api_key: String,
    outbound_capacity: usize,
    event_capacity: usize,
    setup_timeout: Duration,
}

impl LiveConnector {
    /// Creates a connector for the default endpoint.
    pub fn new(api_key: impl Into<String>) -> Self {
        let defaults = CallConfig::default();
        Self {
            endpoint: defaults.endpoint,
            api_key: api_key.into(),
            outbound_capacity: defaults.outbound_queue_capacity,
            event_capacity: defaults.event_queue_capacity,
            setup_timeout: DEFAULT_SETUP_TIMEOUT,
        }
    }

    /// Creates a connector from a call configuration.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceCallError::MissingApiKey`] if no key is configured.
    pub fn from_config(config: &CallConfig) -> Result<Self, VoiceCallError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or(VoiceCallError::MissingApiKey)?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            api_key,
            outbound_capacity: config.outbound_queue_capacity,
            event_capacity: config.event_queue_capacity,
            setup_timeout: DEFAULT_SETUP_TIMEOUT,
        })
    }

    /// Overrides the endpoint URL.
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Overrides how long `connect` waits, from dialing to `setupComplete`.
    #[must_use]
    pub fn setup_timeout(mut self, timeout: Duration) -> Self {
        self.setup_timeout = timeout;
        self
    }

    fn url(&self) -> String {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{separator}key={}", self.endpoint, self.api_key)
    }
}

impl std::fmt::Debug for LiveConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveConnector")
            .field("endpoint", &self.endpoint)
            .field("setup_timeout", &self.setup_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connector for LiveConnector {
    async fn connect(
        &self,
        config: SessionConfig,
    ) -> Result<(TransportHandle, TransportEvents), TransportError> {
        tracing::info!(
            endpoint = %self.endpoint,
            model = %config.model,
            voice = %config.voice_name,
            "connecting live session"
        );

        // Dialing, the TLS handshake and the setup exchange share one deadline
        let handshake = async {
            let (ws_stream, _response) =
                connect_async(self.url())
                    .await
                    .map_err(|e| TransportError::Connect {
                        reason: e.to_string(),
                    })?;
            let (mut writer, mut reader) = ws_stream.split();

            writer
                .send(SetupMessage::from_config(&config).to_message()?)
                .await?;
            await_setup(&mut reader).await?;
            Ok::<_, TransportError>((writer, reader))
        };

        let seconds = self.setup_timeout.as_secs();
        let (writer, reader) = tokio::time::timeout(self.setup_timeout, handshake)
            .await
            .map_err(|_| TransportError::SetupTimeout { seconds })??;

        tracing::info!(model = %config.model, "live session established");

        let link = session_link(self.outbound_capacity, self.event_capacity);
        // Open is the first event of every session
        link.event_tx
            .send(TransportEvent::Open)
            .await
            .map_err(|_| TransportError::Closed)?;

        tokio::spawn(write_loop(writer, link.outbound, link.shutdown.clone()));
        tokio::spawn(read_loop(reader, link.event_tx, link.shutdown));

        Ok((link.handle, link.events))
    }
}

/// Reads until the server acknowledges or refuses the setup message.
async fn await_setup<R>(reader: &mut R) -> Result<(), TransportError>
where
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(message) = reader.next().await {
        match decode_message(message?)? {
            Inbound::SetupComplete => return Ok(()),
            Inbound::Events(events) => {
                for event in events {
                    match event {
                        TransportEvent::Error(reason) => {
                            return Err(TransportError::Rejected { reason })
                        }
                        TransportEvent::Closed => return Err(TransportError::Closed),
                        other => {
                            tracing::debug!(?other, "event before setup complete ignored");
                        }
                    }
                }
            }
            Inbound::Ignored => {}
        }
    }
    Err(TransportError::Closed)
}

/// Forwards queued frames to the socket until the session closes.
async fn write_loop<W>(
    mut writer: W,
    mut outbound: mpsc::Receiver<AudioFrame>,
    mut shutdown: watch::Receiver<bool>,
) where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let mut frames_written: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = async { let _ = shutdown.wait_for(|closed| *closed).await; } => break,
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                let message = match RealtimeInputMessage::from_frame(&frame).to_message() {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to encode frame");
                        continue;
                    }
                };
                if let Err(e) = writer.send(message).await {
                    tracing::warn!(error = %e, "failed to send frame, writer stopping");
                    return;
                }
                frames_written += 1;
            }
        }
    }

    tracing::debug!(frames_written, "session writer stopping");
    if let Err(e) = writer.send(Message::Close(None)).await {
        tracing::debug!(error = %e, "close handshake failed");
    }
}

/// Turns socket messages into ordered events until the session ends.
async fn read_loop<R>(
    mut reader: R,
    events: mpsc::Sender<TransportEvent>,
    mut shutdown: watch::Receiver<bool>,
) where
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let message = tokio::select! {
            biased;
            _ = shutdown.wait_for(|closed| *closed) => return,
            message = reader.next() => message,
        };

        let batch = match message {
            None => vec![TransportEvent::Closed],
            Some(Err(e)) => vec![TransportEvent::Error(e.to_string())],
            Some(Ok(message)) => match decode_message(message) {
                Ok(Inbound::Events(events)) => events,
                Ok(Inbound::SetupComplete | Inbound::Ignored) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "unreadable server message skipped");
                    continue;
                }
            },
        };

        for event in batch {
            let terminal = event.is_terminal();
            if events.send(event).await.is_err() {
                return;
            }
            if terminal {
                tracing::debug!("session reader stopping");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ResponseModality;
    use futures::stream;

    fn text(json: &str) -> Result<Message, tungstenite::Error> {
        Ok(Message::Text(json.to_string().into()))
    }

    #[test]
    fn test_from_config_requires_key() {
        let config = CallConfig::default();
        assert!(matches!(
            LiveConnector::from_config(&config),
            Err(VoiceCallError::MissingApiKey)
        ));

        let config = CallConfig {
            api_key: Some("abc".to_string()),
            ..Default::default()
        };
        let connector = LiveConnector::from_config(&config).unwrap();
        assert!(connector.url().ends_with("BidiGenerateContent?key=abc"));
    }

    #[test]
    fn test_url_with_existing_query() {
        let connector = LiveConnector::new("k").endpoint("wss://example.test/ws?alt=json");
        assert_eq!(connector.url(), "wss://example.test/ws?alt=json&key=k");
    }

    #[test]
    fn test_debug_hides_key() {
        let connector = LiveConnector::new("secret-key");
        assert!(!format!("{connector:?}").contains("secret-key"));
    }

    #[tokio::test]
    async fn test_silent_server_times_out_before_upgrade() {
        // Accepts TCP but never answers the HTTP upgrade
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let connector = LiveConnector::new("k")
            .endpoint(format!("ws://127.0.0.1:{port}/ws"))
            .setup_timeout(Duration::from_millis(100));
        let config = SessionConfig {
            model: "m".to_string(),
            system_instruction: String::new(),
            voice_name: "Kore".to_string(),
            response_modality: ResponseModality::Audio,
        };

        let result = tokio::time::timeout(Duration::from_secs(2), connector.connect(config))
            .await
            .unwrap();
        assert!(matches!(result, Err(TransportError::SetupTimeout { .. })));
    }

    #[tokio::test]
    async fn test_await_setup_complete() {
        let mut reader = stream::iter(vec![
            text(r#"{"usageMetadata":{}}"#),
            text(r#"{"setupComplete":{}}"#),
        ]);
        await_setup(&mut reader).await.unwrap();
    }

    #[tokio::test]
    async fn test_await_setup_rejected() {
        let mut reader = stream::iter(vec![Ok(Message::Close(Some(
            tungstenite::protocol::CloseFrame {
                code: tungstenite::protocol::frame::coding::CloseCode::Policy,
                reason: "API key not valid".into(),
            },
        )))]);
        let result = await_setup(&mut reader).await;
        assert!(matches!(result, Err(TransportError::Rejected { reason }) if reason.contains("API key")));
    }

    #[tokio::test]
    async fn test_await_setup_stream_ends() {
        let mut reader = stream::iter(Vec::<Result<Message, tungstenite::Error>>::new());
        assert!(matches!(
            await_setup(&mut reader).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_read_loop_orders_events() {
        let reader = stream::iter(vec![
            text(
                r#"{"serverContent":{"interrupted":true,"modelTurn":{"parts":[
                    {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAA="}}]}}}"#,
            ),
            text(r#"{"serverContent":{"turnComplete":true}}"#),
        ]);
        let (tx, mut rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        read_loop(reader, tx, shutdown_rx).await;

        assert_eq!(rx.recv().await, Some(TransportEvent::Interrupted));
        assert!(matches!(rx.recv().await, Some(TransportEvent::Audio(_))));
        assert_eq!(rx.recv().await, Some(TransportEvent::TurnComplete));
        assert_eq!(rx.recv().await, Some(TransportEvent::Closed));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_write_loop_sends_frames_then_closes() {
        let (sink_tx, sink_rx) = futures::channel::mpsc::unbounded::<Message>();
        let writer = sink_tx.sink_map_err(|_| tungstenite::Error::ConnectionClosed);
        let (frame_tx, frame_rx) = mpsc::channel(4);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        frame_tx
            .send(AudioFrame::pcm16(vec![1, -1], 16000, Duration::ZERO))
            .await
            .unwrap();
        drop(frame_tx);

        write_loop(writer, frame_rx, shutdown_rx).await;

        let sent: Vec<Message> = sink_rx.collect().await;
        assert_eq!(sent.len(), 2);
        let json: serde_json::Value = serde_json::from_str(sent[0].to_text().unwrap()).unwrap();
        assert_eq!(json["realtimeInput"]["mediaChunks"][0]["data"], "AQD//w==");
        assert!(matches!(sent[1], Message::Close(None)));
    }

    #[test]
    fn test_setup_uses_session_config() {
        let config = SessionConfig {
            model: "m".to_string(),
            system_instruction: String::new(),
            voice_name: "Puck".to_string(),
            response_modality: ResponseModality::Audio,
        };
        let message = SetupMessage::from_config(&config).to_message().unwrap();
        assert!(message.to_text().unwrap().contains("\"voiceName\":\"Puck\""));
    }
}
