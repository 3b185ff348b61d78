//! Call controller: lifecycle state machine and the session dispatch loop.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use crate::pipeline::{spawn_capture_bridge, CaptureBridge, CaptureConfig};
use crate::playback::{OutputDevice, PlaybackHandle, PlaybackScheduler};
use crate::session::{
    CallSession, SessionState, STATUS_MIC_UNAVAILABLE, STATUS_START_FAILED,
};
use crate::sink::FrameSink;
use crate::source::AudioInput;
use crate::transport::{
    Connector, ResponseModality, SessionConfig, TransportEvent, TransportEvents,
};
use crate::{
    CallConfig, CallControllerBuilder, CallEvent, CallState, CallStats, EventCallback,
    PersonaContext, VoiceCallError,
};

/// Result of [`CallController::start()`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new call is connecting or already active.
    Started,
    /// A call was already connecting or active; nothing was done.
    Ignored,
    /// [`CallController::end()`] was called while the call was connecting.
    Cancelled,
}

struct Inner {
    state: CallState,
    status: String,
    session: Option<CallSession>,
    /// Wakes a `start()` that is waiting on the connector.
    connecting: Option<Arc<Notify>>,
    generation: u64,
    last_stats: CallStats,
    persona: PersonaContext,
    voice_name: String,
}

/// State shared between the controller and its dispatch loop.
struct Shared {
    inner: Mutex<Inner>,
    event_callback: Option<EventCallback>,
}

impl Shared {
    fn emit(&self, event: CallEvent) {
        if let Some(ref callback) = self.event_callback {
            callback(event);
        }
    }

    fn emit_state(&self, state: CallState, status: String) {
        self.emit(CallEvent::StateChanged { state, status });
    }

    /// Moves a connecting call to Active. Returns `false` if the call is stale.
    fn activate(&self, generation: u64) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.generation != generation || inner.state != CallState::Connecting {
                return false;
            }
            inner.state = CallState::Active;
            inner.status = CallState::Active.status().to_string();
        }
        tracing::info!(generation, "call active");
        self.emit_state(CallState::Active, CallState::Active.status().to_string());
        true
    }

    /// Ends the call of `generation` and releases its session.
    ///
    /// Does nothing if a newer call has started or the call was already ended.
    fn finish(&self, generation: u64, state: CallState, status: &str, from_dispatch: bool) {
        let session = {
            let mut inner = self.inner.lock();
            if inner.generation != generation || !inner.state.is_live() {
                return;
            }
            let mut session = inner.session.take();
            if let Some(session) = session.as_mut() {
                if from_dispatch {
                    session.detach_dispatch_task();
                }
                inner.last_stats = session.stats();
            }
            inner.state = state;
            inner.status = status.to_string();
            session
        };

        // Released outside the lock; joining device threads can take a moment
        drop(session);
        self.emit_state(state, status.to_string());
    }
}

/// Drives voice calls: one live session at a time.
///
/// ```text
/// Idle → Connecting → Active → Ended
///             ↓          ↓
///           Error      Error
/// ```
///
/// [`start()`](Self::start) opens the microphone, the speaker and the
/// session, in that order. Any failure lands the call in
/// [`CallState::Error`] with everything already opened released.
/// [`end()`](Self::end) is safe to call at any time, any number of times.
/// Dropping the controller ends the call.
///
/// # Example
///
/// ```no_run
/// use companion_voice::{CallConfig, CallController, PersonaContext};
///
/// # async fn example() -> Result<(), companion_voice::VoiceCallError> {
/// let controller = CallController::builder()
///     .config(CallConfig::from_env())
///     .persona(PersonaContext::new("Ana"))
///     .on_event(|e| tracing::info!(?e, "call event"))
///     .build()?;
///
/// controller.start().await?;
/// // Talk...
/// controller.end();
/// # Ok(())
/// # }
/// ```
pub struct CallController {
    shared: Arc<Shared>,
    config: CallConfig,
    input: Arc<dyn AudioInput>,
    output: Arc<dyn OutputDevice>,
    connector: Arc<dyn Connector>,
}

impl CallController {
    /// Creates a new builder for configuring a controller.
    pub fn builder() -> CallControllerBuilder {
        CallControllerBuilder::new()
    }

    pub(crate) fn new(
        config: CallConfig,
        persona: PersonaContext,
        input: Arc<dyn AudioInput>,
        output: Arc<dyn OutputDevice>,
        connector: Arc<dyn Connector>,
        event_callback: Option<EventCallback>,
    ) -> Self {
        let inner = Inner {
            state: CallState::Idle,
            status: CallState::Idle.status().to_string(),
            session: None,
            connecting: None,
            generation: 0,
            last_stats: CallStats::default(),
            persona,
            voice_name: config.voice_name.clone(),
        };

        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(inner),
                event_callback,
            }),
            config,
            input,
            output,
            connector,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CallState {
        self.shared.inner.lock().state
    }

    /// Current status line.
    pub fn status(&self) -> String {
        self.shared.inner.lock().status.clone()
    }

    /// Statistics of the current call, or of the last one if none is live.
    pub fn stats(&self) -> CallStats {
        let inner = self.shared.inner.lock();
        match &inner.session {
            Some(session) => session.stats(),
            None => inner.last_stats.clone(),
        }
    }

    /// Replaces the persona used by the next call.
    pub fn set_persona(&self, persona: PersonaContext) {
        self.shared.inner.lock().persona = persona;
    }

    /// Replaces the voice used by the next call.
    pub fn set_voice(&self, voice_name: impl Into<String>) {
        self.shared.inner.lock().voice_name = voice_name.into();
    }

    /// Starts a call.
    ///
    /// Ignored while a call is connecting or active. Returns once the
    /// session is established; the state becomes Active when the session
    /// reports it is open. [`end()`](Self::end) during the connection
    /// releases both devices at once and makes this return
    /// [`StartOutcome::Cancelled`].
    ///
    /// # Errors
    ///
    /// Returns the failure that stopped the call from starting. The state
    /// is [`CallState::Error`] by then.
    pub async fn start(&self) -> Result<StartOutcome, VoiceCallError> {
        let cancel = Arc::new(Notify::new());
        let (generation, voice_name, persona, stale) = {
            let mut inner = self.shared.inner.lock();
            if !inner.state.can_start() {
                tracing::debug!(state = %inner.state, "start ignored, call in progress");
                return Ok(StartOutcome::Ignored);
            }
            inner.generation += 1;
            inner.state = CallState::Connecting;
            inner.status = CallState::Connecting.status().to_string();
            inner.last_stats = CallStats::default();
            inner.connecting = Some(cancel.clone());
            (
                inner.generation,
                inner.voice_name.clone(),
                inner.persona.clone(),
                inner.session.take(),
            )
        };
        drop(stale);
        self.shared
            .emit_state(CallState::Connecting, CallState::Connecting.status().to_string());

        let mut pending = PendingStart {
            shared: &self.shared,
            generation,
            armed: true,
        };

        tracing::info!(generation, voice = %voice_name, clone = persona.is_clone(), "starting call");

        let instruction = persona.voice_instruction();
        let state = Arc::new(SessionState::new());
        let mut session = CallSession::new(voice_name.clone(), instruction.clone(), state.clone());

        // Microphone first: no session is opened without one
        let capture = match self.input.open(self.config.ring_buffer_duration) {
            Ok(capture) => capture,
            Err(e) => {
                tracing::error!(error = %e, input = %self.input.name(), "microphone unavailable");
                pending.fail(STATUS_MIC_UNAVAILABLE);
                return Err(e);
            }
        };
        session.set_capture_stream(capture.stream);

        let opened = match self
            .output
            .open(self.config.playback_sample_rate, self.config.playback_channels)
        {
            Ok(opened) => opened,
            Err(e) => {
                tracing::error!(error = %e, output = %self.output.name(), "speaker unavailable");
                pending.fail(STATUS_START_FAILED);
                return Err(e);
            }
        };
        session.set_output_stream(opened.stream);

        // From here on end() owns the devices and can release them
        {
            let mut inner = self.shared.inner.lock();
            if inner.generation != generation {
                pending.armed = false;
                drop(inner);
                drop(session);
                tracing::info!(generation, "call ended while opening devices");
                return Ok(StartOutcome::Cancelled);
            }
            inner.session = Some(session);
        }

        let session_config = SessionConfig {
            model: self.config.model.clone(),
            system_instruction: instruction,
            voice_name,
            response_modality: ResponseModality::Audio,
        };
        let connected = tokio::select! {
            result = self.connector.connect(session_config) => result,
            () = cancel.notified() => {
                tracing::info!(generation, "call ended while connecting");
                pending.armed = false;
                return Ok(StartOutcome::Cancelled);
            }
        };
        let (handle, events) = match connected {
            Ok(connected) => connected,
            Err(e) => {
                tracing::error!(error = %e, "session failed to connect");
                pending.fail(STATUS_START_FAILED);
                return Err(e.into());
            }
        };

        let sink: Arc<dyn FrameSink> = Arc::new(handle.clone());

        let capture_config = CaptureConfig {
            device_sample_rate: capture.sample_rate,
            device_channels: capture.channels,
            target_sample_rate: self.config.capture_sample_rate,
            frame_size: self.config.frame_size,
            overflow: self.config.sample_overflow,
        };
        let bridge = CaptureBridge::new(
            capture.consumer,
            &capture_config,
            sink,
            state.clone(),
            capture.dropped_samples,
            self.shared.event_callback.clone(),
        );

        let dispatcher = Dispatcher {
            shared: self.shared.clone(),
            generation,
            events,
            completions: opened.completions,
            scheduler: PlaybackScheduler::new(
                opened.output,
                self.config.playback_sample_rate,
                self.config.playback_channels,
            ),
            state,
            playback_sample_rate: self.config.playback_sample_rate,
            playback_channels: self.config.playback_channels,
        };

        let mut inner = self.shared.inner.lock();
        pending.armed = false;
        if inner.generation != generation || inner.session.is_none() {
            // end() released the devices while the connector was finishing
            drop(inner);
            handle.close();
            tracing::info!(generation, "call ended while connecting");
            return Ok(StartOutcome::Cancelled);
        }
        inner.connecting = None;
        if let Some(session) = inner.session.as_mut() {
            session.set_transport(handle);
            session.set_capture_task(spawn_capture_bridge(bridge));
            session.set_dispatch_task(tokio::spawn(dispatcher.run()));
        }
        drop(inner);

        tracing::info!(generation, "call started");
        Ok(StartOutcome::Started)
    }

    /// Ends the current call.
    ///
    /// Closes the session, stops capture and playback and releases both
    /// devices. Safe to call in any state and more than once; a controller
    /// that never started a call stays Idle.
    pub fn end(&self) {
        let (session, changed) = {
            let mut inner = self.shared.inner.lock();
            if inner.state == CallState::Idle && inner.session.is_none() {
                return;
            }
            // Stops any dispatch loop or pending start of the current call
            inner.generation += 1;
            if let Some(connecting) = inner.connecting.take() {
                connecting.notify_one();
            }
            let session = inner.session.take();
            if let Some(session) = &session {
                inner.last_stats = session.stats();
            }
            let changed = inner.state != CallState::Ended;
            inner.state = CallState::Ended;
            inner.status = CallState::Ended.status().to_string();
            (session, changed)
        };

        let had_session = session.is_some();
        drop(session);

        if changed {
            tracing::info!(had_session, "call ended");
            self.shared
                .emit_state(CallState::Ended, CallState::Ended.status().to_string());
        }
    }
}

impl Drop for CallController {
    fn drop(&mut self) {
        self.end();
    }
}

impl std::fmt::Debug for CallController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("CallController")
            .field("state", &inner.state)
            .field("status", &inner.status)
            .field("session", &inner.session)
            .finish_non_exhaustive()
    }
}

/// Marks a call as failed if `start()` returns or is dropped before the
/// session is installed.
struct PendingStart<'a> {
    shared: &'a Shared,
    generation: u64,
    armed: bool,
}

impl PendingStart<'_> {
    fn is_current(&self) -> bool {
        self.shared.inner.lock().generation == self.generation
    }

    fn fail(&mut self, status: &str) {
        self.armed = false;
        self.shared
            .finish(self.generation, CallState::Error, status, false);
    }
}

impl Drop for PendingStart<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.finish(
                self.generation,
                CallState::Ended,
                CallState::Ended.status(),
                false,
            );
        }
    }
}

/// The single loop that reacts to session events for one call.
///
/// Owns the playback scheduler; nothing else touches it.
struct Dispatcher {
    shared: Arc<Shared>,
    generation: u64,
    events: TransportEvents,
    completions: mpsc::UnboundedReceiver<PlaybackHandle>,
    scheduler: PlaybackScheduler,
    state: Arc<SessionState>,
    playback_sample_rate: u32,
    playback_channels: u16,
}

impl Dispatcher {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                event = self.events.recv() => match event {
                    Some(event) => {
                        if !self.handle_event(event) {
                            break;
                        }
                    }
                    None => {
                        self.scheduler.stop_all();
                        self.finish(CallState::Ended, CallState::Ended.status());
                        break;
                    }
                },
                Some(handle) = self.completions.recv() => {
                    self.scheduler.on_ended(handle);
                }
            }
        }
        tracing::debug!(generation = self.generation, "dispatch loop stopped");
    }

    /// Applies one event. Returns `false` when the call is over.
    fn handle_event(&mut self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Open => {
                self.shared.activate(self.generation);
            }
            TransportEvent::Audio(payload) => {
                match payload.decode(self.playback_sample_rate, self.playback_channels) {
                    Ok(chunk) => {
                        if self.scheduler.on_chunk(&chunk).is_some() {
                            self.state.chunks_scheduled.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    Err(e) => {
                        let dropped = self.state.chunks_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        tracing::warn!(error = %e, dropped, "malformed audio chunk dropped");
                        self.shared.emit(CallEvent::ChunkDropped {
                            reason: e.to_string(),
                        });
                    }
                }
            }
            TransportEvent::Interrupted => {
                let stopped = self.scheduler.on_interrupted();
                self.state.interruptions.fetch_add(1, Ordering::Relaxed);
                self.shared.emit(CallEvent::Interrupted { stopped });
            }
            TransportEvent::TurnComplete => {
                self.shared.emit(CallEvent::TurnComplete);
            }
            TransportEvent::Error(reason) => {
                tracing::error!(%reason, "session failed");
                self.scheduler.stop_all();
                self.finish(CallState::Error, CallState::Error.status());
                return false;
            }
            TransportEvent::Closed => {
                tracing::info!("session closed by remote");
                self.scheduler.stop_all();
                self.finish(CallState::Ended, CallState::Ended.status());
                return false;
            }
        }
        true
    }

    fn finish(&self, state: CallState, status: &str) {
        self.shared.finish(self.generation, state, status, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::VirtualSpeaker;
    use crate::source::{MockFailure, MockMicrophone};
    use crate::transport::{MockConnector, TransportHandle};
    use crate::TransportError;
    use std::time::Duration;

    /// A connector whose handshake never finishes.
    struct StalledConnector;

    #[async_trait::async_trait]
    impl Connector for StalledConnector {
        async fn connect(
            &self,
            _config: SessionConfig,
        ) -> Result<(TransportHandle, TransportEvents), TransportError> {
            std::future::pending().await
        }
    }

    fn controller(mic: MockMicrophone, connector: MockConnector) -> CallController {
        CallController::new(
            CallConfig::default(),
            PersonaContext::new("Rui"),
            Arc::new(mic),
            Arc::new(VirtualSpeaker::new()),
            Arc::new(connector),
            None,
        )
    }

    #[test]
    fn test_new_controller_is_idle() {
        let controller = controller(MockMicrophone::capture(), MockConnector::new());
        assert_eq!(controller.state(), CallState::Idle);
        assert_eq!(controller.status(), "Pronta para falar");
        assert_eq!(controller.stats(), CallStats::default());
    }

    #[test]
    fn test_end_without_start_stays_idle() {
        let controller = controller(MockMicrophone::capture(), MockConnector::new());
        controller.end();
        controller.end();
        assert_eq!(controller.state(), CallState::Idle);
    }

    #[tokio::test]
    async fn test_mic_failure_skips_connect() {
        let connector = MockConnector::new();
        let controller = controller(
            MockMicrophone::failing(MockFailure::PermissionDenied),
            connector.clone(),
        );

        let result = controller.start().await;

        assert!(matches!(result, Err(VoiceCallError::PermissionDenied)));
        assert_eq!(controller.state(), CallState::Error);
        assert_eq!(controller.status(), "Microfone indisponível");
        assert_eq!(connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_start_while_active_is_ignored() {
        let connector = MockConnector::new();
        let controller = controller(MockMicrophone::capture(), connector.clone());

        assert_eq!(controller.start().await.unwrap(), StartOutcome::Started);
        assert_eq!(controller.start().await.unwrap(), StartOutcome::Ignored);
        assert_eq!(connector.connect_count(), 1);

        controller.end();
        assert_eq!(controller.state(), CallState::Ended);
    }

    #[tokio::test]
    async fn test_restart_after_end() {
        let connector = MockConnector::new();
        let controller = controller(MockMicrophone::capture(), connector.clone());

        controller.start().await.unwrap();
        controller.end();
        assert_eq!(controller.start().await.unwrap(), StartOutcome::Started);
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_set_voice_applies_to_next_call() {
        let connector = MockConnector::new();
        let controller = controller(MockMicrophone::capture(), connector.clone());
        controller.set_voice("Puck");

        controller.start().await.unwrap();

        assert_eq!(connector.last_config().unwrap().voice_name, "Puck");
    }

    #[tokio::test]
    async fn test_end_while_connecting_releases_devices() {
        let mic = MockMicrophone::capture();
        let speaker = VirtualSpeaker::new();
        let controller = Arc::new(CallController::new(
            CallConfig::default(),
            PersonaContext::new("Rui"),
            Arc::new(mic.clone()),
            Arc::new(speaker.clone()),
            Arc::new(StalledConnector),
            None,
        ));

        let starting = tokio::spawn({
            let controller = controller.clone();
            async move { controller.start().await }
        });
        tokio::time::timeout(Duration::from_secs(2), async {
            while !speaker.is_open() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(controller.state(), CallState::Connecting);
        assert!(mic.is_open());

        controller.end();

        assert!(!mic.is_open());
        assert!(!speaker.is_open());
        assert_eq!(controller.state(), CallState::Ended);
        let outcome = tokio::time::timeout(Duration::from_secs(2), starting)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(outcome, StartOutcome::Cancelled);
        assert_eq!(controller.state(), CallState::Ended);
    }

    #[tokio::test]
    async fn test_connect_failure_releases_devices() {
        let mic = MockMicrophone::capture();
        let controller = controller(mic.clone(), MockConnector::rejecting("quota"));

        assert!(controller.start().await.is_err());

        assert!(!mic.is_open());
        assert_eq!(controller.status(), "Falha ao iniciar");
    }
}
