//! Integration tests for companion-voice.
//!
//! Calls run against a mock microphone, a virtual speaker and a scripted
//! connector, so no audio hardware or network is needed.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use companion_voice::playback::VirtualSpeaker;
use companion_voice::source::{MockFailure, MockMicrophone};
use companion_voice::transport::{AudioPayload, MockConnector, TransportEvent};
use companion_voice::{
    CallConfig, CallController, CallEvent, CallState, PersonaContext, StartOutcome,
    VoiceCallError, COMPANION_IDENTITY_LINE,
};

/// Everything a test needs to drive and inspect one controller.
struct Harness {
    controller: CallController,
    mic: MockMicrophone,
    speaker: VirtualSpeaker,
    connector: MockConnector,
    events: Arc<Mutex<Vec<CallEvent>>>,
}

impl Harness {
    fn new(mic: MockMicrophone, connector: MockConnector) -> Self {
        Self::with_persona(mic, connector, PersonaContext::new("Rui"))
    }

    fn with_persona(mic: MockMicrophone, connector: MockConnector, persona: PersonaContext) -> Self {
        let speaker = VirtualSpeaker::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let recorded = events.clone();

        let controller = CallController::builder()
            .config(CallConfig::default())
            .persona(persona)
            .input(mic.clone())
            .output(speaker.clone())
            .connector(connector.clone())
            .on_event(move |event| recorded.lock().unwrap().push(event))
            .build()
            .unwrap();

        Self {
            controller,
            mic,
            speaker,
            connector,
            events,
        }
    }

    async fn start_active(&self) {
        assert_eq!(self.controller.start().await.unwrap(), StartOutcome::Started);
        wait_for(|| self.controller.state() == CallState::Active).await;
    }

    fn interruptions(&self) -> Vec<usize> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                CallEvent::Interrupted { stopped } => Some(*stopped),
                _ => None,
            })
            .collect()
    }

    fn states(&self) -> Vec<CallState> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                CallEvent::StateChanged { state, .. } => Some(*state),
                _ => None,
            })
            .collect()
    }
}

/// Polls `condition` until it holds, failing the test after two seconds.
async fn wait_for(condition: impl Fn() -> bool) {
    let polled = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "condition not met in time");
}

/// `seconds` of model speech at 24kHz.
fn speech(seconds: f64) -> TransportEvent {
    let samples = vec![1000i16; (24000.0 * seconds) as usize];
    TransportEvent::Audio(AudioPayload::pcm16(&samples, 24000))
}

#[tokio::test]
async fn test_call_reaches_active() {
    let h = Harness::new(MockMicrophone::capture(), MockConnector::new());

    h.start_active().await;

    assert_eq!(h.controller.status(), "Ativa e Ouvindo");
    assert_eq!(
        h.states(),
        vec![CallState::Connecting, CallState::Active]
    );
    assert!(h.mic.is_open());
    assert!(h.speaker.is_open());

    let config = h.connector.last_config().unwrap();
    assert_eq!(config.voice_name, "Kore");
    assert!(config.system_instruction.ends_with("Fale com Rui."));
}

#[tokio::test]
async fn test_chunks_play_back_to_back() {
    let h = Harness::new(MockMicrophone::capture(), MockConnector::new());
    h.start_active().await;

    for seconds in [1.0, 0.5, 2.0] {
        assert!(h.connector.emit(speech(seconds)).await);
    }
    let output = h.speaker.output();
    wait_for(|| output.scheduled().len() == 3).await;

    assert_eq!(output.start_times(), vec![0.0, 1.0, 1.5]);
    assert_eq!(h.controller.stats().chunks_scheduled, 3);
}

#[tokio::test]
async fn test_playback_catches_up_with_clock() {
    let h = Harness::new(MockMicrophone::capture(), MockConnector::new());
    h.start_active().await;
    let output = h.speaker.output();

    h.connector.emit(speech(0.5)).await;
    wait_for(|| output.scheduled().len() == 1).await;

    // Silence on the line: the device clock runs past the end of the queue
    output.clock_handle().set(4.0);
    h.connector.emit(speech(0.5)).await;
    wait_for(|| output.scheduled().len() == 2).await;

    assert_eq!(output.start_times(), vec![0.0, 4.0]);
}

#[tokio::test]
async fn test_interruption_cuts_playback() {
    let h = Harness::new(MockMicrophone::capture(), MockConnector::new());
    h.start_active().await;
    let output = h.speaker.output();

    h.connector.emit(speech(1.0)).await;
    h.connector.emit(speech(1.0)).await;
    wait_for(|| output.scheduled().len() == 2).await;

    output.clock_handle().set(0.3);
    h.connector.emit(TransportEvent::Interrupted).await;
    wait_for(|| h.interruptions() == vec![2]).await;

    let handles: Vec<_> = output.scheduled().iter().map(|s| s.handle).collect();
    let mut stopped = output.stopped();
    stopped.sort();
    assert_eq!(stopped, handles);

    // New speech starts now, not after the cut-off queue
    h.connector.emit(speech(0.5)).await;
    wait_for(|| output.scheduled().len() == 3).await;
    assert_eq!(output.start_times()[2], 0.3);
    assert_eq!(h.controller.stats().interruptions, 1);
    assert_eq!(h.controller.state(), CallState::Active);
}

#[tokio::test]
async fn test_finished_buffers_are_not_stopped_again() {
    let h = Harness::new(MockMicrophone::capture(), MockConnector::new());
    h.start_active().await;
    let output = h.speaker.output();

    h.connector.emit(speech(0.2)).await;
    h.connector.emit(speech(0.2)).await;
    wait_for(|| output.scheduled().len() == 2).await;

    let first = output.scheduled()[0].handle;
    assert!(output.finish(first));
    // Completions are drained once no session event is pending
    tokio::time::sleep(Duration::from_millis(50)).await;

    h.connector.emit(TransportEvent::Interrupted).await;
    wait_for(|| h.interruptions() == vec![1]).await;
    assert_eq!(output.stopped(), vec![output.scheduled()[1].handle]);
}

#[tokio::test]
async fn test_malformed_chunk_is_dropped() {
    let h = Harness::new(MockMicrophone::capture(), MockConnector::new());
    h.start_active().await;

    let odd = TransportEvent::Audio(AudioPayload {
        data: "AAAA".to_string(), // 3 bytes
        mime_type: Some("audio/pcm;rate=24000".to_string()),
    });
    let garbage = TransportEvent::Audio(AudioPayload {
        data: "not base64!".to_string(),
        mime_type: None,
    });
    h.connector.emit(odd).await;
    h.connector.emit(garbage).await;
    h.connector.emit(speech(0.5)).await;

    let output = h.speaker.output();
    wait_for(|| output.scheduled().len() == 1).await;

    let stats = h.controller.stats();
    assert_eq!(stats.chunks_dropped, 2);
    assert_eq!(stats.chunks_scheduled, 1);
    assert_eq!(h.controller.state(), CallState::Active);
    let dropped = h
        .events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, CallEvent::ChunkDropped { .. }))
        .count();
    assert_eq!(dropped, 2);
}

#[tokio::test]
async fn test_remote_close_ends_call() {
    let h = Harness::new(MockMicrophone::capture(), MockConnector::new());
    h.start_active().await;

    h.connector.emit(speech(1.0)).await;
    let output = h.speaker.output();
    wait_for(|| output.scheduled().len() == 1).await;

    h.connector.emit(TransportEvent::Closed).await;
    wait_for(|| h.controller.state() == CallState::Ended).await;

    assert_eq!(h.controller.status(), "Chamada encerrada");
    assert_eq!(output.stopped().len(), 1);
    assert!(!h.mic.is_open());
    assert!(!h.speaker.is_open());
    assert_eq!(h.controller.stats().chunks_scheduled, 1);
}

#[tokio::test]
async fn test_scripted_close_ends_call() {
    let connector = MockConnector::new()
        .with_events([speech(0.5), TransportEvent::TurnComplete])
        .close_after_script();
    let h = Harness::new(MockMicrophone::capture(), connector);

    h.controller.start().await.unwrap();
    wait_for(|| h.controller.state() == CallState::Ended).await;

    assert_eq!(
        h.states(),
        vec![CallState::Connecting, CallState::Active, CallState::Ended]
    );
    assert!(!h.mic.is_open());
}

#[tokio::test]
async fn test_session_error_fails_call() {
    let h = Harness::new(MockMicrophone::capture(), MockConnector::new());
    h.start_active().await;

    h.connector
        .emit(TransportEvent::Error("network reset".to_string()))
        .await;
    wait_for(|| h.controller.state() == CallState::Error).await;

    assert_eq!(h.controller.status(), "Erro de conexão");
    assert!(!h.mic.is_open());
    assert!(!h.speaker.is_open());

    // A failed call can be retried by hand
    h.start_active().await;
    assert_eq!(h.connector.connect_count(), 2);
}

#[tokio::test]
async fn test_rejected_session_releases_devices() {
    let h = Harness::new(MockMicrophone::capture(), MockConnector::rejecting("bad key"));

    let result = h.controller.start().await;

    assert!(matches!(result, Err(VoiceCallError::Transport(_))));
    assert_eq!(h.controller.state(), CallState::Error);
    assert_eq!(h.controller.status(), "Falha ao iniciar");
    assert_eq!(h.mic.open_count(), 1);
    assert!(!h.mic.is_open());
    assert!(!h.speaker.is_open());
}

#[tokio::test]
async fn test_microphone_failure_never_connects() {
    let h = Harness::new(
        MockMicrophone::failing(MockFailure::NoDevice),
        MockConnector::new(),
    );

    let result = h.controller.start().await;

    assert!(matches!(result, Err(VoiceCallError::NoDefaultDevice)));
    assert_eq!(h.controller.state(), CallState::Error);
    assert_eq!(h.connector.connect_count(), 0);
    assert_eq!(h.speaker.open_count(), 0);
}

#[tokio::test]
async fn test_concurrent_start_opens_one_session() {
    let h = Harness::new(MockMicrophone::capture(), MockConnector::new());

    let (a, b) = tokio::join!(h.controller.start(), h.controller.start());
    let mut outcomes = vec![a.unwrap(), b.unwrap()];
    outcomes.sort_by_key(|o| *o != StartOutcome::Started);

    assert_eq!(outcomes, vec![StartOutcome::Started, StartOutcome::Ignored]);
    assert_eq!(h.connector.connect_count(), 1);
    assert_eq!(h.mic.open_count(), 1);
}

#[tokio::test]
async fn test_end_is_idempotent() {
    let h = Harness::new(MockMicrophone::capture(), MockConnector::new());

    h.controller.end();
    assert_eq!(h.controller.state(), CallState::Idle);

    h.start_active().await;
    h.controller.end();
    h.controller.end();

    assert_eq!(h.controller.state(), CallState::Ended);
    assert_eq!(h.controller.status(), "Chamada encerrada");
    assert!(!h.mic.is_open());
    assert!(!h.speaker.is_open());
    // One Ended notification, however often end() is called
    let ended = h
        .states()
        .into_iter()
        .filter(|s| *s == CallState::Ended)
        .count();
    assert_eq!(ended, 1);
}

#[tokio::test]
async fn test_events_after_end_are_ignored() {
    let h = Harness::new(MockMicrophone::capture(), MockConnector::new());
    h.start_active().await;
    h.controller.end();

    h.connector.emit(speech(0.5)).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.speaker.output().scheduled().is_empty());
    assert_eq!(h.controller.state(), CallState::Ended);
}

#[tokio::test]
async fn test_dropping_controller_releases_devices() {
    let h = Harness::new(MockMicrophone::capture(), MockConnector::new());
    h.start_active().await;

    let Harness {
        controller,
        mic,
        speaker,
        ..
    } = h;
    drop(controller);

    assert!(!mic.is_open());
    assert!(!speaker.is_open());
}

#[tokio::test]
async fn test_microphone_frames_reach_session() {
    let mic = MockMicrophone::capture().with_sine(440.0, 1000);
    let h = Harness::new(mic, MockConnector::new());
    h.start_active().await;

    // 16000 samples make three whole 4096-sample frames
    wait_for(|| h.connector.sent_count() == 3).await;

    let frames = h.connector.sent_frames();
    for frame in &frames {
        assert_eq!(frame.samples.len(), 4096);
        assert_eq!(frame.sample_rate, 16000);
        assert_eq!(frame.mime_type, "audio/pcm;rate=16000");
    }
    assert!(frames[0].samples.iter().any(|&s| s != 0));
    assert_eq!(h.controller.stats().frames_sent, 3);
}

#[tokio::test]
async fn test_stereo_48k_microphone_is_converted() {
    let mic = MockMicrophone::new(48000, 2).with_sine(440.0, 500);
    let h = Harness::new(mic, MockConnector::new());
    h.start_active().await;

    // 500ms at 16kHz is 8000 samples: one whole frame
    wait_for(|| h.connector.sent_count() == 1).await;
    assert_eq!(h.connector.sent_frames()[0].sample_rate, 16000);
}

#[tokio::test]
async fn test_clone_persona_reaches_session() {
    let persona = PersonaContext::new("Rui").with_voice_profile("fala devagar");
    let h = Harness::with_persona(MockMicrophone::capture(), MockConnector::new(), persona);

    h.controller.start().await.unwrap();

    let instruction = h.connector.last_config().unwrap().system_instruction;
    assert!(instruction.contains("CLONAGEM DE PERSONA"));
    assert!(instruction.contains("fala devagar"));
    assert!(!instruction.contains(COMPANION_IDENTITY_LINE));
}
