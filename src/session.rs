//! Call session state and resource ownership.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::source::DeviceStream;
use crate::transport::TransportHandle;

/// Lifecycle state of a call.
///
/// ```text
/// Idle → Connecting → Active → Ended
///             ↓          ↓
///           Error      Error
/// ```
///
/// Ended and Error are terminal for a session but not for the controller:
/// a new call can be started from either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CallState {
    /// No call has been started.
    #[default]
    Idle,
    /// Devices are open and the session is being established.
    Connecting,
    /// The session is live; audio flows both ways.
    Active,
    /// The call was ended by the user or the remote.
    Ended,
    /// The call failed to start or failed mid-call.
    Error,
}

impl CallState {
    /// Returns `true` if a new call may be started from this state.
    pub fn can_start(self) -> bool {
        matches!(self, Self::Idle | Self::Ended | Self::Error)
    }

    /// Returns `true` while a session is being set up or running.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Active)
    }

    /// Default status line shown for this state.
    pub fn status(self) -> &'static str {
        match self {
            Self::Idle => "Pronta para falar",
            Self::Connecting => "Conectando...",
            Self::Active => "Ativa e Ouvindo",
            Self::Ended => "Chamada encerrada",
            Self::Error => "Erro de conexão",
        }
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Ended => "ended",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Status line for a call that failed before the session opened.
pub(crate) const STATUS_START_FAILED: &str = "Falha ao iniciar";

/// Status line for a call that could not open the microphone.
pub(crate) const STATUS_MIC_UNAVAILABLE: &str = "Microfone indisponível";

/// Statistics about a call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallStats {
    /// Frames handed to the session.
    pub frames_sent: u64,
    /// Frames dropped because the outbound queue was full.
    pub frames_dropped: u64,
    /// Model audio chunks scheduled for playback.
    pub chunks_scheduled: u64,
    /// Model audio chunks dropped because they failed to decode.
    pub chunks_dropped: u64,
    /// Interruptions received from the remote.
    pub interruptions: u64,
    /// Microphone samples lost because the ring buffer was full.
    pub input_overflow_samples: u64,
}

/// Internal state shared between the session and its background tasks.
pub(crate) struct SessionState {
    running: AtomicBool,
    pub frames_sent: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub chunks_scheduled: AtomicU64,
    pub chunks_dropped: AtomicU64,
    pub interruptions: AtomicU64,
    pub input_overflow: AtomicU64,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            frames_sent: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            chunks_scheduled: AtomicU64::new(0),
            chunks_dropped: AtomicU64::new(0),
            interruptions: AtomicU64::new(0),
            input_overflow: AtomicU64::new(0),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Clears the running flag. Returns `true` if it was set.
    pub fn stop(&self) -> bool {
        self.running.swap(false, Ordering::SeqCst)
    }

    pub fn stats(&self) -> CallStats {
        CallStats {
            frames_sent: self.frames_sent.load(Ordering::SeqCst),
            frames_dropped: self.frames_dropped.load(Ordering::SeqCst),
            chunks_scheduled: self.chunks_scheduled.load(Ordering::SeqCst),
            chunks_dropped: self.chunks_dropped.load(Ordering::SeqCst),
            interruptions: self.interruptions.load(Ordering::SeqCst),
            input_overflow_samples: self.input_overflow.load(Ordering::SeqCst),
        }
    }
}

/// Resources of one live call.
///
/// Created by [`CallController::start()`] and destroyed when the call ends
/// or fails. Dropping the session closes the transport, stops both tasks and
/// releases the microphone and speaker, whatever state it is in.
///
/// [`CallController::start()`]: crate::CallController::start
pub(crate) struct CallSession {
    pub voice_name: String,
    pub instruction: String,
    state: Arc<SessionState>,
    transport: Option<TransportHandle>,
    capture_stream: Option<DeviceStream>,
    output_stream: Option<DeviceStream>,
    capture_task: Option<JoinHandle<()>>,
    dispatch_task: Option<JoinHandle<()>>,
}

impl CallSession {
    pub fn new(voice_name: String, instruction: String, state: Arc<SessionState>) -> Self {
        Self {
            voice_name,
            instruction,
            state,
            transport: None,
            capture_stream: None,
            output_stream: None,
            capture_task: None,
            dispatch_task: None,
        }
    }

    pub fn set_transport(&mut self, handle: TransportHandle) {
        self.transport = Some(handle);
    }

    pub fn set_capture_stream(&mut self, stream: DeviceStream) {
        self.capture_stream = Some(stream);
    }

    pub fn set_output_stream(&mut self, stream: DeviceStream) {
        self.output_stream = Some(stream);
    }

    pub fn set_capture_task(&mut self, task: JoinHandle<()>) {
        self.capture_task = Some(task);
    }

    pub fn set_dispatch_task(&mut self, task: JoinHandle<()>) {
        self.dispatch_task = Some(task);
    }

    /// Lets the dispatch task finish on its own instead of aborting it.
    ///
    /// Called by the dispatch loop before it tears down its own session.
    pub fn detach_dispatch_task(&mut self) {
        self.dispatch_task.take();
    }

    pub fn stats(&self) -> CallStats {
        self.state.stats()
    }

    /// Releases everything the session owns. Safe to call more than once.
    pub fn teardown(&mut self) {
        let was_running = self.state.stop();

        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        if let Some(task) = self.capture_task.take() {
            task.abort();
        }
        if let Some(task) = self.dispatch_task.take() {
            task.abort();
        }
        if let Some(mut stream) = self.capture_stream.take() {
            stream.stop();
        }
        if let Some(mut stream) = self.output_stream.take() {
            stream.stop();
        }

        if was_running {
            tracing::info!(voice = %self.voice_name, "call session torn down");
        }
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSession")
            .field("voice_name", &self.voice_name)
            .field("instruction_chars", &self.instruction.chars().count())
            .field("running", &self.state.is_running())
            .field("transport", &self.transport.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_can_start() {
        assert!(CallState::Idle.can_start());
        assert!(CallState::Ended.can_start());
        assert!(CallState::Error.can_start());
        assert!(!CallState::Connecting.can_start());
        assert!(!CallState::Active.can_start());
    }

    #[test]
    fn test_status_lines() {
        assert_eq!(CallState::Idle.status(), "Pronta para falar");
        assert_eq!(CallState::Active.status(), "Ativa e Ouvindo");
        assert_eq!(CallState::Connecting.to_string(), "connecting");
    }

    #[test]
    fn test_session_state_new() {
        let state = SessionState::new();
        assert!(state.is_running());
        assert_eq!(state.stats(), CallStats::default());
        assert!(state.stop());
        assert!(!state.stop());
        assert!(!state.is_running());
    }

    #[test]
    fn test_teardown_releases_streams_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let mut session = CallSession::new(
            "Kore".to_string(),
            String::new(),
            Arc::new(SessionState::new()),
        );
        let counter = released.clone();
        session.set_capture_stream(DeviceStream::from_release_hook(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let counter = released.clone();
        session.set_output_stream(DeviceStream::from_release_hook(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        session.teardown();
        session.teardown();
        drop(session);

        assert_eq!(released.load(Ordering::SeqCst), 2);
    }
}
