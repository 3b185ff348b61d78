//! Configuration types for voice calls.

use std::time::Duration;

use crate::format::SampleOverflow;

/// Model used for the live session when none is configured.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Prebuilt voice used when none is configured.
pub const DEFAULT_VOICE: &str = "Kore";

/// WebSocket endpoint of the bidirectional generate-content service.
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Samples per outbound frame.
pub const DEFAULT_FRAME_SIZE: usize = 4096;

/// Environment variables searched, in order, for the API key.
const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

/// Fixed audio formats of the live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioFormat {
    /// 16kHz mono - what the model expects from the microphone.
    #[default]
    Capture,

    /// 24kHz mono - what the model speaks.
    Playback,
}

impl AudioFormat {
    /// Returns the sample rate for this format.
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        match self {
            Self::Capture => 16000,
            Self::Playback => 24000,
        }
    }

    /// Returns the channel count for this format.
    #[must_use]
    pub fn channels(&self) -> u16 {
        1
    }
}

/// Configuration for a voice call.
///
/// Use [`CallConfig::default()`] for the session's reference formats, or
/// [`CallConfig::from_env()`] to pick up credentials and overrides.
///
/// # Example
///
/// ```
/// use companion_voice::CallConfig;
///
/// let config = CallConfig {
///     voice_name: "Puck".to_string(),
///     ..Default::default()
/// };
/// assert_eq!(config.frame_size, 4096);
/// ```
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// Model name sent in the session setup.
    ///
    /// Default: [`DEFAULT_MODEL`]
    pub model: String,

    /// Prebuilt voice the model speaks with.
    ///
    /// Default: [`DEFAULT_VOICE`]
    pub voice_name: String,

    /// Live session endpoint.
    ///
    /// Default: [`DEFAULT_ENDPOINT`]
    pub endpoint: String,

    /// Credential for the live session endpoint.
    pub api_key: Option<String>,

    /// Samples per outbound frame.
    ///
    /// Default: 4096 (256ms at 16kHz)
    pub frame_size: usize,

    /// Sample rate sent to the model.
    ///
    /// Default: 16000
    pub capture_sample_rate: u32,

    /// Sample rate assumed for model audio without a `rate=` tag.
    ///
    /// Default: 24000
    pub playback_sample_rate: u32,

    /// Channel count of model audio.
    ///
    /// Default: 1
    pub playback_channels: u16,

    /// How captured samples outside `[-1.0, 1.0)` are converted.
    ///
    /// Default: [`SampleOverflow::Saturate`]
    pub sample_overflow: SampleOverflow,

    /// Size of the microphone ring buffer.
    ///
    /// Absorbs scheduling jitter between the audio callback and the capture
    /// bridge. If it fills, the newest samples are dropped.
    /// Default: 5 seconds
    pub ring_buffer_duration: Duration,

    /// Frames that may wait for the network before new ones are dropped.
    ///
    /// Default: 32 (about 8 seconds)
    pub outbound_queue_capacity: usize,

    /// Inbound session events buffered ahead of the dispatch loop.
    ///
    /// Default: 256
    pub event_queue_capacity: usize,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            voice_name: DEFAULT_VOICE.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            frame_size: DEFAULT_FRAME_SIZE,
            capture_sample_rate: AudioFormat::Capture.sample_rate(),
            playback_sample_rate: AudioFormat::Playback.sample_rate(),
            playback_channels: AudioFormat::Playback.channels(),
            sample_overflow: SampleOverflow::default(),
            ring_buffer_duration: Duration::from_secs(5),
            outbound_queue_capacity: 32,
            event_queue_capacity: 256,
        }
    }
}

impl CallConfig {
    /// Builds a config from the process environment.
    ///
    /// Reads the API key from `GEMINI_API_KEY`, then `API_KEY`. `VOICE_MODEL`
    /// and `VOICE_NAME` override the model and voice. Empty values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        config.api_key = API_KEY_VARS.iter().find_map(|key| non_empty(key));
        if let Some(model) = non_empty("VOICE_MODEL") {
            config.model = model;
        }
        if let Some(voice) = non_empty("VOICE_NAME") {
            config.voice_name = voice;
        }
        config
    }

    /// Duration of one outbound frame.
    pub fn frame_duration(&self) -> Duration {
        if self.capture_sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_size as f64 / f64::from(self.capture_sample_rate))
    }
}
