//! Audio units flowing through a call: outbound frames, inbound chunks and
//! decoded playable buffers.

use std::sync::Arc;
use std::time::Duration;

use crate::format::{bytes_to_transport_text, deinterleave, le_bytes_to_samples, samples_to_le_bytes};

/// A fixed-length buffer of captured microphone audio, ready for the session.
///
/// Frames are created by the capture bridge and consumed immediately by the
/// session transport.
///
/// # Example
///
/// ```
/// use companion_voice::AudioFrame;
/// use std::time::Duration;
///
/// let frame = AudioFrame::pcm16(vec![0i16; 4096], 16000, Duration::ZERO);
/// assert_eq!(frame.mime_type, "audio/pcm;rate=16000");
/// assert_eq!(frame.duration(), Duration::from_millis(256));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Mono PCM samples in 16-bit signed integer format.
    pub samples: Vec<i16>,

    /// Sample rate in Hz.
    pub sample_rate: u32,

    /// Encoding tag sent alongside the payload.
    pub mime_type: String,

    /// Offset of the first sample from the start of capture.
    pub timestamp: Duration,
}

impl AudioFrame {
    /// Creates a mono PCM16 frame tagged `audio/pcm;rate=<sample_rate>`.
    pub fn pcm16(samples: Vec<i16>, sample_rate: u32, timestamp: Duration) -> Self {
        Self {
            samples,
            sample_rate,
            mime_type: pcm_mime_type(sample_rate),
            timestamp,
        }
    }

    /// Returns the duration of this frame.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }

    /// Returns the number of samples in the frame.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` if this frame contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Serializes the samples as little-endian PCM16.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        samples_to_le_bytes(&self.samples)
    }

    /// Encodes the samples as base64 transport text.
    pub fn to_transport_text(&self) -> String {
        bytes_to_transport_text(&self.to_le_bytes())
    }
}

/// A variable-length buffer of model audio received from the session.
///
/// Samples are stored in an `Arc<Vec<i16>>` so chunks can be cloned cheaply
/// into logs and test recorders.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Interleaved PCM samples in 16-bit signed integer format.
    pub samples: Arc<Vec<i16>>,

    /// Sample rate in Hz (the model speaks at 24000).
    pub sample_rate: u32,

    /// Number of audio channels (1 = mono, 2 = stereo).
    pub channels: u16,
}

impl AudioChunk {
    /// Creates a new `AudioChunk` with the given parameters.
    pub fn new(samples: Vec<i16>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: Arc::new(samples),
            sample_rate,
            channels,
        }
    }

    /// Creates a chunk from little-endian PCM16 bytes. A trailing odd byte is ignored.
    pub fn from_le_bytes(bytes: &[u8], sample_rate: u32, channels: u16) -> Self {
        Self::new(le_bytes_to_samples(bytes), sample_rate, channels)
    }

    /// Returns the duration of this audio chunk.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_count() as f64 / f64::from(self.sample_rate))
    }

    /// Returns the number of audio frames in this chunk.
    ///
    /// A frame contains one sample per channel.
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Returns `true` if this chunk contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Decodes the chunk into per-channel float samples.
    pub fn to_playable(&self) -> PlayableBuffer {
        PlayableBuffer::new(deinterleave(&self.samples, self.channels), self.sample_rate)
    }
}

/// Deinterleaved float audio ready to hand to an output device.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayableBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl PlayableBuffer {
    /// Creates a buffer from one sample vector per channel.
    ///
    /// All channels are expected to have the same length; the shortest wins.
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
        }
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples of one channel. Out-of-range indices yield an empty slice.
    pub fn channel(&self, index: usize) -> &[f32] {
        self.channels.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All channels.
    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    /// Number of sample frames.
    pub fn frame_count(&self) -> usize {
        self.channels.iter().map(Vec::len).min().unwrap_or(0)
    }

    /// Returns `true` if there is nothing to play.
    pub fn is_empty(&self) -> bool {
        self.frame_count() == 0
    }

    /// Playback length in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / f64::from(self.sample_rate)
    }
}

/// Builds the encoding tag for mono PCM16 at `sample_rate`.
pub(crate) fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}

/// Extracts the `rate=` parameter from a PCM mime type, e.g. `audio/pcm;rate=24000`.
pub(crate) fn parse_pcm_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.trim().parse().ok())
}
