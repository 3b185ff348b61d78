//! Playback of model speech.
//!
//! Inbound chunks are decoded into [`PlayableBuffer`]s and scheduled
//! back-to-back on an [`AudioOutput`] against the output's own clock:
//!
//! ```text
//! dispatch loop → PlaybackScheduler → AudioOutput::schedule → device callback
//!                        ↑                                          │
//!                        └────────── completed handles ─────────────┘
//! ```
//!
//! [`Speaker`] drives a real output device; [`VirtualSpeaker`] records what
//! would have been played, for tests.

mod clock;
mod device;
mod scheduler;
mod virtual_output;

pub use clock::{ManualClock, PlaybackClock, SampleClock};
pub use device::{Speaker, SpeakerOutput};
pub use scheduler::{PlaybackScheduler, ScheduledSegment};
pub use virtual_output::{ScheduledBuffer, VirtualOutput, VirtualSpeaker};

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::source::DeviceStream;
use crate::{PlayableBuffer, VoiceCallError};

/// Identifies one scheduled buffer on an [`AudioOutput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaybackHandle(u64);

impl PlaybackHandle {
    /// Creates a handle from an output-specific id.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// The output-specific id.
    pub fn id(self) -> u64 {
        self.0
    }
}

/// An output that plays buffers at given times on its own clock.
pub trait AudioOutput: Send + Sync {
    /// The clock `start_at` times refer to.
    fn clock(&self) -> &dyn PlaybackClock;

    /// Plays `buffer` starting at `start_at` seconds on [`clock()`](Self::clock).
    fn schedule(&self, buffer: PlayableBuffer, start_at: f64) -> PlaybackHandle;

    /// Stops a scheduled buffer, whether or not it has started.
    ///
    /// Stopping a finished or unknown handle does nothing.
    fn stop(&self, handle: PlaybackHandle);
}

/// A place model speech can be played.
pub trait OutputDevice: Send + Sync {
    /// Human-readable name for logging and status messages.
    fn name(&self) -> String;

    /// Opens the output for audio of the given format.
    ///
    /// # Errors
    ///
    /// Returns a device error if no output can be opened.
    fn open(&self, sample_rate: u32, channels: u16) -> Result<OpenedOutput, VoiceCallError>;
}

/// A running output.
pub struct OpenedOutput {
    /// Where buffers are scheduled.
    pub output: Arc<dyn AudioOutput>,
    /// Handles of buffers that finished playing on their own.
    pub completions: mpsc::UnboundedReceiver<PlaybackHandle>,
    /// Guard keeping the device stream alive.
    pub stream: DeviceStream,
}

impl std::fmt::Debug for OpenedOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedOutput")
            .field("stream", &self.stream)
            .finish_non_exhaustive()
    }
}
