//! Playback clocks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic time of an output device, in seconds.
///
/// This is the device's notion of "now" that scheduled start times refer to,
/// not wall-clock time.
pub trait PlaybackClock: Send + Sync {
    /// Current playback time in seconds.
    fn current_time(&self) -> f64;
}

/// A clock that only moves when told to.
///
/// Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
}

impl ManualClock {
    /// Creates a clock at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the current time.
    pub fn set(&self, seconds: f64) {
        self.bits.store(seconds.to_bits(), Ordering::SeqCst);
    }

    /// Moves the clock forward.
    pub fn advance(&self, seconds: f64) {
        self.set(self.current_time() + seconds);
    }
}

impl PlaybackClock for ManualClock {
    fn current_time(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

/// A clock driven by the number of frames a device has rendered.
#[derive(Debug, Clone)]
pub struct SampleClock {
    frames: Arc<AtomicU64>,
    sample_rate: u32,
}

impl SampleClock {
    /// Creates a clock for a device running at `sample_rate`.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames: Arc::new(AtomicU64::new(0)),
            sample_rate,
        }
    }

    /// Records that `frames` more frames were rendered.
    pub fn advance_frames(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::Relaxed);
    }

    /// Total frames rendered.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl PlaybackClock for SampleClock {
    fn current_time(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / f64::from(self.sample_rate)
    }
}
