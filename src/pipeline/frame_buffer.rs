//! Fixed-size frame assembly for outbound audio.

use std::time::Duration;

use crate::format::{float_frame_to_fixed_point_with, SampleOverflow};
use crate::AudioFrame;

/// Accumulates converted mono samples and cuts them into uniform frames.
///
/// The device delivers audio in whatever block sizes it likes; the session
/// receives exactly `frame_size` samples per frame.
pub(crate) struct FrameAssembler {
    pending: Vec<f32>,
    frame_size: usize,
    sample_rate: u32,
    overflow: SampleOverflow,
    frames_emitted: u64,
}

impl FrameAssembler {
    /// Creates an assembler producing `frame_size`-sample frames at `sample_rate`.
    pub fn new(frame_size: usize, sample_rate: u32, overflow: SampleOverflow) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            pending: Vec::with_capacity(frame_size * 2),
            frame_size,
            sample_rate,
            overflow,
            frames_emitted: 0,
        }
    }

    /// Appends mono samples at the target rate.
    pub fn push(&mut self, samples: &[f32]) {
        self.pending.extend_from_slice(samples);
    }

    /// Returns true if enough samples are buffered for a complete frame.
    pub fn has_frame(&self) -> bool {
        self.pending.len() >= self.frame_size
    }

    /// Number of samples waiting for the next frame.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Cuts the next complete frame, converting it to fixed point.
    ///
    /// Returns `None` if not enough samples are available.
    pub fn next_frame(&mut self) -> Option<AudioFrame> {
        if !self.has_frame() {
            return None;
        }

        let samples = float_frame_to_fixed_point_with(&self.pending[..self.frame_size], self.overflow);
        self.pending.drain(..self.frame_size);

        let timestamp = if self.sample_rate == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(
                (self.frames_emitted * self.frame_size as u64) as f64 / f64::from(self.sample_rate),
            )
        };
        self.frames_emitted += 1;

        Some(AudioFrame::pcm16(samples, self.sample_rate, timestamp))
    }
}
