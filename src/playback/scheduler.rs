//! Gapless sequential scheduling of model speech.

use std::collections::HashSet;
use std::sync::Arc;

use crate::format::fixed_point_to_float_buffer;
use crate::playback::{AudioOutput, PlaybackHandle};
use crate::{AudioChunk, PlayableBuffer};

/// Where and when a buffer was scheduled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSegment {
    /// Handle on the output.
    pub handle: PlaybackHandle,
    /// Start time on the output clock, in seconds.
    pub start_at: f64,
    /// Length of the buffer, in seconds.
    pub duration: f64,
}

#[derive(Debug, Default)]
struct QueueState {
    next_start_time: f64,
    playing: HashSet<PlaybackHandle>,
}

/// Schedules decoded chunks back-to-back on an output.
///
/// Each buffer starts where the previous one ends, or immediately if the
/// output clock has already passed that point. Buffers never overlap and no
/// start time lies in the output's past.
///
/// The scheduler is owned by a single task; it is not shared.
///
/// # Example
///
/// ```
/// use companion_voice::playback::{OutputDevice, PlaybackScheduler, VirtualSpeaker};
/// use companion_voice::AudioChunk;
///
/// let speaker = VirtualSpeaker::new();
/// let opened = speaker.open(24000, 1).unwrap();
/// let mut scheduler = PlaybackScheduler::new(opened.output, 24000, 1);
///
/// let first = scheduler.on_chunk(&AudioChunk::new(vec![0; 24000], 24000, 1)).unwrap();
/// let second = scheduler.on_chunk(&AudioChunk::new(vec![0; 12000], 24000, 1)).unwrap();
/// assert_eq!(first.start_at, 0.0);
/// assert_eq!(second.start_at, 1.0);
/// ```
pub struct PlaybackScheduler {
    output: Arc<dyn AudioOutput>,
    queue: QueueState,
    sample_rate: u32,
    channels: u16,
}

impl PlaybackScheduler {
    /// Creates a scheduler for raw chunks of the given format.
    pub fn new(output: Arc<dyn AudioOutput>, sample_rate: u32, channels: u16) -> Self {
        Self {
            output,
            queue: QueueState::default(),
            sample_rate,
            channels,
        }
    }

    /// Schedules a decoded chunk.
    ///
    /// Returns `None` for an empty chunk.
    pub fn on_chunk(&mut self, chunk: &AudioChunk) -> Option<ScheduledSegment> {
        self.schedule_buffer(chunk.to_playable())
    }

    /// Schedules raw little-endian PCM16 in the scheduler's format.
    pub fn on_chunk_bytes(&mut self, bytes: &[u8]) -> Option<ScheduledSegment> {
        self.schedule_buffer(fixed_point_to_float_buffer(
            bytes,
            self.sample_rate,
            self.channels,
        ))
    }

    /// Schedules a playable buffer right after everything already queued.
    pub fn schedule_buffer(&mut self, buffer: PlayableBuffer) -> Option<ScheduledSegment> {
        if buffer.is_empty() {
            tracing::debug!("empty buffer skipped");
            return None;
        }

        let now = self.output.clock().current_time();
        let start_at = self.queue.next_start_time.max(now);
        let duration = buffer.duration_secs();

        let handle = self.output.schedule(buffer, start_at);
        self.queue.next_start_time = start_at + duration;
        self.queue.playing.insert(handle);

        tracing::trace!(start_at, duration, playing = self.queue.playing.len(), "buffer scheduled");
        Some(ScheduledSegment {
            handle,
            start_at,
            duration,
        })
    }

    /// Discards all queued and playing speech.
    ///
    /// Returns the number of buffers that were stopped.
    pub fn on_interrupted(&mut self) -> usize {
        let stopped = self.stop_all();
        tracing::debug!(stopped, "playback interrupted");
        stopped
    }

    /// Records that a buffer finished playing.
    ///
    /// Returns `false` if the handle was not scheduled here or was already
    /// stopped.
    pub fn on_ended(&mut self, handle: PlaybackHandle) -> bool {
        self.queue.playing.remove(&handle)
    }

    /// Stops every scheduled buffer and resets the queue.
    pub fn stop_all(&mut self) -> usize {
        let stopped = self.queue.playing.len();
        for handle in self.queue.playing.drain() {
            self.output.stop(handle);
        }
        self.queue.next_start_time = 0.0;
        stopped
    }

    /// Earliest start time of the next buffer, before clock catch-up.
    pub fn next_start_time(&self) -> f64 {
        self.queue.next_start_time
    }

    /// Number of buffers scheduled and not yet finished.
    pub fn playing_count(&self) -> usize {
        self.queue.playing.len()
    }

    /// Returns `true` if `handle` is scheduled and not yet finished.
    pub fn is_playing(&self, handle: PlaybackHandle) -> bool {
        self.queue.playing.contains(&handle)
    }
}

impl std::fmt::Debug for PlaybackScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackScheduler")
            .field("next_start_time", &self.queue.next_start_time)
            .field("playing", &self.queue.playing.len())
            .finish_non_exhaustive()
    }
}
