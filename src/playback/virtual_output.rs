//! Virtual speaker for testing without hardware.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::playback::{
    AudioOutput, ManualClock, OpenedOutput, OutputDevice, PlaybackClock, PlaybackHandle,
};
use crate::source::DeviceStream;
use crate::{PlayableBuffer, VoiceCallError};

/// A buffer handed to a [`VirtualOutput`].
#[derive(Debug, Clone)]
pub struct ScheduledBuffer {
    /// Handle returned to the scheduler.
    pub handle: PlaybackHandle,
    /// Requested start time.
    pub start_at: f64,
    /// The audio.
    pub buffer: PlayableBuffer,
}

/// An output that records what it is asked to play.
///
/// Time only moves through [`clock_handle()`](Self::clock_handle), and
/// buffers only finish when [`finish()`](Self::finish) is called.
#[derive(Default)]
pub struct VirtualOutput {
    clock: ManualClock,
    next_id: AtomicU64,
    scheduled: Mutex<Vec<ScheduledBuffer>>,
    stopped: Mutex<Vec<PlaybackHandle>>,
    completions: Mutex<Option<mpsc::UnboundedSender<PlaybackHandle>>>,
}

impl VirtualOutput {
    /// The clock scheduled start times refer to.
    pub fn clock_handle(&self) -> ManualClock {
        self.clock.clone()
    }

    /// Every buffer scheduled so far, in order.
    pub fn scheduled(&self) -> Vec<ScheduledBuffer> {
        self.scheduled.lock().clone()
    }

    /// Start times of every buffer scheduled so far, in order.
    pub fn start_times(&self) -> Vec<f64> {
        self.scheduled.lock().iter().map(|s| s.start_at).collect()
    }

    /// Every handle stopped so far, in order.
    pub fn stopped(&self) -> Vec<PlaybackHandle> {
        self.stopped.lock().clone()
    }

    /// Reports `handle` as having played to the end.
    pub fn finish(&self, handle: PlaybackHandle) -> bool {
        match &*self.completions.lock() {
            Some(tx) => tx.send(handle).is_ok(),
            None => false,
        }
    }
}

impl AudioOutput for VirtualOutput {
    fn clock(&self) -> &dyn PlaybackClock {
        &self.clock
    }

    fn schedule(&self, buffer: PlayableBuffer, start_at: f64) -> PlaybackHandle {
        let handle = PlaybackHandle::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.scheduled.lock().push(ScheduledBuffer {
            handle,
            start_at,
            buffer,
        });
        handle
    }

    fn stop(&self, handle: PlaybackHandle) {
        self.stopped.lock().push(handle);
    }
}

/// An output device backed by a [`VirtualOutput`].
///
/// Clones share the same output.
#[derive(Clone, Default)]
pub struct VirtualSpeaker {
    output: Arc<VirtualOutput>,
    opens: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
}

impl VirtualSpeaker {
    /// Creates a virtual speaker.
    pub fn new() -> Self {
        Self::default()
    }

    /// The output buffers are recorded on.
    pub fn output(&self) -> Arc<VirtualOutput> {
        self.output.clone()
    }

    /// How many times the speaker was opened.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Returns `true` while an opened output's stream guard is alive.
    pub fn is_open(&self) -> bool {
        self.active.load(Ordering::SeqCst) > 0
    }
}

impl OutputDevice for VirtualSpeaker {
    fn name(&self) -> String {
        "virtual speaker".to_string()
    }

    fn open(&self, sample_rate: u32, channels: u16) -> Result<OpenedOutput, VoiceCallError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(sample_rate, channels, "virtual speaker opened");

        let (tx, rx) = mpsc::unbounded_channel();
        *self.output.completions.lock() = Some(tx);

        let active = self.active.clone();
        active.fetch_add(1, Ordering::SeqCst);
        let stream = DeviceStream::from_release_hook(move || {
            active.fetch_sub(1, Ordering::SeqCst);
        });

        Ok(OpenedOutput {
            output: self.output.clone(),
            completions: rx,
            stream,
        })
    }
}

impl std::fmt::Debug for VirtualSpeaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualSpeaker")
            .field("opens", &self.open_count())
            .field("scheduled", &self.output.scheduled.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_schedule_and_stop() {
        let speaker = VirtualSpeaker::new();
        let opened = speaker.open(24000, 1).unwrap();

        let buffer = PlayableBuffer::new(vec![vec![0.0; 10]], 24000);
        let handle = opened.output.schedule(buffer, 0.5);
        opened.output.stop(handle);

        let output = speaker.output();
        assert_eq!(output.start_times(), vec![0.5]);
        assert_eq!(output.stopped(), vec![handle]);
    }

    #[tokio::test]
    async fn test_finish_reports_completion() {
        let speaker = VirtualSpeaker::new();
        let mut opened = speaker.open(24000, 1).unwrap();
        let handle = opened
            .output
            .schedule(PlayableBuffer::new(vec![vec![0.0; 10]], 24000), 0.0);

        assert!(speaker.output().finish(handle));
        assert_eq!(opened.completions.recv().await, Some(handle));
    }

    #[test]
    fn test_release_tracking() {
        let speaker = VirtualSpeaker::new();
        let opened = speaker.open(24000, 1).unwrap();
        assert!(speaker.is_open());

        drop(opened);
        assert!(!speaker.is_open());
        assert_eq!(speaker.open_count(), 1);
    }

    #[test]
    fn test_manual_clock_drives_output() {
        let speaker = VirtualSpeaker::new();
        let output = speaker.output();
        output.clock_handle().advance(1.5);
        assert_eq!(output.clock().current_time(), 1.5);
    }
}
