//! Mock microphone for testing without hardware.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use ringbuf::traits::{Producer, Split};
use ringbuf::HeapRb;

use crate::source::{AudioInput, DeviceStream, InputCapture};
use crate::VoiceCallError;

/// How a [`MockMicrophone`] fails to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// Behaves like a microphone the user refused access to.
    PermissionDenied,
    /// Behaves like a machine without any input device.
    NoDevice,
}

/// A mock microphone that replays synthetic audio.
///
/// This allows testing full calls without audio hardware, making it suitable
/// for CI environments. Clones share state, so a test can keep one clone to
/// inspect after handing another to a controller.
///
/// # Example
///
/// ```
/// use companion_voice::source::MockMicrophone;
///
/// // 100ms of silence followed by 100ms of a 440Hz sine wave
/// let mic = MockMicrophone::capture()
///     .with_silence(100)
///     .with_sine(440.0, 100);
///
/// assert_eq!(mic.sample_count(), 3200);
/// ```
#[derive(Clone)]
pub struct MockMicrophone {
    shared: Arc<Shared>,
}

struct Shared {
    sample_rate: u32,
    channels: u16,
    samples: Mutex<Vec<f32>>,
    failure: Mutex<Option<MockFailure>>,
    opens: AtomicUsize,
    active: Arc<AtomicUsize>,
}

impl MockMicrophone {
    /// Creates a new mock microphone with the given native format.
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            shared: Arc::new(Shared {
                sample_rate,
                channels,
                samples: Mutex::new(Vec::new()),
                failure: Mutex::new(None),
                opens: AtomicUsize::new(0),
                active: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    /// Creates a mock microphone that already captures at 16kHz mono.
    pub fn capture() -> Self {
        Self::new(16000, 1)
    }

    /// Creates a mock microphone that fails to open.
    pub fn failing(failure: MockFailure) -> Self {
        let mic = Self::capture();
        *mic.shared.failure.lock() = Some(failure);
        mic
    }

    /// Appends silence for the given duration in milliseconds.
    pub fn with_silence(self, duration_ms: u64) -> Self {
        let num_samples = self.samples_for_duration(duration_ms);
        self.shared
            .samples
            .lock()
            .extend(std::iter::repeat(0.0f32).take(num_samples));
        self
    }

    /// Appends a sine wave at the given frequency for the given duration.
    pub fn with_sine(self, frequency: f64, duration_ms: u64) -> Self {
        let channels = self.shared.channels.max(1) as usize;
        let num_frames = self.samples_for_duration(duration_ms) / channels;
        let sample_rate = f64::from(self.shared.sample_rate);

        {
            let mut samples = self.shared.samples.lock();
            for i in 0..num_frames {
                let t = i as f64 / sample_rate;
                let value = (0.5 * (2.0 * std::f64::consts::PI * frequency * t).sin()) as f32;
                // Write same sample to all channels
                samples.extend(std::iter::repeat(value).take(channels));
            }
        }
        self
    }

    /// Appends raw interleaved samples.
    pub fn with_samples(self, samples: &[f32]) -> Self {
        self.shared.samples.lock().extend_from_slice(samples);
        self
    }

    /// Number of samples that will be replayed on the next open.
    pub fn sample_count(&self) -> usize {
        self.shared.samples.lock().len()
    }

    /// How many times the microphone was opened.
    pub fn open_count(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    /// Returns `true` while a capture handed out by [`open()`](AudioInput::open) is alive.
    pub fn is_open(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst) > 0
    }

    fn samples_for_duration(&self, duration_ms: u64) -> usize {
        let frames = (u64::from(self.shared.sample_rate) * duration_ms / 1000) as usize;
        frames * self.shared.channels as usize
    }
}

impl AudioInput for MockMicrophone {
    fn name(&self) -> String {
        "mock microphone".to_string()
    }

    fn open(&self, _buffer_duration: Duration) -> Result<InputCapture, VoiceCallError> {
        self.shared.opens.fetch_add(1, Ordering::SeqCst);

        match *self.shared.failure.lock() {
            Some(MockFailure::PermissionDenied) => return Err(VoiceCallError::PermissionDenied),
            Some(MockFailure::NoDevice) => return Err(VoiceCallError::NoDefaultDevice),
            None => {}
        }

        // Replayed samples are consumed by this capture
        let samples = std::mem::take(&mut *self.shared.samples.lock());
        let ring_buffer = HeapRb::<f32>::new(samples.len().max(1024));
        let (mut producer, consumer) = ring_buffer.split();
        producer.push_slice(&samples);

        let active = self.shared.active.clone();
        active.fetch_add(1, Ordering::SeqCst);
        let stream = DeviceStream::from_release_hook(move || {
            active.fetch_sub(1, Ordering::SeqCst);
        });

        Ok(InputCapture {
            stream,
            consumer,
            sample_rate: self.shared.sample_rate,
            channels: self.shared.channels,
            dropped_samples: Arc::new(AtomicU64::new(0)),
        })
    }
}

impl std::fmt::Debug for MockMicrophone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockMicrophone")
            .field("sample_rate", &self.shared.sample_rate)
            .field("channels", &self.shared.channels)
            .field("samples", &self.sample_count())
            .finish()
    }
}
