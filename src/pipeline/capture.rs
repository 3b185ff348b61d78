//! Capture bridge task - reads from the ring buffer, converts format, submits frames.
//!
//! The bridge owns everything between the audio callback and the session:
//! - Reading raw audio from the ring buffer (device format)
//! - Downmixing and resampling to the session format (16kHz mono)
//! - Cutting uniform frames and converting them to fixed point
//! - Submitting frames to the sink without ever waiting on it

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ringbuf::traits::{Consumer, Observer};
use tokio::time::MissedTickBehavior;

use crate::event::EventCallback;
use crate::format::{downmix, SampleOverflow, StreamResampler};
use crate::pipeline::FrameAssembler;
use crate::session::SessionState;
use crate::{CallEvent, FrameSink, SinkError};

/// Configuration for the capture bridge task.
#[derive(Debug, Clone)]
pub(crate) struct CaptureConfig {
    /// Device-native sample rate
    pub device_sample_rate: u32,
    /// Device-native channel count
    pub device_channels: u16,
    /// Sample rate sent to the session
    pub target_sample_rate: u32,
    /// Samples per outbound frame
    pub frame_size: usize,
    /// Conversion policy for out-of-range samples
    pub overflow: SampleOverflow,
}

impl CaptureConfig {
    /// How often the bridge drains the ring buffer: half a frame.
    pub fn poll_interval(&self) -> Duration {
        if self.target_sample_rate == 0 {
            return Duration::from_millis(10);
        }
        let frame = Duration::from_secs_f64(self.frame_size as f64 / f64::from(self.target_sample_rate));
        (frame / 2).max(Duration::from_millis(1))
    }
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pump {
    /// Keep running.
    Continue,
    /// The sink is gone; the bridge should stop.
    SinkClosed,
}

/// The capture bridge reads audio from the ring buffer and forwards frames.
pub(crate) struct CaptureBridge {
    consumer: ringbuf::HeapCons<f32>,
    assembler: FrameAssembler,
    sink: Arc<dyn FrameSink>,
    state: Arc<SessionState>,
    resampler: StreamResampler,
    device_channels: u16,
    poll_interval: Duration,
    read_buf: Vec<f32>,
    device_dropped: Arc<AtomicU64>,
    event_callback: Option<EventCallback>,
}

impl CaptureBridge {
    /// Creates a new capture bridge.
    pub fn new(
        consumer: ringbuf::HeapCons<f32>,
        config: &CaptureConfig,
        sink: Arc<dyn FrameSink>,
        state: Arc<SessionState>,
        device_dropped: Arc<AtomicU64>,
        event_callback: Option<EventCallback>,
    ) -> Self {
        tracing::info!(
            sink = sink.name(),
            device_rate = config.device_sample_rate,
            device_channels = config.device_channels,
            target_rate = config.target_sample_rate,
            frame_size = config.frame_size,
            "capture bridge created"
        );

        Self {
            consumer,
            assembler: FrameAssembler::new(
                config.frame_size,
                config.target_sample_rate,
                config.overflow,
            ),
            sink,
            state,
            resampler: StreamResampler::new(config.device_sample_rate, config.target_sample_rate),
            device_channels: config.device_channels.max(1),
            poll_interval: config.poll_interval(),
            read_buf: Vec::new(),
            device_dropped,
            event_callback,
        }
    }

    /// Runs the capture bridge until the session stops or the sink closes.
    ///
    /// Samples short of a whole frame at shutdown are discarded.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while self.state.is_running() {
            interval.tick().await;

            if self.pump() == Pump::SinkClosed {
                tracing::debug!(sink = self.sink.name(), "frame sink closed, capture bridge stopping");
                return;
            }
        }
    }

    /// Drains everything available in the ring buffer and submits complete frames.
    pub fn pump(&mut self) -> Pump {
        self.state
            .input_overflow
            .store(self.device_dropped.load(Ordering::Relaxed), Ordering::Relaxed);

        let channels = self.device_channels as usize;
        let available = self.consumer.occupied_len();
        // Only whole device frames, so channels never shift
        let whole = available - available % channels;
        if whole > 0 {
            self.read_buf.resize(whole, 0.0);
            let read = self.consumer.pop_slice(&mut self.read_buf);
            self.read_buf.truncate(read);

            let mono = downmix(&self.read_buf, self.device_channels);
            let converted = self.resampler.process(&mono);
            self.assembler.push(&converted);
        }

        while let Some(frame) = self.assembler.next_frame() {
            match self.sink.submit(frame) {
                Ok(()) => {
                    let sent = self.state.frames_sent.fetch_add(1, Ordering::Relaxed) + 1;
                    if sent % 50 == 0 {
                        tracing::debug!(frames = sent, sink = self.sink.name(), "capture progress");
                    }
                }
                Err(SinkError::Full) => {
                    let total_dropped = self.state.frames_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::warn!(total_dropped, "outbound queue full, frame dropped");
                    self.emit_event(CallEvent::FrameDropped { total_dropped });
                }
                Err(SinkError::Closed) => return Pump::SinkClosed,
            }
        }

        Pump::Continue
    }

    fn emit_event(&self, event: CallEvent) {
        if let Some(ref callback) = self.event_callback {
            callback(event);
        }
    }
}

/// Spawns the capture bridge as a background task.
pub(crate) fn spawn_capture_bridge(bridge: CaptureBridge) -> tokio::task::JoinHandle<()> {
    tokio::spawn(bridge.run())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AudioFrame;
    use ringbuf::traits::{Producer, Split};
    use ringbuf::HeapRb;
    use tokio::sync::mpsc;
    use tokio::sync::mpsc::error::TrySendError;

    struct QueueSink(mpsc::Sender<AudioFrame>);

    impl FrameSink for QueueSink {
        fn name(&self) -> &str {
            "queue"
        }

        fn submit(&self, frame: AudioFrame) -> Result<(), SinkError> {
            self.0.try_send(frame).map_err(|e| match e {
                TrySendError::Full(_) => SinkError::Full,
                TrySendError::Closed(_) => SinkError::Closed,
            })
        }
    }

    fn config(device_rate: u32, device_channels: u16) -> CaptureConfig {
        CaptureConfig {
            device_sample_rate: device_rate,
            device_channels,
            target_sample_rate: 16000,
            frame_size: 4096,
            overflow: SampleOverflow::Saturate,
        }
    }

    fn bridge_with(
        samples: &[f32],
        config: &CaptureConfig,
        capacity: usize,
    ) -> (CaptureBridge, mpsc::Receiver<AudioFrame>, Arc<SessionState>) {
        let (mut producer, consumer) = HeapRb::<f32>::new(samples.len().max(16)).split();
        producer.push_slice(samples);

        let (tx, rx) = mpsc::channel(capacity);
        let state = Arc::new(SessionState::new());
        let bridge = CaptureBridge::new(
            consumer,
            config,
            Arc::new(QueueSink(tx)),
            state.clone(),
            Arc::new(AtomicU64::new(0)),
            None,
        );
        (bridge, rx, state)
    }

    #[test]
    fn test_poll_interval_is_half_a_frame() {
        assert_eq!(config(16000, 1).poll_interval(), Duration::from_millis(128));
    }

    #[test]
    fn test_pump_emits_whole_frames() {
        let (mut bridge, mut rx, state) = bridge_with(&vec![0.25; 10000], &config(16000, 1), 8);

        assert_eq!(bridge.pump(), Pump::Continue);

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(first.len(), 4096);
        assert_eq!(first.samples[0], 8192);
        assert_eq!(second.timestamp, Duration::from_millis(256));
        assert_eq!(state.frames_sent.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_pump_converts_device_format() {
        // 48kHz stereo: 24576 frames become one 8192-sample span at 16kHz
        let (mut bridge, mut rx, _state) = bridge_with(&vec![0.5; 24576 * 2], &config(48000, 2), 8);

        bridge.pump();

        assert_eq!(rx.try_recv().unwrap().samples[0], 16384);
        assert_eq!(rx.try_recv().unwrap().len(), 4096);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_full_sink_drops_frames_without_blocking() {
        let events = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let recorded = events.clone();
        let (mut bridge, _rx, state) = bridge_with(&vec![0.0; 4096 * 3], &config(16000, 1), 1);
        bridge.event_callback = Some(crate::event_callback(move |e| recorded.lock().push(e)));

        assert_eq!(bridge.pump(), Pump::Continue);

        assert_eq!(state.frames_sent.load(Ordering::SeqCst), 1);
        assert_eq!(state.frames_dropped.load(Ordering::SeqCst), 2);
        assert!(matches!(
            events.lock().last(),
            Some(CallEvent::FrameDropped { total_dropped: 2 })
        ));
    }

    #[test]
    fn test_closed_sink_stops_bridge() {
        let (mut bridge, rx, _state) = bridge_with(&vec![0.0; 4096], &config(16000, 1), 4);
        drop(rx);
        assert_eq!(bridge.pump(), Pump::SinkClosed);
    }

    #[test]
    fn test_uneven_drains_match_single_drain() {
        let input: Vec<f32> = (0..88200)
            .map(|i| (i as f32 * 440.0 * std::f32::consts::TAU / 44100.0).sin() * 0.5)
            .collect();
        let config = config(44100, 1);

        let (mut single, mut single_rx, _state) = bridge_with(&input, &config, 16);
        single.pump();

        let (mut producer, consumer) = HeapRb::<f32>::new(input.len()).split();
        let (tx, mut rx) = mpsc::channel(16);
        let mut uneven = CaptureBridge::new(
            consumer,
            &config,
            Arc::new(QueueSink(tx)),
            Arc::new(SessionState::new()),
            Arc::new(AtomicU64::new(0)),
            None,
        );
        let mut rest = input.as_slice();
        for size in [5632, 511, 7000, 1, 2205, 441].iter().cycle() {
            if rest.is_empty() {
                break;
            }
            let (head, tail) = rest.split_at((*size).min(rest.len()));
            producer.push_slice(head);
            uneven.pump();
            rest = tail;
        }

        let mut frames = 0;
        while let Ok(expected) = single_rx.try_recv() {
            let actual = rx.try_recv().unwrap();
            assert_eq!(actual.timestamp, expected.timestamp);
            assert_eq!(actual.samples, expected.samples);
            frames += 1;
        }
        assert!(rx.try_recv().is_err());
        // 88200 samples at 44.1kHz are 32000 at 16kHz: seven whole frames
        assert_eq!(frames, 7);
    }

    #[tokio::test]
    async fn test_run_exits_when_session_stops() {
        let (bridge, mut rx, state) = bridge_with(&vec![0.0; 4096], &config(16000, 1), 4);
        let handle = spawn_capture_bridge(bridge);

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.len(), 4096);

        state.stop();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
