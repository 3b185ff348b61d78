//! CPAL speaker output.
//!
//! Scheduled buffers are mixed by sample position inside the output
//! callback. The clock is the number of frames the callback has rendered,
//! so start times and the audible stream can never drift apart.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig as CpalStreamConfig};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::format::{f32_to_i16, resample, SampleOverflow};
use crate::playback::{
    AudioOutput, OpenedOutput, OutputDevice, PlaybackClock, PlaybackHandle, SampleClock,
};
use crate::source::{classify_backend_error, DeviceStream};
use crate::{PlayableBuffer, VoiceCallError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum DeviceSelection {
    #[default]
    SystemDefault,
    ByName(String),
}

/// A CPAL audio output device.
///
/// # Example
///
/// ```no_run
/// use companion_voice::playback::Speaker;
///
/// let speaker = Speaker::device("External Headphones");
/// // Use with CallController builder...
/// ```
#[derive(Debug, Clone, Default)]
pub struct Speaker {
    selection: DeviceSelection,
}

impl Speaker {
    /// Plays through the system default output device.
    pub fn default_device() -> Self {
        Self {
            selection: DeviceSelection::SystemDefault,
        }
    }

    /// Plays through a specific device by name.
    pub fn device(name: impl Into<String>) -> Self {
        Self {
            selection: DeviceSelection::ByName(name.into()),
        }
    }
}

impl OutputDevice for Speaker {
    fn name(&self) -> String {
        match &self.selection {
            DeviceSelection::SystemDefault => "default speaker".to_string(),
            DeviceSelection::ByName(name) => name.clone(),
        }
    }

    fn open(&self, sample_rate: u32, channels: u16) -> Result<OpenedOutput, VoiceCallError> {
        let selection = self.selection.clone();
        let mixer = Arc::new(Mutex::new(Mixer::default()));
        let (completions_tx, completions) = mpsc::unbounded_channel();

        let callback_mixer = mixer.clone();
        let (stream, (clock, device_rate, device_channels)) =
            DeviceStream::spawn("speaker-playback", move || {
                let device = resolve_output(&selection)?;
                start_playback(&device, callback_mixer, completions_tx)
            })?;

        tracing::info!(
            device = %self.name(),
            source_rate = sample_rate,
            source_channels = channels,
            device_rate,
            device_channels,
            "speaker playback started"
        );

        let output = SpeakerOutput {
            mixer,
            clock,
            device_rate,
            device_channels,
            next_id: AtomicU64::new(0),
        };

        Ok(OpenedOutput {
            output: Arc::new(output),
            completions,
            stream,
        })
    }
}

/// A running speaker that plays scheduled buffers.
pub struct SpeakerOutput {
    mixer: Arc<Mutex<Mixer>>,
    clock: SampleClock,
    device_rate: u32,
    device_channels: u16,
    next_id: AtomicU64,
}

impl SpeakerOutput {
    /// Native sample rate of the device.
    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }

    /// Native channel count of the device.
    pub fn device_channels(&self) -> u16 {
        self.device_channels
    }
}

impl AudioOutput for SpeakerOutput {
    fn clock(&self) -> &dyn PlaybackClock {
        &self.clock
    }

    fn schedule(&self, buffer: PlayableBuffer, start_at: f64) -> PlaybackHandle {
        let handle = PlaybackHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let voice = Voice::new(handle, &buffer, start_at, self.device_rate, self.device_channels);
        self.mixer.lock().voices.push(voice);
        handle
    }

    fn stop(&self, handle: PlaybackHandle) {
        self.mixer.lock().voices.retain(|voice| voice.handle != handle);
    }
}

impl std::fmt::Debug for SpeakerOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeakerOutput")
            .field("device_rate", &self.device_rate)
            .field("device_channels", &self.device_channels)
            .field("time", &self.clock.current_time())
            .finish()
    }
}

/// One scheduled buffer at the device's format.
struct Voice {
    handle: PlaybackHandle,
    start_frame: u64,
    /// One sample vector per device channel.
    channels: Vec<Vec<f32>>,
}

impl Voice {
    fn new(
        handle: PlaybackHandle,
        buffer: &PlayableBuffer,
        start_at: f64,
        device_rate: u32,
        device_channels: u16,
    ) -> Self {
        let source: Vec<Vec<f32>> = buffer
            .channels()
            .iter()
            .map(|channel| resample(channel, buffer.sample_rate(), device_rate))
            .collect();

        // Mono fans out to every device channel; extra source channels are dropped
        let channels = (0..device_channels.max(1) as usize)
            .map(|c| {
                source
                    .get(c)
                    .or_else(|| source.last())
                    .cloned()
                    .unwrap_or_default()
            })
            .collect();

        Self {
            handle,
            start_frame: (start_at.max(0.0) * f64::from(device_rate)).round() as u64,
            channels,
        }
    }

    fn frames(&self) -> u64 {
        self.channels.first().map_or(0, |c| c.len() as u64)
    }

    fn end_frame(&self) -> u64 {
        self.start_frame + self.frames()
    }
}

/// Voices waiting to be rendered.
#[derive(Default)]
struct Mixer {
    voices: Vec<Voice>,
}

impl Mixer {
    /// Renders interleaved frames starting at `frame_origin` into `out`.
    ///
    /// Appends the handles of voices that finished within this block to `finished`.
    fn render(
        &mut self,
        out: &mut [f32],
        channels: usize,
        frame_origin: u64,
        finished: &mut Vec<PlaybackHandle>,
    ) {
        out.fill(0.0);
        let channels = channels.max(1);
        let block_end = frame_origin + (out.len() / channels) as u64;

        for voice in &self.voices {
            let from = voice.start_frame.max(frame_origin);
            let to = voice.end_frame().min(block_end);
            for frame in from..to {
                let source_index = (frame - voice.start_frame) as usize;
                let out_index = (frame - frame_origin) as usize * channels;
                for (c, samples) in voice.channels.iter().enumerate().take(channels) {
                    out[out_index + c] += samples[source_index];
                }
            }
        }

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        self.voices.retain(|voice| {
            let done = voice.end_frame() <= block_end;
            if done {
                finished.push(voice.handle);
            }
            !done
        });
    }
}

fn resolve_output(selection: &DeviceSelection) -> Result<Device, VoiceCallError> {
    let host = cpal::default_host();
    match selection {
        DeviceSelection::SystemDefault => host
            .default_output_device()
            .ok_or(VoiceCallError::NoDefaultOutputDevice),
        DeviceSelection::ByName(name) => {
            let devices = host
                .output_devices()
                .map_err(|e| VoiceCallError::BackendError(e.to_string()))?;

            for device in devices {
                if device.name().is_ok_and(|device_name| &device_name == name) {
                    return Ok(device);
                }
            }

            Err(VoiceCallError::DeviceNotFound { name: name.clone() })
        }
    }
}

type Started = (Stream, (SampleClock, u32, u16));

/// Builds and plays an output stream rendering from `mixer`.
fn start_playback(
    device: &Device,
    mixer: Arc<Mutex<Mixer>>,
    completions: mpsc::UnboundedSender<PlaybackHandle>,
) -> Result<Started, VoiceCallError> {
    let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
    let supported_config = device
        .default_output_config()
        .map_err(|e| classify_backend_error(&device_name, e.to_string()))?;

    let sample_format = supported_config.sample_format();
    let cpal_config: CpalStreamConfig = supported_config.into();
    let sample_rate = cpal_config.sample_rate.0;
    let channels = cpal_config.channels;
    let clock = SampleClock::new(sample_rate);

    let renderer = Renderer {
        mixer,
        clock: clock.clone(),
        completions,
        channels: channels as usize,
        scratch: Vec::new(),
        finished: Vec::with_capacity(16),
    };

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(device, &cpal_config, renderer, |s| s),
        SampleFormat::I16 => build_stream::<i16>(device, &cpal_config, renderer, |s| {
            f32_to_i16(s, SampleOverflow::Saturate)
        }),
        format => {
            return Err(VoiceCallError::UnsupportedFormat {
                format: format!("{format:?}"),
            });
        }
    }
    .map_err(|e| classify_backend_error(&device_name, e))?;

    stream
        .play()
        .map_err(|e| classify_backend_error(&device_name, e.to_string()))?;

    Ok((stream, (clock, sample_rate, channels)))
}

/// State owned by the output callback.
struct Renderer {
    mixer: Arc<Mutex<Mixer>>,
    clock: SampleClock,
    completions: mpsc::UnboundedSender<PlaybackHandle>,
    channels: usize,
    scratch: Vec<f32>,
    finished: Vec<PlaybackHandle>,
}

impl Renderer {
    /// Renders one callback block. Never waits on the mixer lock.
    fn render_block(&mut self, frames_len: usize) -> &[f32] {
        self.scratch.resize(frames_len, 0.0);
        let origin = self.clock.frames();
        match self.mixer.try_lock() {
            Some(mut mixer) => {
                mixer.render(&mut self.scratch, self.channels, origin, &mut self.finished);
            }
            // A schedule or stop holds the lock: this block plays silent
            None => self.scratch.fill(0.0),
        }
        self.clock
            .advance_frames((frames_len / self.channels.max(1)) as u64);

        for handle in self.finished.drain(..) {
            // The receiver is gone once the call is over
            let _ = self.completions.send(handle);
        }
        &self.scratch
    }
}

fn build_stream<T>(
    device: &Device,
    config: &CpalStreamConfig,
    mut renderer: Renderer,
    convert: fn(f32) -> T,
) -> Result<Stream, String>
where
    T: cpal::SizedSample + Send + 'static,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let rendered = renderer.render_block(data.len());
                for (out, &sample) in data.iter_mut().zip(rendered) {
                    *out = convert(sample);
                }
            },
            |err| {
                tracing::error!("audio output stream error: {}", err);
            },
            None,
        )
        .map_err(|e| e.to_string())
}
