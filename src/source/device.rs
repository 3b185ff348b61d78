//! CPAL microphone wrapper for audio capture.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig as CpalStreamConfig};
use ringbuf::traits::{Producer, Split};
use ringbuf::{HeapProd, HeapRb};

use crate::format::i16_to_f32;
use crate::source::{AudioInput, DeviceStream, InputCapture};
use crate::VoiceCallError;

/// Midpoint of unsigned 16-bit samples.
const U16_MIDPOINT: f32 = 32768.0;

/// Specifies which audio input device to use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum DeviceSelection {
    /// Use the system's default input device.
    #[default]
    SystemDefault,
    /// Use a specific device by name.
    ByName(String),
}

/// A CPAL audio input device.
///
/// Opening it captures at the device's native format; the capture bridge
/// converts to the session's 16kHz mono.
///
/// # Example
///
/// ```no_run
/// use companion_voice::source::Microphone;
///
/// let mic = Microphone::device("MacBook Pro Microphone");
/// // Use with CallController builder...
/// ```
#[derive(Debug, Clone, Default)]
pub struct Microphone {
    selection: DeviceSelection,
}

impl Microphone {
    /// Captures from the system default input device.
    pub fn default_device() -> Self {
        Self {
            selection: DeviceSelection::SystemDefault,
        }
    }

    /// Captures from a specific device by name.
    pub fn device(name: impl Into<String>) -> Self {
        Self {
            selection: DeviceSelection::ByName(name.into()),
        }
    }
}

impl AudioInput for Microphone {
    fn name(&self) -> String {
        match &self.selection {
            DeviceSelection::SystemDefault => "default microphone".to_string(),
            DeviceSelection::ByName(name) => name.clone(),
        }
    }

    fn open(&self, buffer_duration: Duration) -> Result<InputCapture, VoiceCallError> {
        let selection = self.selection.clone();
        let dropped_samples = Arc::new(AtomicU64::new(0));
        let dropped = dropped_samples.clone();

        let (stream, (consumer, sample_rate, channels)) =
            DeviceStream::spawn("mic-capture", move || {
                let device = resolve_input(&selection)?;
                start_capture(&device, buffer_duration, dropped)
            })?;

        tracing::info!(
            device = %self.name(),
            sample_rate,
            channels,
            "microphone capture started"
        );

        Ok(InputCapture {
            stream,
            consumer,
            sample_rate,
            channels,
            dropped_samples,
        })
    }
}

fn resolve_input(selection: &DeviceSelection) -> Result<Device, VoiceCallError> {
    let host = cpal::default_host();
    match selection {
        DeviceSelection::SystemDefault => host
            .default_input_device()
            .ok_or(VoiceCallError::NoDefaultDevice),
        DeviceSelection::ByName(name) => {
            let devices = host
                .input_devices()
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

type Started = (Stream, (ringbuf::HeapCons<f32>, u32, u16));

/// Builds and plays an input stream feeding a fresh ring buffer.
fn start_capture(
    device: &Device,
    buffer_duration: Duration,
    dropped: Arc<AtomicU64>,
) -> Result<Started, VoiceCallError> {
    let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
    let supported_config = device
        .default_input_config()
        .map_err(|e| classify_backend_error(&device_name, e.to_string()))?;

    let sample_format = supported_config.sample_format();
    let cpal_config: CpalStreamConfig = supported_config.into();
    let sample_rate = cpal_config.sample_rate.0;
    let channels = cpal_config.channels;

    let capacity = (f64::from(sample_rate) * buffer_duration.as_secs_f64()) as usize
        * channels as usize;
    let (producer, consumer) = HeapRb::<f32>::new(capacity.max(1024)).split();

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(device, &cpal_config, producer, dropped, |s| s),
        SampleFormat::I16 => build_stream::<i16>(device, &cpal_config, producer, dropped, i16_to_f32),
        SampleFormat::U16 => build_stream::<u16>(device, &cpal_config, producer, dropped, |s| {
            (f32::from(s) - U16_MIDPOINT) / U16_MIDPOINT
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

    Ok((stream, (consumer, sample_rate, channels)))
}

fn build_stream<T>(
    device: &Device,
    config: &CpalStreamConfig,
    mut producer: HeapProd<f32>,
    dropped: Arc<AtomicU64>,
    convert: fn(T) -> f32,
) -> Result<Stream, String>
where
    T: cpal::SizedSample + Copy + Send + 'static,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // Non-blocking push - drops samples if the bridge fell behind
                let mut lost = 0u64;
                for &sample in data {
                    if producer.try_push(convert(sample)).is_err() {
                        lost += 1;
                    }
                }
                if lost > 0 {
                    dropped.fetch_add(lost, Ordering::Relaxed);
                }
            },
            |err| {
                tracing::error!("audio input stream error: {}", err);
            },
            None,
        )
        .map_err(|e| e.to_string())
}

/// Maps a backend failure message onto the call error taxonomy.
///
/// Backends report a denied microphone as a generic failure whose text
/// mentions permission or authorization.
pub(crate) fn classify_backend_error(device_name: &str, message: String) -> VoiceCallError {
    let lowered = message.to_lowercase();
    if lowered.contains("permission") || lowered.contains("not authorized") {
        VoiceCallError::PermissionDenied
    } else if lowered.contains("not available") || lowered.contains("no longer available") {
        VoiceCallError::DeviceUnavailable {
            name: device_name.to_string(),
            reason: message,
        }
    } else {
        VoiceCallError::BackendError(message)
    }
}
