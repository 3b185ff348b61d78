//! Audio input abstraction and CPAL device wrapper.
//!
//! This module provides the interface between CPAL's low-level audio capture
//! and the capture bridge that frames audio for the session.

mod device;
mod mock;
mod stream;

pub(crate) use device::classify_backend_error;
pub use device::Microphone;
pub use mock::{MockFailure, MockMicrophone};
pub use stream::DeviceStream;

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait};

use crate::VoiceCallError;

/// A source of microphone audio.
///
/// Implementations own device selection. [`open()`](AudioInput::open) starts
/// capture and hands back everything the capture bridge needs; the device is
/// held for exactly as long as the returned [`InputCapture`] lives.
pub trait AudioInput: Send + Sync {
    /// Human-readable name for logging and status messages.
    fn name(&self) -> String;

    /// Starts capturing.
    ///
    /// `buffer_duration` sizes the ring buffer between the audio callback
    /// and the capture bridge.
    ///
    /// # Errors
    ///
    /// Returns a device error if the microphone is missing, busy or denied.
    fn open(&self, buffer_duration: Duration) -> Result<InputCapture, VoiceCallError>;
}

/// A running microphone capture.
pub struct InputCapture {
    /// Guard keeping the device stream alive.
    pub stream: DeviceStream,
    /// Interleaved float samples at the device's native format.
    pub consumer: ringbuf::HeapCons<f32>,
    /// Native sample rate of the device in Hz.
    pub sample_rate: u32,
    /// Native channel count of the device.
    pub channels: u16,
    /// Samples lost because the ring buffer was full.
    pub dropped_samples: Arc<AtomicU64>,
}

impl std::fmt::Debug for InputCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputCapture")
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .finish_non_exhaustive()
    }
}

/// Lists all available input devices.
///
/// # Errors
///
/// Returns an error if the audio host cannot be accessed.
pub fn list_input_devices() -> Result<Vec<String>, VoiceCallError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| VoiceCallError::BackendError(e.to_string()))?;

    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// Lists all available output devices.
///
/// # Errors
///
/// Returns an error if the audio host cannot be accessed.
pub fn list_output_devices() -> Result<Vec<String>, VoiceCallError> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| VoiceCallError::BackendError(e.to_string()))?;

    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// Gets the name of the default input device, if any.
pub fn default_input_device_name() -> Option<String> {
    cpal::default_host()
        .default_input_device()
        .and_then(|d| d.name().ok())
}
