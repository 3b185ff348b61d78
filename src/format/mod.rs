//! PCM codec utilities.
//!
//! This module provides the conversions between the device, the session
//! wire format and the playback buffers:
//! - Sample format conversion (f32 ↔ i16, `× 32768` scale)
//! - Little-endian PCM16 byte layout and deinterleaving
//! - Channel downmix and sample rate conversion
//! - Base64 transport text

mod convert;
mod resample;
mod text;

pub use convert::{
    deinterleave, downmix, f32_to_i16, fixed_point_to_float_buffer, float_frame_to_fixed_point,
    float_frame_to_fixed_point_with, i16_to_f32, le_bytes_to_samples, samples_to_le_bytes,
    SampleOverflow, PCM_SCALE,
};
pub use resample::{resample, StreamResampler};
pub use text::{bytes_to_transport_text, transport_text_to_bytes};
