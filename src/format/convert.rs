//! Sample format and channel conversion.

use crate::chunk::PlayableBuffer;

/// Scale between normalized float samples and 16-bit fixed point.
pub const PCM_SCALE: f32 = 32768.0;

/// How float samples outside `[-1.0, 1.0)` are mapped to `i16`.
///
/// Both policies truncate toward zero and agree bit for bit on in-range input.
/// They only differ once `sample * 32768` leaves the `i16` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleOverflow {
    /// Clip to `i16::MIN..=i16::MAX`. `NaN` maps to 0.
    #[default]
    Saturate,
    /// Wrap modulo 2^16, as a store into a typed 16-bit array does.
    /// Non-finite values map to 0.
    Wrap,
}

/// Converts one float sample to `i16` with the `× 32768` scale.
#[inline]
pub fn f32_to_i16(sample: f32, overflow: SampleOverflow) -> i16 {
    let scaled = sample * PCM_SCALE;
    match overflow {
        // `as` truncates toward zero and saturates
        SampleOverflow::Saturate => scaled as i16,
        SampleOverflow::Wrap => {
            if !scaled.is_finite() {
                return 0;
            }
            f64::from(scaled).trunc().rem_euclid(65536.0) as u16 as i16
        }
    }
}

/// Converts `i16` samples to f32.
///
/// Output will be in the range [-1.0, 1.0).
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / PCM_SCALE
}

/// Converts a captured float frame to fixed point using [`SampleOverflow::default()`].
pub fn float_frame_to_fixed_point(samples: &[f32]) -> Vec<i16> {
    float_frame_to_fixed_point_with(samples, SampleOverflow::default())
}

/// Converts a captured float frame to fixed point with an explicit overflow policy.
pub fn float_frame_to_fixed_point_with(samples: &[f32], overflow: SampleOverflow) -> Vec<i16> {
    samples.iter().map(|&s| f32_to_i16(s, overflow)).collect()
}

/// Serializes samples as little-endian 16-bit PCM.
pub fn samples_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Parses little-endian 16-bit PCM. A trailing odd byte is ignored.
pub fn le_bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Splits interleaved fixed-point samples into one float vector per channel.
///
/// An incomplete trailing frame is ignored. Zero channels yields no output.
pub fn deinterleave(samples: &[i16], channels: u16) -> Vec<Vec<f32>> {
    let channels = channels as usize;
    if channels == 0 {
        return Vec::new();
    }
    let frames = samples.len() / channels;
    (0..channels)
        .map(|channel| {
            (0..frames)
                .map(|i| i16_to_f32(samples[i * channels + channel]))
                .collect()
        })
        .collect()
}

/// Decodes interleaved little-endian PCM16 bytes into a playable buffer.
pub fn fixed_point_to_float_buffer(bytes: &[u8], sample_rate: u32, channels: u16) -> PlayableBuffer {
    let samples = le_bytes_to_samples(bytes);
    PlayableBuffer::new(deinterleave(&samples, channels), sample_rate)
}

/// Mixes interleaved float audio down to mono by averaging channels.
///
/// Mono input is returned unchanged.
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => samples
            .chunks_exact(n as usize)
            .map(|frame| frame.iter().sum::<f32>() / f32::from(n))
            .collect(),
    }
}
