//! Sample rate conversion.
//!
//! Linear interpolation is enough for speech: microphones are brought down
//! to 16kHz for the session, model audio is brought up from 24kHz to the
//! output device's rate.
//!
//! [`resample`] converts a complete buffer. [`StreamResampler`] converts a
//! stream delivered in arbitrary pieces and produces the same samples as if
//! the whole stream had been converted at once.

/// Resamples mono audio from one sample rate to another.
///
/// # Arguments
///
/// * `samples` - Input samples (mono)
/// * `from_rate` - Source sample rate in Hz
/// * `to_rate` - Target sample rate in Hz
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = f64::from(to_rate) / f64::from(from_rate);
    let output_len = (samples.len() as f64 * ratio).round() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_pos = i as f64 / ratio;
        let src_idx = src_pos.floor() as usize;
        let frac = (src_pos - src_idx as f64) as f32;

        let sample = if src_idx + 1 < samples.len() {
            let s1 = samples[src_idx];
            let s2 = samples[src_idx + 1];
            s1 + (s2 - s1) * frac
        } else {
            *samples.last().unwrap_or(&0.0)
        };

        output.push(sample);
    }

    output
}

/// Linear resampler that keeps its position across calls.
///
/// Output sample `n` sits at input position `n * from_rate / to_rate`,
/// counted from the start of the stream. The last input sample of each call
/// is held back so the next call can interpolate across the boundary.
#[derive(Debug, Clone)]
pub struct StreamResampler {
    from_rate: u32,
    to_rate: u32,
    produced: u64,
    // Stream index of the held-back sample
    consumed: u64,
    held: Option<f32>,
    scratch: Vec<f32>,
}

impl StreamResampler {
    /// Creates a resampler from `from_rate` to `to_rate`.
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            from_rate,
            to_rate,
            produced: 0,
            consumed: 0,
            held: None,
            scratch: Vec::new(),
        }
    }

    /// Returns `true` if samples pass through unchanged.
    pub fn is_passthrough(&self) -> bool {
        self.from_rate == self.to_rate || self.from_rate == 0 || self.to_rate == 0
    }

    /// Converts the next piece of the stream.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.is_passthrough() {
            return input.to_vec();
        }
        if input.is_empty() {
            return Vec::new();
        }

        self.scratch.clear();
        self.scratch.extend(self.held);
        self.scratch.extend_from_slice(input);
        let last = (self.scratch.len() - 1) as u64;

        let from = u64::from(self.from_rate);
        let to = u64::from(self.to_rate);
        let mut output = Vec::with_capacity((input.len() as u64 * to / from + 1) as usize);

        loop {
            let numerator = self.produced * from;
            let idx = numerator / to - self.consumed;
            if idx >= last {
                break;
            }
            let frac = (numerator % to) as f32 / to as f32;
            let s1 = self.scratch[idx as usize];
            let s2 = self.scratch[idx as usize + 1];
            output.push(s1 + (s2 - s1) * frac);
            self.produced += 1;
        }

        self.consumed += last;
        self.held = self.scratch.last().copied();
        output
    }
}
