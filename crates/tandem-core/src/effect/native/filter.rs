//! Biquad filter family - lowpass, highpass, bandpass and peaking
//!
//! Standard two-pole/two-zero sections with RBJ cookbook coefficients.
//! Coefficients are recomputed synchronously whenever frequency, Q or gain
//! change; history is kept per channel so re-tuning never clears it.

use std::f32::consts::PI;

use crate::effect::Processor;
use crate::types::{AudioBuffer, MAX_CHANNELS};

/// Response shape of a biquad section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterShape {
    Lowpass,
    Highpass,
    Bandpass,
    Peaking,
}

/// Normalized biquad coefficients (a0 divided out)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoeffs {
    pub b0: f32,
    pub b1: f32,
    pub b2: f32,
    pub a1: f32,
    pub a2: f32,
}

impl BiquadCoeffs {
    /// Unity gain, no filtering
    pub fn passthrough() -> Self {
        Self { b0: 1.0, b1: 0.0, b2: 0.0, a1: 0.0, a2: 0.0 }
    }

    /// Design a section; degenerate inputs fall back to passthrough
    pub fn design(shape: FilterShape, freq: f32, q: f32, gain_db: f32, sample_rate: f32) -> Self {
        let nyquist_guard = sample_rate * 0.49;
        let freq = freq.clamp(10.0, nyquist_guard.max(10.0));
        let q = q.max(0.01);

        let w0 = 2.0 * PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / (2.0 * q);

        let (b0, b1, b2, a0, a1, a2) = match shape {
            FilterShape::Lowpass => {
                let b1 = 1.0 - cos_w0;
                (b1 / 2.0, b1, b1 / 2.0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
            }
            FilterShape::Highpass => {
                let b1 = -(1.0 + cos_w0);
                (-b1 / 2.0, b1, -b1 / 2.0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
            }
            // Constant 0 dB peak gain
            FilterShape::Bandpass => (alpha, 0.0, -alpha, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha),
            FilterShape::Peaking => {
                let a = 10.0_f32.powf(gain_db / 40.0);
                (
                    1.0 + alpha * a,
                    -2.0 * cos_w0,
                    1.0 - alpha * a,
                    1.0 + alpha / a,
                    -2.0 * cos_w0,
                    1.0 - alpha / a,
                )
            }
        };

        let coeffs = Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        };
        if coeffs.is_finite() {
            coeffs
        } else {
            Self::passthrough()
        }
    }

    fn is_finite(&self) -> bool {
        self.b0.is_finite()
            && self.b1.is_finite()
            && self.b2.is_finite()
            && self.a1.is_finite()
            && self.a2.is_finite()
    }
}

/// Per-channel history: x[n-1], x[n-2], y[n-1], y[n-2]
#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BiquadState {
    #[inline]
    fn process(&mut self, x0: f32, c: &BiquadCoeffs) -> f32 {
        let y0 = c.b0 * x0 + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x0;
        self.y2 = self.y1;
        // Flush denormals out of the feedback path
        self.y1 = if y0.abs() < 1e-20 { 0.0 } else { y0 };
        y0
    }
}

/// One multi-channel biquad section
#[derive(Debug, Clone)]
pub struct Biquad {
    shape: FilterShape,
    sample_rate: f32,
    frequency: f32,
    q: f32,
    gain_db: f32,
    coeffs: BiquadCoeffs,
    state: [BiquadState; MAX_CHANNELS],
}

impl Biquad {
    pub fn new(shape: FilterShape, sample_rate: f32, frequency: f32, q: f32, gain_db: f32) -> Self {
        let mut biquad = Self {
            shape,
            sample_rate,
            frequency,
            q,
            gain_db,
            coeffs: BiquadCoeffs::passthrough(),
            state: [BiquadState::default(); MAX_CHANNELS],
        };
        biquad.update();
        biquad
    }

    fn update(&mut self) {
        self.coeffs =
            BiquadCoeffs::design(self.shape, self.frequency, self.q, self.gain_db, self.sample_rate);
    }

    pub fn set_frequency(&mut self, frequency: f32) {
        self.frequency = frequency;
        self.update();
    }

    pub fn set_q(&mut self, q: f32) {
        self.q = q;
        self.update();
    }

    pub fn set_gain_db(&mut self, gain_db: f32) {
        self.gain_db = gain_db;
        self.update();
    }

    pub fn coeffs(&self) -> &BiquadCoeffs {
        &self.coeffs
    }

    /// Run the section over one block in place
    pub fn process_block(&mut self, block: &mut AudioBuffer) {
        let coeffs = self.coeffs;
        for ch in 0..block.channels() {
            let state = &mut self.state[ch];
            for sample in block.channel_mut(ch) {
                *sample = state.process(*sample, &coeffs);
            }
        }
    }

    pub fn reset(&mut self) {
        self.state = [BiquadState::default(); MAX_CHANNELS];
    }
}

/// Single-band filter effect
///
/// Parameters: frequency (Hz), Q, and gain (dB, peaking only).
pub struct BiquadFilter {
    biquad: Biquad,
}

impl BiquadFilter {
    pub const FREQUENCY: usize = 0;
    pub const Q: usize = 1;
    pub const GAIN: usize = 2;

    pub fn new(shape: FilterShape, sample_rate: f32, values: &[f32]) -> Self {
        let frequency = values.get(Self::FREQUENCY).copied().unwrap_or(1_000.0);
        let q = values.get(Self::Q).copied().unwrap_or(0.707);
        let gain = values.get(Self::GAIN).copied().unwrap_or(0.0);
        Self {
            biquad: Biquad::new(shape, sample_rate, frequency, q, gain),
        }
    }

    pub fn coeffs(&self) -> &BiquadCoeffs {
        self.biquad.coeffs()
    }
}

impl Processor for BiquadFilter {
    fn set_parameter(&mut self, index: usize, value: f32) {
        match index {
            Self::FREQUENCY => self.biquad.set_frequency(value),
            Self::Q => self.biquad.set_q(value),
            Self::GAIN => self.biquad.set_gain_db(value),
            _ => {}
        }
    }

    fn process(&mut self, block: &mut AudioBuffer) {
        self.biquad.process_block(block);
    }

    fn reset(&mut self) {
        self.biquad.reset();
    }
}
