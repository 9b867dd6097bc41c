//! Three-band parametric EQ built from peaking biquads in series

use super::filter::{Biquad, FilterShape};
use crate::effect::Processor;
use crate::types::AudioBuffer;

const BANDS: usize = 3;
/// Parameters per band: freq, gain, q
const PARAMS_PER_BAND: usize = 3;

pub struct ParametricEq {
    bands: [Biquad; BANDS],
    /// Bands at 0 dB are skipped entirely
    active: [bool; BANDS],
}

impl ParametricEq {
    pub fn new(sample_rate: f32, values: &[f32]) -> Self {
        let value = |i: usize, default: f32| values.get(i).copied().unwrap_or(default);
        let band = |b: usize, default_freq: f32| {
            let base = b * PARAMS_PER_BAND;
            Biquad::new(
                FilterShape::Peaking,
                sample_rate,
                value(base, default_freq),
                value(base + 2, 1.0),
                value(base + 1, 0.0),
            )
        };
        let mut eq = Self {
            bands: [band(0, 120.0), band(1, 1_000.0), band(2, 6_000.0)],
            active: [false; BANDS],
        };
        for b in 0..BANDS {
            eq.active[b] = value(b * PARAMS_PER_BAND + 1, 0.0) != 0.0;
        }
        eq
    }
}

impl Processor for ParametricEq {
    fn set_parameter(&mut self, index: usize, value: f32) {
        let band = index / PARAMS_PER_BAND;
        if band >= BANDS {
            return;
        }
        match index % PARAMS_PER_BAND {
            0 => self.bands[band].set_frequency(value),
            1 => {
                self.bands[band].set_gain_db(value);
                self.active[band] = value != 0.0;
            }
            _ => self.bands[band].set_q(value),
        }
    }

    fn process(&mut self, block: &mut AudioBuffer) {
        for (band, active) in self.bands.iter_mut().zip(self.active) {
            if active {
                band.process_block(block);
            }
        }
    }

    fn reset(&mut self) {
        for band in &mut self.bands {
            band.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_block(freq: f32, frames: usize, offset: usize) -> AudioBuffer {
        let mut buf = AudioBuffer::new(1, frames);
        for (i, s) in buf.channel_mut(0).iter_mut().enumerate() {
            let t = (i + offset) as f32 / 48_000.0;
            *s = (2.0 * std::f32::consts::PI * freq * t).sin() * 0.5;
        }
        buf
    }

    fn steady_peak(eq: &mut ParametricEq, freq: f32) -> f32 {
        let mut peak = 0.0;
        for n in 0..40 {
            let mut buf = sine_block(freq, 256, n * 256);
            eq.process(&mut buf);
            if n >= 30 {
                peak = buf.peak().max(peak);
            }
        }
        peak
    }

    #[test]
    fn test_flat_eq_is_transparent() {
        let mut eq = ParametricEq::new(48_000.0, &[]);
        let peak = steady_peak(&mut eq, 1_000.0);
        assert!((peak - 0.5).abs() < 1e-3, "flat eq changed level: {}", peak);
    }

    #[test]
    fn test_band_boost() {
        // band2 (1 kHz) +6 dB
        let mut eq = ParametricEq::new(
            48_000.0,
            &[120.0, 0.0, 1.0, 1_000.0, 6.0, 1.0, 6_000.0, 0.0, 1.0],
        );
        let peak = steady_peak(&mut eq, 1_000.0);
        assert!((peak / 0.5 - 1.995).abs() < 0.05, "boost ratio {}", peak / 0.5);
    }

    #[test]
    fn test_set_parameter_activates_band() {
        let mut eq = ParametricEq::new(48_000.0, &[]);
        assert!(!eq.active[0]);
        eq.set_parameter(1, 3.0);
        assert!(eq.active[0]);
        eq.set_parameter(1, 0.0);
        assert!(!eq.active[0]);
    }
}
