//! Waveshaping distortion
//!
//! Modes: 0 = soft (`tanh`), 1 = hard clip, 2 = fuzz (sign only).
//! Drive is applied before the shaper and `level` after it.

use crate::effect::Processor;
use crate::types::AudioBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaperMode {
    Soft,
    Hard,
    Fuzz,
}

impl ShaperMode {
    pub fn from_value(value: f32) -> Self {
        match value.round() as i32 {
            1 => ShaperMode::Hard,
            2 => ShaperMode::Fuzz,
            _ => ShaperMode::Soft,
        }
    }

    #[inline]
    fn shape(self, x: f32) -> f32 {
        match self {
            ShaperMode::Soft => x.tanh(),
            ShaperMode::Hard => x.clamp(-1.0, 1.0),
            ShaperMode::Fuzz => {
                if x == 0.0 {
                    0.0
                } else {
                    x.signum()
                }
            }
        }
    }
}

pub struct Distortion {
    drive: f32,
    mode: ShaperMode,
    level: f32,
}

impl Distortion {
    pub const DRIVE: usize = 0;
    pub const MODE: usize = 1;
    pub const LEVEL: usize = 2;

    pub fn new(values: &[f32]) -> Self {
        let value = |i: usize, default: f32| values.get(i).copied().unwrap_or(default);
        Self {
            drive: value(Self::DRIVE, 4.0),
            mode: ShaperMode::from_value(value(Self::MODE, 0.0)),
            level: value(Self::LEVEL, 0.5),
        }
    }
}

impl Processor for Distortion {
    fn set_parameter(&mut self, index: usize, value: f32) {
        match index {
            Self::DRIVE => self.drive = value,
            Self::MODE => self.mode = ShaperMode::from_value(value),
            Self::LEVEL => self.level = value,
            _ => {}
        }
    }

    fn process(&mut self, block: &mut AudioBuffer) {
        for ch in 0..block.channels() {
            for sample in block.channel_mut(ch) {
                *sample = self.mode.shape(*sample * self.drive) * self.level;
            }
        }
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shaped(mode: f32, input: f32) -> f32 {
        let mut dist = Distortion::new(&[10.0, mode, 1.0]);
        let mut buf = AudioBuffer::from_channels(&[&[input]]);
        dist.process(&mut buf);
        buf.channel(0)[0]
    }

    #[test]
    fn test_output_bounded_by_level() {
        for mode in [0.0, 1.0, 2.0] {
            let mut dist = Distortion::new(&[100.0, mode, 0.5]);
            let mut buf = AudioBuffer::new(1, 64);
            for (i, s) in buf.channel_mut(0).iter_mut().enumerate() {
                *s = (i as f32 - 32.0) / 8.0;
            }
            dist.process(&mut buf);
            assert!(buf.peak() <= 0.5 + 1e-6, "mode {} peak {}", mode, buf.peak());
        }
    }

    #[test]
    fn test_modes() {
        assert!((shaped(0.0, 0.05) - 0.5_f32.tanh()).abs() < 1e-6);
        assert_eq!(shaped(1.0, 0.05), 0.5);
        assert_eq!(shaped(1.0, -0.5), -1.0);
        assert_eq!(shaped(2.0, 0.001), 1.0);
        assert_eq!(shaped(2.0, 0.0), 0.0);
    }
}
