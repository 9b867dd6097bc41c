//! Feedback delay with a fractional read head
//!
//! A per-channel circular buffer holds two seconds of audio. The read head
//! sits `time × sampleRate` samples behind the write head and interpolates
//! linearly between neighbours, so sweeping the delay time never produces
//! zipper steps. Feedback is summed in at the write point.

use crate::effect::Processor;
use crate::types::{AudioBuffer, MAX_CHANNELS};

/// Maximum delay time in seconds
const MAX_DELAY_SECONDS: f32 = 2.0;

/// Single-channel circular delay line with interpolated reads
///
/// Also used by the modulated effects in `chorus.rs`.
#[derive(Debug, Clone)]
pub(super) struct DelayLine {
    buffer: Vec<f32>,
    write_pos: usize,
}

impl DelayLine {
    pub(super) fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(4)],
            write_pos: 0,
        }
    }

    /// Longest readable delay in samples
    pub(super) fn max_delay(&self) -> f32 {
        (self.buffer.len() - 2) as f32
    }

    /// Read `delay` samples behind the write head (fractional)
    #[inline]
    pub(super) fn read(&self, delay: f32) -> f32 {
        let len = self.buffer.len();
        let delay = delay.clamp(1.0, self.max_delay());
        let whole = delay.floor();
        let frac = delay - whole;
        let i0 = (self.write_pos + len - whole as usize) % len;
        let i1 = (i0 + len - 1) % len;
        self.buffer[i0] * (1.0 - frac) + self.buffer[i1] * frac
    }

    /// Write a sample and advance
    #[inline]
    pub(super) fn write(&mut self, sample: f32) {
        // Keep the recirculating path free of denormals
        self.buffer[self.write_pos] = if sample.abs() < 1e-20 { 0.0 } else { sample };
        self.write_pos = (self.write_pos + 1) % self.buffer.len();
    }

    pub(super) fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }
}

/// Feedback delay
///
/// Parameters:
/// - time: delay in seconds (0.001-2.0)
/// - feedback: amount fed back into the line (0-0.95)
/// - mix: dry/wet balance (0 = dry, 1 = wet)
pub struct Delay {
    sample_rate: f32,
    lines: [DelayLine; MAX_CHANNELS],
    delay_samples: f32,
    feedback: f32,
    mix: f32,
}

impl Delay {
    pub const TIME: usize = 0;
    pub const FEEDBACK: usize = 1;
    pub const MIX: usize = 2;

    pub fn new(sample_rate: f32, values: &[f32]) -> Self {
        let value = |i: usize, default: f32| values.get(i).copied().unwrap_or(default);
        let len = (MAX_DELAY_SECONDS * sample_rate).ceil() as usize + 2;
        Self {
            sample_rate,
            lines: std::array::from_fn(|_| DelayLine::new(len)),
            delay_samples: value(Self::TIME, 0.25) * sample_rate,
            feedback: value(Self::FEEDBACK, 0.35),
            mix: value(Self::MIX, 0.3),
        }
    }
}

impl Processor for Delay {
    fn set_parameter(&mut self, index: usize, value: f32) {
        match index {
            Self::TIME => self.delay_samples = value * self.sample_rate,
            Self::FEEDBACK => self.feedback = value.clamp(0.0, 0.95),
            Self::MIX => self.mix = value.clamp(0.0, 1.0),
            _ => {}
        }
    }

    fn process(&mut self, block: &mut AudioBuffer) {
        let dry_gain = 1.0 - self.mix;
        for ch in 0..block.channels() {
            let line = &mut self.lines[ch];
            for sample in block.channel_mut(ch) {
                let input = *sample;
                let delayed = line.read(self.delay_samples);
                line.write(input + delayed * self.feedback);
                *sample = input * dry_gain + delayed * self.mix;
            }
        }
    }

    fn reset(&mut self) {
        for line in &mut self.lines {
            line.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_impulse_echo_timing() {
        // 10 ms at 1 kHz = 10 samples
        let mut delay = Delay::new(1_000.0, &[0.01, 0.5, 1.0]);
        let mut buf = AudioBuffer::new(1, 64);
        buf.channel_mut(0)[0] = 1.0;
        delay.process(&mut buf);
        let out = buf.channel(0);
        assert_eq!(out[0], 0.0, "fully wet output has no dry impulse");
        assert!((out[10] - 1.0).abs() < 1e-6);
        assert!((out[20] - 0.5).abs() < 1e-6);
        assert!((out[30] - 0.25).abs() < 1e-6);
        assert_eq!(out[15], 0.0);
    }

    #[test]
    fn test_fractional_delay_interpolates() {
        let mut line = DelayLine::new(16);
        for s in [0.0, 1.0, 2.0, 3.0] {
            line.write(s);
        }
        // Write head is past 3.0; one sample back is 3.0, two back is 2.0
        assert_eq!(line.read(1.0), 3.0);
        assert!((line.read(1.5) - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_dry_mix_passes_input() {
        let mut delay = Delay::new(44_100.0, &[0.5, 0.9, 0.0]);
        let mut buf = AudioBuffer::new(2, 32);
        buf.channel_mut(0).fill(0.25);
        buf.channel_mut(1).fill(-0.25);
        delay.process(&mut buf);
        assert!(buf.channel(0).iter().all(|&s| s == 0.25));
        assert!(buf.channel(1).iter().all(|&s| s == -0.25));
    }

    #[test]
    fn test_reset_clears_tail() {
        let mut delay = Delay::new(1_000.0, &[0.005, 0.9, 1.0]);
        let mut buf = AudioBuffer::new(1, 4);
        buf.channel_mut(0).fill(1.0);
        delay.process(&mut buf);
        delay.reset();
        let mut silent = AudioBuffer::new(1, 32);
        delay.process(&mut silent);
        assert_eq!(silent.peak(), 0.0);
    }
}
