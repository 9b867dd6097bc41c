//! Chorus and flanger - LFO-modulated short delays
//!
//! Both kinds share [`ModulatedDelay`]: a sine LFO sweeps the read head
//! between `delay × (1 - depth)` and `delay × (1 + depth)`. The right channel
//! runs a quarter cycle ahead of the left for stereo width. The flanger is
//! the same structure with shorter delays and feedback enabled by default.

use std::f32::consts::TAU;

use super::delay::DelayLine;
use crate::effect::Processor;
use crate::types::{AudioBuffer, MAX_CHANNELS};

/// Longest base delay accepted by either kind, plus full-depth headroom
const MAX_SWEEP_SECONDS: f32 = 0.065;

/// LFO phase offset per channel (fraction of a cycle)
const CHANNEL_PHASE: [f32; MAX_CHANNELS] = [0.0, 0.25];

pub struct ModulatedDelay {
    sample_rate: f32,
    lines: [DelayLine; MAX_CHANNELS],
    /// LFO phase in cycles [0, 1)
    phase: f32,
    rate: f32,
    depth: f32,
    delay_secs: f32,
    feedback: f32,
    mix: f32,
}

impl ModulatedDelay {
    pub const RATE: usize = 0;
    pub const DEPTH: usize = 1;
    pub const DELAY: usize = 2;
    pub const FEEDBACK: usize = 3;
    pub const MIX: usize = 4;

    pub fn new(sample_rate: f32, values: &[f32]) -> Self {
        let value = |i: usize, default: f32| values.get(i).copied().unwrap_or(default);
        let len = (MAX_SWEEP_SECONDS * sample_rate).ceil() as usize + 4;
        Self {
            sample_rate,
            lines: std::array::from_fn(|_| DelayLine::new(len)),
            phase: 0.0,
            rate: value(Self::RATE, 1.5),
            depth: value(Self::DEPTH, 0.5),
            delay_secs: value(Self::DELAY, 0.015),
            feedback: value(Self::FEEDBACK, 0.0),
            mix: value(Self::MIX, 0.5),
        }
    }

    /// Chorus defaults
    pub fn chorus(sample_rate: f32, values: &[f32]) -> Self {
        Self::new(sample_rate, values)
    }

    /// Flanger defaults: short sweep, resonant feedback
    pub fn flanger(sample_rate: f32, values: &[f32]) -> Self {
        let value = |i: usize, default: f32| values.get(i).copied().unwrap_or(default);
        let mut unit = Self::new(sample_rate, values);
        unit.rate = value(Self::RATE, 0.25);
        unit.depth = value(Self::DEPTH, 0.7);
        unit.delay_secs = value(Self::DELAY, 0.003);
        unit.feedback = value(Self::FEEDBACK, 0.5);
        unit
    }

    pub fn phase(&self) -> f32 {
        self.phase
    }
}

impl Processor for ModulatedDelay {
    fn set_parameter(&mut self, index: usize, value: f32) {
        match index {
            Self::RATE => self.rate = value.max(0.0),
            Self::DEPTH => self.depth = value.clamp(0.0, 1.0),
            Self::DELAY => self.delay_secs = value.max(0.0),
            Self::FEEDBACK => self.feedback = value.clamp(0.0, 0.95),
            Self::MIX => self.mix = value.clamp(0.0, 1.0),
            _ => {}
        }
    }

    fn process(&mut self, block: &mut AudioBuffer) {
        let phase_inc = self.rate / self.sample_rate;
        let center = self.delay_secs * self.sample_rate;
        let swing = center * self.depth;
        let dry_gain = 1.0 - self.mix;

        for ch in 0..block.channels() {
            let line = &mut self.lines[ch];
            let mut phase = self.phase + CHANNEL_PHASE[ch];
            for sample in block.channel_mut(ch) {
                let lfo = (TAU * phase).sin();
                let delayed = line.read(center + swing * lfo);
                let input = *sample;
                line.write(input + delayed * self.feedback);
                *sample = input * dry_gain + delayed * self.mix;
                phase += phase_inc;
            }
        }

        self.phase = (self.phase + phase_inc * block.frames() as f32).fract();
    }

    fn reset(&mut self) {
        for line in &mut self.lines {
            line.reset();
        }
        self.phase = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dry_mix_is_identity() {
        let mut chorus = ModulatedDelay::chorus(44_100.0, &[2.0, 1.0, 0.02, 0.0, 0.0]);
        let mut buf = AudioBuffer::new(2, 128);
        for (i, s) in buf.channel_mut(0).iter_mut().enumerate() {
            *s = (i as f32 * 0.1).sin();
        }
        let input = buf.channel(0).to_vec();
        chorus.process(&mut buf);
        assert_eq!(buf.channel(0), &input[..]);
    }

    #[test]
    fn test_lfo_phase_wraps() {
        let mut chorus = ModulatedDelay::chorus(1_000.0, &[10.0, 0.5, 0.01, 0.0, 0.5]);
        for _ in 0..37 {
            let mut buf = AudioBuffer::new(2, 64);
            chorus.process(&mut buf);
            assert!((0.0..1.0).contains(&chorus.phase()));
        }
    }

    #[test]
    fn test_flanger_feedback_stays_bounded() {
        let mut flanger = ModulatedDelay::flanger(44_100.0, &[0.5, 1.0, 0.005, 0.9, 0.5]);
        for n in 0..400 {
            let mut buf = AudioBuffer::new(2, 128);
            for ch in 0..2 {
                for (i, s) in buf.channel_mut(ch).iter_mut().enumerate() {
                    *s = ((n * 128 + i) as f32 * 0.03).sin() * 0.5;
                }
            }
            flanger.process(&mut buf);
            assert!(buf.is_finite());
            assert!(buf.peak() < 10.0);
        }
    }

    #[test]
    fn test_wet_signal_is_delayed() {
        // Zero depth turns the chorus into a plain 10 ms delay
        let mut chorus = ModulatedDelay::chorus(1_000.0, &[1.0, 0.0, 0.01, 0.0, 1.0]);
        let mut buf = AudioBuffer::new(1, 32);
        buf.channel_mut(0)[0] = 1.0;
        chorus.process(&mut buf);
        assert!((buf.channel(0)[10] - 1.0).abs() < 1e-6);
        assert_eq!(buf.channel(0)[0], 0.0);
    }
}
