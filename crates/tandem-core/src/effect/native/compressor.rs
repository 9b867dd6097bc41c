//! Compressor effect - feed-forward dynamics with a per-channel envelope
//!
//! Each channel runs its own envelope follower with distinct attack and
//! release coefficients `exp(-1 / (time × sampleRate))`. When the envelope
//! exceeds the threshold the gain becomes
//!
//! ```text
//! linear(threshold + overDb / ratio) / envelope
//! ```
//!
//! followed by a fixed makeup gain.

use crate::effect::Processor;
use crate::types::{db_to_linear, linear_to_db, AudioBuffer, MAX_CHANNELS};

/// Peak envelope follower with separate attack/release time constants
#[derive(Debug, Clone, Copy)]
pub(super) struct EnvelopeFollower {
    attack_coeff: f32,
    release_coeff: f32,
    envelope: f32,
}

impl EnvelopeFollower {
    pub(super) fn new(sample_rate: f32, attack_secs: f32, release_secs: f32) -> Self {
        let mut follower = Self {
            attack_coeff: 0.0,
            release_coeff: 0.0,
            envelope: 0.0,
        };
        follower.set_attack(sample_rate, attack_secs);
        follower.set_release(sample_rate, release_secs);
        follower
    }

    pub(super) fn set_attack(&mut self, sample_rate: f32, secs: f32) {
        self.attack_coeff = time_coeff(sample_rate, secs);
    }

    pub(super) fn set_release(&mut self, sample_rate: f32, secs: f32) {
        self.release_coeff = time_coeff(sample_rate, secs);
    }

    #[inline]
    pub(super) fn next(&mut self, input: f32) -> f32 {
        let level = input.abs();
        let coeff = if level > self.envelope {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope = coeff * self.envelope + (1.0 - coeff) * level;
        self.envelope
    }

    #[inline]
    pub(super) fn envelope(&self) -> f32 {
        self.envelope
    }

    pub(super) fn reset(&mut self) {
        self.envelope = 0.0;
    }
}

/// `exp(-1 / (time × sampleRate))`, guarded against zero times
fn time_coeff(sample_rate: f32, secs: f32) -> f32 {
    let samples = (secs * sample_rate).max(1e-3);
    (-1.0 / samples).exp()
}

pub struct Compressor {
    sample_rate: f32,
    threshold_db: f32,
    threshold: f32,
    ratio: f32,
    makeup: f32,
    followers: [EnvelopeFollower; MAX_CHANNELS],
    reduction: [f32; MAX_CHANNELS],
}

impl Compressor {
    pub const THRESHOLD: usize = 0;
    pub const RATIO: usize = 1;
    pub const ATTACK: usize = 2;
    pub const RELEASE: usize = 3;
    pub const MAKEUP: usize = 4;

    pub fn new(sample_rate: f32, values: &[f32]) -> Self {
        let value = |i: usize, default: f32| values.get(i).copied().unwrap_or(default);
        let threshold_db = value(Self::THRESHOLD, -24.0);
        let follower = EnvelopeFollower::new(
            sample_rate,
            value(Self::ATTACK, 0.003),
            value(Self::RELEASE, 0.25),
        );
        Self {
            sample_rate,
            threshold_db,
            threshold: db_to_linear(threshold_db),
            ratio: value(Self::RATIO, 4.0).max(1.0),
            makeup: db_to_linear(value(Self::MAKEUP, 0.0)),
            followers: [follower; MAX_CHANNELS],
            reduction: [1.0; MAX_CHANNELS],
        }
    }

    /// Gain reduction most recently applied on a channel (1.0 = none)
    pub fn gain_reduction(&self, channel: usize) -> f32 {
        self.reduction.get(channel).copied().unwrap_or(1.0)
    }

    /// Static gain computer for an envelope value
    #[inline]
    fn compute_gain(&self, envelope: f32) -> f32 {
        if envelope <= self.threshold {
            return 1.0;
        }
        let over_db = linear_to_db(envelope) - self.threshold_db;
        db_to_linear(self.threshold_db + over_db / self.ratio) / envelope
    }
}

impl Processor for Compressor {
    fn set_parameter(&mut self, index: usize, value: f32) {
        match index {
            Self::THRESHOLD => {
                self.threshold_db = value;
                self.threshold = db_to_linear(value);
            }
            Self::RATIO => self.ratio = value.max(1.0),
            Self::ATTACK => {
                for f in &mut self.followers {
                    f.set_attack(self.sample_rate, value);
                }
            }
            Self::RELEASE => {
                for f in &mut self.followers {
                    f.set_release(self.sample_rate, value);
                }
            }
            Self::MAKEUP => self.makeup = db_to_linear(value),
            _ => {}
        }
    }

    fn process(&mut self, block: &mut AudioBuffer) {
        for ch in 0..block.channels() {
            let mut follower = self.followers[ch];
            let mut reduction = self.reduction[ch];
            for sample in block.channel_mut(ch) {
                let envelope = follower.next(*sample);
                reduction = self.compute_gain(envelope);
                *sample *= reduction * self.makeup;
            }
            self.followers[ch] = follower;
            self.reduction[ch] = reduction;
        }
    }

    fn reset(&mut self) {
        for f in &mut self.followers {
            f.reset();
        }
        self.reduction = [1.0; MAX_CHANNELS];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_dc(comp: &mut Compressor, level: f32, blocks: usize) {
        for _ in 0..blocks {
            let mut buf = AudioBuffer::new(2, 256);
            buf.channel_mut(0).fill(level);
            buf.channel_mut(1).fill(-level);
            comp.process(&mut buf);
        }
    }

    #[test]
    fn test_reduction_converges_above_threshold() {
        let threshold = -20.0;
        let ratio = 4.0;
        let mut comp = Compressor::new(44_100.0, &[threshold, ratio, 0.001, 0.1, 0.0]);
        let level = 0.5_f32;
        run_dc(&mut comp, level, 200);

        let level_db = linear_to_db(level);
        let envelope = comp.followers[0].envelope();
        let expected = db_to_linear(threshold + (level_db - threshold) / ratio) / envelope;
        assert!((envelope - level).abs() < 1e-3, "envelope {}", envelope);
        for ch in 0..2 {
            let got = comp.gain_reduction(ch);
            assert!((got - expected).abs() < 1e-3, "ch{} reduction {} vs {}", ch, got, expected);
        }
    }

    #[test]
    fn test_below_threshold_is_unity() {
        let mut comp = Compressor::new(44_100.0, &[-10.0, 8.0, 0.001, 0.05, 0.0]);
        run_dc(&mut comp, 0.05, 100);
        assert_eq!(comp.gain_reduction(0), 1.0);
        assert_eq!(comp.gain_reduction(1), 1.0);
    }

    #[test]
    fn test_release_returns_to_unity() {
        let mut comp = Compressor::new(44_100.0, &[-20.0, 4.0, 0.001, 0.05, 0.0]);
        run_dc(&mut comp, 0.8, 50);
        assert!(comp.gain_reduction(0) < 0.5);
        run_dc(&mut comp, 0.0, 200);
        assert_eq!(comp.gain_reduction(0), 1.0);
    }

    #[test]
    fn test_makeup_gain_applies() {
        let mut comp = Compressor::new(44_100.0, &[0.0, 1.0, 0.001, 0.05, 6.0]);
        let mut buf = AudioBuffer::new(1, 8);
        buf.channel_mut(0).fill(0.1);
        comp.process(&mut buf);
        assert!((buf.channel(0)[7] - 0.1 * db_to_linear(6.0)).abs() < 1e-4);
    }
}
