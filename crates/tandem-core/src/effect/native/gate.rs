//! Noise gate / downward expander
//!
//! Shares the compressor's envelope follower. Below the threshold the gain
//! follows `(envelope / threshold)^(1 / ratio)`; at or above it the signal
//! passes at unity.

use super::compressor::EnvelopeFollower;
use crate::effect::Processor;
use crate::types::{db_to_linear, AudioBuffer, MAX_CHANNELS};

pub struct Gate {
    sample_rate: f32,
    threshold: f32,
    inv_ratio: f32,
    followers: [EnvelopeFollower; MAX_CHANNELS],
    gain: [f32; MAX_CHANNELS],
}

impl Gate {
    pub const THRESHOLD: usize = 0;
    pub const RATIO: usize = 1;
    pub const ATTACK: usize = 2;
    pub const RELEASE: usize = 3;

    pub fn new(sample_rate: f32, values: &[f32]) -> Self {
        let value = |i: usize, default: f32| values.get(i).copied().unwrap_or(default);
        let follower = EnvelopeFollower::new(
            sample_rate,
            value(Self::ATTACK, 0.001),
            value(Self::RELEASE, 0.1),
        );
        Self {
            sample_rate,
            threshold: db_to_linear(value(Self::THRESHOLD, -50.0)),
            inv_ratio: 1.0 / value(Self::RATIO, 0.25).max(0.01),
            followers: [follower; MAX_CHANNELS],
            gain: [1.0; MAX_CHANNELS],
        }
    }

    /// Gain most recently applied on a channel
    pub fn gain(&self, channel: usize) -> f32 {
        self.gain.get(channel).copied().unwrap_or(1.0)
    }
}

impl Processor for Gate {
    fn set_parameter(&mut self, index: usize, value: f32) {
        match index {
            Self::THRESHOLD => self.threshold = db_to_linear(value),
            Self::RATIO => self.inv_ratio = 1.0 / value.max(0.01),
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
            _ => {}
        }
    }

    fn process(&mut self, block: &mut AudioBuffer) {
        for ch in 0..block.channels() {
            let mut follower = self.followers[ch];
            let mut gain = self.gain[ch];
            for sample in block.channel_mut(ch) {
                let envelope = follower.next(*sample);
                gain = if envelope >= self.threshold {
                    1.0
                } else {
                    (envelope / self.threshold).powf(self.inv_ratio)
                };
                *sample *= gain;
            }
            self.followers[ch] = follower;
            self.gain[ch] = gain;
        }
    }

    fn reset(&mut self) {
        for f in &mut self.followers {
            f.reset();
        }
        self.gain = [1.0; MAX_CHANNELS];
    }
}
