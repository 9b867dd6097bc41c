//! Bit depth and sample rate reduction
//!
//! Quantizes to `2 / 2^bits` steps (floor), then holds each quantized value
//! for `downsample` samples. The crushed signal is blended with the dry input
//! by `mix`.

use crate::effect::Processor;
use crate::types::{AudioBuffer, MAX_CHANNELS};

pub struct Bitcrusher {
    step: f32,
    downsample: u32,
    mix: f32,
    held: [f32; MAX_CHANNELS],
    counter: [u32; MAX_CHANNELS],
}

impl Bitcrusher {
    pub const BITS: usize = 0;
    pub const DOWNSAMPLE: usize = 1;
    pub const MIX: usize = 2;

    pub fn new(values: &[f32]) -> Self {
        let value = |i: usize, default: f32| values.get(i).copied().unwrap_or(default);
        Self {
            step: step_for_bits(value(Self::BITS, 8.0)),
            downsample: downsample_factor(value(Self::DOWNSAMPLE, 1.0)),
            mix: value(Self::MIX, 1.0),
            held: [0.0; MAX_CHANNELS],
            counter: [0; MAX_CHANNELS],
        }
    }
}

fn step_for_bits(bits: f32) -> f32 {
    let bits = bits.round().clamp(1.0, 16.0) as i32;
    2.0 / 2.0_f32.powi(bits)
}

fn downsample_factor(value: f32) -> u32 {
    value.round().max(1.0) as u32
}

impl Processor for Bitcrusher {
    fn set_parameter(&mut self, index: usize, value: f32) {
        match index {
            Self::BITS => self.step = step_for_bits(value),
            Self::DOWNSAMPLE => self.downsample = downsample_factor(value),
            Self::MIX => self.mix = value.clamp(0.0, 1.0),
            _ => {}
        }
    }

    fn process(&mut self, block: &mut AudioBuffer) {
        let dry_gain = 1.0 - self.mix;
        for ch in 0..block.channels() {
            let mut held = self.held[ch];
            let mut counter = self.counter[ch];
            for sample in block.channel_mut(ch) {
                if counter == 0 {
                    held = (*sample / self.step).floor() * self.step;
                }
                counter = (counter + 1) % self.downsample;
                *sample = *sample * dry_gain + held * self.mix;
            }
            self.held[ch] = held;
            self.counter[ch] = counter;
        }
    }

    fn reset(&mut self) {
        self.held = [0.0; MAX_CHANNELS];
        self.counter = [0; MAX_CHANNELS];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantization_floor() {
        // 2 bits: step = 0.5
        let mut crusher = Bitcrusher::new(&[2.0, 1.0, 1.0]);
        let mut buf = AudioBuffer::from_channels(&[&[0.7, 0.2, -0.1, -0.6]]);
        crusher.process(&mut buf);
        assert_eq!(buf.channel(0), &[0.5, 0.0, -0.5, -1.0]);
    }

    #[test]
    fn test_sample_and_hold() {
        let mut crusher = Bitcrusher::new(&[16.0, 3.0, 1.0]);
        let input: Vec<f32> = (0..7).map(|i| i as f32 * 0.125).collect();
        let mut buf = AudioBuffer::from_channels(&[&input]);
        crusher.process(&mut buf);
        let out = buf.channel(0);
        assert_eq!(out[0], out[1]);
        assert_eq!(out[1], out[2]);
        assert_eq!(out[3], 0.375);
        assert_eq!(out[5], 0.375);
        assert_eq!(out[6], 0.75);
    }

    #[test]
    fn test_hold_continues_across_blocks() {
        let mut crusher = Bitcrusher::new(&[16.0, 4.0, 1.0]);
        let mut first = AudioBuffer::from_channels(&[&[0.5, 0.5]]);
        crusher.process(&mut first);
        let mut second = AudioBuffer::from_channels(&[&[0.9, 0.9, 0.25]]);
        crusher.process(&mut second);
        assert_eq!(second.channel(0), &[0.5, 0.5, 0.25]);
    }
}
