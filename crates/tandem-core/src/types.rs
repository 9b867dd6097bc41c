//! Common types for Tandem
//!
//! This module contains the fundamental audio types shared by the control
//! plane and the realtime block processor: the planar block buffer, entity
//! identifiers and the dB helpers used by the DSP units.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default sample rate (44.1kHz, what browsers and most interfaces open at)
pub const SAMPLE_RATE: u32 = 44_100;

/// Default block size in frames (~2.9ms at 44.1kHz)
pub const DEFAULT_BLOCK_SIZE: usize = 128;

/// Largest block the processor accepts
///
/// Every realtime buffer is allocated to this size up front so the audio
/// callback only ever changes the working length.
pub const MAX_BLOCK_SIZE: usize = 4096;

/// Maximum channels per block (stereo)
pub const MAX_CHANNELS: usize = 2;

/// Audio sample type
pub type Sample = f32;

/// Convert decibels to linear amplitude
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert linear amplitude to decibels (floored at -120 dB)
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 1e-6 {
        -120.0
    } else {
        20.0 * linear.log10()
    }
}

/// Track identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub u32);

/// Effect identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EffectId(pub u32);

/// Clip identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClipId(pub u64);

/// Remote collaborator identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollaboratorId(pub u32);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track#{}", self.0)
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "effect#{}", self.0)
    }
}

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "clip#{}", self.0)
    }
}

impl fmt::Display for CollaboratorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "collaborator#{}", self.0)
    }
}

/// A planar multi-channel audio block
///
/// Storage is allocated once for `MAX_CHANNELS × MAX_BLOCK_SIZE` samples.
/// The realtime path only changes `frames` and `channels`, so resizing a
/// block never touches the allocator.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    data: Vec<Sample>,
    channels: usize,
    frames: usize,
}

impl AudioBuffer {
    /// Create a silent block with the given working shape
    pub fn new(channels: usize, frames: usize) -> Self {
        let mut buf = Self {
            data: vec![0.0; MAX_CHANNELS * MAX_BLOCK_SIZE],
            channels: 1,
            frames: 0,
        };
        buf.set_shape(channels, frames);
        buf
    }

    /// Create a block from per-channel slices (all the same length)
    pub fn from_channels(channels: &[&[Sample]]) -> Self {
        let frames = channels.first().map(|c| c.len()).unwrap_or(0);
        let mut buf = Self::new(channels.len(), frames);
        for (ch, samples) in channels.iter().enumerate().take(buf.channels) {
            let n = samples.len().min(buf.frames);
            buf.channel_mut(ch)[..n].copy_from_slice(&samples[..n]);
        }
        buf
    }

    /// Change the working shape (clamped to the preallocated capacity)
    ///
    /// Real-time safe: no allocation.
    #[inline]
    pub fn set_shape(&mut self, channels: usize, frames: usize) {
        self.channels = channels.clamp(1, MAX_CHANNELS);
        self.frames = frames.min(MAX_BLOCK_SIZE);
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    #[inline]
    pub fn channel(&self, ch: usize) -> &[Sample] {
        let start = ch * MAX_BLOCK_SIZE;
        &self.data[start..start + self.frames]
    }

    #[inline]
    pub fn channel_mut(&mut self, ch: usize) -> &mut [Sample] {
        let start = ch * MAX_BLOCK_SIZE;
        &mut self.data[start..start + self.frames]
    }

    /// Fill the working region with silence
    pub fn clear(&mut self) {
        for ch in 0..self.channels {
            self.channel_mut(ch).fill(0.0);
        }
    }

    /// Copy another block's contents (shape included)
    pub fn copy_from(&mut self, other: &AudioBuffer) {
        self.set_shape(other.channels, other.frames);
        for ch in 0..self.channels {
            let start = ch * MAX_BLOCK_SIZE;
            self.data[start..start + self.frames].copy_from_slice(other.channel(ch));
        }
    }

    /// Mix another block into this one, upmixing mono sources
    pub fn add_from(&mut self, other: &AudioBuffer, gain: Sample) {
        let frames = self.frames.min(other.frames);
        for ch in 0..self.channels {
            let src_ch = ch.min(other.channels - 1);
            let start = ch * MAX_BLOCK_SIZE;
            let src = other.channel(src_ch);
            for (dst, s) in self.data[start..start + frames].iter_mut().zip(src) {
                *dst += s * gain;
            }
        }
    }

    /// Scale every sample in the working region
    pub fn scale(&mut self, gain: Sample) {
        for ch in 0..self.channels {
            for s in self.channel_mut(ch) {
                *s *= gain;
            }
        }
    }

    /// Peak absolute sample across all channels
    pub fn peak(&self) -> Sample {
        let mut peak = 0.0_f32;
        for ch in 0..self.channels {
            for s in self.channel(ch) {
                peak = peak.max(s.abs());
            }
        }
        peak
    }

    /// Whether every sample in the working region is finite
    ///
    /// Sums instead of branching per sample; NaN or ±inf poison the sum.
    #[inline]
    pub fn is_finite(&self) -> bool {
        let mut acc = 0.0_f32;
        for ch in 0..self.channels {
            for s in self.channel(ch) {
                acc += s * 0.0;
            }
        }
        acc == 0.0
    }
}

impl Default for AudioBuffer {
    fn default() -> Self {
        Self::new(MAX_CHANNELS, DEFAULT_BLOCK_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_is_clamped() {
        let mut buf = AudioBuffer::new(8, MAX_BLOCK_SIZE * 2);
        assert_eq!(buf.channels(), MAX_CHANNELS);
        assert_eq!(buf.frames(), MAX_BLOCK_SIZE);

        buf.set_shape(0, 64);
        assert_eq!(buf.channels(), 1);
        assert_eq!(buf.channel(0).len(), 64);
    }

    #[test]
    fn test_add_from_upmixes_mono() {
        let mono = AudioBuffer::from_channels(&[&[0.5; 16]]);
        let mut stereo = AudioBuffer::new(2, 16);
        stereo.add_from(&mono, 2.0);
        assert_eq!(stereo.channel(0)[3], 1.0);
        assert_eq!(stereo.channel(1)[3], 1.0);
    }

    #[test]
    fn test_finite_check() {
        let mut buf = AudioBuffer::new(2, 32);
        assert!(buf.is_finite());
        buf.channel_mut(1)[7] = f32::NAN;
        assert!(!buf.is_finite());
        buf.channel_mut(1)[7] = f32::INFINITY;
        assert!(!buf.is_finite());
    }

    #[test]
    fn test_db_conversion() {
        assert!((db_to_linear(-6.0) - 0.501).abs() < 1e-3);
        assert!((linear_to_db(1.0)).abs() < 1e-6);
        assert_eq!(linear_to_db(0.0), -120.0);
    }
}
