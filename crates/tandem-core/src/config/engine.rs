//! Engine configuration
//!
//! Sizes every fixed-capacity structure on the realtime side. Loaded from
//! YAML with [`load_config`](super::load_config); unknown or missing fields
//! fall back to the defaults below.

use serde::{Deserialize, Serialize};

use crate::audio::AudioConfig;
use crate::clip::DEFAULT_PEAK_POINTS;
use crate::error::{EngineError, EngineResult};
use crate::types::{DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE, MAX_CHANNELS, SAMPLE_RATE};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sample rate in Hz
    /// Default: 44100
    pub sample_rate: u32,

    /// Frames per processing block
    /// Default: 128 (~2.9ms at 44.1kHz)
    pub block_size: usize,

    /// Output channels (1 or 2)
    pub channels: usize,

    /// Maximum number of tracks
    pub max_tracks: usize,

    /// System-wide effect budget across all tracks
    /// Bounds the worst-case compute of one block.
    /// Default: 12
    pub max_effects: usize,

    /// Points in each clip's peak summary
    pub peak_points: usize,

    /// Fraction of the block budget that counts as an overrun
    /// Default: 0.8
    pub overrun_ratio: f32,

    /// Bypass the most recently added effect after this many consecutive
    /// overruns (None = never)
    pub auto_bypass_after_overruns: Option<u32>,

    /// Seconds of audio each capture ring holds between drains
    pub capture_ring_secs: f32,

    /// Seconds of audio each collaborator ring holds
    pub collaborator_ring_secs: f32,

    /// Interval between telemetry events emitted by `poll` (milliseconds)
    pub telemetry_interval_ms: u64,

    /// Device settings
    pub audio: AudioConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
            channels: MAX_CHANNELS,
            max_tracks: 32,
            max_effects: 12,
            peak_points: DEFAULT_PEAK_POINTS,
            overrun_ratio: 0.8,
            auto_bypass_after_overruns: None,
            capture_ring_secs: 10.0,
            collaborator_ring_secs: 0.5,
            telemetry_interval_ms: 50,
            audio: AudioConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Real-time budget of one block in seconds
    pub fn block_secs(&self) -> f32 {
        self.block_size as f32 / self.sample_rate as f32
    }

    /// Reject configurations the realtime side cannot be sized for
    pub fn validate(&self) -> EngineResult<()> {
        let invalid = |msg: String| Err(EngineError::InvalidConfig(msg));
        if self.sample_rate < 8_000 || self.sample_rate > 384_000 {
            return invalid(format!("sample_rate {} out of range", self.sample_rate));
        }
        if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE {
            return invalid(format!(
                "block_size {} must be within 1..={}",
                self.block_size, MAX_BLOCK_SIZE
            ));
        }
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return invalid(format!("channels {} must be 1 or 2", self.channels));
        }
        if self.max_tracks == 0 {
            return invalid("max_tracks must be at least 1".to_string());
        }
        if self.peak_points == 0 {
            return invalid("peak_points must be at least 1".to_string());
        }
        if !(self.overrun_ratio >= 0.0) {
            return invalid(format!("overrun_ratio {} is negative", self.overrun_ratio));
        }
        if !(self.capture_ring_secs > 0.0) || !(self.collaborator_ring_secs > 0.0) {
            return invalid("ring sizes must be positive".to_string());
        }
        Ok(())
    }
}
