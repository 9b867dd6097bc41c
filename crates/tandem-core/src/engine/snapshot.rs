//! Immutable mix snapshots and arena handles
//!
//! The control side never edits what the audio thread is reading. Every
//! structural change builds a fresh [`MixSnapshot`], stamps it with the next
//! generation and swaps it into a `basedrop::SharedCell`; the audio thread
//! notices the new generation at the next block boundary and picks it up.
//! The old snapshot is released on the collector thread.
//!
//! Effects are addressed by [`EffectHandle`]: an arena slot plus the
//! generation the slot had when the effect was installed. A handle whose
//! generation no longer matches the arena is stale and simply skipped.

use serde::{Deserialize, Serialize};

use crate::types::TrackId;

/// Address of an effect in the realtime arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EffectHandle {
    pub slot: u32,
    pub generation: u32,
}

/// Where a track takes its live input from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum InputRoute {
    /// One device input channel
    Mono { channel: usize },
    /// Two adjacent device input channels starting at `left`
    Stereo { left: usize },
}

impl InputRoute {
    pub fn channel_count(&self) -> usize {
        match self {
            InputRoute::Mono { .. } => 1,
            InputRoute::Stereo { .. } => 2,
        }
    }
}

/// Fixed-capacity slot allocator with per-slot generations
///
/// Freed slots are reused lowest-first; every release bumps the slot's
/// generation so handles issued before the release go stale.
#[derive(Debug, Clone)]
pub struct SlotAllocator {
    generations: Vec<u32>,
    in_use: Vec<bool>,
}

impl SlotAllocator {
    pub fn new(capacity: usize) -> Self {
        Self {
            generations: vec![0; capacity],
            in_use: vec![false; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.in_use.len()
    }

    #[cfg(test)]
    pub fn used(&self) -> usize {
        self.in_use.iter().filter(|&&u| u).count()
    }

    /// Claim a free slot, returning `(slot, generation)`
    pub fn allocate(&mut self) -> Option<(usize, u32)> {
        let slot = self.in_use.iter().position(|&u| !u)?;
        self.in_use[slot] = true;
        Some((slot, self.generations[slot]))
    }

    /// Release a slot; returns false if it was not in use
    pub fn release(&mut self, slot: usize) -> bool {
        match self.in_use.get_mut(slot) {
            Some(used) if *used => {
                *used = false;
                self.generations[slot] = self.generations[slot].wrapping_add(1);
                true
            }
            _ => false,
        }
    }

    #[cfg(test)]
    pub fn is_live(&self, slot: usize, generation: u32) -> bool {
        self.in_use.get(slot).copied().unwrap_or(false) && self.generations[slot] == generation
    }
}

/// Realtime view of one track
#[derive(Debug, Clone, PartialEq)]
pub struct StripSnapshot {
    pub track: TrackId,
    /// Index of the realtime strip that renders this track
    pub strip: usize,
    /// Gain after solo/mute resolution
    pub gain: f32,
    pub pan: f32,
    /// Channels the strip processes (1 = mono source, spread by the panner)
    pub channels: usize,
    pub input: Option<InputRoute>,
    /// Enabled, non-bypassed effects in processing order
    pub chain: Vec<EffectHandle>,
}

/// Everything the audio thread needs to mix one block
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MixSnapshot {
    pub generation: u64,
    pub strips: Vec<StripSnapshot>,
    pub master_gain: f32,
}

impl MixSnapshot {
    pub fn strip_for(&self, track: TrackId) -> Option<&StripSnapshot> {
        self.strips.iter().find(|s| s.track == track)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_reuse_bumps_generation() {
        let mut slots = SlotAllocator::new(2);
        let (a, gen_a) = slots.allocate().unwrap();
        let (b, _) = slots.allocate().unwrap();
        assert_ne!(a, b);
        assert!(slots.allocate().is_none());

        assert!(slots.release(a));
        assert!(!slots.release(a));
        assert!(!slots.is_live(a, gen_a));

        let (again, gen_again) = slots.allocate().unwrap();
        assert_eq!(again, a);
        assert_eq!(gen_again, gen_a + 1);
        assert!(slots.is_live(again, gen_again));
        assert_eq!(slots.used(), 2);
    }

    #[test]
    fn test_input_route_channels() {
        assert_eq!(InputRoute::Mono { channel: 3 }.channel_count(), 1);
        assert_eq!(InputRoute::Stereo { left: 0 }.channel_count(), 2);
    }
}
