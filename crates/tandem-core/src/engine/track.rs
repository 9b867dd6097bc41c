//! Tracks and the track graph
//!
//! Every track mixes into the master bus. Mute and solo never touch the
//! stored volume: the gain the audio thread uses is resolved when a snapshot
//! is built, so clearing every solo brings each track back to exactly the
//! volume it had before.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::chain::ChainManager;
use super::snapshot::{InputRoute, SlotAllocator, StripSnapshot};
use crate::clip::Clip;
use crate::error::{EngineError, EngineResult};
use crate::types::TrackId;

/// Volume a new track starts at
pub const DEFAULT_VOLUME: f32 = 0.8;

/// Options for a new track
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackConfig {
    pub name: String,
    pub volume: Option<f32>,
    pub pan: Option<f32>,
    pub input: Option<InputRoute>,
}

impl TrackConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_input(mut self, input: InputRoute) -> Self {
        self.input = Some(input);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Track {
    id: TrackId,
    name: String,
    volume: f32,
    pan: f32,
    muted: bool,
    solo: bool,
    input: Option<InputRoute>,
    /// Realtime strip rendering this track
    strip: usize,
    clips: Vec<Clip>,
}

impl Track {
    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn pan(&self) -> f32 {
        self.pan
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_solo(&self) -> bool {
        self.solo
    }

    pub fn input(&self) -> Option<InputRoute> {
        self.input
    }

    pub fn strip(&self) -> usize {
        self.strip
    }

    pub fn clips(&self) -> &[Clip] {
        &self.clips
    }

    pub(crate) fn push_clip(&mut self, clip: Clip) {
        self.clips.push(clip);
    }

    /// Channels the strip processes: mono only when everything it plays is mono
    pub fn channels(&self) -> usize {
        let mono_input = self.input.map_or(true, |route| route.channel_count() == 1);
        let mono_clips = self.clips.iter().all(|clip| clip.channel_count() == 1);
        if mono_input && mono_clips {
            1
        } else {
            2
        }
    }
}

/// All tracks plus the master bus level
#[derive(Debug)]
pub struct TrackGraph {
    tracks: BTreeMap<TrackId, Track>,
    strips: SlotAllocator,
    next_id: u32,
    master_volume: f32,
}

impl TrackGraph {
    pub fn new(max_tracks: usize) -> Self {
        Self {
            tracks: BTreeMap::new(),
            strips: SlotAllocator::new(max_tracks),
            next_id: 1,
            master_volume: 1.0,
        }
    }

    pub fn limit(&self) -> usize {
        self.strips.capacity()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn create(&mut self, config: TrackConfig) -> EngineResult<&Track> {
        let (strip, _) = self.strips.allocate().ok_or(EngineError::TooManyTracks {
            limit: self.strips.capacity(),
        })?;
        let id = TrackId(self.next_id);
        self.next_id += 1;

        let name = if config.name.is_empty() {
            format!("Track {}", id.0)
        } else {
            config.name
        };
        let track = Track {
            id,
            name,
            volume: clamp_unit(config.volume.unwrap_or(DEFAULT_VOLUME)),
            pan: clamp_pan(config.pan.unwrap_or(0.0)),
            muted: false,
            solo: false,
            input: config.input,
            strip,
            clips: Vec::new(),
        };
        Ok(self.tracks.entry(id).or_insert(track))
    }

    pub fn remove(&mut self, id: TrackId) -> EngineResult<Track> {
        let track = self.tracks.remove(&id).ok_or(EngineError::TrackNotFound(id))?;
        self.strips.release(track.strip);
        Ok(track)
    }

    pub fn get(&self, id: TrackId) -> EngineResult<&Track> {
        self.tracks.get(&id).ok_or(EngineError::TrackNotFound(id))
    }

    pub fn get_mut(&mut self, id: TrackId) -> EngineResult<&mut Track> {
        self.tracks.get_mut(&id).ok_or(EngineError::TrackNotFound(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn rename(&mut self, id: TrackId, name: impl Into<String>) -> EngineResult<()> {
        self.get_mut(id)?.name = name.into();
        Ok(())
    }

    /// Returns the clamped volume
    pub fn set_volume(&mut self, id: TrackId, volume: f32) -> EngineResult<f32> {
        let track = self.get_mut(id)?;
        track.volume = clamp_unit(volume);
        Ok(track.volume)
    }

    /// Returns the clamped pan
    pub fn set_pan(&mut self, id: TrackId, pan: f32) -> EngineResult<f32> {
        let track = self.get_mut(id)?;
        track.pan = clamp_pan(pan);
        Ok(track.pan)
    }

    pub fn set_muted(&mut self, id: TrackId, muted: bool) -> EngineResult<()> {
        self.get_mut(id)?.muted = muted;
        Ok(())
    }

    pub fn set_solo(&mut self, id: TrackId, solo: bool) -> EngineResult<()> {
        self.get_mut(id)?.solo = solo;
        Ok(())
    }

    pub fn set_input(&mut self, id: TrackId, input: Option<InputRoute>) -> EngineResult<()> {
        self.get_mut(id)?.input = input;
        Ok(())
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    /// Returns the clamped volume
    pub fn set_master_volume(&mut self, volume: f32) -> f32 {
        self.master_volume = clamp_unit(volume);
        self.master_volume
    }

    pub fn any_solo(&self) -> bool {
        self.tracks.values().any(|t| t.solo)
    }

    /// Gain the audio thread should apply to a track
    ///
    /// While any track is soloed, only soloed tracks sound (solo wins over
    /// mute). Otherwise muted tracks are silent.
    #[cfg(test)]
    pub fn effective_gain(&self, track: &Track) -> f32 {
        resolve_gain(self.any_solo(), track)
    }

    /// Realtime view of every track in id order
    pub fn strip_snapshots(&self, chains: &ChainManager) -> Vec<StripSnapshot> {
        let any_solo = self.any_solo();
        self.tracks
            .values()
            .map(|track| {
                StripSnapshot {
                    track: track.id,
                    strip: track.strip,
                    gain: resolve_gain(any_solo, track),
                    pan: track.pan,
                    channels: track.channels(),
                    input: track.input,
                    chain: chains.active_handles(track.id),
                }
            })
            .collect()
    }
}

fn resolve_gain(any_solo: bool, track: &Track) -> f32 {
    match (any_solo, track.solo, track.muted) {
        (true, true, _) | (false, _, false) => track.volume,
        (true, false, _) | (false, _, true) => 0.0,
    }
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn clamp_pan(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-1.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with(names: &[&str]) -> (TrackGraph, Vec<TrackId>) {
        let mut graph = TrackGraph::new(8);
        let ids = names
            .iter()
            .map(|name| graph.create(TrackConfig::named(*name)).unwrap().id())
            .collect();
        (graph, ids)
    }

    fn gains(graph: &TrackGraph) -> Vec<f32> {
        graph
            .strip_snapshots(&ChainManager::new(1))
            .iter()
            .map(|s| s.gain)
            .collect()
    }

    #[test]
    fn test_create_defaults() {
        let (graph, ids) = graph_with(&["Vocals", ""]);
        let vocals = graph.get(ids[0]).unwrap();
        assert_eq!(vocals.name(), "Vocals");
        assert_eq!(vocals.volume(), DEFAULT_VOLUME);
        assert_eq!(vocals.pan(), 0.0);
        assert_eq!(graph.get(ids[1]).unwrap().name(), "Track 2");
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn test_track_limit() {
        let mut graph = TrackGraph::new(1);
        graph.create(TrackConfig::default()).unwrap();
        assert_eq!(
            graph.create(TrackConfig::default()).err(),
            Some(EngineError::TooManyTracks { limit: 1 })
        );
    }

    #[test]
    fn test_volume_and_pan_clamp() {
        let (mut graph, ids) = graph_with(&["A"]);
        assert_eq!(graph.set_volume(ids[0], 1.5).unwrap(), 1.0);
        assert_eq!(graph.set_volume(ids[0], -0.2).unwrap(), 0.0);
        assert_eq!(graph.set_pan(ids[0], -3.0).unwrap(), -1.0);
        assert_eq!(graph.set_master_volume(2.0), 1.0);
        assert!(graph.set_volume(TrackId(99), 0.5).is_err());
    }

    #[test]
    fn test_solo_silences_others_and_restores() {
        let (mut graph, ids) = graph_with(&["A", "B", "C"]);
        graph.set_volume(ids[1], 0.3).unwrap();
        graph.set_muted(ids[2], true).unwrap();
        let before = gains(&graph);
        assert_eq!(before, vec![0.8, 0.3, 0.0]);

        graph.set_solo(ids[0], true).unwrap();
        assert_eq!(gains(&graph), vec![0.8, 0.0, 0.0]);

        // Solo overrides mute
        graph.set_solo(ids[2], true).unwrap();
        assert_eq!(gains(&graph), vec![0.8, 0.0, 0.8]);

        graph.set_solo(ids[0], false).unwrap();
        graph.set_solo(ids[2], false).unwrap();
        assert_eq!(gains(&graph), before);
        assert_eq!(graph.get(ids[1]).unwrap().volume(), 0.3);
    }

    #[test]
    fn test_effective_gain_matches_snapshot() {
        let (mut graph, ids) = graph_with(&["A", "B"]);
        graph.set_solo(ids[1], true).unwrap();
        let snaps = gains(&graph);
        for (track, gain) in graph.iter().zip(snaps) {
            assert_eq!(graph.effective_gain(track), gain);
        }
    }

    #[test]
    fn test_strip_reuse_after_remove() {
        let (mut graph, ids) = graph_with(&["A", "B"]);
        let strip = graph.get(ids[0]).unwrap().strip();
        graph.remove(ids[0]).unwrap();
        let c = graph.create(TrackConfig::named("C")).unwrap();
        assert_eq!(c.strip(), strip);
        assert!(matches!(graph.remove(ids[0]), Err(EngineError::TrackNotFound(_))));
    }

    #[test]
    fn test_channels_follow_input() {
        let (mut graph, ids) = graph_with(&["A"]);
        assert_eq!(graph.get(ids[0]).unwrap().channels(), 1);
        graph
            .set_input(ids[0], Some(InputRoute::Stereo { left: 0 }))
            .unwrap();
        assert_eq!(graph.get(ids[0]).unwrap().channels(), 2);
        graph
            .set_input(ids[0], Some(InputRoute::Mono { channel: 1 }))
            .unwrap();
        assert_eq!(graph.get(ids[0]).unwrap().channels(), 1);
    }
}
