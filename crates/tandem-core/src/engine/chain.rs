//! Effect chain management (control side)
//!
//! Tracks which effects exist, which track each belongs to, their order and
//! the parameter values last sent to the audio thread. The realtime side
//! only ever sees the ordered handle lists this module produces for a
//! snapshot.
//!
//! The effect budget is global: every track shares one arena of
//! `max_effects` slots.

use std::collections::HashMap;

use super::snapshot::{EffectHandle, SlotAllocator};
use crate::effect::{EffectKind, ParameterDescriptor};
use crate::error::{EngineError, EngineResult};
use crate::types::{EffectId, TrackId};

/// Control-side state of one effect instance
#[derive(Debug, Clone)]
pub struct EffectRecord {
    pub id: EffectId,
    pub track: TrackId,
    pub kind: EffectKind,
    pub handle: EffectHandle,
    /// Targets last sent to the audio thread
    values: Vec<f32>,
    /// Values before the most recent change
    previous: Vec<f32>,
    rates: Vec<f32>,
    bypassed: bool,
    faulted: bool,
    /// Insertion order, used to pick the newest effect to shed under load
    seq: u64,
}

impl EffectRecord {
    pub fn is_bypassed(&self) -> bool {
        self.bypassed
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn value(&self, index: usize) -> Option<f32> {
        self.values.get(index).copied()
    }

    /// Parameter descriptors in index order
    pub fn descriptors(&self) -> Vec<ParameterDescriptor> {
        self.kind
            .params()
            .iter()
            .enumerate()
            .map(|(i, spec)| {
                let mut desc = ParameterDescriptor::from_spec(spec, self.values[i]);
                desc.current = self.previous[i];
                desc.smoothing_rate = self.rates[i];
                desc
            })
            .collect()
    }
}

/// Owner of every effect record and each track's chain order
#[derive(Debug)]
pub struct ChainManager {
    effects: HashMap<EffectId, EffectRecord>,
    chains: HashMap<TrackId, Vec<EffectId>>,
    slots: SlotAllocator,
    next_id: u32,
    next_seq: u64,
}

impl ChainManager {
    pub fn new(max_effects: usize) -> Self {
        Self {
            effects: HashMap::new(),
            chains: HashMap::new(),
            slots: SlotAllocator::new(max_effects),
            next_id: 1,
            next_seq: 0,
        }
    }

    pub fn limit(&self) -> usize {
        self.slots.capacity()
    }

    #[cfg(test)]
    pub fn total(&self) -> usize {
        self.effects.len()
    }

    /// Validate initial parameter values, filling in defaults
    pub fn resolve_values(kind: EffectKind, params: &[(&str, f32)]) -> EngineResult<Vec<f32>> {
        let mut values = kind.default_values();
        for &(name, value) in params {
            let index = Self::param_index(kind, name)?;
            Self::check_value(kind, index, value)?;
            values[index] = value;
        }
        Ok(values)
    }

    pub fn param_index(kind: EffectKind, name: &str) -> EngineResult<usize> {
        kind.param_index(name).ok_or_else(|| EngineError::UnknownParameter {
            kind: kind.key(),
            name: name.to_string(),
        })
    }

    pub fn check_value(kind: EffectKind, index: usize, value: f32) -> EngineResult<()> {
        let spec = &kind.params()[index];
        if spec.accepts(value) {
            Ok(())
        } else {
            Err(EngineError::ParameterOutOfRange {
                name: spec.name,
                value,
                min: spec.min,
                max: spec.max,
            })
        }
    }

    /// Append a new effect to a track's chain
    ///
    /// Fails with `ChainFull` when the global budget is used up; nothing is
    /// changed in that case.
    pub fn insert(&mut self, track: TrackId, kind: EffectKind, values: Vec<f32>) -> EngineResult<&EffectRecord> {
        let (slot, generation) = self.slots.allocate().ok_or(EngineError::ChainFull {
            limit: self.slots.capacity(),
        })?;

        let id = EffectId(self.next_id);
        self.next_id += 1;
        let seq = self.next_seq;
        self.next_seq += 1;

        let count = values.len();
        let record = EffectRecord {
            id,
            track,
            kind,
            handle: EffectHandle {
                slot: slot as u32,
                generation,
            },
            previous: values.clone(),
            values,
            rates: vec![1.0; count],
            bypassed: false,
            faulted: false,
            seq,
        };
        self.chains.entry(track).or_default().push(id);
        Ok(self.effects.entry(id).or_insert(record))
    }

    /// Take an effect off a track, releasing its arena slot
    pub fn remove(&mut self, track: TrackId, effect: EffectId) -> EngineResult<EffectRecord> {
        let chain = self
            .chains
            .get_mut(&track)
            .ok_or(EngineError::EffectNotFound(effect))?;
        let pos = chain
            .iter()
            .position(|&id| id == effect)
            .ok_or(EngineError::EffectNotFound(effect))?;
        chain.remove(pos);

        let record = self
            .effects
            .remove(&effect)
            .ok_or(EngineError::EffectNotFound(effect))?;
        self.slots.release(record.handle.slot as usize);
        Ok(record)
    }

    /// Remove a track's whole chain
    pub fn remove_track(&mut self, track: TrackId) -> Vec<EffectRecord> {
        let ids = self.chains.remove(&track).unwrap_or_default();
        ids.into_iter()
            .filter_map(|id| self.effects.remove(&id))
            .inspect(|record| {
                self.slots.release(record.handle.slot as usize);
            })
            .collect()
    }

    /// Returns whether the flag changed
    pub fn set_bypassed(&mut self, effect: EffectId, bypassed: bool) -> EngineResult<bool> {
        let record = self.get_mut(effect)?;
        let changed = record.bypassed != bypassed;
        record.bypassed = bypassed;
        if !bypassed {
            record.faulted = false;
        }
        Ok(changed)
    }

    pub fn set_faulted(&mut self, effect: EffectId) -> EngineResult<()> {
        let record = self.get_mut(effect)?;
        record.faulted = true;
        record.bypassed = true;
        Ok(())
    }

    /// Record a target sent to the audio thread
    pub fn set_target(&mut self, effect: EffectId, index: usize, value: f32, rate: f32) -> EngineResult<()> {
        let record = self.get_mut(effect)?;
        if index >= record.values.len() {
            return Err(EngineError::EffectNotFound(effect));
        }
        record.previous[index] = if rate >= 1.0 { value } else { record.values[index] };
        record.values[index] = value;
        record.rates[index] = rate;
        Ok(())
    }

    /// Move an effect within its chain; the index is clamped to the chain
    pub fn move_to(&mut self, track: TrackId, effect: EffectId, index: usize) -> EngineResult<usize> {
        let chain = self
            .chains
            .get_mut(&track)
            .ok_or(EngineError::EffectNotFound(effect))?;
        let pos = chain
            .iter()
            .position(|&id| id == effect)
            .ok_or(EngineError::EffectNotFound(effect))?;
        let id = chain.remove(pos);
        let index = index.min(chain.len());
        chain.insert(index, id);
        Ok(index)
    }

    /// Effect ids of a track in processing order
    pub fn chain(&self, track: TrackId) -> &[EffectId] {
        self.chains.get(&track).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Handles of a track's non-bypassed effects in processing order
    pub fn active_handles(&self, track: TrackId) -> Vec<EffectHandle> {
        self.chain(track)
            .iter()
            .filter_map(|id| self.effects.get(id))
            .filter(|record| !record.bypassed)
            .map(|record| record.handle)
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.effects.values().filter(|r| !r.bypassed).count()
    }

    pub fn get(&self, effect: EffectId) -> EngineResult<&EffectRecord> {
        self.effects
            .get(&effect)
            .ok_or(EngineError::EffectNotFound(effect))
    }

    pub fn get_mut(&mut self, effect: EffectId) -> EngineResult<&mut EffectRecord> {
        self.effects
            .get_mut(&effect)
            .ok_or(EngineError::EffectNotFound(effect))
    }

    pub fn find_by_handle(&self, handle: EffectHandle) -> Option<&EffectRecord> {
        self.effects.values().find(|r| r.handle == handle)
    }

    /// Newest effect that is still processing
    pub fn most_recent_active(&self) -> Option<EffectId> {
        self.effects
            .values()
            .filter(|r| !r.bypassed)
            .max_by_key(|r| r.seq)
            .map(|r| r.id)
    }
}
