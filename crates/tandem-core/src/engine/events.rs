//! Outbound engine events
//!
//! Every state change the control plane makes is announced as an
//! [`EngineEvent`]. Events are serde-serializable so collaborators can put
//! them on the wire as they are.

use crossbeam::channel::{self, Receiver, Sender};
use serde::Serialize;

use crate::types::{ClipId, CollaboratorId, EffectId, TrackId};

// ============================================================================
// Events
// ============================================================================

/// Level of one track in a telemetry frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrackLevel {
    pub track: TrackId,
    /// Peak since the previous frame, linear
    pub peak: f32,
}

/// Periodic meter and load report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Telemetry {
    /// Transport position in seconds
    pub position: f64,
    pub master_level: f32,
    pub tracks: Vec<TrackLevel>,
    /// Last block's processing time over its budget
    pub load: f32,
    /// Largest load since the previous frame
    pub peak_load: f32,
    pub overruns: u64,
}

/// Events broadcast to every subscriber
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum EngineEvent {
    // --- Tracks ---
    TrackCreated { track: TrackId, name: String },
    TrackDeleted { track: TrackId },
    TrackRenamed { track: TrackId, name: String },
    TrackVolumeChanged { track: TrackId, volume: f32 },
    TrackPanChanged { track: TrackId, pan: f32 },
    TrackMuted { track: TrackId, muted: bool },
    TrackSoloChanged { track: TrackId, solo: bool },
    InputConnected { track: TrackId },
    InputDisconnected { track: TrackId },

    // --- Transport ---
    RecordingStarted { track: TrackId },
    RecordingStopped {
        track: TrackId,
        clip: ClipId,
        /// Seconds
        duration: f64,
        peaks: Vec<f32>,
    },
    /// The capture ring filled up and audio was dropped
    CaptureOverflow { track: TrackId },
    PlaybackStarted { position: f64 },
    PlaybackStopped,

    // --- Effects ---
    EffectAdded {
        track: TrackId,
        effect: EffectId,
        kind: &'static str,
    },
    EffectRemoved { track: TrackId, effect: EffectId },
    EffectMoved {
        track: TrackId,
        effect: EffectId,
        index: usize,
    },
    EffectBypassed {
        effect: EffectId,
        bypassed: bool,
        /// Bypassed by the engine (fault or overload), not by a caller
        automatic: bool,
    },
    EffectParameterChanged {
        effect: EffectId,
        name: String,
        value: f32,
    },
    EffectFaulted { track: TrackId, effect: EffectId },
    AutomationFinished {
        automation: u64,
        effect: EffectId,
        cancelled: bool,
    },

    // --- Mix ---
    MasterVolumeChanged { volume: f32 },
    CollaboratorConnected { collaborator: CollaboratorId },
    CollaboratorDisconnected { collaborator: CollaboratorId },

    // --- Health ---
    BufferUnderrun {
        elapsed_ms: f32,
        budget_ms: f32,
        active_effects: usize,
    },
    DeviceError { message: String },
    Telemetry(Telemetry),
}

// ============================================================================
// Event Bus
// ============================================================================

/// Fan-out of engine events to any number of subscribers
///
/// Each subscriber gets its own unbounded channel; a subscriber that drops
/// its receiver is pruned on the next publish.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Vec<Sender<EngineEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a receiver for every event published from now on
    pub fn subscribe(&mut self) -> Receiver<EngineEvent> {
        let (tx, rx) = channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Subscribe, receiving `backlog` first
    ///
    /// Used for sticky conditions (a degraded device) that happened before
    /// anyone could listen.
    pub fn subscribe_with(&mut self, backlog: impl IntoIterator<Item = EngineEvent>) -> Receiver<EngineEvent> {
        let (tx, rx) = channel::unbounded();
        for event in backlog {
            let _ = tx.send(event);
        }
        self.subscribers.push(tx);
        rx
    }

    /// Publish an event to all subscribers
    pub fn publish(&mut self, event: EngineEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
