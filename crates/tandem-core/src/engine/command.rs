//! Lock-free command queue between the control plane and the audio thread
//!
//! The control side pushes [`EngineCommand`]s onto a single-producer
//! single-consumer `rtrb` ring; the block processor drains the ring at the
//! start of every block, so a command never takes effect mid-block. Reports
//! travel back the same way as [`RtEvent`]s on a second ring.
//!
//! # Real-Time Safety
//!
//! - Both rings are allocated once at engine construction.
//! - Push and pop are wait-free.
//! - Heap payloads ride inside `basedrop::Owned`/`Shared`, so whatever the
//!   audio thread drops is reclaimed on the collector thread.

use basedrop::Owned;

use super::automation::AutomationLane;
use super::snapshot::EffectHandle;
use super::strip::{CaptureTap, ScheduledSource};
use crate::effect::EffectUnit;
use crate::types::CollaboratorId;

/// Commands sent from the control thread to the audio thread
pub enum EngineCommand {
    // ─────────────────────────────────────────────────────────────
    // Effect arena
    // ─────────────────────────────────────────────────────────────
    /// Place a built effect into its arena slot
    InstallEffect {
        handle: EffectHandle,
        unit: Owned<EffectUnit>,
    },
    /// Drop the effect in a slot (the snapshot no longer references it)
    RetireEffect { handle: EffectHandle },
    /// Clear a fault flag so the effect processes again
    ClearFault { handle: EffectHandle },
    /// Post a parameter target; `rate` 1.0 applies immediately
    SetParameter {
        handle: EffectHandle,
        param: usize,
        value: f32,
        rate: f32,
    },

    // ─────────────────────────────────────────────────────────────
    // Automation
    // ─────────────────────────────────────────────────────────────
    /// Start playing an automation lane
    StartAutomation(Owned<AutomationLane>),

    // ─────────────────────────────────────────────────────────────
    // Transport
    // ─────────────────────────────────────────────────────────────
    /// Begin capturing a strip's input into a sample ring
    StartCapture {
        strip: usize,
        tap: Owned<CaptureTap>,
    },
    /// Stop capturing (drops the ring producer)
    StopCapture { strip: usize },
    /// Queue a clip source on a strip
    SchedulePlayback {
        strip: usize,
        source: ScheduledSource,
    },
    /// Start advancing scheduled sources from a transport frame
    StartPlayback { frame: u64 },
    /// Cancel every scheduled source
    StopPlayback,
    /// Return a strip to its initial state (capture, sources and ramps)
    ResetStrip { strip: usize },

    // ─────────────────────────────────────────────────────────────
    // Collaborators
    // ─────────────────────────────────────────────────────────────
    ConnectCollaborator {
        id: CollaboratorId,
        feed: Owned<rtrb::Consumer<f32>>,
        gain: f32,
    },
    SetCollaboratorGain { id: CollaboratorId, gain: f32 },
    DisconnectCollaborator { id: CollaboratorId },
}

/// Reports sent from the audio thread back to the control thread
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RtEvent {
    /// First block captured on a strip, at this transport frame
    CaptureStarted { strip: usize, frame: u64 },
    /// The strip captures nothing more; every captured block is in its ring
    CaptureStopped { strip: usize },
    /// A capture ring was full; at least one block was dropped
    CaptureOverflow { strip: usize },
    /// An effect produced non-finite output and was excluded
    EffectFaulted { handle: EffectHandle },
    /// An automation lane stopped after applying `ticks` control ticks
    AutomationFinished { lane: u64, cancelled: bool, ticks: u64 },
    /// A block took longer than the overrun threshold
    BlockOverrun {
        block: u64,
        elapsed_us: f32,
        budget_us: f32,
        active_effects: usize,
    },
}

/// Capacity of the command queue
///
/// Bulk operations (deleting a track with a full chain, starting playback
/// on many clips) send a burst of commands; 1024 leaves ample headroom.
pub const COMMAND_QUEUE_CAPACITY: usize = 1024;

/// Capacity of the report queue
pub const REPORT_QUEUE_CAPACITY: usize = 256;

/// Create the command channel (producer for control, consumer for audio)
pub fn command_channel() -> (rtrb::Producer<EngineCommand>, rtrb::Consumer<EngineCommand>) {
    rtrb::RingBuffer::new(COMMAND_QUEUE_CAPACITY)
}

/// Create the report channel (producer for audio, consumer for control)
pub fn report_channel() -> (rtrb::Producer<RtEvent>, rtrb::Consumer<RtEvent>) {
    rtrb::RingBuffer::new(REPORT_QUEUE_CAPACITY)
}

/// Command sender for the control thread
///
/// Wraps the lock-free producer. All operations are non-blocking.
pub struct CommandSender {
    producer: rtrb::Producer<EngineCommand>,
}

impl CommandSender {
    pub fn new(producer: rtrb::Producer<EngineCommand>) -> Self {
        Self { producer }
    }

    /// Queue a command, handing it back if the queue is full
    pub fn send(&mut self, cmd: EngineCommand) -> Result<(), EngineCommand> {
        self.producer.push(cmd).map_err(|e| match e {
            rtrb::PushError::Full(value) => value,
        })
    }

    /// Free slots left in the queue
    pub fn space(&self) -> usize {
        self.producer.slots()
    }
}
