//! Realtime block processor
//!
//! [`BlockProcessor`] is everything that runs on the audio thread. Each call
//! to [`BlockProcessor::process`] handles exactly one block:
//!
//! 1. Pick up a newer mix snapshot if one was published
//! 2. Apply queued commands
//! 3. Advance automation lanes
//! 4. Per strip: load input, capture, mix clip sources, run the effect
//!    chain, then pan and mix into the stereo bus
//! 5. Mix collaborator inputs, apply the master gain, write the output
//! 6. Advance the transport and time the block
//!
//! # Real-Time Safety
//!
//! Every buffer, arena slot and source list is allocated when the processor
//! is built. Nothing here locks, logs or frees memory: whatever is dropped
//! was handed over inside `basedrop::Owned`/`Shared` and is reclaimed on
//! the collector thread.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use basedrop::{Owned, Shared, SharedCell};

use super::automation::{AutomationLane, LaneStep, MAX_AUTOMATION_LANES};
use super::collab::{CollaboratorInput, MAX_COLLABORATORS};
use super::command::{EngineCommand, RtEvent};
use super::meters::EngineAtomics;
use super::monitor::BlockTimer;
use super::snapshot::{EffectHandle, MixSnapshot};
use super::strip::Strip;
use crate::effect::EffectUnit;
use crate::types::{AudioBuffer, MAX_BLOCK_SIZE, MAX_CHANNELS};

/// An installed effect
struct ArenaEntry {
    generation: u32,
    unit: Owned<EffectUnit>,
    /// Produced non-finite output; skipped until the control side clears it
    faulted: bool,
}

/// Wiring handed to [`BlockProcessor::new`]
pub(crate) struct ProcessorParts {
    pub sample_rate: u32,
    pub max_tracks: usize,
    pub max_effects: usize,
    pub overrun_ratio: f32,
    pub commands: rtrb::Consumer<EngineCommand>,
    pub reports: rtrb::Producer<RtEvent>,
    pub snapshot: Arc<SharedCell<MixSnapshot>>,
    pub atomics: Arc<EngineAtomics>,
}

/// Audio-thread half of the engine
pub struct BlockProcessor {
    sample_rate: u32,
    commands: rtrb::Consumer<EngineCommand>,
    reports: rtrb::Producer<RtEvent>,
    snapshot_cell: Arc<SharedCell<MixSnapshot>>,
    snapshot: Shared<MixSnapshot>,
    atomics: Arc<EngineAtomics>,

    arena: Vec<Option<ArenaEntry>>,
    strips: Vec<Strip>,
    lanes: Vec<Owned<AutomationLane>>,
    collaborators: Vec<CollaboratorInput>,

    input: AudioBuffer,
    output: AudioBuffer,
    bus: AudioBuffer,
    scratch: AudioBuffer,

    master_gain: f32,
    playing: bool,
    timer: BlockTimer,
}

impl BlockProcessor {
    pub(crate) fn new(parts: ProcessorParts) -> Self {
        let snapshot = parts.snapshot.get();
        Self {
            sample_rate: parts.sample_rate,
            commands: parts.commands,
            reports: parts.reports,
            snapshot_cell: parts.snapshot,
            snapshot,
            atomics: parts.atomics,
            arena: (0..parts.max_effects).map(|_| None).collect(),
            strips: (0..parts.max_tracks).map(|_| Strip::new()).collect(),
            lanes: Vec::with_capacity(MAX_AUTOMATION_LANES),
            collaborators: Vec::with_capacity(MAX_COLLABORATORS),
            input: AudioBuffer::default(),
            output: AudioBuffer::default(),
            bus: AudioBuffer::default(),
            scratch: AudioBuffer::default(),
            master_gain: 0.0,
            playing: false,
            timer: BlockTimer::new(parts.overrun_ratio),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Process one block
    ///
    /// The block length is `output.frames()`; `input` holds the device
    /// input for the same span (shorter input is padded with silence).
    /// A mono `output` receives the average of the stereo mix.
    pub fn process(&mut self, input: &AudioBuffer, output: &mut AudioBuffer) {
        self.input.copy_from(input);
        self.output.set_shape(MAX_CHANNELS, output.frames());
        self.process_block();

        let frames = output.frames();
        if output.channels() == 1 {
            let (left, right) = (self.output.channel(0), self.output.channel(1));
            for (i, out) in output.channel_mut(0).iter_mut().enumerate().take(frames) {
                *out = (left[i] + right[i]) * 0.5;
            }
        } else {
            output.copy_from(&self.output);
        }
    }

    /// Process interleaved device buffers of any length
    ///
    /// Splits the span into blocks of at most `MAX_BLOCK_SIZE` frames. Input
    /// channels beyond the second are ignored; output channels beyond the
    /// second are silent.
    pub fn render_interleaved(
        &mut self,
        input: &[f32],
        in_channels: usize,
        output: &mut [f32],
        out_channels: usize,
    ) {
        if out_channels == 0 {
            return;
        }
        let total = output.len() / out_channels;
        let used_in = in_channels.min(MAX_CHANNELS);
        let mut done = 0;
        while done < total {
            let frames = (total - done).min(MAX_BLOCK_SIZE);

            self.input.set_shape(used_in.max(1), frames);
            self.input.clear();
            if in_channels > 0 {
                for ch in 0..used_in {
                    let samples = self.input.channel_mut(ch);
                    for (i, s) in samples.iter_mut().enumerate() {
                        let idx = (done + i) * in_channels + ch;
                        *s = input.get(idx).copied().unwrap_or(0.0);
                    }
                }
            }

            self.output.set_shape(MAX_CHANNELS, frames);
            self.process_block();

            for i in 0..frames {
                let base = (done + i) * out_channels;
                let frame = &mut output[base..base + out_channels];
                if out_channels == 1 {
                    frame[0] = (self.output.channel(0)[i] + self.output.channel(1)[i]) * 0.5;
                } else {
                    frame[0] = self.output.channel(0)[i];
                    frame[1] = self.output.channel(1)[i];
                    frame[2..].fill(0.0);
                }
            }
            done += frames;
        }
    }

    /// Render `self.input` into `self.output` (shape already set)
    fn process_block(&mut self) {
        let started = Instant::now();
        let frames = self.output.frames();

        self.refresh_snapshot();
        self.drain_commands();
        self.advance_automation(frames);

        self.bus.set_shape(MAX_CHANNELS, frames);
        self.bus.clear();

        let frame = self.atomics.transport_frame();
        let snapshot = &*self.snapshot;
        let mut active_effects = 0;
        for snap in &snapshot.strips {
            let Some(strip) = self.strips.get_mut(snap.strip) else {
                continue;
            };
            strip.load_input(snap, &self.input, frames);
            strip.capture(snap.strip, frame, &mut self.reports);
            if self.playing {
                strip.mix_sources();
            }
            active_effects += run_chain(
                &snap.chain,
                strip.block_mut(),
                &mut self.arena,
                &mut self.scratch,
                &mut self.reports,
            );
            let peak = strip.render_into(&mut self.bus, snap.gain, snap.pan);
            self.atomics.record_strip_peak(snap.strip, peak);
        }

        for collaborator in &mut self.collaborators {
            collaborator.mix_into(&mut self.bus);
        }

        // Master gain ramp
        let from = self.master_gain;
        let to = snapshot.master_gain;
        let step = 1.0 / frames.max(1) as f32;
        let mut peak = 0.0_f32;
        for ch in 0..MAX_CHANNELS {
            let src = self.bus.channel(ch);
            let dst = self.output.channel_mut(ch);
            for (i, (out, s)) in dst.iter_mut().zip(src).enumerate() {
                let gain = from + (to - from) * (i + 1) as f32 * step;
                *out = s * gain;
                peak = peak.max(out.abs());
            }
        }
        self.master_gain = to;
        self.atomics.record_master_peak(peak);

        if self.playing {
            self.atomics
                .transport_frame
                .fetch_add(frames as u64, Ordering::Relaxed);
        }

        self.timer.finish(
            started,
            frames,
            self.sample_rate,
            active_effects,
            &self.atomics,
            &mut self.reports,
        );
    }

    fn refresh_snapshot(&mut self) {
        if self.atomics.generation() != self.snapshot.generation {
            // Replacing drops the old snapshot reference; the collector frees it
            self.snapshot = self.snapshot_cell.get();
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.commands.pop() {
            match cmd {
                EngineCommand::InstallEffect { handle, unit } => {
                    if let Some(slot) = self.arena.get_mut(handle.slot as usize) {
                        *slot = Some(ArenaEntry {
                            generation: handle.generation,
                            unit,
                            faulted: false,
                        });
                    }
                }
                EngineCommand::RetireEffect { handle } => {
                    if let Some(slot) = self.arena.get_mut(handle.slot as usize) {
                        if slot.as_ref().is_some_and(|e| e.generation == handle.generation) {
                            *slot = None;
                        }
                    }
                }
                EngineCommand::ClearFault { handle } => {
                    if let Some(entry) = entry_mut(&mut self.arena, handle) {
                        entry.faulted = false;
                    }
                }
                EngineCommand::SetParameter {
                    handle,
                    param,
                    value,
                    rate,
                } => {
                    if let Some(entry) = entry_mut(&mut self.arena, handle) {
                        entry.unit.set_target(param, value, rate);
                    }
                }
                EngineCommand::StartAutomation(lane) => {
                    if self.lanes.len() < self.lanes.capacity() {
                        self.lanes.push(lane);
                    } else {
                        let _ = self.reports.push(RtEvent::AutomationFinished {
                            lane: lane.id(),
                            cancelled: true,
                            ticks: 0,
                        });
                    }
                }
                EngineCommand::StartCapture { strip, tap } => {
                    if let Some(strip) = self.strips.get_mut(strip) {
                        strip.start_capture(tap);
                    }
                }
                EngineCommand::StopCapture { strip } => {
                    if let Some(target) = self.strips.get_mut(strip) {
                        target.stop_capture();
                    }
                    let _ = self.reports.push(RtEvent::CaptureStopped { strip });
                }
                EngineCommand::SchedulePlayback { strip, source } => {
                    if let Some(strip) = self.strips.get_mut(strip) {
                        strip.schedule(source);
                    }
                }
                EngineCommand::StartPlayback { frame } => {
                    self.atomics.transport_frame.store(frame, Ordering::Relaxed);
                    self.atomics.playing.store(true, Ordering::Relaxed);
                    self.playing = true;
                }
                EngineCommand::StopPlayback => {
                    for strip in &mut self.strips {
                        strip.clear_sources();
                    }
                    self.atomics.playing.store(false, Ordering::Relaxed);
                    self.playing = false;
                }
                EngineCommand::ResetStrip { strip } => {
                    if let Some(strip) = self.strips.get_mut(strip) {
                        strip.reset();
                    }
                }
                EngineCommand::ConnectCollaborator { id, feed, gain } => {
                    if self.collaborators.len() < self.collaborators.capacity() {
                        self.collaborators.push(CollaboratorInput::new(id, feed, gain));
                    }
                }
                EngineCommand::SetCollaboratorGain { id, gain } => {
                    if let Some(c) = self.collaborators.iter_mut().find(|c| c.id == id) {
                        c.set_gain(gain);
                    }
                }
                EngineCommand::DisconnectCollaborator { id } => {
                    if let Some(pos) = self.collaborators.iter().position(|c| c.id == id) {
                        self.collaborators.swap_remove(pos);
                    }
                }
            }
        }
    }

    fn advance_automation(&mut self, frames: usize) {
        let mut i = 0;
        while i < self.lanes.len() {
            let lane = &mut self.lanes[i];
            let step = match lane.advance(frames, self.sample_rate) {
                LaneStep::Apply(value) => match entry_mut(&mut self.arena, lane.handle()) {
                    Some(entry) => {
                        entry.unit.set_target(lane.param(), value, lane.rate());
                        LaneStep::Apply(value)
                    }
                    // The effect was removed underneath the lane
                    None => LaneStep::Finished { cancelled: true },
                },
                step => step,
            };

            if let LaneStep::Finished { cancelled } = step {
                let _ = self.reports.push(RtEvent::AutomationFinished {
                    lane: lane.id(),
                    cancelled,
                    ticks: lane.ticks_applied(),
                });
                self.lanes.swap_remove(i);
            } else {
                i += 1;
            }
        }
    }
}

fn entry_mut(arena: &mut [Option<ArenaEntry>], handle: EffectHandle) -> Option<&mut ArenaEntry> {
    arena
        .get_mut(handle.slot as usize)?
        .as_mut()
        .filter(|e| e.generation == handle.generation)
}

/// Run a chain over a block; returns how many effects processed
///
/// An effect whose output is not finite is rolled back: the block is
/// restored to what the effect received, the effect is reset and excluded
/// until the control side clears the fault.
fn run_chain(
    chain: &[EffectHandle],
    block: &mut AudioBuffer,
    arena: &mut [Option<ArenaEntry>],
    scratch: &mut AudioBuffer,
    reports: &mut rtrb::Producer<RtEvent>,
) -> usize {
    let mut active = 0;
    for &handle in chain {
        let Some(entry) = entry_mut(arena, handle) else {
            continue;
        };
        if entry.faulted {
            continue;
        }
        scratch.copy_from(block);
        entry.unit.tick_parameters();
        entry.unit.process(block);
        if !block.is_finite() {
            block.copy_from(scratch);
            entry.unit.reset();
            entry.faulted = true;
            let _ = reports.push(RtEvent::EffectFaulted { handle });
        }
        active += 1;
    }
    active
}
