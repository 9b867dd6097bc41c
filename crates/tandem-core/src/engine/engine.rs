//! Engine facade - the control plane
//!
//! [`Engine`] owns every control-side component (track graph, effect chains,
//! automation, transport, performance monitor) and is the only thing that
//! talks to the audio thread. Its counterpart, the [`BlockProcessor`], is
//! either handed to the caller ([`Engine::new`]) or moved into an audio
//! backend ([`Engine::start`]).
//!
//! Every operation validates first and mutates second: a call that returns
//! an error has changed nothing. Structural changes end with a freshly
//! published [`MixSnapshot`]; per-effect work travels as [`EngineCommand`]s.
//! Whatever the audio thread reports back is picked up by [`Engine::poll`].

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use basedrop::{Handle, Owned, Shared, SharedCell};
use crossbeam::channel::Receiver;

use super::automation::{
    sample_curve, AutomationEngine, AutomationHandle, AutomationOptions, AutomationRecording,
    MAX_AUTOMATION_LANES,
};
use super::chain::{ChainManager, EffectRecord};
use super::collab::{feed_capacity, CollaboratorFeed, MAX_COLLABORATORS};
use super::command::{command_channel, report_channel, CommandSender, EngineCommand, RtEvent};
use super::events::{EngineEvent, EventBus, Telemetry, TrackLevel};
use super::gc::gc_handle;
use super::meters::EngineAtomics;
use super::monitor::{PerformanceMonitor, PerformanceStats};
use super::processor::{BlockProcessor, ProcessorParts};
use super::snapshot::{EffectHandle, InputRoute, MixSnapshot};
use super::strip::CaptureTap;
use super::track::{Track, TrackConfig, TrackGraph};
use super::transport::{TransportController, TransportState};
use crate::audio::{start_audio_system, AudioBackend, AudioHandle, DeviceError, NullBackend};
use crate::clip::Clip;
use crate::config::EngineConfig;
use crate::effect::{smoothing_rate, EffectKind, EffectUnit, ParameterDescriptor};
use crate::error::{EngineError, EngineResult};
use crate::types::{ClipId, CollaboratorId, EffectId, TrackId, MAX_CHANNELS};

/// Longest [`Engine::stop_recording`] waits for the audio thread
const CAPTURE_STOP_TIMEOUT: Duration = Duration::from_millis(250);

/// How a parameter change is applied
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterUpdate {
    /// Glide to the new value instead of jumping (ignored for discrete parameters)
    pub smooth: bool,
    /// Smoothing time constant in seconds
    pub transition_secs: f32,
}

impl Default for ParameterUpdate {
    fn default() -> Self {
        Self {
            smooth: true,
            transition_secs: 0.02,
        }
    }
}

impl ParameterUpdate {
    pub fn immediate() -> Self {
        Self {
            smooth: false,
            transition_secs: 0.0,
        }
    }
}

/// The control-plane handle to a running engine
pub struct Engine {
    config: EngineConfig,
    gc: Handle,

    commands: CommandSender,
    reports: rtrb::Consumer<RtEvent>,
    snapshot: Arc<SharedCell<MixSnapshot>>,
    atomics: Arc<EngineAtomics>,
    generation: u64,

    tracks: TrackGraph,
    chains: ChainManager,
    automation: AutomationEngine,
    transport: TransportController,
    monitor: PerformanceMonitor,

    /// Connected collaborators and their gains
    collaborators: HashMap<CollaboratorId, f32>,
    next_collaborator: u32,

    events: EventBus,
    recording_available: bool,
    device_error: Option<DeviceError>,
    audio: Option<AudioHandle>,
    last_telemetry: Instant,
}

impl Engine {
    /// Build an engine and the processor that renders it
    ///
    /// The caller drives the processor, from its own audio callback or from
    /// tests. Recording is available; the caller supplies the input.
    pub fn new(config: EngineConfig) -> EngineResult<(Self, BlockProcessor)> {
        config.validate()?;

        let gc = gc_handle();
        let (command_tx, command_rx) = command_channel();
        let (report_tx, report_rx) = report_channel();
        let tracks = TrackGraph::new(config.max_tracks);
        let snapshot = Arc::new(SharedCell::new(Shared::new(
            &gc,
            MixSnapshot {
                generation: 0,
                strips: Vec::new(),
                master_gain: tracks.master_volume(),
            },
        )));
        let atomics = Arc::new(EngineAtomics::new(config.max_tracks));

        let processor = BlockProcessor::new(ProcessorParts {
            sample_rate: config.sample_rate,
            max_tracks: config.max_tracks,
            max_effects: config.max_effects,
            overrun_ratio: config.overrun_ratio,
            commands: command_rx,
            reports: report_tx,
            snapshot: Arc::clone(&snapshot),
            atomics: Arc::clone(&atomics),
        });

        log::info!(
            "Engine::new: {}Hz, {} frames/block, {} tracks, {} effects",
            config.sample_rate,
            config.block_size,
            config.max_tracks,
            config.max_effects
        );

        let engine = Self {
            gc,
            commands: CommandSender::new(command_tx),
            reports: report_rx,
            snapshot,
            atomics,
            generation: 0,
            tracks,
            chains: ChainManager::new(config.max_effects),
            automation: AutomationEngine::new(MAX_AUTOMATION_LANES),
            transport: TransportController::new(),
            monitor: PerformanceMonitor::new(config.auto_bypass_after_overruns),
            collaborators: HashMap::new(),
            next_collaborator: 1,
            events: EventBus::new(),
            recording_available: true,
            device_error: None,
            audio: None,
            last_telemetry: Instant::now(),
            config,
        };
        Ok((engine, processor))
    }

    /// Build an engine and start it on `backend`
    ///
    /// Waits at most `audio.ready_timeout_ms` for the device. If the device
    /// fails or never reports ready, the engine still starts on the null
    /// backend with recording disabled, and every subscriber receives a
    /// `DeviceError` event first.
    pub fn start(config: EngineConfig, backend: Box<dyn AudioBackend>) -> EngineResult<Self> {
        let timeout = config.audio.ready_timeout();
        let (mut engine, processor) = Self::new(config.clone())?;

        match start_audio_system(backend, processor, timeout) {
            Ok(handle) => {
                engine.recording_available = handle.has_input();
                if !engine.recording_available {
                    log::warn!("Engine::start: no input stream, recording disabled");
                }
                engine.audio = Some(handle);
                Ok(engine)
            }
            Err(e) => {
                log::warn!("Engine::start: audio device unavailable ({}), running without one", e);
                // The processor went down with the failed backend
                let (mut degraded, processor) = Self::new(config)?;
                let fallback = Box::new(NullBackend::new(degraded.config.block_size));
                degraded.audio = Some(start_audio_system(fallback, processor, timeout)?);
                degraded.recording_available = false;
                degraded.device_error = Some(e);
                Ok(degraded)
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Tracks
    // ─────────────────────────────────────────────────────────────

    pub fn create_track(&mut self, config: TrackConfig) -> EngineResult<TrackId> {
        if let Some(route) = config.input {
            check_route(route)?;
        }
        let track = self.tracks.create(config)?;
        let (id, name, strip) = (track.id(), track.name().to_string(), track.strip());

        self.publish();
        log::info!("create_track: {} {:?} on strip {}", id, name, strip);
        self.events.publish(EngineEvent::TrackCreated { track: id, name });
        Ok(id)
    }

    /// Delete a track, discarding any take in progress and its whole chain
    pub fn delete_track(&mut self, id: TrackId) -> EngineResult<()> {
        let strip = self.tracks.get(id)?.strip();

        if self.transport.abort(id).is_some() {
            log::info!("delete_track: discarding take on {}", id);
        }
        let retired = self.chains.remove_track(id);
        for record in &retired {
            self.automation.cancel_for_effect(record.id);
        }
        self.tracks.remove(id)?;

        self.publish();
        for record in &retired {
            self.send_or_warn(EngineCommand::RetireEffect { handle: record.handle }, "effect retirement");
        }
        // Also stops capture and drops scheduled sources
        self.send_or_warn(EngineCommand::ResetStrip { strip }, "strip reset");

        log::info!("delete_track: {} ({} effects retired)", id, retired.len());
        self.events.publish(EngineEvent::TrackDeleted { track: id });
        Ok(())
    }

    pub fn rename_track(&mut self, id: TrackId, name: impl Into<String>) -> EngineResult<()> {
        let name = name.into();
        self.tracks.rename(id, name.clone())?;
        self.events.publish(EngineEvent::TrackRenamed { track: id, name });
        Ok(())
    }

    /// Returns the volume after clamping to [0, 1]
    pub fn set_volume(&mut self, id: TrackId, volume: f32) -> EngineResult<f32> {
        let volume = self.tracks.set_volume(id, volume)?;
        self.publish();
        log::debug!("set_volume: {} -> {:.3}", id, volume);
        self.events
            .publish(EngineEvent::TrackVolumeChanged { track: id, volume });
        Ok(volume)
    }

    /// Returns the pan after clamping to [-1, 1]
    pub fn set_pan(&mut self, id: TrackId, pan: f32) -> EngineResult<f32> {
        let pan = self.tracks.set_pan(id, pan)?;
        self.publish();
        log::debug!("set_pan: {} -> {:.3}", id, pan);
        self.events.publish(EngineEvent::TrackPanChanged { track: id, pan });
        Ok(pan)
    }

    pub fn mute(&mut self, id: TrackId, muted: bool) -> EngineResult<()> {
        self.tracks.set_muted(id, muted)?;
        self.publish();
        log::debug!("mute: {} -> {}", id, muted);
        self.events.publish(EngineEvent::TrackMuted { track: id, muted });
        Ok(())
    }

    pub fn solo(&mut self, id: TrackId, solo: bool) -> EngineResult<()> {
        self.tracks.set_solo(id, solo)?;
        self.publish();
        log::debug!("solo: {} -> {}", id, solo);
        self.events.publish(EngineEvent::TrackSoloChanged { track: id, solo });
        Ok(())
    }

    pub fn connect_input(&mut self, id: TrackId, route: InputRoute) -> EngineResult<()> {
        check_route(route)?;
        self.ensure_not_recording(id, "change input")?;
        self.tracks.set_input(id, Some(route))?;
        self.publish();
        log::info!("connect_input: {} <- {:?}", id, route);
        self.events.publish(EngineEvent::InputConnected { track: id });
        Ok(())
    }

    pub fn disconnect_input(&mut self, id: TrackId) -> EngineResult<()> {
        self.ensure_not_recording(id, "disconnect input")?;
        self.tracks.set_input(id, None)?;
        self.publish();
        log::info!("disconnect_input: {}", id);
        self.events.publish(EngineEvent::InputDisconnected { track: id });
        Ok(())
    }

    /// Returns the volume after clamping to [0, 1]
    pub fn set_master_volume(&mut self, volume: f32) -> EngineResult<f32> {
        let volume = self.tracks.set_master_volume(volume);
        self.publish();
        log::debug!("set_master_volume: {:.3}", volume);
        self.events.publish(EngineEvent::MasterVolumeChanged { volume });
        Ok(volume)
    }

    // ─────────────────────────────────────────────────────────────
    // Effects
    // ─────────────────────────────────────────────────────────────

    /// Append an effect to a track's chain
    ///
    /// `kind` is an effect key such as `"lowpass"` or `"parametric_eq"`;
    /// parameters not named in `params` start at their defaults.
    pub fn add_effect(&mut self, track: TrackId, kind: &str, params: &[(&str, f32)]) -> EngineResult<EffectId> {
        self.tracks.get(track)?;
        let kind = EffectKind::from_key(kind).ok_or_else(|| EngineError::UnknownEffectKind(kind.to_string()))?;
        let values = ChainManager::resolve_values(kind, params)?;

        let record = self.chains.insert(track, kind, values.clone())?;
        let (id, handle) = (record.id, record.handle);

        let unit = Owned::new(&self.gc, EffectUnit::new(kind, self.config.sample_rate as f32, &values));
        if let Err(e) = self.send(EngineCommand::InstallEffect { handle, unit }) {
            let _ = self.chains.remove(track, id);
            return Err(e);
        }
        self.publish();

        log::info!("add_effect: {} {} on {} (slot {})", kind.key(), id, track, handle.slot);
        self.events.publish(EngineEvent::EffectAdded {
            track,
            effect: id,
            kind: kind.key(),
        });
        Ok(id)
    }

    pub fn remove_effect(&mut self, track: TrackId, effect: EffectId) -> EngineResult<()> {
        self.tracks.get(track)?;
        let record = self.chains.remove(track, effect)?;
        self.automation.cancel_for_effect(effect);

        // The new snapshot drops the handle before its slot is retired
        self.publish();
        self.send_or_warn(EngineCommand::RetireEffect { handle: record.handle }, "effect retirement");

        log::info!("remove_effect: {} from {}", effect, track);
        self.events.publish(EngineEvent::EffectRemoved { track, effect });
        Ok(())
    }

    /// Take an effect out of (or back into) processing
    ///
    /// Bypassing keeps the DSP state allocated. Un-bypassing a faulted
    /// effect clears the fault.
    pub fn bypass_effect(&mut self, effect: EffectId, bypassed: bool) -> EngineResult<()> {
        let record = self.chains.get(effect)?;
        let (handle, faulted) = (record.handle, record.is_faulted());
        if !bypassed && faulted {
            self.send(EngineCommand::ClearFault { handle })?;
        }
        if self.chains.set_bypassed(effect, bypassed)? {
            self.publish();
            log::info!("bypass_effect: {} -> {}", effect, bypassed);
            self.events.publish(EngineEvent::EffectBypassed {
                effect,
                bypassed,
                automatic: false,
            });
        }
        Ok(())
    }

    /// Move an effect within its chain; returns the index it landed on
    pub fn move_effect(&mut self, track: TrackId, effect: EffectId, index: usize) -> EngineResult<usize> {
        self.tracks.get(track)?;
        let index = self.chains.move_to(track, effect, index)?;
        self.publish();
        log::debug!("move_effect: {} on {} to {}", effect, track, index);
        self.events.publish(EngineEvent::EffectMoved { track, effect, index });
        Ok(index)
    }

    // ─────────────────────────────────────────────────────────────
    // Parameters and automation
    // ─────────────────────────────────────────────────────────────

    pub fn set_parameter(
        &mut self,
        effect: EffectId,
        name: &str,
        value: f32,
        update: ParameterUpdate,
    ) -> EngineResult<()> {
        let record = self.chains.get(effect)?;
        let (kind, handle) = (record.kind, record.handle);
        let index = ChainManager::param_index(kind, name)?;
        ChainManager::check_value(kind, index, value)?;

        let spec = &kind.params()[index];
        let rate = if update.smooth && !spec.discrete {
            smoothing_rate(self.config.block_secs(), update.transition_secs)
        } else {
            1.0
        };
        self.send(EngineCommand::SetParameter {
            handle,
            param: index,
            value,
            rate,
        })?;
        self.chains.set_target(effect, index, value, rate)?;
        self.automation.record(effect, spec.name, value);

        log::debug!("set_parameter: {}.{} -> {} (rate {:.4})", effect, spec.name, value, rate);
        self.events.publish(EngineEvent::EffectParameterChanged {
            effect,
            name: spec.name.to_string(),
            value,
        });
        Ok(())
    }

    /// Play a curve on a parameter
    ///
    /// The curve's points are spread evenly over `options.duration_secs` and
    /// resampled at the control rate. Every point must be in range.
    pub fn automate_parameter(
        &mut self,
        effect: EffectId,
        name: &str,
        curve: &[f32],
        options: AutomationOptions,
    ) -> EngineResult<AutomationHandle> {
        let kind = self.chains.get(effect)?.kind;
        let index = ChainManager::param_index(kind, name)?;
        for &point in curve {
            ChainManager::check_value(kind, index, point)?;
        }
        let values = sample_curve(curve, options.duration_secs)?;
        let rate = smoothing_rate(self.config.block_secs(), options.transition_secs);
        let ticks = values.len();

        let automation = self.start_lane(effect, index, values, options.looping, rate, 0)?;
        log::info!(
            "automate_parameter: lane {} on {}.{} ({} ticks{})",
            automation.id(),
            effect,
            name,
            ticks,
            if options.looping { ", looping" } else { "" }
        );
        Ok(automation)
    }

    pub fn cancel_automation(&mut self, automation: &AutomationHandle) -> EngineResult<()> {
        self.automation.cancel(automation.id())?;
        log::debug!("cancel_automation: lane {}", automation.id());
        Ok(())
    }

    /// Start capturing every applied parameter value
    pub fn start_automation_recording(&mut self) -> EngineResult<()> {
        if self.automation.is_recording() {
            log::warn!("start_automation_recording: discarding the unfinished recording");
        }
        self.automation.start_recording();
        Ok(())
    }

    pub fn stop_automation_recording(&mut self) -> EngineResult<AutomationRecording> {
        let recording = self
            .automation
            .stop_recording()
            .ok_or(EngineError::InvalidTransition {
                action: "stop automation recording",
                state: TransportState::Idle.as_str(),
            })?;
        log::info!(
            "stop_automation_recording: {} points over {:.2}s",
            recording.points.len(),
            recording.duration_secs
        );
        Ok(recording)
    }

    /// Replay a recording, one lane per (effect, parameter)
    ///
    /// Each lane starts at its first point's offset from now. Every lane is
    /// checked before any starts.
    pub fn replay_automation(&mut self, recording: &AutomationRecording) -> EngineResult<Vec<AutomationHandle>> {
        let mut lanes = Vec::new();
        for lane in recording.lanes() {
            let kind = self.chains.get(lane.effect)?.kind;
            let index = ChainManager::param_index(kind, &lane.parameter)?;
            lanes.push((lane, index));
        }
        if self.automation.active_count() + lanes.len() > MAX_AUTOMATION_LANES {
            return Err(EngineError::AutomationLimit {
                limit: MAX_AUTOMATION_LANES,
            });
        }

        let rate = smoothing_rate(self.config.block_secs(), AutomationOptions::default().transition_secs);
        let sample_rate = self.config.sample_rate as f64;
        let mut handles = Vec::with_capacity(lanes.len());
        for (lane, index) in lanes {
            let delay = (lane.start_secs.max(0.0) * sample_rate).round() as u64;
            handles.push(self.start_lane(lane.effect, index, lane.values, false, rate, delay)?);
        }
        log::info!("replay_automation: {} lanes", handles.len());
        Ok(handles)
    }

    // ─────────────────────────────────────────────────────────────
    // Transport
    // ─────────────────────────────────────────────────────────────

    /// Arm a take; the track reports `RecordingStarted` once audio arrives
    pub fn start_recording(&mut self, track: TrackId) -> EngineResult<()> {
        let t = self.tracks.get(track)?;
        if !self.recording_available {
            let reason = self
                .device_error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no input stream".to_string());
            return Err(EngineError::RecordingUnavailable(reason));
        }
        if t.input().is_none() {
            return Err(EngineError::NoInputConnected(track));
        }
        if let Some(state) = self.transport.recording_state(track) {
            return Err(EngineError::InvalidTransition {
                action: "start recording",
                state: state.as_str(),
            });
        }

        let (strip, channels) = (t.strip(), t.channels());
        let frames = (self.config.sample_rate as f32 * self.config.capture_ring_secs).ceil() as usize;
        let (producer, consumer) = rtrb::RingBuffer::new(frames.max(1) * channels);
        let frame = self.atomics.transport_frame();

        let tap = Owned::new(&self.gc, CaptureTap::new(producer, channels));
        self.send(EngineCommand::StartCapture { strip, tap })?;
        self.transport.begin_recording(track, strip, consumer, channels, frame)?;

        log::info!(
            "start_recording: {} armed ({} ch, {:.1}s ring)",
            track,
            channels,
            self.config.capture_ring_secs
        );
        Ok(())
    }

    /// Finish a take and attach it to the track as a clip
    ///
    /// The take ends at the block boundary where the audio thread picks up
    /// the stop. Blocks rendered before that point, including one in flight
    /// when this is called, are part of the clip.
    pub fn stop_recording(&mut self, track: TrackId) -> EngineResult<ClipId> {
        let strip = self.tracks.get(track)?.strip();
        if !self.transport.is_recording(track) {
            return Err(EngineError::InvalidTransition {
                action: "stop recording",
                state: TransportState::Idle.as_str(),
            });
        }
        self.send(EngineCommand::StopCapture { strip })?;
        self.await_capture_stop(strip);
        let session = self.transport.finish_recording(track)?;

        let overflowed = session.overflowed();
        let start_secs = session.start_frame() as f64 / self.config.sample_rate as f64;
        let audio = session.into_audio(self.config.sample_rate);
        let id = self.transport.next_clip_id();
        let clip = Clip::new(&self.gc, id, audio, start_secs, self.config.peak_points);
        let (duration, peaks) = (clip.duration_secs(), clip.peaks().to_vec());
        self.tracks.get_mut(track)?.push_clip(clip);

        // A stereo take turns a mono strip stereo
        self.publish();

        if overflowed {
            log::warn!("stop_recording: take on {} lost audio to a full capture ring", track);
        }
        log::info!("stop_recording: {} -> {} ({:.3}s)", track, id, duration);
        self.events.publish(EngineEvent::RecordingStopped {
            track,
            clip: id,
            duration,
            peaks,
        });
        Ok(id)
    }

    /// Wait until the audio thread has seen `StopCapture` for `strip`.
    ///
    /// A block being rendered while the stop is sent still lands in the
    /// capture ring; the acknowledgement comes after it. A processor that
    /// renders nothing for a few block periods has nothing in flight, so the
    /// wait ends there, and never runs past [`CAPTURE_STOP_TIMEOUT`].
    fn await_capture_stop(&mut self, strip: usize) {
        let started = Instant::now();
        let stall = Duration::from_secs_f32(self.config.block_secs() * 3.0);
        let mut blocks = self.blocks_processed();
        let mut last_block = started;
        loop {
            while let Ok(report) = self.reports.pop() {
                if report == (RtEvent::CaptureStopped { strip }) {
                    return;
                }
                self.handle_report(report);
            }
            let now = Instant::now();
            let processed = self.blocks_processed();
            if processed != blocks {
                blocks = processed;
                last_block = now;
            } else if now.duration_since(last_block) >= stall {
                log::debug!("await_capture_stop: processor idle, strip {} has nothing in flight", strip);
                return;
            }
            if now.duration_since(started) >= CAPTURE_STOP_TIMEOUT {
                log::warn!("await_capture_stop: no acknowledgement from strip {}", strip);
                return;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Play every clip from `position_secs`
    pub fn start_playback(&mut self, position_secs: f64) -> EngineResult<()> {
        if self.transport.is_playing() {
            return Err(EngineError::InvalidTransition {
                action: "start playback",
                state: TransportState::Playing.as_str(),
            });
        }
        let position = if position_secs.is_finite() {
            position_secs.max(0.0)
        } else {
            0.0
        };
        let sample_rate = self.config.sample_rate;

        let sources = TransportController::plan_playback(
            self.tracks.iter().flat_map(|track| {
                track
                    .clips()
                    .iter()
                    .map(move |clip| (track.strip(), clip.start_secs(), clip.end_secs(), clip.audio()))
            }),
            position,
            sample_rate,
        );
        if sources.len() + 1 > self.commands.space() {
            return Err(EngineError::QueueFull);
        }

        let scheduled = sources.len();
        for (strip, source) in sources {
            self.send(EngineCommand::SchedulePlayback { strip, source })?;
        }
        let frame = (position * sample_rate as f64).round() as u64;
        self.send(EngineCommand::StartPlayback { frame })?;
        self.transport.start_playback()?;

        log::info!("start_playback: {:.3}s, {} clips scheduled", position, scheduled);
        self.events.publish(EngineEvent::PlaybackStarted { position });
        Ok(())
    }

    pub fn stop_playback(&mut self) -> EngineResult<()> {
        if !self.transport.is_playing() {
            return Err(EngineError::InvalidTransition {
                action: "stop playback",
                state: self.transport.state().as_str(),
            });
        }
        self.send(EngineCommand::StopPlayback)?;
        self.transport.stop_playback()?;
        log::info!("stop_playback: at {:.3}s", self.position_secs());
        self.events.publish(EngineEvent::PlaybackStopped);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // Collaborators
    // ─────────────────────────────────────────────────────────────

    /// Add a remote input mixed into the master bus
    ///
    /// The returned feed is the writer end for the collaborator's decoded,
    /// interleaved stereo audio.
    pub fn connect_collaborator(&mut self, gain: f32) -> EngineResult<(CollaboratorId, CollaboratorFeed)> {
        if self.collaborators.len() >= MAX_COLLABORATORS {
            return Err(EngineError::TooManyCollaborators {
                limit: MAX_COLLABORATORS,
            });
        }
        let gain = clamp_gain(gain);
        let id = CollaboratorId(self.next_collaborator);
        let capacity = feed_capacity(self.config.sample_rate, self.config.collaborator_ring_secs);
        let (producer, consumer) = rtrb::RingBuffer::new(capacity);

        let feed = Owned::new(&self.gc, consumer);
        self.send(EngineCommand::ConnectCollaborator { id, feed, gain })?;
        self.next_collaborator += 1;
        self.collaborators.insert(id, gain);

        log::info!("connect_collaborator: {} at gain {:.2}", id, gain);
        self.events
            .publish(EngineEvent::CollaboratorConnected { collaborator: id });
        Ok((id, CollaboratorFeed::new(producer)))
    }

    pub fn set_collaborator_gain(&mut self, id: CollaboratorId, gain: f32) -> EngineResult<()> {
        if !self.collaborators.contains_key(&id) {
            return Err(EngineError::CollaboratorNotFound(id));
        }
        let gain = clamp_gain(gain);
        self.send(EngineCommand::SetCollaboratorGain { id, gain })?;
        self.collaborators.insert(id, gain);
        Ok(())
    }

    /// Remove one remote input; the rest of the mix is untouched
    pub fn disconnect_collaborator(&mut self, id: CollaboratorId) -> EngineResult<()> {
        if !self.collaborators.contains_key(&id) {
            return Err(EngineError::CollaboratorNotFound(id));
        }
        self.send(EngineCommand::DisconnectCollaborator { id })?;
        self.collaborators.remove(&id);
        log::info!("disconnect_collaborator: {}", id);
        self.events
            .publish(EngineEvent::CollaboratorDisconnected { collaborator: id });
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // Housekeeping
    // ─────────────────────────────────────────────────────────────

    /// Process everything the audio thread reported
    ///
    /// Call regularly (every few milliseconds to tens of milliseconds): it
    /// moves captured audio out of the capture rings, turns realtime reports
    /// into events, and emits telemetry at the configured interval.
    pub fn poll(&mut self) {
        while let Ok(report) = self.reports.pop() {
            self.handle_report(report);
        }
        self.transport.drain_all();

        let interval = Duration::from_millis(self.config.telemetry_interval_ms);
        if self.last_telemetry.elapsed() >= interval {
            self.last_telemetry = Instant::now();
            let telemetry = self.take_telemetry();
            self.events.publish(EngineEvent::Telemetry(telemetry));
        }
    }

    /// Receive every event published from now on
    pub fn subscribe(&mut self) -> Receiver<EngineEvent> {
        let backlog = self.device_error.as_ref().map(|e| EngineEvent::DeviceError {
            message: e.to_string(),
        });
        self.events.subscribe_with(backlog)
    }

    fn handle_report(&mut self, report: RtEvent) {
        match report {
            RtEvent::CaptureStarted { strip, frame } => {
                if let Some(track) = self.transport.capture_started(strip, frame) {
                    log::info!("poll: {} recording from frame {}", track, frame);
                    self.events.publish(EngineEvent::RecordingStarted { track });
                }
            }
            RtEvent::CaptureOverflow { strip } => {
                if let Some(track) = self.transport.capture_overflow(strip) {
                    log::warn!("poll: capture ring on {} overflowed", track);
                    self.events.publish(EngineEvent::CaptureOverflow { track });
                }
            }
            // Only meaningful while a stop is being awaited
            RtEvent::CaptureStopped { .. } => {}
            RtEvent::EffectFaulted { handle } => self.on_effect_fault(handle),
            RtEvent::AutomationFinished { lane, cancelled, ticks } => {
                if let Some(effect) = self.automation.finished(lane, ticks) {
                    log::debug!("poll: lane {} finished after {} ticks (cancelled: {})", lane, ticks, cancelled);
                    self.events.publish(EngineEvent::AutomationFinished {
                        automation: lane,
                        effect,
                        cancelled,
                    });
                }
            }
            RtEvent::BlockOverrun {
                block,
                elapsed_us,
                budget_us,
                active_effects,
            } => {
                self.events.publish(EngineEvent::BufferUnderrun {
                    elapsed_ms: elapsed_us / 1000.0,
                    budget_ms: budget_us / 1000.0,
                    active_effects,
                });
                if self.monitor.record_overrun(block) {
                    self.shed_load();
                }
            }
        }
    }

    fn on_effect_fault(&mut self, handle: EffectHandle) {
        // Stale handles belong to effects that are already gone
        let Some(record) = self.chains.find_by_handle(handle) else {
            return;
        };
        let (effect, track) = (record.id, record.track);
        if self.chains.set_faulted(effect).is_err() {
            return;
        }
        self.publish();

        log::warn!("poll: {} on {} produced non-finite output, bypassed", effect, track);
        self.events.publish(EngineEvent::EffectFaulted { track, effect });
        self.events.publish(EngineEvent::EffectBypassed {
            effect,
            bypassed: true,
            automatic: true,
        });
    }

    /// Bypass the newest active effect after repeated overruns
    fn shed_load(&mut self) {
        let Some(effect) = self.chains.most_recent_active() else {
            return;
        };
        if self.chains.set_bypassed(effect, true).is_err() {
            return;
        }
        self.publish();

        log::warn!(
            "poll: {} consecutive overruns, bypassing {}",
            self.config.auto_bypass_after_overruns.unwrap_or(0),
            effect
        );
        self.events.publish(EngineEvent::EffectBypassed {
            effect,
            bypassed: true,
            automatic: true,
        });
    }

    fn take_telemetry(&self) -> Telemetry {
        Telemetry {
            position: self.position_secs(),
            master_level: self.atomics.take_master_peak(),
            tracks: self
                .tracks
                .iter()
                .map(|track| TrackLevel {
                    track: track.id(),
                    peak: self.atomics.take_strip_peak(track.strip()),
                })
                .collect(),
            load: self.atomics.last_load(),
            peak_load: self.atomics.take_peak_load(),
            overruns: self.atomics.overruns.load(Ordering::Relaxed),
        }
    }

    /// Start a lane on an effect parameter, recording it if automation
    /// recording is on
    fn start_lane(
        &mut self,
        effect: EffectId,
        param: usize,
        values: Vec<f32>,
        looping: bool,
        rate: f32,
        delay_frames: u64,
    ) -> EngineResult<AutomationHandle> {
        let record = self.chains.get(effect)?;
        let (handle, name) = (record.handle, record.kind.params()[param].name);
        let last = values.last().copied();
        let recorded = self.automation.is_recording().then(|| values.clone());

        let (automation, lane) = self
            .automation
            .prepare(effect, handle, param, values, looping, rate, delay_frames)?;
        let lane = Owned::new(&self.gc, lane);
        if let Err(e) = self.send(EngineCommand::StartAutomation(lane)) {
            self.automation.abandon(automation.id());
            return Err(e);
        }

        if let Some(values) = recorded {
            self.automation
                .record_lane(automation.id(), effect, name, &values, looping);
        }
        if let (false, Some(last)) = (looping, last) {
            self.chains.set_target(effect, param, last, rate)?;
        }
        Ok(automation)
    }

    fn ensure_not_recording(&self, track: TrackId, action: &'static str) -> EngineResult<()> {
        match self.transport.recording_state(track) {
            Some(state) => Err(EngineError::InvalidTransition {
                action,
                state: state.as_str(),
            }),
            None => Ok(()),
        }
    }

    /// Build and publish a snapshot of the current graph
    fn publish(&mut self) {
        self.generation += 1;
        let snapshot = MixSnapshot {
            generation: self.generation,
            strips: self.tracks.strip_snapshots(&self.chains),
            master_gain: self.tracks.master_volume(),
        };
        self.snapshot.set(Shared::new(&self.gc, snapshot));
        self.atomics.publish_generation(self.generation);
    }

    fn send(&mut self, cmd: EngineCommand) -> EngineResult<()> {
        self.commands.send(cmd).map_err(|_| EngineError::QueueFull)
    }

    /// Send a command that follows a change already made on this side
    fn send_or_warn(&mut self, cmd: EngineCommand, what: &str) {
        if self.send(cmd).is_err() {
            log::warn!("Engine: command queue full, dropped {}", what);
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn track(&self, id: TrackId) -> EngineResult<&Track> {
        self.tracks.get(id)
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    pub fn master_volume(&self) -> f32 {
        self.tracks.master_volume()
    }

    /// Effect ids of a track in processing order
    pub fn chain(&self, track: TrackId) -> EngineResult<&[EffectId]> {
        self.tracks.get(track)?;
        Ok(self.chains.chain(track))
    }

    pub fn effect(&self, effect: EffectId) -> EngineResult<&EffectRecord> {
        self.chains.get(effect)
    }

    pub fn parameters(&self, effect: EffectId) -> EngineResult<Vec<ParameterDescriptor>> {
        Ok(self.chains.get(effect)?.descriptors())
    }

    pub fn transport_state(&self) -> TransportState {
        self.transport.state()
    }

    pub fn recording_state(&self, track: TrackId) -> Option<TransportState> {
        self.transport.recording_state(track)
    }

    /// Transport position from the audio thread's frame counter
    pub fn position_secs(&self) -> f64 {
        self.atomics.transport_frame() as f64 / self.config.sample_rate as f64
    }

    pub fn blocks_processed(&self) -> u64 {
        self.atomics.blocks.load(Ordering::Relaxed)
    }

    pub fn performance(&self) -> PerformanceStats {
        self.monitor.stats()
    }

    pub fn is_recording_available(&self) -> bool {
        self.recording_available
    }

    /// Why the engine runs without its device, if it does
    pub fn device_error(&self) -> Option<&DeviceError> {
        self.device_error.as_ref()
    }

    pub fn audio_handle(&self) -> Option<&AudioHandle> {
        self.audio.as_ref()
    }

    /// Snapshot the audio thread will use from its next block
    pub fn snapshot(&self) -> Shared<MixSnapshot> {
        self.snapshot.get()
    }
}

fn check_route(route: InputRoute) -> EngineResult<()> {
    let last = match route {
        InputRoute::Mono { channel } => channel,
        InputRoute::Stereo { left } => left.saturating_add(1),
    };
    if last < MAX_CHANNELS {
        Ok(())
    } else {
        Err(EngineError::InvalidInputRoute(last))
    }
}

fn clamp_gain(gain: f32) -> f32 {
    if gain.is_nan() {
        0.0
    } else {
        gain.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AudioBuffer;
    use std::f32::consts::TAU;

    const SR: usize = 44_100;
    const BLOCK: usize = 128;

    fn engine() -> (Engine, BlockProcessor) {
        Engine::new(EngineConfig {
            telemetry_interval_ms: 0,
            ..EngineConfig::default()
        })
        .unwrap()
    }

    /// Feed `frames` frames in 128-frame blocks; `signal` gives the sample
    /// at an absolute frame index (same on both input channels)
    fn feed(processor: &mut BlockProcessor, frames: usize, signal: impl Fn(usize) -> f32) -> AudioBuffer {
        let mut done = 0;
        let mut output = AudioBuffer::new(2, BLOCK);
        while done < frames {
            let n = (frames - done).min(BLOCK);
            let samples: Vec<f32> = (done..done + n).map(&signal).collect();
            let input = AudioBuffer::from_channels(&[samples.as_slice(), samples.as_slice()]);
            output = AudioBuffer::new(2, n);
            processor.process(&input, &mut output);
            done += n;
        }
        output
    }

    fn events(rx: &Receiver<EngineEvent>) -> Vec<EngineEvent> {
        rx.try_iter().collect()
    }

    #[test]
    fn test_vocals_recording_scenario() {
        let (mut engine, mut processor) = engine();
        let rx = engine.subscribe();

        let vocals = engine
            .create_track(TrackConfig::named("Vocals").with_input(InputRoute::Mono { channel: 0 }))
            .unwrap();
        engine
            .add_effect(vocals, "parametric_eq", &[("band1_gain", 3.0)])
            .unwrap();
        assert_eq!(engine.set_volume(vocals, 0.5).unwrap(), 0.5);
        engine.start_recording(vocals).unwrap();
        assert_eq!(engine.transport_state(), TransportState::Armed);

        // 344 full blocks plus one of 68 frames
        feed(&mut processor, SR, |i| 0.5 * (TAU * 440.0 * i as f32 / SR as f32).sin());
        engine.poll();
        assert_eq!(engine.recording_state(vocals), Some(TransportState::Recording));

        let clip_id = engine.stop_recording(vocals).unwrap();
        let track = engine.track(vocals).unwrap();
        let clip = &track.clips()[0];
        assert_eq!(clip.id(), clip_id);
        assert!((clip.duration_secs() - 1.0).abs() < 1e-3, "duration {}", clip.duration_secs());
        assert_eq!(clip.peaks().len(), 500);
        assert!(clip.peaks().iter().any(|&p| p > 0.0));
        assert_eq!(engine.transport_state(), TransportState::Idle);

        let events = events(&rx);
        assert!(events.contains(&EngineEvent::RecordingStarted { track: vocals }));
        assert!(events.iter().any(|e| matches!(
            e,
            EngineEvent::RecordingStopped { track, peaks, .. } if *track == vocals && peaks.len() == 500
        )));
    }

    #[test]
    fn test_effect_budget_is_global() {
        let (mut engine, _processor) = engine();
        let a = engine.create_track(TrackConfig::named("A")).unwrap();
        let b = engine.create_track(TrackConfig::named("B")).unwrap();

        let mut added = Vec::new();
        for i in 0..12 {
            let track = if i % 2 == 0 { a } else { b };
            added.push(engine.add_effect(track, "lowpass", &[]).unwrap());
        }
        let before_a = engine.chain(a).unwrap().to_vec();

        let err = engine.add_effect(a, "delay", &[]).unwrap_err();
        assert_eq!(err, EngineError::ChainFull { limit: 12 });
        assert_eq!(engine.chain(a).unwrap(), before_a.as_slice());
        assert_eq!(engine.chain(b).unwrap().len(), 6);
        for id in added {
            assert!(engine.effect(id).is_ok());
        }
    }

    #[test]
    fn test_add_then_remove_restores_order() {
        let (mut engine, _processor) = engine();
        let track = engine.create_track(TrackConfig::default()).unwrap();
        let eq = engine.add_effect(track, "parametric_eq", &[]).unwrap();
        let comp = engine.add_effect(track, "compressor", &[("ratio", 8.0)]).unwrap();
        let before = engine.snapshot().strip_for(track).unwrap().chain.clone();

        let delay = engine.add_effect(track, "delay", &[]).unwrap();
        assert_eq!(engine.chain(track).unwrap(), &[eq, comp, delay]);
        engine.remove_effect(track, delay).unwrap();

        assert_eq!(engine.chain(track).unwrap(), &[eq, comp]);
        let snapshot = engine.snapshot();
        let chain = &snapshot.strip_for(track).unwrap().chain;
        assert_eq!(chain, &before);
        assert_eq!(
            chain,
            &vec![engine.effect(eq).unwrap().handle, engine.effect(comp).unwrap().handle]
        );
        assert_eq!(
            engine.remove_effect(track, delay),
            Err(EngineError::EffectNotFound(delay))
        );
    }

    #[test]
    fn test_add_effect_validation() {
        let (mut engine, _processor) = engine();
        let track = engine.create_track(TrackConfig::default()).unwrap();
        assert!(matches!(
            engine.add_effect(track, "reverb", &[]),
            Err(EngineError::UnknownEffectKind(_))
        ));
        assert!(matches!(
            engine.add_effect(track, "compressor", &[("ratio", 40.0)]),
            Err(EngineError::ParameterOutOfRange { name: "ratio", .. })
        ));
        assert!(matches!(
            engine.add_effect(track, "compressor", &[("wet", 0.5)]),
            Err(EngineError::UnknownParameter { .. })
        ));
        assert_eq!(
            engine.add_effect(TrackId(99), "lowpass", &[]),
            Err(EngineError::TrackNotFound(TrackId(99)))
        );
        assert!(engine.chain(track).unwrap().is_empty());
    }

    #[test]
    fn test_move_and_bypass() {
        let (mut engine, _processor) = engine();
        let track = engine.create_track(TrackConfig::default()).unwrap();
        let a = engine.add_effect(track, "lowpass", &[]).unwrap();
        let b = engine.add_effect(track, "gate", &[]).unwrap();
        let c = engine.add_effect(track, "limiter", &[]).unwrap();

        assert_eq!(engine.move_effect(track, c, 0).unwrap(), 0);
        assert_eq!(engine.move_effect(track, a, 10).unwrap(), 2);
        assert_eq!(engine.chain(track).unwrap(), &[c, b, a]);

        engine.bypass_effect(b, true).unwrap();
        let handles = engine.snapshot().strip_for(track).unwrap().chain.clone();
        assert_eq!(
            handles,
            vec![engine.effect(c).unwrap().handle, engine.effect(a).unwrap().handle]
        );
        // Bypass keeps the effect in the chain
        assert_eq!(engine.chain(track).unwrap().len(), 3);
        engine.bypass_effect(b, false).unwrap();
        assert_eq!(engine.snapshot().strip_for(track).unwrap().chain.len(), 3);
    }

    #[test]
    fn test_solo_restores_volumes() {
        let (mut engine, _processor) = engine();
        let a = engine.create_track(TrackConfig::named("A")).unwrap();
        let b = engine.create_track(TrackConfig::named("B")).unwrap();
        engine.set_volume(a, 0.3).unwrap();
        engine.set_volume(b, 0.6).unwrap();
        engine.mute(b, true).unwrap();
        engine.mute(b, false).unwrap();

        let gain = |engine: &Engine, track| engine.snapshot().strip_for(track).unwrap().gain;

        engine.solo(a, true).unwrap();
        assert_eq!(gain(&engine, a), 0.3);
        assert_eq!(gain(&engine, b), 0.0);

        engine.solo(a, false).unwrap();
        assert_eq!(gain(&engine, a), 0.3);
        assert_eq!(gain(&engine, b), 0.6);
        assert_eq!(engine.track(b).unwrap().volume(), 0.6);
    }

    #[test]
    fn test_volume_and_pan_clamp() {
        let (mut engine, _processor) = engine();
        let rx = engine.subscribe();
        let track = engine.create_track(TrackConfig::default()).unwrap();
        assert_eq!(engine.track(track).unwrap().volume(), 0.8);
        assert_eq!(engine.set_volume(track, 3.0).unwrap(), 1.0);
        assert_eq!(engine.set_pan(track, -7.0).unwrap(), -1.0);
        assert_eq!(engine.set_master_volume(-1.0).unwrap(), 0.0);

        let events = events(&rx);
        assert!(events.contains(&EngineEvent::TrackVolumeChanged { track, volume: 1.0 }));
        assert!(events.contains(&EngineEvent::TrackPanChanged { track, pan: -1.0 }));
        assert!(events.contains(&EngineEvent::MasterVolumeChanged { volume: 0.0 }));
    }

    #[test]
    fn test_recording_preconditions() {
        let (mut engine, _processor) = engine();
        let track = engine.create_track(TrackConfig::default()).unwrap();
        assert_eq!(
            engine.start_recording(track),
            Err(EngineError::NoInputConnected(track))
        );
        assert_eq!(
            engine.connect_input(track, InputRoute::Stereo { left: 1 }),
            Err(EngineError::InvalidInputRoute(2))
        );
        engine.connect_input(track, InputRoute::Stereo { left: 0 }).unwrap();
        engine.start_recording(track).unwrap();
        assert!(matches!(
            engine.start_recording(track),
            Err(EngineError::InvalidTransition { .. })
        ));
        assert!(matches!(
            engine.disconnect_input(track),
            Err(EngineError::InvalidTransition { .. })
        ));
        assert_eq!(
            engine.stop_recording(TrackId(42)),
            Err(EngineError::TrackNotFound(TrackId(42)))
        );
    }

    #[test]
    fn test_stop_recording_waits_for_audio_thread() {
        use std::sync::atomic::AtomicBool;

        let (mut engine, mut processor) = engine();
        let track = engine
            .create_track(TrackConfig::default().with_input(InputRoute::Mono { channel: 0 }))
            .unwrap();
        engine.start_recording(track).unwrap();

        // Block n carries the value n, so a dropped block shows up as a gap
        let running = Arc::new(AtomicBool::new(true));
        let audio_thread = {
            let running = Arc::clone(&running);
            std::thread::spawn(move || {
                let mut n = 0;
                while running.load(Ordering::Relaxed) {
                    n += 1;
                    feed(&mut processor, BLOCK, |_| n as f32 * 1e-3);
                    std::thread::sleep(Duration::from_millis(1));
                }
            })
        };
        while engine.blocks_processed() < 8 {
            std::thread::sleep(Duration::from_millis(1));
        }
        engine.poll();

        let rendered = engine.blocks_processed();
        engine.stop_recording(track).unwrap();
        // The stop was acknowledged by a block rendered after the request
        assert!(engine.blocks_processed() > rendered);
        running.store(false, Ordering::Relaxed);
        audio_thread.join().unwrap();

        let clip = &engine.track(track).unwrap().clips()[0];
        let samples = &clip.audio().channels()[0];
        assert_eq!(samples.len() % BLOCK, 0);
        assert!(samples.len() as u64 >= rendered * BLOCK as u64);
        for (i, block) in samples.chunks(BLOCK).enumerate() {
            let expected = (i + 1) as f32 * 1e-3;
            assert!(block.iter().all(|&v| (v - expected).abs() < 1e-6), "gap at block {}", i);
        }
    }

    #[test]
    fn test_delete_track_discards_everything() {
        let (mut engine, mut processor) = engine();
        let rx = engine.subscribe();
        let track = engine
            .create_track(TrackConfig::default().with_input(InputRoute::Mono { channel: 1 }))
            .unwrap();
        let effect = engine.add_effect(track, "chorus", &[]).unwrap();
        engine.start_recording(track).unwrap();
        feed(&mut processor, 512, |_| 0.1);

        engine.delete_track(track).unwrap();
        feed(&mut processor, 256, |_| 0.1);
        engine.poll();

        assert_eq!(engine.effect(effect).unwrap_err(), EngineError::EffectNotFound(effect));
        assert_eq!(engine.transport_state(), TransportState::Idle);
        assert!(engine.snapshot().strips.is_empty());
        assert!(events(&rx).contains(&EngineEvent::TrackDeleted { track }));
        assert_eq!(engine.delete_track(track), Err(EngineError::TrackNotFound(track)));

        // The strip and effect slot are free again
        let again = engine.create_track(TrackConfig::default()).unwrap();
        assert!(engine.add_effect(again, "chorus", &[]).is_ok());
    }

    #[test]
    fn test_faulted_effect_is_bypassed_and_track_keeps_sounding() {
        let (mut engine, mut processor) = engine();
        let rx = engine.subscribe();
        let track = engine
            .create_track(TrackConfig::default().with_input(InputRoute::Stereo { left: 0 }))
            .unwrap();
        let filter = engine.add_effect(track, "lowpass", &[]).unwrap();
        feed(&mut processor, BLOCK * 2, |_| 0.25);

        feed(&mut processor, BLOCK, |i| if i == 5 { f32::INFINITY } else { 0.25 });
        engine.poll();

        let record = engine.effect(filter).unwrap();
        assert!(record.is_faulted());
        assert!(record.is_bypassed());
        let events = events(&rx);
        assert!(events.contains(&EngineEvent::EffectFaulted { track, effect: filter }));
        assert!(events.contains(&EngineEvent::EffectBypassed {
            effect: filter,
            bypassed: true,
            automatic: true,
        }));

        let out = feed(&mut processor, BLOCK * 3, |_| 0.25);
        assert!(out.is_finite());
        assert!((out.channel(0)[BLOCK - 1] - 0.25 * 0.8).abs() < 1e-5);

        // Re-enabling clears the fault
        engine.bypass_effect(filter, false).unwrap();
        assert!(!engine.effect(filter).unwrap().is_faulted());
    }

    #[test]
    fn test_collaborator_disconnect_keeps_mix() {
        let (mut engine, mut processor) = engine();
        let track = engine
            .create_track(TrackConfig::default().with_input(InputRoute::Stereo { left: 0 }))
            .unwrap();
        let (id, mut feed_in) = engine.connect_collaborator(1.0).unwrap();
        let remote = vec![0.5_f32; BLOCK * 3 * 2];
        assert_eq!(feed_in.push_interleaved(&remote), BLOCK * 3);

        let out = feed(&mut processor, BLOCK * 3, |_| 0.25);
        assert!((out.channel(0)[BLOCK - 1] - (0.2 + 0.5)).abs() < 1e-5);

        engine.disconnect_collaborator(id).unwrap();
        let out = feed(&mut processor, BLOCK * 2, |_| 0.25);
        assert!((out.channel(0)[BLOCK - 1] - 0.2).abs() < 1e-5);
        assert!((out.channel(1)[BLOCK - 1] - 0.2).abs() < 1e-5);

        assert_eq!(
            engine.disconnect_collaborator(id),
            Err(EngineError::CollaboratorNotFound(id))
        );
        assert!(engine.track(track).is_ok());
    }

    #[test]
    fn test_collaborator_limit() {
        let (mut engine, _processor) = engine();
        let feeds: Vec<_> = (0..MAX_COLLABORATORS)
            .map(|_| engine.connect_collaborator(0.5).unwrap())
            .collect();
        assert_eq!(feeds.len(), MAX_COLLABORATORS);
        assert!(matches!(
            engine.connect_collaborator(0.5),
            Err(EngineError::TooManyCollaborators { .. })
        ));
        engine.set_collaborator_gain(feeds[0].0, 0.1).unwrap();
    }

    #[test]
    fn test_playback_from_offset() {
        let (mut engine, mut processor) = engine();
        let rx = engine.subscribe();
        let track = engine
            .create_track(TrackConfig::default().with_input(InputRoute::Mono { channel: 0 }))
            .unwrap();
        engine.start_recording(track).unwrap();
        feed(&mut processor, SR, |_| 0.4);
        engine.stop_recording(track).unwrap();
        engine.disconnect_input(track).unwrap();

        engine.start_playback(0.5).unwrap();
        assert_eq!(engine.transport_state(), TransportState::Playing);
        assert!(matches!(
            engine.start_playback(0.0),
            Err(EngineError::InvalidTransition { .. })
        ));

        // Half the clip remains: 22050 frames
        let out = feed(&mut processor, BLOCK * 100, |_| 0.0);
        assert!(out.peak() > 0.1);
        assert!(engine.position_secs() > 0.5);

        feed(&mut processor, BLOCK * 80, |_| 0.0);
        let out = feed(&mut processor, BLOCK * 2, |_| 0.0);
        assert_eq!(out.peak(), 0.0);

        engine.stop_playback().unwrap();
        assert_eq!(engine.transport_state(), TransportState::Stopped);
        assert!(matches!(
            engine.stop_playback(),
            Err(EngineError::InvalidTransition { .. })
        ));
        let events = events(&rx);
        assert!(events.contains(&EngineEvent::PlaybackStarted { position: 0.5 }));
        assert!(events.contains(&EngineEvent::PlaybackStopped));
    }

    #[test]
    fn test_parameter_updates() {
        let (mut engine, _processor) = engine();
        let track = engine.create_track(TrackConfig::default()).unwrap();
        let filter = engine.add_effect(track, "lowpass", &[]).unwrap();

        engine
            .set_parameter(filter, "frequency", 400.0, ParameterUpdate::default())
            .unwrap();
        let params = engine.parameters(filter).unwrap();
        assert_eq!(params[0].target, 400.0);
        assert_eq!(params[0].current, 1_000.0);
        assert!(params[0].smoothing_rate > 0.0 && params[0].smoothing_rate < 1.0);

        engine
            .set_parameter(filter, "q", 2.0, ParameterUpdate::immediate())
            .unwrap();
        let params = engine.parameters(filter).unwrap();
        assert_eq!(params[1].current, 2.0);
        assert_eq!(params[1].smoothing_rate, 1.0);

        assert!(matches!(
            engine.set_parameter(filter, "frequency", 50_000.0, ParameterUpdate::default()),
            Err(EngineError::ParameterOutOfRange { .. })
        ));
        assert!(matches!(
            engine.set_parameter(filter, "frequency", f32::NAN, ParameterUpdate::default()),
            Err(EngineError::ParameterOutOfRange { .. })
        ));
        assert!(matches!(
            engine.set_parameter(filter, "gain", 1.0, ParameterUpdate::default()),
            Err(EngineError::UnknownParameter { .. })
        ));
        assert_eq!(engine.parameters(filter).unwrap()[0].target, 400.0);
    }

    #[test]
    fn test_automation_finishes_and_cancels() {
        let (mut engine, mut processor) = engine();
        let rx = engine.subscribe();
        let track = engine.create_track(TrackConfig::default()).unwrap();
        let filter = engine.add_effect(track, "lowpass", &[]).unwrap();

        let options = AutomationOptions {
            duration_secs: 0.05,
            ..AutomationOptions::default()
        };
        let lane = engine
            .automate_parameter(filter, "frequency", &[200.0, 2_000.0], options)
            .unwrap();
        feed(&mut processor, BLOCK * 40, |_| 0.0);
        engine.poll();
        assert!(events(&rx).contains(&EngineEvent::AutomationFinished {
            automation: lane.id(),
            effect: filter,
            cancelled: false,
        }));
        assert_eq!(engine.parameters(filter).unwrap()[0].target, 2_000.0);

        let looping = engine
            .automate_parameter(
                filter,
                "frequency",
                &[300.0, 600.0],
                AutomationOptions {
                    looping: true,
                    ..options
                },
            )
            .unwrap();
        feed(&mut processor, BLOCK * 40, |_| 0.0);
        engine.cancel_automation(&looping).unwrap();
        feed(&mut processor, BLOCK, |_| 0.0);
        engine.poll();
        assert!(events(&rx).contains(&EngineEvent::AutomationFinished {
            automation: looping.id(),
            effect: filter,
            cancelled: true,
        }));
        assert_eq!(
            engine.cancel_automation(&looping),
            Err(EngineError::AutomationNotFound(looping.id()))
        );

        assert!(matches!(
            engine.automate_parameter(filter, "frequency", &[], options),
            Err(EngineError::InvalidCurve)
        ));
        assert!(matches!(
            engine.automate_parameter(filter, "frequency", &[100.0, 90_000.0], options),
            Err(EngineError::ParameterOutOfRange { .. })
        ));
    }

    #[test]
    fn test_automation_recording_replays() {
        let (mut engine, _processor) = engine();
        let track = engine.create_track(TrackConfig::default()).unwrap();
        let delay = engine.add_effect(track, "delay", &[]).unwrap();

        assert!(engine.stop_automation_recording().is_err());
        engine.start_automation_recording().unwrap();
        engine
            .set_parameter(delay, "mix", 0.2, ParameterUpdate::default())
            .unwrap();
        engine
            .set_parameter(delay, "mix", 0.6, ParameterUpdate::default())
            .unwrap();
        engine
            .set_parameter(delay, "feedback", 0.5, ParameterUpdate::default())
            .unwrap();
        let recording = engine.stop_automation_recording().unwrap();
        assert_eq!(recording.points.len(), 3);

        let lanes = engine.replay_automation(&recording).unwrap();
        assert_eq!(lanes.len(), 2);
        assert_eq!(engine.parameters(delay).unwrap()[2].target, 0.6);
    }

    #[test]
    fn test_cancelled_lane_replays_only_what_played() {
        let (mut engine, mut processor) = engine();
        let track = engine.create_track(TrackConfig::default()).unwrap();
        let filter = engine.add_effect(track, "lowpass", &[]).unwrap();

        engine.start_automation_recording().unwrap();
        let options = AutomationOptions {
            duration_secs: 0.1,
            ..AutomationOptions::default()
        };
        let lane = engine
            .automate_parameter(filter, "frequency", &[200.0, 2_000.0], options)
            .unwrap();

        // 18 blocks reach tick 4 (frame 2176 / 441)
        feed(&mut processor, BLOCK * 18, |_| 0.0);
        engine.cancel_automation(&lane).unwrap();
        feed(&mut processor, BLOCK, |_| 0.0);
        engine.poll();
        let recording = engine.stop_automation_recording().unwrap();

        let lanes = recording.lanes();
        assert_eq!(lanes.len(), 1);
        assert_eq!(lanes[0].values.len(), 5);
        assert_eq!(lanes[0].values[0], 200.0);
        assert!(lanes[0].values[4] < 2_000.0);

        let replayed = engine.replay_automation(&recording).unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(engine.parameters(filter).unwrap()[0].target, lanes[0].values[4]);
    }

    #[test]
    fn test_overruns_auto_bypass_newest_effect() {
        let (mut engine, mut processor) = Engine::new(EngineConfig {
            overrun_ratio: 0.0,
            auto_bypass_after_overruns: Some(3),
            ..EngineConfig::default()
        })
        .unwrap();
        let rx = engine.subscribe();
        let track = engine.create_track(TrackConfig::default()).unwrap();
        let first = engine.add_effect(track, "lowpass", &[]).unwrap();
        let newest = engine.add_effect(track, "delay", &[]).unwrap();

        feed(&mut processor, BLOCK * 3, |_| 0.0);
        engine.poll();

        assert!(engine.effect(newest).unwrap().is_bypassed());
        assert!(!engine.effect(first).unwrap().is_bypassed());
        let events = events(&rx);
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, EngineEvent::BufferUnderrun { .. }))
                .count(),
            3
        );
        assert!(events.contains(&EngineEvent::EffectBypassed {
            effect: newest,
            bypassed: true,
            automatic: true,
        }));
        assert_eq!(engine.performance().total_overruns, 3);
    }

    #[test]
    fn test_telemetry_reports_levels() {
        let (mut engine, mut processor) = engine();
        let rx = engine.subscribe();
        let track = engine
            .create_track(TrackConfig::default().with_input(InputRoute::Stereo { left: 0 }))
            .unwrap();
        feed(&mut processor, BLOCK * 4, |_| 0.5);
        engine.poll();

        let telemetry = events(&rx)
            .into_iter()
            .find_map(|e| match e {
                EngineEvent::Telemetry(t) => Some(t),
                _ => None,
            })
            .unwrap();
        assert!(telemetry.master_level > 0.3);
        assert_eq!(telemetry.tracks.len(), 1);
        assert_eq!(telemetry.tracks[0].track, track);
        assert!(telemetry.tracks[0].peak > 0.3);
    }

    #[test]
    fn test_device_timeout_degrades() {
        let mut config = EngineConfig::default();
        config.audio.ready_timeout_ms = 20;
        let slow = NullBackend::new(128).with_ready_delay(Duration::from_millis(300));

        let mut engine = Engine::start(config, Box::new(slow)).unwrap();
        assert!(!engine.is_recording_available());
        assert!(matches!(engine.device_error(), Some(DeviceError::InitTimeout(_))));
        assert!(engine.audio_handle().is_some());

        let rx = engine.subscribe();
        assert!(matches!(rx.try_recv(), Ok(EngineEvent::DeviceError { .. })));

        let track = engine
            .create_track(TrackConfig::default().with_input(InputRoute::Mono { channel: 0 }))
            .unwrap();
        assert!(matches!(
            engine.start_recording(track),
            Err(EngineError::RecordingUnavailable(_))
        ));

        let start = Instant::now();
        while engine.blocks_processed() < 2 {
            assert!(start.elapsed() < Duration::from_secs(5), "fallback backend stalled");
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}
