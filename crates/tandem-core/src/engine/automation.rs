//! Parameter automation
//!
//! Curves are resampled on the control side to a fixed control rate and
//! handed to the audio thread as an [`AutomationLane`]. The lane emits one
//! value per control tick; each value goes through the effect's parameter
//! smoothing, so stepped curves still move without clicks.
//!
//! Automation recording captures every value applied from the control API
//! with its time relative to the start of the recording. Replay turns the
//! recording back into one lane per (effect, parameter).

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::snapshot::EffectHandle;
use crate::error::{EngineError, EngineResult};
use crate::types::EffectId;

/// Control ticks per second
pub const CONTROL_RATE_HZ: f32 = 100.0;

/// Lanes that may run at the same time
pub const MAX_AUTOMATION_LANES: usize = 32;

/// How a curve is played
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationOptions {
    /// Time to play the whole curve once
    pub duration_secs: f32,
    pub looping: bool,
    /// Smoothing time between consecutive control values
    pub transition_secs: f32,
}

impl Default for AutomationOptions {
    fn default() -> Self {
        Self {
            duration_secs: 1.0,
            looping: false,
            transition_secs: 0.01,
        }
    }
}

/// Resample `curve` (evenly spaced points over `duration_secs`) at the
/// control rate with linear interpolation
///
/// The first sample is the first point and the last sample is the last
/// point.
pub fn sample_curve(curve: &[f32], duration_secs: f32) -> EngineResult<Vec<f32>> {
    if curve.is_empty()
        || !curve.iter().all(|v| v.is_finite())
        || !duration_secs.is_finite()
        || duration_secs <= 0.0
    {
        return Err(EngineError::InvalidCurve);
    }

    let count = ((duration_secs * CONTROL_RATE_HZ).round() as usize).max(1);
    if count == 1 || curve.len() == 1 {
        return Ok(vec![curve[0]; count]);
    }

    let span = (curve.len() - 1) as f32;
    let samples = (0..count)
        .map(|i| {
            let pos = i as f32 / (count - 1) as f32 * span;
            let index = (pos.floor() as usize).min(curve.len() - 2);
            let frac = pos - index as f32;
            curve[index] + (curve[index + 1] - curve[index]) * frac
        })
        .collect();
    Ok(samples)
}

/// What a lane wants done this block
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LaneStep {
    /// Nothing new
    Idle,
    /// Post this value as the parameter target
    Apply(f32),
    /// Lane is done and can be dropped
    Finished { cancelled: bool },
}

/// A curve being played on the audio thread
pub struct AutomationLane {
    id: u64,
    handle: EffectHandle,
    param: usize,
    values: Vec<f32>,
    looping: bool,
    rate: f32,
    cancel: Arc<AtomicBool>,
    /// Frames since the lane started; negative while waiting out a start delay
    position: i64,
    last_index: Option<usize>,
    /// Completed passes of a looping lane
    loops: u64,
}

impl AutomationLane {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn handle(&self) -> EffectHandle {
        self.handle
    }

    pub fn param(&self) -> usize {
        self.param
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    /// Control ticks applied so far, counting every pass of a looping lane
    pub fn ticks_applied(&self) -> u64 {
        let passes = self.loops * self.values.len() as u64;
        passes + self.last_index.map_or(0, |i| i as u64 + 1)
    }

    /// Advance by one block of `frames` frames
    ///
    /// Cancellation is honoured before anything is applied. A lane that
    /// skips ahead (blocks longer than a control tick) still applies its
    /// last value before finishing.
    pub fn advance(&mut self, frames: usize, sample_rate: u32) -> LaneStep {
        if self.cancel.load(Ordering::Relaxed) {
            return LaneStep::Finished { cancelled: true };
        }
        if self.position < 0 {
            self.position += frames as i64;
            return LaneStep::Idle;
        }

        let frames_per_tick = sample_rate as f64 / CONTROL_RATE_HZ as f64;
        let len = self.values.len();
        let mut index = (self.position as f64 / frames_per_tick) as usize;

        if index >= len {
            if self.looping {
                let period = ((len as f64 * frames_per_tick).round() as i64).max(1);
                self.position %= period;
                index = ((self.position as f64 / frames_per_tick) as usize).min(len - 1);
                self.last_index = None;
                self.loops += 1;
            } else if self.last_index != Some(len - 1) {
                self.last_index = Some(len - 1);
                return LaneStep::Apply(self.values[len - 1]);
            } else {
                return LaneStep::Finished { cancelled: false };
            }
        }

        self.position += frames as i64;
        if self.last_index == Some(index) {
            return LaneStep::Idle;
        }
        self.last_index = Some(index);
        LaneStep::Apply(self.values[index])
    }
}

/// Control-side handle to a running lane
#[derive(Debug, Clone)]
pub struct AutomationHandle {
    id: u64,
    cancel: Arc<AtomicBool>,
}

impl AutomationHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Request cancellation; takes effect at the next control tick
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

/// One applied value in an automation recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationPoint {
    /// Seconds since the recording started
    pub time_secs: f64,
    pub effect: EffectId,
    pub parameter: String,
    pub value: f32,
}

/// Values captured between `start_automation_recording` and
/// `stop_automation_recording`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutomationRecording {
    pub duration_secs: f64,
    pub points: Vec<AutomationPoint>,
}

/// A recording lane ready to be replayed
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedLane {
    pub effect: EffectId,
    pub parameter: String,
    /// Time of the first point
    pub start_secs: f64,
    /// Step-held values at the control rate
    pub values: Vec<f32>,
}

impl AutomationRecording {
    /// Split the recording into one lane per (effect, parameter)
    ///
    /// Each lane holds the most recent point's value at every control tick
    /// from its first point to its last. Output order is stable.
    pub fn lanes(&self) -> Vec<RecordedLane> {
        let mut groups: BTreeMap<(EffectId, &str), Vec<&AutomationPoint>> = BTreeMap::new();
        for point in &self.points {
            groups
                .entry((point.effect, point.parameter.as_str()))
                .or_default()
                .push(point);
        }

        let tick = 1.0 / CONTROL_RATE_HZ as f64;
        groups
            .into_iter()
            .map(|((effect, parameter), mut points)| {
                points.sort_by(|a, b| a.time_secs.total_cmp(&b.time_secs));
                let start = points[0].time_secs;
                let end = points[points.len() - 1].time_secs;
                let ticks = ((end - start) / tick).round() as usize + 1;

                let mut values = Vec::with_capacity(ticks);
                let mut next = 0;
                let mut current = points[0].value;
                for k in 0..ticks {
                    let t = start + k as f64 * tick + 1e-9;
                    while next < points.len() && points[next].time_secs <= t {
                        current = points[next].value;
                        next += 1;
                    }
                    values.push(current);
                }
                // The final point always lands, even if rounding cut it off
                if let Some(last) = values.last_mut() {
                    *last = points[points.len() - 1].value;
                }

                RecordedLane {
                    effect,
                    parameter: parameter.to_string(),
                    start_secs: start,
                    values,
                }
            })
            .collect()
    }
}

#[derive(Debug)]
struct ActiveLane {
    effect: EffectId,
    cancel: Arc<AtomicBool>,
}

/// A lane started while recording; its points are written once it is known
/// how far the lane actually played
#[derive(Debug)]
struct RecordedPlan {
    start_secs: f64,
    effect: EffectId,
    parameter: String,
    values: Vec<f32>,
    looping: bool,
}

impl RecordedPlan {
    fn commit(self, ticks: u64, points: &mut Vec<AutomationPoint>) {
        let len = self.values.len() as u64;
        let ticks = if self.looping { ticks } else { ticks.min(len) };
        let tick = 1.0 / CONTROL_RATE_HZ as f64;
        points.extend((0..ticks).map(|k| AutomationPoint {
            time_secs: self.start_secs + k as f64 * tick,
            effect: self.effect,
            parameter: self.parameter.clone(),
            value: self.values[(k % len) as usize],
        }));
    }
}

#[derive(Debug)]
struct Recorder {
    started: Instant,
    points: Vec<AutomationPoint>,
    /// Lanes still running, by lane id
    planned: HashMap<u64, RecordedPlan>,
}

/// Control-side bookkeeping for lanes and automation recording
#[derive(Debug)]
pub struct AutomationEngine {
    next_id: u64,
    active: HashMap<u64, ActiveLane>,
    limit: usize,
    recorder: Option<Recorder>,
}

impl AutomationEngine {
    pub fn new(limit: usize) -> Self {
        Self {
            next_id: 1,
            active: HashMap::new(),
            limit,
            recorder: None,
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Build a lane for the audio thread and register it as active
    #[allow(clippy::too_many_arguments)]
    pub fn prepare(
        &mut self,
        effect: EffectId,
        handle: EffectHandle,
        param: usize,
        values: Vec<f32>,
        looping: bool,
        rate: f32,
        start_delay_frames: u64,
    ) -> EngineResult<(AutomationHandle, AutomationLane)> {
        if self.active.len() >= self.limit {
            return Err(EngineError::AutomationLimit { limit: self.limit });
        }
        if values.is_empty() {
            return Err(EngineError::InvalidCurve);
        }

        let id = self.next_id;
        self.next_id += 1;
        let cancel = Arc::new(AtomicBool::new(false));
        self.active.insert(
            id,
            ActiveLane {
                effect,
                cancel: Arc::clone(&cancel),
            },
        );

        let lane = AutomationLane {
            id,
            handle,
            param,
            values,
            looping,
            rate,
            cancel: Arc::clone(&cancel),
            position: -(start_delay_frames as i64),
            last_index: None,
            loops: 0,
        };
        Ok((AutomationHandle { id, cancel }, lane))
    }

    /// Forget a lane the audio thread never received
    pub fn abandon(&mut self, id: u64) {
        self.active.remove(&id);
    }

    /// A lane reported that it stopped after `ticks` control ticks; returns
    /// the effect it drove
    pub fn finished(&mut self, id: u64, ticks: u64) -> Option<EffectId> {
        if let Some(recorder) = self.recorder.as_mut() {
            if let Some(plan) = recorder.planned.remove(&id) {
                plan.commit(ticks, &mut recorder.points);
            }
        }
        self.active.remove(&id).map(|lane| lane.effect)
    }

    pub fn cancel(&mut self, id: u64) -> EngineResult<()> {
        let lane = self.active.get(&id).ok_or(EngineError::AutomationNotFound(id))?;
        lane.cancel.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Cancel every lane driving `effect`
    pub fn cancel_for_effect(&mut self, effect: EffectId) -> usize {
        let mut count = 0;
        for lane in self.active.values().filter(|l| l.effect == effect) {
            lane.cancel.store(true, Ordering::Relaxed);
            count += 1;
        }
        count
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_some()
    }

    /// Start a new recording, discarding any unfinished one
    pub fn start_recording(&mut self) {
        self.recorder = Some(Recorder {
            started: Instant::now(),
            points: Vec::new(),
            planned: HashMap::new(),
        });
    }

    /// Record a value applied now
    pub fn record(&mut self, effect: EffectId, parameter: &str, value: f32) {
        if let Some(recorder) = self.recorder.as_mut() {
            let time_secs = recorder.started.elapsed().as_secs_f64();
            recorder.points.push(AutomationPoint {
                time_secs,
                effect,
                parameter: parameter.to_string(),
                value,
            });
        }
    }

    /// Record a lane starting now
    ///
    /// Only the ticks the lane actually applies end up in the recording: the
    /// lane is settled when it reports finishing, or by elapsed time when the
    /// recording stops first.
    pub fn record_lane(&mut self, lane: u64, effect: EffectId, parameter: &str, values: &[f32], looping: bool) {
        if values.is_empty() {
            return;
        }
        if let Some(recorder) = self.recorder.as_mut() {
            let start_secs = recorder.started.elapsed().as_secs_f64();
            recorder.planned.insert(
                lane,
                RecordedPlan {
                    start_secs,
                    effect,
                    parameter: parameter.to_string(),
                    values: values.to_vec(),
                    looping,
                },
            );
        }
    }

    pub fn stop_recording(&mut self) -> Option<AutomationRecording> {
        let recorder = self.recorder.take()?;
        let duration_secs = recorder.started.elapsed().as_secs_f64();
        let mut points = recorder.points;
        for plan in recorder.planned.into_values() {
            let ticks = ((duration_secs - plan.start_secs).max(0.0) * CONTROL_RATE_HZ as f64) as u64 + 1;
            plan.commit(ticks, &mut points);
        }
        points.sort_by(|a, b| a.time_secs.total_cmp(&b.time_secs));
        Some(AutomationRecording {
            duration_secs,
            points,
        })
    }
}
