//! Record and playback state
//!
//! Recording is per track: each take owns the consumer end of a capture ring
//! the audio thread fills with interleaved frames. The control side drains
//! those rings on every poll and once more when the take stops, so the ring
//! only has to cover the time between polls.
//!
//! Playback is global. Starting it schedules every clip that is still
//! audible at the start position; the audio thread counts the transport
//! position while playing.

use std::collections::HashMap;

use basedrop::Shared;
use serde::Serialize;

use super::strip::ScheduledSource;
use crate::clip::ClipAudio;
use crate::error::{EngineError, EngineResult};
use crate::types::{ClipId, TrackId};

/// Transport state, ordered by reporting priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    Idle,
    Stopped,
    Playing,
    Armed,
    Recording,
}

impl TransportState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportState::Idle => "idle",
            TransportState::Stopped => "stopped",
            TransportState::Playing => "playing",
            TransportState::Armed => "armed",
            TransportState::Recording => "recording",
        }
    }
}

/// A take in progress
pub struct RecordingSession {
    track: TrackId,
    strip: usize,
    consumer: rtrb::Consumer<f32>,
    data: Vec<Vec<f32>>,
    /// Transport frame of the first captured block
    started_frame: Option<u64>,
    /// Transport frame when the take was requested
    armed_frame: u64,
    overflowed: bool,
}

impl RecordingSession {
    pub fn track(&self) -> TrackId {
        self.track
    }

    pub fn strip(&self) -> usize {
        self.strip
    }

    pub fn channels(&self) -> usize {
        self.data.len()
    }

    pub fn frames(&self) -> usize {
        self.data.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_capturing(&self) -> bool {
        self.started_frame.is_some()
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    /// Transport frame the take starts at
    pub fn start_frame(&self) -> u64 {
        self.started_frame.unwrap_or(self.armed_frame)
    }

    /// Move every complete frame out of the capture ring
    pub fn drain(&mut self) -> usize {
        let channels = self.data.len();
        let available = self.consumer.slots() / channels * channels;
        if available == 0 {
            return 0;
        }
        let Ok(chunk) = self.consumer.read_chunk(available) else {
            return 0;
        };
        let (first, second) = chunk.as_slices();
        for (i, &sample) in first.iter().chain(second.iter()).enumerate() {
            self.data[i % channels].push(sample);
        }
        chunk.commit_all();
        available / channels
    }

    /// Final samples, one vector per channel
    pub fn into_audio(mut self, sample_rate: u32) -> ClipAudio {
        self.drain();
        ClipAudio::new(self.data, sample_rate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Playback {
    Idle,
    Playing,
    Stopped,
}

/// Owner of recording takes and the playback state
pub struct TransportController {
    recordings: HashMap<TrackId, RecordingSession>,
    playback: Playback,
    next_clip: u64,
}

impl TransportController {
    pub fn new() -> Self {
        Self {
            recordings: HashMap::new(),
            playback: Playback::Idle,
            next_clip: 1,
        }
    }

    /// Highest-priority active state across every track
    pub fn state(&self) -> TransportState {
        let playback = match self.playback {
            Playback::Idle => TransportState::Idle,
            Playback::Playing => TransportState::Playing,
            Playback::Stopped => TransportState::Stopped,
        };
        self.recordings
            .values()
            .map(|s| {
                if s.is_capturing() {
                    TransportState::Recording
                } else {
                    TransportState::Armed
                }
            })
            .fold(playback, Ord::max)
    }

    /// State of one track's take, if any
    pub fn recording_state(&self, track: TrackId) -> Option<TransportState> {
        self.recordings.get(&track).map(|s| {
            if s.is_capturing() {
                TransportState::Recording
            } else {
                TransportState::Armed
            }
        })
    }

    pub fn is_recording(&self, track: TrackId) -> bool {
        self.recordings.contains_key(&track)
    }

    pub fn is_playing(&self) -> bool {
        self.playback == Playback::Playing
    }

    /// Arm a take on a track
    pub fn begin_recording(
        &mut self,
        track: TrackId,
        strip: usize,
        consumer: rtrb::Consumer<f32>,
        channels: usize,
        frame: u64,
    ) -> EngineResult<()> {
        if let Some(state) = self.recording_state(track) {
            return Err(EngineError::InvalidTransition {
                action: "start recording",
                state: state.as_str(),
            });
        }
        self.recordings.insert(
            track,
            RecordingSession {
                track,
                strip,
                consumer,
                data: vec![Vec::new(); channels.max(1)],
                started_frame: None,
                armed_frame: frame,
                overflowed: false,
            },
        );
        Ok(())
    }

    /// The audio thread captured its first block on `strip`
    pub fn capture_started(&mut self, strip: usize, frame: u64) -> Option<TrackId> {
        let session = self.recordings.values_mut().find(|s| s.strip == strip)?;
        session.started_frame.get_or_insert(frame);
        Some(session.track)
    }

    /// The capture ring on `strip` overflowed
    pub fn capture_overflow(&mut self, strip: usize) -> Option<TrackId> {
        let session = self.recordings.values_mut().find(|s| s.strip == strip)?;
        session.overflowed = true;
        Some(session.track)
    }

    /// Drain every capture ring; returns frames moved
    pub fn drain_all(&mut self) -> usize {
        self.recordings.values_mut().map(RecordingSession::drain).sum()
    }

    /// End a take and hand back its session
    pub fn finish_recording(&mut self, track: TrackId) -> EngineResult<RecordingSession> {
        self.recordings.remove(&track).ok_or(EngineError::InvalidTransition {
            action: "stop recording",
            state: TransportState::Idle.as_str(),
        })
    }

    /// Drop a take without keeping its audio
    pub fn abort(&mut self, track: TrackId) -> Option<RecordingSession> {
        self.recordings.remove(&track)
    }

    pub fn next_clip_id(&mut self) -> ClipId {
        let id = ClipId(self.next_clip);
        self.next_clip += 1;
        id
    }

    pub fn start_playback(&mut self) -> EngineResult<()> {
        if self.playback == Playback::Playing {
            return Err(EngineError::InvalidTransition {
                action: "start playback",
                state: TransportState::Playing.as_str(),
            });
        }
        self.playback = Playback::Playing;
        Ok(())
    }

    pub fn stop_playback(&mut self) -> EngineResult<()> {
        if self.playback != Playback::Playing {
            return Err(EngineError::InvalidTransition {
                action: "stop playback",
                state: self.state().as_str(),
            });
        }
        self.playback = Playback::Stopped;
        Ok(())
    }

    /// Sources to schedule for playback from `position_secs`
    ///
    /// Clips already under way start at the matching offset; later clips
    /// wait out the gap. Clips that ended before the position are skipped.
    pub fn plan_playback<'a>(
        clips: impl IntoIterator<Item = (usize, f64, f64, &'a Shared<ClipAudio>)>,
        position_secs: f64,
        sample_rate: u32,
    ) -> Vec<(usize, ScheduledSource)> {
        let sr = sample_rate as f64;
        clips
            .into_iter()
            .filter(|&(_, start, end, _)| end > position_secs && end > start)
            .map(|(strip, start, _, audio)| {
                let (delay_frames, offset_frames) = if start >= position_secs {
                    (((start - position_secs) * sr).round() as u64, 0)
                } else {
                    (0, ((position_secs - start) * sr).round() as usize)
                };
                (
                    strip,
                    ScheduledSource {
                        audio: Shared::clone(audio),
                        delay_frames,
                        offset_frames,
                    },
                )
            })
            .collect()
    }
}

impl Default for TransportController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::gc::gc_handle;

    #[test]
    fn test_state_priority() {
        let mut transport = TransportController::new();
        assert_eq!(transport.state(), TransportState::Idle);
        transport.start_playback().unwrap();
        assert_eq!(transport.state(), TransportState::Playing);

        let (_tx, rx) = rtrb::RingBuffer::new(8);
        transport.begin_recording(TrackId(1), 0, rx, 1, 0).unwrap();
        assert_eq!(transport.state(), TransportState::Armed);
        assert_eq!(transport.capture_started(0, 0), Some(TrackId(1)));
        assert_eq!(transport.state(), TransportState::Recording);

        transport.finish_recording(TrackId(1)).unwrap();
        transport.stop_playback().unwrap();
        assert_eq!(transport.state(), TransportState::Stopped);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut transport = TransportController::new();
        assert!(matches!(
            transport.stop_playback(),
            Err(EngineError::InvalidTransition { state: "idle", .. })
        ));
        transport.start_playback().unwrap();
        assert!(transport.start_playback().is_err());

        let (_tx, rx) = rtrb::RingBuffer::new(8);
        transport.begin_recording(TrackId(1), 0, rx, 1, 0).unwrap();
        let (_tx2, rx2) = rtrb::RingBuffer::new(8);
        assert!(matches!(
            transport.begin_recording(TrackId(1), 0, rx2, 1, 0),
            Err(EngineError::InvalidTransition { state: "armed", .. })
        ));
        assert!(transport.finish_recording(TrackId(2)).is_err());
    }

    #[test]
    fn test_drain_deinterleaves() {
        let (mut tx, rx) = rtrb::RingBuffer::new(16);
        let mut transport = TransportController::new();
        transport.begin_recording(TrackId(1), 3, rx, 2, 0).unwrap();

        for s in [0.1, -0.1, 0.2, -0.2, 0.3] {
            tx.push(s).unwrap();
        }
        // The odd sample waits for its partner
        assert_eq!(transport.drain_all(), 2);
        tx.push(-0.3).unwrap();

        let session = transport.finish_recording(TrackId(1)).unwrap();
        let audio = session.into_audio(44_100);
        assert_eq!(audio.channels()[0], vec![0.1, 0.2, 0.3]);
        assert_eq!(audio.channels()[1], vec![-0.1, -0.2, -0.3]);
    }

    #[test]
    fn test_plan_playback_offsets() {
        let handle = gc_handle();
        let audio = Shared::new(&handle, ClipAudio::new(vec![vec![0.0; 100]], 100));
        let clips = vec![
            (0, 0.0, 1.0, &audio),
            (1, 2.0, 3.0, &audio),
            (2, 0.0, 0.4, &audio),
        ];
        let plan = TransportController::plan_playback(clips, 0.5, 100);
        assert_eq!(plan.len(), 2);

        assert_eq!(plan[0].0, 0);
        assert_eq!(plan[0].1.offset_frames, 50);
        assert_eq!(plan[0].1.delay_frames, 0);

        assert_eq!(plan[1].0, 1);
        assert_eq!(plan[1].1.offset_frames, 0);
        assert_eq!(plan[1].1.delay_frames, 150);
    }

    #[test]
    fn test_clip_ids_are_unique() {
        let mut transport = TransportController::new();
        assert_ne!(transport.next_clip_id(), transport.next_clip_id());
    }
}
