//! Recorded clips and their persistence record
//!
//! A [`Clip`] is immutable once built. Its samples live in a
//! `basedrop::Shared<ClipAudio>` so playback sources on the audio thread can
//! hold a reference without the audio thread ever freeing the buffer.

use std::fmt;

use basedrop::{Handle, Shared};
use serde::{Deserialize, Serialize};

use crate::types::{ClipId, Sample};

/// Default number of points in a clip's peak summary
pub const DEFAULT_PEAK_POINTS: usize = 500;

/// Planar sample data of a clip
#[derive(Debug, Clone, PartialEq)]
pub struct ClipAudio {
    channels: Vec<Vec<Sample>>,
    sample_rate: u32,
}

impl ClipAudio {
    pub fn new(channels: Vec<Vec<Sample>>, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
        }
    }

    pub fn channels(&self) -> &[Vec<Sample>] {
        &self.channels
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Length in frames (shortest channel)
    pub fn frames(&self) -> usize {
        self.channels.iter().map(Vec::len).min().unwrap_or(0)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Peak summary: the max absolute sample across channels within each of
/// `points` evenly sized strides, clamped to [0, 1]
///
/// Always returns exactly `points` values. Stride bounds are proportional,
/// so every point covers at least one frame and audio shorter than `points`
/// repeats frames instead of leaving zeros.
pub fn compute_peaks(channels: &[Vec<Sample>], points: usize) -> Vec<f32> {
    let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
    let mut peaks = vec![0.0; points];
    if frames == 0 || points == 0 {
        return peaks;
    }

    for (i, peak) in peaks.iter_mut().enumerate() {
        let start = i * frames / points;
        let end = ((i + 1) * frames / points).max(start + 1).min(frames);
        let mut max = 0.0_f32;
        for channel in channels {
            for s in &channel[start..end] {
                max = max.max(s.abs());
            }
        }
        *peak = max.min(1.0);
    }
    peaks
}

/// A captured, immutable span of audio attached to a track
#[derive(Clone)]
pub struct Clip {
    id: ClipId,
    /// Position of the first sample on the transport timeline
    start_secs: f64,
    duration_secs: f64,
    audio: Shared<ClipAudio>,
    peaks: Vec<f32>,
}

impl Clip {
    /// Build a clip from planar samples
    pub fn new(
        handle: &Handle,
        id: ClipId,
        audio: ClipAudio,
        start_secs: f64,
        peak_points: usize,
    ) -> Self {
        let duration_secs = if audio.sample_rate() > 0 {
            audio.frames() as f64 / audio.sample_rate() as f64
        } else {
            0.0
        };
        let peaks = compute_peaks(audio.channels(), peak_points);
        Self {
            id,
            start_secs,
            duration_secs,
            audio: Shared::new(handle, audio),
            peaks,
        }
    }

    /// Rebuild a clip from its persistence record
    pub fn from_record(handle: &Handle, id: ClipId, record: ClipRecord, start_secs: f64) -> Self {
        let points = record.peaks.len().max(1);
        Self::new(
            handle,
            id,
            ClipAudio::new(record.channels, record.sample_rate),
            start_secs,
            points,
        )
    }

    pub fn id(&self) -> ClipId {
        self.id
    }

    pub fn start_secs(&self) -> f64 {
        self.start_secs
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    pub fn end_secs(&self) -> f64 {
        self.start_secs + self.duration_secs
    }

    pub fn sample_rate(&self) -> u32 {
        self.audio.sample_rate()
    }

    pub fn channel_count(&self) -> usize {
        self.audio.channel_count()
    }

    pub fn peaks(&self) -> &[f32] {
        &self.peaks
    }

    /// Shared sample data, cheap to clone onto the audio thread
    pub fn audio(&self) -> &Shared<ClipAudio> {
        &self.audio
    }

    /// Persistence record for external storage
    pub fn to_record(&self) -> ClipRecord {
        ClipRecord {
            duration: self.duration_secs,
            sample_rate: self.audio.sample_rate(),
            channel_count: self.audio.channel_count(),
            peaks: self.peaks.clone(),
            channels: self.audio.channels().to_vec(),
        }
    }
}

impl fmt::Debug for Clip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clip")
            .field("id", &self.id)
            .field("start_secs", &self.start_secs)
            .field("duration_secs", &self.duration_secs)
            .field("sample_rate", &self.audio.sample_rate())
            .field("channels", &self.audio.channel_count())
            .field("peaks", &self.peaks.len())
            .finish()
    }
}

/// Clip persistence record consumed by storage and collaboration layers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipRecord {
    /// Duration in seconds
    pub duration: f64,
    pub sample_rate: u32,
    pub channel_count: usize,
    /// Fixed-length peak summary, each value in [0, 1]
    pub peaks: Vec<f32>,
    /// Raw planar samples, one vector per channel
    pub channels: Vec<Vec<f32>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::gc::gc_handle;

    fn sine(frames: usize, amp: f32) -> Vec<f32> {
        (0..frames)
            .map(|i| (i as f32 * 2.0 * std::f32::consts::PI * 440.0 / 44_100.0).sin() * amp)
            .collect()
    }

    #[test]
    fn test_peaks_have_fixed_length() {
        let peaks = compute_peaks(&[sine(44_100, 0.8)], 500);
        assert_eq!(peaks.len(), 500);
        assert!(peaks.iter().all(|&p| (0.0..=1.0).contains(&p)));
        assert!(peaks.iter().any(|&p| p > 0.7));

        // Fewer frames than points still yields the full array
        let short = compute_peaks(&[vec![0.5; 10]], 500);
        assert_eq!(short.len(), 500);
        assert!(short.iter().all(|&p| p == 0.5));
    }

    #[test]
    fn test_peaks_cover_every_point() {
        // 44_100 / 500 is not whole; 501 leaves one spare frame
        for frames in [44_100, 501] {
            let peaks = compute_peaks(&[vec![0.5; frames]], 500);
            assert_eq!(peaks.len(), 500);
            for (i, &p) in peaks.iter().enumerate() {
                assert!(p > 0.0, "{} frames: point {} is empty", frames, i);
            }
        }

        // The last frame lands in the last point
        let mut tail = vec![0.0; 44_100];
        tail[44_099] = 0.9;
        let peaks = compute_peaks(&[tail], 500);
        assert_eq!(peaks[499], 0.9);
        assert!(peaks[..499].iter().all(|&p| p == 0.0));
    }

    #[test]
    fn test_peaks_take_max_across_channels_and_clamp() {
        let left = vec![0.1, 0.2, 0.3, 0.4];
        let right = vec![-0.9, 0.0, 2.5, 0.0];
        let peaks = compute_peaks(&[left, right], 2);
        assert_eq!(peaks, vec![0.9, 1.0]);
    }

    #[test]
    fn test_clip_duration() {
        let clip = Clip::new(
            &gc_handle(),
            ClipId(1),
            ClipAudio::new(vec![sine(22_050, 0.5), sine(22_050, 0.5)], 44_100),
            2.0,
            DEFAULT_PEAK_POINTS,
        );
        assert!((clip.duration_secs() - 0.5).abs() < 1e-9);
        assert!((clip.end_secs() - 2.5).abs() < 1e-9);
        assert_eq!(clip.channel_count(), 2);
    }

    #[test]
    fn test_record_serializes() {
        let clip = Clip::new(
            &gc_handle(),
            ClipId(9),
            ClipAudio::new(vec![vec![0.25, -0.5, 0.125, 0.0]], 48_000),
            0.0,
            4,
        );
        let record = clip.to_record();
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"sampleRate\":48000"));
        assert!(json.contains("\"channelCount\":1"));

        let back: ClipRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
        let rebuilt = Clip::from_record(&gc_handle(), ClipId(10), back, 1.0);
        assert_eq!(rebuilt.peaks(), clip.peaks());
    }
}
