//! Realtime per-track strip
//!
//! A strip owns everything one track needs on the audio thread: its working
//! block, the capture tap used while recording, the clip sources scheduled
//! for playback, and the gain/pan state the ramps start from. All storage is
//! sized when the strip is created.

use std::f32::consts::FRAC_PI_2;

use basedrop::{Owned, Shared};

use super::command::RtEvent;
use super::snapshot::{InputRoute, StripSnapshot};
use crate::clip::ClipAudio;
use crate::types::{AudioBuffer, MAX_CHANNELS};

/// Clip sources a strip can play at once
pub const MAX_SOURCES_PER_STRIP: usize = 16;

/// Capture endpoint handed to the audio thread when recording starts
pub struct CaptureTap {
    producer: rtrb::Producer<f32>,
    channels: usize,
    started: bool,
    overflowed: bool,
}

impl CaptureTap {
    pub fn new(producer: rtrb::Producer<f32>, channels: usize) -> Self {
        Self {
            producer,
            channels: channels.clamp(1, MAX_CHANNELS),
            started: false,
            overflowed: false,
        }
    }
}

/// A clip scheduled on a strip
pub struct ScheduledSource {
    pub audio: Shared<ClipAudio>,
    /// Frames to wait before the clip starts
    pub delay_frames: u64,
    /// Read position inside the clip
    pub offset_frames: usize,
}

/// Panner matrix `[ll, rl, lr, rr]`:
/// `out_l = ll·in_l + rl·in_r`, `out_r = lr·in_l + rr·in_r`
///
/// Follows the stereo panner law: a mono source is spread with equal power;
/// a stereo source at pan 0 passes unchanged and otherwise folds the far
/// channel into the near one.
pub fn pan_matrix(pan: f32, mono: bool) -> [f32; 4] {
    let pan = pan.clamp(-1.0, 1.0);
    if mono {
        let x = (pan + 1.0) * 0.5 * FRAC_PI_2;
        return [x.cos(), 0.0, x.sin(), 0.0];
    }
    if pan == 0.0 {
        return [1.0, 0.0, 0.0, 1.0];
    }
    if pan < 0.0 {
        let x = (pan + 1.0) * FRAC_PI_2;
        [1.0, x.cos(), 0.0, x.sin()]
    } else {
        let x = pan * FRAC_PI_2;
        [x.cos(), 0.0, x.sin(), 1.0]
    }
}

pub(crate) struct Strip {
    block: AudioBuffer,
    gain: f32,
    pan: f32,
    capture: Option<Owned<CaptureTap>>,
    sources: Vec<ScheduledSource>,
}

impl Strip {
    pub(crate) fn new() -> Self {
        Self {
            block: AudioBuffer::default(),
            // New strips fade in from silence
            gain: 0.0,
            pan: 0.0,
            capture: None,
            sources: Vec::with_capacity(MAX_SOURCES_PER_STRIP),
        }
    }

    pub(crate) fn reset(&mut self) {
        self.gain = 0.0;
        self.pan = 0.0;
        self.capture = None;
        self.sources.clear();
        self.block.clear();
    }

    pub(crate) fn start_capture(&mut self, tap: Owned<CaptureTap>) {
        self.capture = Some(tap);
    }

    pub(crate) fn stop_capture(&mut self) {
        self.capture = None;
    }

    /// Queue a source; returns false when the strip is full
    pub(crate) fn schedule(&mut self, source: ScheduledSource) -> bool {
        if self.sources.len() >= MAX_SOURCES_PER_STRIP {
            return false;
        }
        self.sources.push(source);
        true
    }

    pub(crate) fn clear_sources(&mut self) {
        self.sources.clear();
    }

    pub(crate) fn block_mut(&mut self) -> &mut AudioBuffer {
        &mut self.block
    }

    /// Shape the block for this strip and fill it from the device input
    pub(crate) fn load_input(&mut self, snap: &StripSnapshot, device_in: &AudioBuffer, frames: usize) {
        self.block.set_shape(snap.channels, frames);
        self.block.clear();

        let Some(route) = snap.input else {
            return;
        };
        let available = frames.min(device_in.frames());
        let last_in = device_in.channels() - 1;
        match route {
            InputRoute::Mono { channel } => {
                let src = device_in.channel(channel.min(last_in));
                for ch in 0..self.block.channels() {
                    self.block.channel_mut(ch)[..available].copy_from_slice(&src[..available]);
                }
            }
            InputRoute::Stereo { left } => {
                for ch in 0..self.block.channels() {
                    let src = device_in.channel((left + ch).min(last_in));
                    self.block.channel_mut(ch)[..available].copy_from_slice(&src[..available]);
                }
            }
        }
    }

    /// Push the current block into the capture ring as interleaved frames
    ///
    /// A block is written whole or not at all, so the reader only ever sees
    /// complete frames.
    pub(crate) fn capture(&mut self, strip: usize, frame: u64, reports: &mut rtrb::Producer<RtEvent>) {
        let Some(tap) = self.capture.as_mut() else {
            return;
        };
        let frames = self.block.frames();
        let channels = tap.channels;
        let block = &self.block;
        let last = block.channels() - 1;

        match tap.producer.write_chunk_uninit(frames * channels) {
            Ok(chunk) => {
                let samples = (0..frames)
                    .flat_map(|i| (0..channels).map(move |ch| block.channel(ch.min(last))[i]));
                chunk.fill_from_iter(samples);
                if !tap.started {
                    tap.started = true;
                    let _ = reports.push(RtEvent::CaptureStarted { strip, frame });
                }
            }
            Err(_) => {
                if !tap.overflowed {
                    tap.overflowed = true;
                    let _ = reports.push(RtEvent::CaptureOverflow { strip });
                }
            }
        }
    }

    /// Mix scheduled clip sources into the block, dropping finished ones
    pub(crate) fn mix_sources(&mut self) {
        let frames = self.block.frames();
        let channels = self.block.channels();
        let mut i = 0;
        while i < self.sources.len() {
            let source = &mut self.sources[i];
            if source.delay_frames >= frames as u64 {
                source.delay_frames -= frames as u64;
                i += 1;
                continue;
            }
            let start = source.delay_frames as usize;
            source.delay_frames = 0;

            let audio = &*source.audio;
            let clip_frames = audio.frames();
            let n = (frames - start).min(clip_frames.saturating_sub(source.offset_frames));
            let src_channels = audio.channels();
            if !src_channels.is_empty() {
                for ch in 0..channels {
                    let src = &src_channels[ch.min(src_channels.len() - 1)];
                    let src = &src[source.offset_frames..source.offset_frames + n];
                    for (dst, s) in self.block.channel_mut(ch)[start..start + n].iter_mut().zip(src) {
                        *dst += s;
                    }
                }
            }
            source.offset_frames += n;

            if source.offset_frames >= clip_frames {
                // Drops the Shared on this thread; the buffer is freed by the collector
                self.sources.swap_remove(i);
            } else {
                i += 1;
            }
        }
    }

    /// Apply the gain/pan ramp and add the result to the stereo bus
    ///
    /// Gain and pan move linearly from their previous values to the new
    /// targets across the block. Returns the peak this strip contributed.
    pub(crate) fn render_into(&mut self, bus: &mut AudioBuffer, gain: f32, pan: f32) -> f32 {
        let frames = self.block.frames().min(bus.frames());
        let mono = self.block.channels() == 1;
        let from = scaled(pan_matrix(self.pan, mono), self.gain);
        let to = scaled(pan_matrix(pan, mono), gain);
        let step = 1.0 / frames.max(1) as f32;

        let right_in = if mono { 0 } else { 1 };
        let mut peak = 0.0_f32;
        for i in 0..frames {
            let t = (i + 1) as f32 * step;
            let m = [
                from[0] + (to[0] - from[0]) * t,
                from[1] + (to[1] - from[1]) * t,
                from[2] + (to[2] - from[2]) * t,
                from[3] + (to[3] - from[3]) * t,
            ];
            let in_l = self.block.channel(0)[i];
            let in_r = self.block.channel(right_in)[i];
            let out_l = m[0] * in_l + m[1] * in_r;
            let out_r = m[2] * in_l + m[3] * in_r;
            bus.channel_mut(0)[i] += out_l;
            bus.channel_mut(1)[i] += out_r;
            peak = peak.max(out_l.abs()).max(out_r.abs());
        }

        self.gain = gain;
        self.pan = pan;
        peak
    }
}

fn scaled(m: [f32; 4], gain: f32) -> [f32; 4] {
    [m[0] * gain, m[1] * gain, m[2] * gain, m[3] * gain]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::gc::gc_handle;
    use crate::types::TrackId;

    fn snap(channels: usize, input: Option<InputRoute>) -> StripSnapshot {
        StripSnapshot {
            track: TrackId(1),
            strip: 0,
            gain: 1.0,
            pan: 0.0,
            channels,
            input,
            chain: Vec::new(),
        }
    }

    #[test]
    fn test_pan_law() {
        let center = pan_matrix(0.0, true);
        assert!((center[0] - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert!((center[2] - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert_eq!(pan_matrix(0.0, false), [1.0, 0.0, 0.0, 1.0]);

        let hard_left = pan_matrix(-1.0, false);
        assert!((hard_left[1] - 1.0).abs() < 1e-6, "right folds into left");
        assert!(hard_left[3].abs() < 1e-6, "right output silent");
    }

    #[test]
    fn test_gain_ramp_is_linear_and_settles() {
        let mut strip = Strip::new();
        strip.gain = 1.0;
        let device = AudioBuffer::from_channels(&[&[1.0; 4], &[1.0; 4]]);
        strip.load_input(&snap(2, Some(InputRoute::Stereo { left: 0 })), &device, 4);

        let mut bus = AudioBuffer::new(2, 4);
        strip.render_into(&mut bus, 0.0, 0.0);
        assert_eq!(bus.channel(0), &[0.75, 0.5, 0.25, 0.0]);

        // Next block starts from the settled value
        let mut bus = AudioBuffer::new(2, 4);
        strip.load_input(&snap(2, Some(InputRoute::Stereo { left: 0 })), &device, 4);
        assert_eq!(strip.render_into(&mut bus, 0.0, 0.0), 0.0);
    }

    #[test]
    fn test_mono_route_duplicates_channel() {
        let mut strip = Strip::new();
        let device = AudioBuffer::from_channels(&[&[0.1; 8], &[0.7; 8]]);
        strip.load_input(&snap(2, Some(InputRoute::Mono { channel: 1 })), &device, 8);
        assert_eq!(strip.block.channel(0)[3], 0.7);
        assert_eq!(strip.block.channel(1)[3], 0.7);
    }

    #[test]
    fn test_source_delay_offset_and_completion() {
        let mut strip = Strip::new();
        let audio = Shared::new(&gc_handle(), ClipAudio::new(vec![vec![1.0, 2.0, 3.0, 4.0, 5.0]], 44_100));
        assert!(strip.schedule(ScheduledSource {
            audio,
            delay_frames: 6,
            offset_frames: 1,
        }));

        let silent = AudioBuffer::new(1, 4);
        strip.load_input(&snap(1, None), &silent, 4);
        strip.mix_sources();
        assert_eq!(strip.block.channel(0), &[0.0; 4]);

        strip.load_input(&snap(1, None), &silent, 4);
        strip.mix_sources();
        assert_eq!(strip.block.channel(0), &[0.0, 0.0, 2.0, 3.0]);

        strip.load_input(&snap(1, None), &silent, 4);
        strip.mix_sources();
        assert_eq!(strip.block.channel(0), &[4.0, 5.0, 0.0, 0.0]);
        assert!(strip.sources.is_empty());
    }

    #[test]
    fn test_capture_writes_whole_blocks() {
        let (producer, mut consumer) = rtrb::RingBuffer::new(6);
        let (mut reports, mut report_rx) = rtrb::RingBuffer::new(8);
        let mut strip = Strip::new();
        strip.start_capture(Owned::new(&gc_handle(), CaptureTap::new(producer, 2)));

        let device = AudioBuffer::from_channels(&[&[1.0, 2.0], &[-1.0, -2.0]]);
        strip.load_input(&snap(2, Some(InputRoute::Stereo { left: 0 })), &device, 2);
        strip.capture(0, 128, &mut reports);
        assert_eq!(report_rx.pop().unwrap(), RtEvent::CaptureStarted { strip: 0, frame: 128 });

        // Second block does not fit in the remaining two slots
        strip.capture(0, 130, &mut reports);
        assert_eq!(report_rx.pop().unwrap(), RtEvent::CaptureOverflow { strip: 0 });

        let got: Vec<f32> = std::iter::from_fn(|| consumer.pop().ok()).collect();
        assert_eq!(got, vec![1.0, -1.0, 2.0, -2.0]);
    }
}
