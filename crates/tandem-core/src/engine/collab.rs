//! Remote collaborator inputs
//!
//! Each collaborator's decoded audio arrives through its own `rtrb` ring of
//! interleaved stereo frames. The network side writes with a
//! [`CollaboratorFeed`]; the audio thread reads whole frames, mixes them into
//! the master bus at the collaborator's gain and plays silence when the feed
//! runs dry.

use basedrop::Owned;

use crate::types::{AudioBuffer, CollaboratorId, MAX_CHANNELS};

/// Remote inputs that may be connected at once
pub const MAX_COLLABORATORS: usize = 8;

/// Writer half of a collaborator ring, held by whoever decodes the stream
pub struct CollaboratorFeed {
    producer: rtrb::Producer<f32>,
}

impl CollaboratorFeed {
    pub(crate) fn new(producer: rtrb::Producer<f32>) -> Self {
        Self { producer }
    }

    /// Push interleaved stereo samples; returns the frames accepted
    ///
    /// Only whole frames are written. Frames that do not fit are dropped.
    pub fn push_interleaved(&mut self, samples: &[f32]) -> usize {
        let frames = (samples.len() / MAX_CHANNELS).min(self.free_frames());
        if frames == 0 {
            return 0;
        }
        let n = frames * MAX_CHANNELS;
        match self.producer.write_chunk_uninit(n) {
            Ok(chunk) => {
                chunk.fill_from_iter(samples[..n].iter().copied());
                frames
            }
            Err(_) => 0,
        }
    }

    /// Frames that can be written without dropping
    pub fn free_frames(&self) -> usize {
        self.producer.slots() / MAX_CHANNELS
    }

    /// Whether the engine has let go of the other end
    pub fn is_closed(&self) -> bool {
        self.producer.is_abandoned()
    }
}

/// Audio-thread side of one collaborator
pub(crate) struct CollaboratorInput {
    pub(crate) id: CollaboratorId,
    feed: Owned<rtrb::Consumer<f32>>,
    gain: f32,
    target_gain: f32,
}

impl CollaboratorInput {
    pub(crate) fn new(id: CollaboratorId, feed: Owned<rtrb::Consumer<f32>>, gain: f32) -> Self {
        Self {
            id,
            feed,
            // Fade in on connect
            gain: 0.0,
            target_gain: gain,
        }
    }

    pub(crate) fn set_gain(&mut self, gain: f32) {
        self.target_gain = gain;
    }

    /// Mix up to one block of buffered frames into the stereo bus
    ///
    /// Returns the frames actually read; missing frames are silence.
    pub(crate) fn mix_into(&mut self, bus: &mut AudioBuffer) -> usize {
        let frames = bus.frames();
        let available = (self.feed.slots() / MAX_CHANNELS).min(frames);

        let from = self.gain;
        let to = self.target_gain;
        let step = 1.0 / frames.max(1) as f32;
        self.gain = to;
        if available == 0 {
            return 0;
        }

        let Ok(chunk) = self.feed.read_chunk(available * MAX_CHANNELS) else {
            return 0;
        };
        let (first, second) = chunk.as_slices();
        let mut samples = first.iter().chain(second.iter());
        let right = bus.channels().min(MAX_CHANNELS) - 1;
        for i in 0..available {
            let (Some(&l), Some(&r)) = (samples.next(), samples.next()) else {
                break;
            };
            let gain = from + (to - from) * (i + 1) as f32 * step;
            bus.channel_mut(0)[i] += l * gain;
            bus.channel_mut(right)[i] += r * gain;
        }
        chunk.commit_all();
        available
    }
}

/// Ring capacity in samples for `secs` of stereo audio
pub(crate) fn feed_capacity(sample_rate: u32, secs: f32) -> usize {
    ((sample_rate as f32 * secs.max(0.0)).ceil() as usize).max(1) * MAX_CHANNELS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::gc::gc_handle;

    fn pair(frames: usize) -> (CollaboratorFeed, CollaboratorInput) {
        let (tx, rx) = rtrb::RingBuffer::new(frames * MAX_CHANNELS);
        let feed = CollaboratorFeed::new(tx);
        let mut input = CollaboratorInput::new(CollaboratorId(1), Owned::new(&gc_handle(), rx), 1.0);
        // Skip the connect fade
        input.gain = 1.0;
        (feed, input)
    }

    #[test]
    fn test_feed_writes_whole_frames() {
        let (mut feed, _input) = pair(4);
        assert_eq!(feed.push_interleaved(&[0.1, 0.2, 0.3]), 1);
        assert_eq!(feed.push_interleaved(&[0.0; 10]), 3);
        assert_eq!(feed.free_frames(), 0);
        assert_eq!(feed.push_interleaved(&[0.0; 2]), 0);
    }

    #[test]
    fn test_underflow_leaves_silence() {
        let (mut feed, mut input) = pair(16);
        feed.push_interleaved(&[0.5, -0.5, 0.25, -0.25]);

        let mut bus = AudioBuffer::new(2, 4);
        assert_eq!(input.mix_into(&mut bus), 2);
        assert_eq!(bus.channel(0), &[0.5, 0.25, 0.0, 0.0]);
        assert_eq!(bus.channel(1), &[-0.5, -0.25, 0.0, 0.0]);

        let mut bus = AudioBuffer::new(2, 4);
        assert_eq!(input.mix_into(&mut bus), 0);
        assert_eq!(bus.peak(), 0.0);
    }

    #[test]
    fn test_gain_applies() {
        let (mut feed, mut input) = pair(16);
        input.set_gain(0.5);
        feed.push_interleaved(&[1.0; 8]);
        let mut bus = AudioBuffer::new(2, 4);
        input.mix_into(&mut bus);
        // Ramps from 1.0 to 0.5 across the block
        assert_eq!(bus.channel(0)[3], 0.5);
        let mut bus = AudioBuffer::new(2, 4);
        feed.push_interleaved(&[1.0; 8]);
        input.mix_into(&mut bus);
        assert_eq!(bus.channel(0), &[0.5; 4]);
    }

    #[test]
    fn test_feed_capacity() {
        assert_eq!(feed_capacity(44_100, 0.5), 44_100);
        assert_eq!(feed_capacity(48_000, 0.0), 2);
    }
}
