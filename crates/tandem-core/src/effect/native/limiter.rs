//! Lookahead limiter - feed-forward true-peak limiting
//!
//! # Algorithm
//!
//! 1. Each input sample is written to a ring-buffer delay line.
//! 2. The *undelayed* peak across channels is compared against the
//!    threshold; a per-sample target gain is stored in a parallel ring.
//! 3. A sliding-window minimum over the whole lookahead span (including the
//!    sample about to leave the delay line) gives the gain that sample needs.
//!    The window is a monotonic deque, so each sample costs amortised O(1)
//!    regardless of the lookahead.
//! 4. Attack is instantaneous: the gain drops straight to that minimum.
//!    Release is an exponential return toward unity.
//! 5. The delayed audio is scaled by the gain and output.
//!
//! Because the window always contains the target of the sample being output
//! and the gain never exceeds the window minimum, the output peak can never
//! exceed the threshold.
//!
//! Ring buffers are sized for the maximum lookahead at construction; changing
//! the lookahead moves the read offset and refills the deque from the stored
//! target gains.

use crate::effect::Processor;
use crate::types::{db_to_linear, AudioBuffer, MAX_CHANNELS};

/// Longest supported lookahead in seconds
const MAX_LOOKAHEAD_SECS: f32 = 0.02;

/// Monotonic deque of `(sample index, target gain)`, gains strictly
/// increasing from front to back. The front is the window minimum.
struct MinWindow {
    entries: Vec<(u64, f32)>,
    head: usize,
    len: usize,
}

impl MinWindow {
    fn new(capacity: usize) -> Self {
        Self {
            entries: vec![(0, 1.0); capacity],
            head: 0,
            len: 0,
        }
    }

    fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    fn push(&mut self, index: u64, gain: f32) {
        let cap = self.entries.len();
        while self.len > 0 && self.entries[(self.head + self.len - 1) % cap].1 >= gain {
            self.len -= 1;
        }
        debug_assert!(self.len < cap);
        self.entries[(self.head + self.len) % cap] = (index, gain);
        self.len += 1;
    }

    /// Drop entries older than `oldest`
    fn evict_before(&mut self, oldest: u64) {
        let cap = self.entries.len();
        while self.len > 0 && self.entries[self.head].0 < oldest {
            self.head = (self.head + 1) % cap;
            self.len -= 1;
        }
    }

    fn min(&self) -> f32 {
        if self.len == 0 {
            1.0
        } else {
            self.entries[self.head].1
        }
    }
}

pub struct Limiter {
    sample_rate: f32,
    /// Threshold in linear amplitude
    threshold: f32,
    /// Lookahead in samples
    lookahead: usize,
    /// Per-channel delay lines: `delay[channel][position]`
    delay: [Vec<f32>; MAX_CHANNELS],
    /// Per-sample target gain (threshold / peak, or 1.0 when below threshold)
    target_gains: Vec<f32>,
    /// Shared write cursor for all ring buffers
    write_pos: usize,
    /// Target gains of the current lookahead span
    window: MinWindow,
    /// Running sample index, the deque's clock
    next_index: u64,
    /// Current gain applied to the output (1.0 = unity)
    gain: f32,
    release_coeff: f32,
}

impl Limiter {
    pub const THRESHOLD: usize = 0;
    pub const RELEASE: usize = 1;
    pub const LOOKAHEAD: usize = 2;

    pub fn new(sample_rate: f32, values: &[f32]) -> Self {
        let value = |i: usize, default: f32| values.get(i).copied().unwrap_or(default);
        let capacity = (MAX_LOOKAHEAD_SECS * sample_rate).ceil() as usize + 2;
        let mut limiter = Self {
            sample_rate,
            threshold: db_to_linear(value(Self::THRESHOLD, -1.0)),
            lookahead: 1,
            delay: std::array::from_fn(|_| vec![0.0; capacity]),
            target_gains: vec![1.0; capacity],
            write_pos: 0,
            window: MinWindow::new(capacity),
            next_index: 0,
            gain: 1.0,
            release_coeff: 0.0,
        };
        limiter.set_release(value(Self::RELEASE, 0.05));
        limiter.set_lookahead(value(Self::LOOKAHEAD, 0.005));
        limiter
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Current output gain (1.0 = no limiting)
    pub fn current_gain(&self) -> f32 {
        self.gain
    }

    fn capacity(&self) -> usize {
        self.target_gains.len()
    }

    fn set_release(&mut self, secs: f32) {
        let samples = (secs * self.sample_rate).max(1.0);
        self.release_coeff = (-1.0 / samples).exp();
    }

    fn set_lookahead(&mut self, secs: f32) {
        let samples = (secs * self.sample_rate).round() as usize;
        let lookahead = samples.clamp(1, self.capacity() - 2);
        if lookahead != self.lookahead {
            self.lookahead = lookahead;
            self.rebuild_window();
        }
    }

    /// Refill the deque with the stored targets the new span reaches back to
    fn rebuild_window(&mut self) {
        let cap = self.capacity();
        let span = (self.lookahead as u64).min(self.next_index) as usize;
        self.window.clear();
        for k in (1..=span).rev() {
            let pos = (self.write_pos + cap - k) % cap;
            self.window.push(self.next_index - k as u64, self.target_gains[pos]);
        }
    }

    /// Minimum target gain across the lookahead window, inclusive of the
    /// sample that leaves the delay line this step
    #[inline]
    fn window_min_gain(&mut self, target: f32) -> f32 {
        let index = self.next_index;
        self.window.evict_before(index.saturating_sub(self.lookahead as u64));
        self.window.push(index, target);
        self.next_index += 1;
        self.window.min()
    }
}

impl Processor for Limiter {
    fn set_parameter(&mut self, index: usize, value: f32) {
        match index {
            Self::THRESHOLD => self.threshold = db_to_linear(value),
            Self::RELEASE => self.set_release(value),
            Self::LOOKAHEAD => self.set_lookahead(value),
            _ => {}
        }
    }

    fn process(&mut self, block: &mut AudioBuffer) {
        let channels = block.channels();
        let cap = self.capacity();
        for frame in 0..block.frames() {
            // Peak detection on the undelayed input
            let mut peak = 0.0_f32;
            for ch in 0..channels {
                peak = peak.max(block.channel(ch)[frame].abs());
            }
            let target = if peak > self.threshold {
                self.threshold / peak
            } else {
                1.0
            };
            self.target_gains[self.write_pos] = target;

            let min_gain = self.window_min_gain(target);
            if min_gain < self.gain {
                self.gain = min_gain;
            } else {
                self.gain = self.gain * self.release_coeff + min_gain * (1.0 - self.release_coeff);
                self.gain = self.gain.min(min_gain);
            }

            let read_pos = (self.write_pos + cap - self.lookahead) % cap;
            for ch in 0..channels {
                let input = block.channel(ch)[frame];
                let delayed = self.delay[ch][read_pos];
                self.delay[ch][self.write_pos] = input;
                block.channel_mut(ch)[frame] = delayed * self.gain;
            }

            self.write_pos = (self.write_pos + 1) % cap;
        }
    }

    fn reset(&mut self) {
        for line in &mut self.delay {
            line.fill(0.0);
        }
        self.target_gains.fill(1.0);
        self.write_pos = 0;
        self.window.clear();
        self.next_index = 0;
        self.gain = 1.0;
    }

    fn latency_samples(&self) -> usize {
        self.lookahead
    }
}
