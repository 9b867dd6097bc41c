//! Click-free parameter smoothing
//!
//! A smoothed parameter is a `(current, target, rate)` triple advanced once
//! per block on the audio thread:
//!
//! ```text
//! current += (target - current) * rate
//! ```
//!
//! Each tick covers a fixed fraction of the remaining distance, so `current`
//! approaches `target` monotonically and no tick moves it by more than
//! `rate × |target − current₀|`. Once the remaining distance fits inside one
//! such step the value snaps onto the target.

/// Exponential smoothing rate for a transition time
///
/// `transition_secs` is the time constant: after that long roughly 63 % of
/// the distance has been covered. Non-positive times mean "immediate".
pub fn smoothing_rate(block_secs: f32, transition_secs: f32) -> f32 {
    if !(transition_secs > 0.0) || !(block_secs > 0.0) {
        return 1.0;
    }
    (1.0 - (-block_secs / transition_secs).exp()).clamp(1e-6, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothedParam {
    current: f32,
    target: f32,
    rate: f32,
    /// Largest single step allowed for the active transition
    max_step: f32,
}

impl SmoothedParam {
    pub fn new(value: f32) -> Self {
        Self {
            current: value,
            target: value,
            rate: 1.0,
            max_step: 0.0,
        }
    }

    #[inline]
    pub fn current(&self) -> f32 {
        self.current
    }

    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }

    #[inline]
    pub fn rate(&self) -> f32 {
        self.rate
    }

    #[inline]
    pub fn is_settled(&self) -> bool {
        self.current == self.target
    }

    /// Start a transition toward `target`
    pub fn set_target(&mut self, target: f32, rate: f32) {
        self.target = target;
        self.rate = rate.clamp(0.0, 1.0);
        self.max_step = self.rate * (target - self.current).abs();
    }

    /// Jump straight to `value`
    pub fn set_immediate(&mut self, value: f32) {
        self.current = value;
        self.target = value;
        self.rate = 1.0;
        self.max_step = 0.0;
    }

    /// Advance one tick; returns whether `current` changed
    #[inline]
    pub fn tick(&mut self) -> bool {
        if self.current == self.target {
            return false;
        }
        let remaining = self.target - self.current;
        if remaining.abs() <= self.max_step {
            self.current = self.target;
        } else {
            self.current += remaining * self.rate;
        }
        true
    }
}
