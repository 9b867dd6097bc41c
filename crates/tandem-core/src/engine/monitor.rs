//! Block timing and overrun tracking
//!
//! The audio thread times every block against its budget
//! (`block_size / sample_rate`) and reports blocks that used more than the
//! configured share of it. The control side counts consecutive overruns and
//! decides when to shed load.

use std::sync::atomic::Ordering;
use std::time::Instant;

use serde::Serialize;

use super::command::RtEvent;
use super::meters::EngineAtomics;

/// Realtime half: measures one block at a time
pub(crate) struct BlockTimer {
    budget_secs: f32,
    overrun_ratio: f32,
}

impl BlockTimer {
    pub(crate) fn new(overrun_ratio: f32) -> Self {
        Self {
            budget_secs: 0.0,
            overrun_ratio,
        }
    }

    /// Finish timing a block of `frames` frames started at `started`
    pub(crate) fn finish(
        &mut self,
        started: Instant,
        frames: usize,
        sample_rate: u32,
        active_effects: usize,
        atomics: &EngineAtomics,
        reports: &mut rtrb::Producer<RtEvent>,
    ) {
        self.budget_secs = frames as f32 / sample_rate.max(1) as f32;
        let elapsed = started.elapsed().as_secs_f32();
        let load = if self.budget_secs > 0.0 {
            elapsed / self.budget_secs
        } else {
            0.0
        };
        atomics.record_load(load);
        let block = atomics.blocks.fetch_add(1, Ordering::Relaxed);

        if load >= self.overrun_ratio {
            atomics.overruns.fetch_add(1, Ordering::Relaxed);
            let _ = reports.push(RtEvent::BlockOverrun {
                block,
                elapsed_us: elapsed * 1e6,
                budget_us: self.budget_secs * 1e6,
                active_effects,
            });
        }
    }
}

/// Running overrun statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PerformanceStats {
    pub total_overruns: u64,
    pub consecutive_overruns: u32,
}

/// Control half: decides when repeated overruns call for an auto-bypass
#[derive(Debug)]
pub struct PerformanceMonitor {
    auto_bypass_after: Option<u32>,
    consecutive: u32,
    last_overrun_block: Option<u64>,
    total: u64,
}

impl PerformanceMonitor {
    pub fn new(auto_bypass_after: Option<u32>) -> Self {
        Self {
            auto_bypass_after,
            consecutive: 0,
            last_overrun_block: None,
            total: 0,
        }
    }

    /// Record an overrun on `block`; returns true when an effect should be
    /// bypassed to shed load
    ///
    /// Overruns only count as consecutive when they land on adjacent blocks.
    pub fn record_overrun(&mut self, block: u64) -> bool {
        self.total += 1;
        self.consecutive = match self.last_overrun_block {
            Some(last) if block == last + 1 => self.consecutive + 1,
            _ => 1,
        };
        self.last_overrun_block = Some(block);

        match self.auto_bypass_after {
            Some(limit) if limit > 0 && self.consecutive >= limit => {
                self.consecutive = 0;
                true
            }
            _ => false,
        }
    }

    pub fn stats(&self) -> PerformanceStats {
        PerformanceStats {
            total_overruns: self.total,
            consecutive_overruns: self.consecutive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consecutive_overruns_trigger_bypass() {
        let mut monitor = PerformanceMonitor::new(Some(3));
        assert!(!monitor.record_overrun(10));
        assert!(!monitor.record_overrun(11));
        assert!(monitor.record_overrun(12));
        // Counter restarts after a bypass
        assert!(!monitor.record_overrun(13));
        assert_eq!(monitor.stats().total_overruns, 4);
    }

    #[test]
    fn test_gap_resets_streak() {
        let mut monitor = PerformanceMonitor::new(Some(2));
        assert!(!monitor.record_overrun(1));
        assert!(!monitor.record_overrun(5));
        assert!(monitor.record_overrun(6));
    }

    #[test]
    fn test_no_auto_bypass_by_default() {
        let mut monitor = PerformanceMonitor::new(None);
        for block in 0..100 {
            assert!(!monitor.record_overrun(block));
        }
        assert_eq!(monitor.stats().consecutive_overruns, 100);
    }

    #[test]
    fn test_timer_reports_overrun_at_zero_ratio() {
        let atomics = EngineAtomics::new(1);
        let (mut tx, mut rx) = rtrb::RingBuffer::new(4);
        let mut timer = BlockTimer::new(0.0);
        timer.finish(Instant::now(), 128, 44_100, 3, &atomics, &mut tx);
        match rx.pop() {
            Ok(RtEvent::BlockOverrun {
                block,
                active_effects,
                budget_us,
                ..
            }) => {
                assert_eq!(block, 0);
                assert_eq!(active_effects, 3);
                assert!((budget_us - 2902.5).abs() < 1.0);
            }
            other => panic!("expected overrun, got {:?}", other),
        }
        assert_eq!(atomics.overruns.load(Ordering::Relaxed), 1);
        assert_eq!(atomics.blocks.load(Ordering::Relaxed), 1);
    }
}
