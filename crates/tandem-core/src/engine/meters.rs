//! Lock-free telemetry shared between the audio thread and the control side
//!
//! The audio thread writes, the control side reads. Everything is a relaxed
//! atomic except the snapshot generation, which pairs a release store with
//! an acquire load so the audio thread sees the snapshot it was told about.
//!
//! Peaks are stored as `f32` bits. For non-negative floats the bit pattern
//! orders the same way as the value, so `fetch_max` on the bits keeps the
//! largest peak since the last read.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

pub struct EngineAtomics {
    /// Generation of the most recently published mix snapshot
    pub snapshot_generation: AtomicU64,
    /// Transport position in frames
    pub transport_frame: AtomicU64,
    /// Whether scheduled sources are advancing
    pub playing: AtomicBool,
    /// Blocks processed since start
    pub blocks: AtomicU64,
    /// Blocks that exceeded the overrun threshold
    pub overruns: AtomicU64,
    strip_peaks: Vec<AtomicU32>,
    master_peak: AtomicU32,
    /// Last block's processing time over its budget
    last_load: AtomicU32,
    /// Largest load since the last read
    peak_load: AtomicU32,
}

impl EngineAtomics {
    pub fn new(strips: usize) -> Self {
        Self {
            snapshot_generation: AtomicU64::new(0),
            transport_frame: AtomicU64::new(0),
            playing: AtomicBool::new(false),
            blocks: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            strip_peaks: (0..strips).map(|_| AtomicU32::new(0)).collect(),
            master_peak: AtomicU32::new(0),
            last_load: AtomicU32::new(0),
            peak_load: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.snapshot_generation.load(Ordering::Acquire)
    }

    #[inline]
    pub fn publish_generation(&self, generation: u64) {
        self.snapshot_generation.store(generation, Ordering::Release);
    }

    #[inline]
    pub fn transport_frame(&self) -> u64 {
        self.transport_frame.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn record_strip_peak(&self, strip: usize, peak: f32) {
        if let Some(slot) = self.strip_peaks.get(strip) {
            slot.fetch_max(peak.max(0.0).to_bits(), Ordering::Relaxed);
        }
    }

    /// Read and reset a strip's peak
    pub fn take_strip_peak(&self, strip: usize) -> f32 {
        self.strip_peaks
            .get(strip)
            .map(|slot| f32::from_bits(slot.swap(0, Ordering::Relaxed)))
            .unwrap_or(0.0)
    }

    #[inline]
    pub fn record_master_peak(&self, peak: f32) {
        self.master_peak
            .fetch_max(peak.max(0.0).to_bits(), Ordering::Relaxed);
    }

    /// Read and reset the master peak
    pub fn take_master_peak(&self) -> f32 {
        f32::from_bits(self.master_peak.swap(0, Ordering::Relaxed))
    }

    #[inline]
    pub fn record_load(&self, load: f32) {
        let bits = load.max(0.0).to_bits();
        self.last_load.store(bits, Ordering::Relaxed);
        self.peak_load.fetch_max(bits, Ordering::Relaxed);
    }

    pub fn last_load(&self) -> f32 {
        f32::from_bits(self.last_load.load(Ordering::Relaxed))
    }

    /// Read and reset the peak load
    pub fn take_peak_load(&self) -> f32 {
        f32::from_bits(self.peak_load.swap(0, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peaks_keep_maximum_until_read() {
        let atomics = EngineAtomics::new(4);
        atomics.record_strip_peak(2, 0.25);
        atomics.record_strip_peak(2, 0.75);
        atomics.record_strip_peak(2, 0.5);
        assert_eq!(atomics.take_strip_peak(2), 0.75);
        assert_eq!(atomics.take_strip_peak(2), 0.0);
        // Out of range strips are ignored
        atomics.record_strip_peak(9, 1.0);
        assert_eq!(atomics.take_strip_peak(9), 0.0);
    }

    #[test]
    fn test_load_tracking() {
        let atomics = EngineAtomics::new(1);
        atomics.record_load(0.4);
        atomics.record_load(0.9);
        atomics.record_load(0.2);
        assert_eq!(atomics.last_load(), 0.2);
        assert_eq!(atomics.take_peak_load(), 0.9);
        assert_eq!(atomics.take_peak_load(), 0.0);
    }

    #[test]
    fn test_generation_publish() {
        let atomics = EngineAtomics::new(1);
        atomics.publish_generation(7);
        assert_eq!(atomics.generation(), 7);
    }
}
