//! Device-less backend
//!
//! Runs the processor on its own thread at real-time cadence with silent
//! input and discarded output. Used when no device is available, when the
//! real device fails to come up, and in tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::backend::{AudioBackend, AudioHandle, ReadySender};
use super::error::{DeviceError, DeviceResult};
use crate::engine::BlockProcessor;
use crate::types::{AudioBuffer, MAX_CHANNELS};

pub struct NullBackend {
    block_size: usize,
    /// Delay before reporting ready, to model slow devices
    ready_delay: Option<Duration>,
}

impl NullBackend {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
            ready_delay: None,
        }
    }

    pub fn with_ready_delay(mut self, delay: Duration) -> Self {
        self.ready_delay = Some(delay);
        self
    }
}

impl AudioBackend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn start(self: Box<Self>, mut processor: BlockProcessor, ready: ReadySender) -> DeviceResult<AudioHandle> {
        let sample_rate = processor.sample_rate();
        let block_size = self.block_size;
        let ready_delay = self.ready_delay;
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let period = Duration::from_secs_f64(block_size as f64 / sample_rate.max(1) as f64);

        let thread = std::thread::Builder::new()
            .name("null-audio".to_string())
            .spawn(move || {
                if let Some(delay) = ready_delay {
                    std::thread::sleep(delay);
                }
                let _ = ready.send(Ok(()));

                let input = AudioBuffer::new(MAX_CHANNELS, block_size);
                let mut output = AudioBuffer::new(MAX_CHANNELS, block_size);
                let mut deadline = Instant::now();
                while thread_running.load(Ordering::Relaxed) {
                    processor.process(&input, &mut output);
                    deadline += period;
                    let now = Instant::now();
                    if deadline > now {
                        std::thread::sleep(deadline - now);
                    } else {
                        // Fell behind; don't try to catch up with a burst
                        deadline = now;
                    }
                }
            })
            .map_err(|e| DeviceError::StreamBuildError(e.to_string()))?;

        log::debug!("NullBackend: cadence thread started ({} frames @ {}Hz)", block_size, sample_rate);

        Ok(AudioHandle::Null(NullAudioHandle {
            running,
            thread: Some(thread),
            sample_rate,
            buffer_size: block_size as u32,
        }))
    }
}

/// Keeps the cadence thread alive; dropping it stops and joins the thread
pub struct NullAudioHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    sample_rate: u32,
    buffer_size: u32,
}

impl NullAudioHandle {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }
}

impl Drop for NullAudioHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("NullBackend: cadence thread panicked");
            }
        }
    }
}
