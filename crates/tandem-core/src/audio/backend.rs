//! Audio backend trait
//!
//! A backend takes ownership of the [`BlockProcessor`], drives it from its
//! audio callback and reports once the device is actually running:
//!
//! - [`NullBackend`](super::NullBackend): no device, a thread keeps real-time cadence
//! - `CpalBackend` (feature `cpal-backend`): system devices through CPAL
//!
//! [`start_audio_system`] waits a bounded time for that report so a hung
//! driver can never stall engine start-up.

use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError, Sender};

use super::error::{DeviceError, DeviceResult};
use super::null_backend::NullAudioHandle;
use crate::engine::BlockProcessor;

/// Sender the backend uses to report that audio is flowing (or why not)
pub type ReadySender = Sender<DeviceResult<()>>;

/// Something that can run a [`BlockProcessor`] in real time
pub trait AudioBackend: Send {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Start audio, taking ownership of the processor
    ///
    /// Returns as soon as streams or threads exist. The backend reports on
    /// `ready` once the first block has been requested, or with the error
    /// that stopped it.
    fn start(self: Box<Self>, processor: BlockProcessor, ready: ReadySender) -> DeviceResult<AudioHandle>;
}

/// Handle to the active audio system
///
/// Keeps the audio streams/threads alive. Drop this to stop audio.
pub enum AudioHandle {
    /// Device-less cadence thread
    Null(NullAudioHandle),

    /// CPAL streams
    #[cfg(feature = "cpal-backend")]
    Cpal(super::cpal_backend::CpalAudioHandle),
}

impl AudioHandle {
    /// Get the sample rate of the audio system
    pub fn sample_rate(&self) -> u32 {
        match self {
            AudioHandle::Null(h) => h.sample_rate(),
            #[cfg(feature = "cpal-backend")]
            AudioHandle::Cpal(h) => h.sample_rate(),
        }
    }

    /// Get the block size the device asks for, in frames
    pub fn buffer_size(&self) -> u32 {
        match self {
            AudioHandle::Null(h) => h.buffer_size(),
            #[cfg(feature = "cpal-backend")]
            AudioHandle::Cpal(h) => h.buffer_size(),
        }
    }

    /// Get the audio latency in milliseconds (one-way, output only)
    pub fn latency_ms(&self) -> f32 {
        (self.buffer_size() as f32 / self.sample_rate().max(1) as f32) * 1000.0
    }

    /// Whether a device capture stream is running
    pub fn has_input(&self) -> bool {
        match self {
            AudioHandle::Null(_) => true,
            #[cfg(feature = "cpal-backend")]
            AudioHandle::Cpal(h) => h.has_input(),
        }
    }
}

/// Start a backend and wait up to `timeout` for it to report ready
///
/// On any failure the half-started backend is dropped (stopping it) before
/// the error is returned.
pub fn start_audio_system(
    backend: Box<dyn AudioBackend>,
    processor: BlockProcessor,
    timeout: Duration,
) -> DeviceResult<AudioHandle> {
    let name = backend.name();
    let (ready_tx, ready_rx) = channel::bounded(1);

    log::info!("start_audio_system: starting {} backend", name);
    let handle = backend.start(processor, ready_tx)?;

    match ready_rx.recv_timeout(timeout) {
        Ok(Ok(())) => {
            log::info!(
                "start_audio_system: {} ready ({}Hz, {} frames, ~{:.1}ms)",
                name,
                handle.sample_rate(),
                handle.buffer_size(),
                handle.latency_ms()
            );
            Ok(handle)
        }
        Ok(Err(e)) => Err(e),
        Err(RecvTimeoutError::Timeout) => Err(DeviceError::InitTimeout(timeout)),
        Err(RecvTimeoutError::Disconnected) => Err(DeviceError::Disconnected),
    }
}
