//! Audio backends for the Tandem engine
//!
//! A backend owns the [`BlockProcessor`](crate::engine::BlockProcessor) and
//! calls it from its audio callback:
//! - **Null**: no device; a thread renders at real-time cadence (always built)
//! - **CPAL**: system input/output devices (feature `cpal-backend`)
//!
//! # Architecture
//!
//! The audio system follows a lock-free design for real-time safety:
//!
//! - **Control thread**: the `Engine`, sends commands via lock-free ringbuffer
//! - **Audio thread**: owns the processor exclusively, processes commands
//! - **Atomics**: the control side reads meters and position via relaxed atomics
//!
//! Start-up is bounded: [`start_audio_system`] gives up after the configured
//! timeout and the engine falls back to the null backend.
//!
//! # Example Usage
//!
//! ```ignore
//! use tandem_core::audio::{AudioConfig, CpalBackend};
//! use tandem_core::config::EngineConfig;
//! use tandem_core::Engine;
//!
//! let config = EngineConfig::default();
//! let backend = CpalBackend::new(config.audio.clone(), config.block_size);
//! let mut engine = Engine::start(config, Box::new(backend))?;
//! let events = engine.subscribe();
//! ```

mod backend;
mod config;
mod error;
mod null_backend;

#[cfg(feature = "cpal-backend")]
mod cpal_backend;
#[cfg(feature = "cpal-backend")]
mod device;

pub use backend::{start_audio_system, AudioBackend, AudioHandle, ReadySender};
pub use config::{AudioConfig, DeviceId, DEFAULT_READY_TIMEOUT_MS};
pub use error::{DeviceError, DeviceResult};
pub use null_backend::{NullAudioHandle, NullBackend};

#[cfg(feature = "cpal-backend")]
pub use cpal_backend::{CpalAudioHandle, CpalBackend};
#[cfg(feature = "cpal-backend")]
pub use device::{find_device, list_devices, AudioDevice, Direction};
