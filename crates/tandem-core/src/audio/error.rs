//! Audio backend error types

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while opening or running an audio device
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// No audio devices available
    #[error("No audio output devices found")]
    NoDevices,

    /// Failed to get the default device
    #[error("Failed to get default audio device: {0}")]
    NoDefaultDevice(String),

    /// A configured device is not present
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// Failed to get a usable device configuration
    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    /// Failed to build an audio stream
    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    /// Failed to start an audio stream
    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),

    /// The device never reported ready
    #[error("Audio device did not report ready within {0:?}")]
    InitTimeout(Duration),

    /// The backend thread went away before reporting ready
    #[error("Audio backend stopped during initialization")]
    Disconnected,
}

/// Result type for audio operations
pub type DeviceResult<T> = Result<T, DeviceError>;
