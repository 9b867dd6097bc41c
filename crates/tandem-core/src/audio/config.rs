//! Audio backend configuration
//!
//! Device selection and the bounded wait for a device to come up. The block
//! size and sample rate belong to [`EngineConfig`](crate::config::EngineConfig)
//! since the realtime side is sized from them.

use serde::{Deserialize, Serialize};

/// Default time to wait for a device to report ready (milliseconds)
pub const DEFAULT_READY_TIMEOUT_MS: u64 = 2_000;

/// Audio device identifier
///
/// Includes both the device name and the host backend (ALSA, CoreAudio, ...)
/// so devices from different hosts can be told apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceId {
    /// Device name as reported by the system
    pub name: String,
    /// Audio host identifier (e.g., "Alsa", "CoreAudio")
    /// If None, uses the default host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl DeviceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: None,
        }
    }

    pub fn with_host(name: &str, host: &str) -> Self {
        Self {
            name: name.to_string(),
            host: Some(host.to_string()),
        }
    }

    /// Get a display label that includes the host if available
    pub fn display_label(&self) -> String {
        match &self.host {
            Some(host) => format!("[{}] {}", host, self.name),
            None => self.name.clone(),
        }
    }
}

/// Configuration for the audio backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output device (None = system default)
    pub output_device: Option<DeviceId>,

    /// Input device for recording (None = system default)
    pub input_device: Option<DeviceId>,

    /// Open an input stream at all
    ///
    /// Without one, tracks can still be fed by collaborators and clips,
    /// but device recording captures silence.
    pub enable_input: bool,

    /// How long to wait for the device to report ready before degrading
    pub ready_timeout_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            output_device: None,
            input_device: None,
            enable_input: true,
            ready_timeout_ms: DEFAULT_READY_TIMEOUT_MS,
        }
    }
}

impl AudioConfig {
    /// Output only, no input stream
    pub fn output_only() -> Self {
        Self {
            enable_input: false,
            ..Default::default()
        }
    }

    /// Set the output device
    pub fn with_output_device(mut self, device: DeviceId) -> Self {
        self.output_device = Some(device);
        self
    }

    /// Set the input device
    pub fn with_input_device(mut self, device: DeviceId) -> Self {
        self.input_device = Some(device);
        self
    }

    /// Set the ready timeout
    pub fn with_ready_timeout_ms(mut self, ms: u64) -> Self {
        self.ready_timeout_ms = ms;
        self
    }

    pub fn ready_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.ready_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_label() {
        assert_eq!(DeviceId::new("Scarlett").display_label(), "Scarlett");
        assert_eq!(DeviceId::with_host("hw:0", "Alsa").display_label(), "[Alsa] hw:0");
    }

    #[test]
    fn test_builders() {
        let config = AudioConfig::output_only().with_ready_timeout_ms(50);
        assert!(!config.enable_input);
        assert_eq!(config.ready_timeout().as_millis(), 50);
    }
}
