//! Audio backend configuration

use serde::{Deserialize, Serialize};

/// Maximum callback size to pre-allocate for. Covers every common driver
/// configuration (64 through 4096 frames); pre-allocating to this bound
/// keeps the callback free of allocations.
pub const MAX_BUFFER_SIZE: usize = 8192;

/// Default callback size in frames; a safe middle ground (~11.6 ms at
/// 44.1 kHz)
pub const DEFAULT_BUFFER_SIZE: u32 = 512;

/// Default engine sample rate
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Audio device identifier
///
/// Names the device and, optionally, the host backend it belongs to
/// (ASIO, WASAPI, ALSA, ...), so selection survives on systems with
/// multiple audio hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceId {
    /// Device name as reported by the system
    pub name: String,
    /// Host backend name; None picks from any host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl DeviceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), host: None }
    }

    pub fn with_host(name: &str, host: &str) -> Self {
        Self {
            name: name.to_string(),
            host: Some(host.to_string()),
        }
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.host {
            Some(host) => write!(f, "[{}] {}", host, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Configuration for the output stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Engine sample rate in Hz; the device must support it exactly
    pub sample_rate: u32,
    /// Requested callback size in frames
    pub buffer_size: u32,
    /// Output device (None = prefer ASIO, else the system default)
    pub device: Option<DeviceId>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            device: None,
        }
    }
}

impl AudioConfig {
    /// Callback period in milliseconds
    pub fn latency_ms(&self) -> f32 {
        (self.buffer_size as f32 / self.sample_rate as f32) * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = AudioConfig::default();
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.buffer_size, 512);
        assert!(config.device.is_none());
    }

    #[test]
    fn latency_from_buffer() {
        let config = AudioConfig {
            sample_rate: 44100,
            buffer_size: 441,
            device: None,
        };
        assert!((config.latency_ms() - 10.0).abs() < 1e-4);
    }

    #[test]
    fn device_id_display() {
        assert_eq!(DeviceId::new("Speakers").to_string(), "Speakers");
        assert_eq!(
            DeviceId::with_host("Fireface", "ASIO").to_string(),
            "[ASIO] Fireface"
        );
    }
}
