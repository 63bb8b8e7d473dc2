//! Audio backend error types

use thiserror::Error;

/// Errors from device selection and stream handling
#[derive(Error, Debug)]
pub enum AudioError {
    /// No audio output devices available
    #[error("no audio output devices found")]
    NoDevices,

    /// Failed to get the default device
    #[error("failed to get default audio device: {0}")]
    NoDefaultDevice(String),

    /// A requested device was not found
    #[error("audio device not found: {0}")]
    DeviceNotFound(String),

    /// Failed to read or match a device configuration
    #[error("failed to get device config: {0}")]
    ConfigError(String),

    /// The device does not support the engine's sample rate
    #[error("device does not support {requested}Hz output")]
    UnsupportedSampleRate { requested: u32 },

    /// Failed to build the output stream
    #[error("failed to build audio stream: {0}")]
    StreamBuildError(String),

    /// Failed to start the stream
    #[error("failed to start audio stream: {0}")]
    StreamPlayError(String),
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;
