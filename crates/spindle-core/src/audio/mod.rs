//! Audio output backend
//!
//! Device selection and the cpal output stream hosting the engine's
//! single real-time callback.

pub mod config;
pub mod device;
pub mod error;
pub mod stream;

pub use config::{AudioConfig, DeviceId, DEFAULT_BUFFER_SIZE, DEFAULT_SAMPLE_RATE, MAX_BUFFER_SIZE};
pub use device::{find_device, list_output_devices, preferred_output_device, AudioDevice};
pub use error::{AudioError, AudioResult};
pub use stream::{open_output_stream, CallbackState, StreamHandle};
