//! Audio device enumeration and selection
//!
//! Enumerates output devices across every available cpal host and picks
//! the engine's output. A low-latency driver (ASIO on Windows) is
//! preferred when present; otherwise the default host's default output is
//! used.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Host, HostId};

use super::config::DeviceId;
use super::error::{AudioError, AudioResult};

/// Human-readable name for a host ID
fn host_name(host_id: HostId) -> String {
    let name = format!("{:?}", host_id);
    match name.as_str() {
        "Alsa" => "ALSA".to_string(),
        "Asio" => "ASIO".to_string(),
        "Jack" => "JACK".to_string(),
        "Wasapi" => "WASAPI".to_string(),
        _ => name,
    }
}

fn host_by_name(name: &str) -> Option<Host> {
    cpal::available_hosts()
        .into_iter()
        .find(|id| host_name(*id) == name)
        .and_then(|id| cpal::host_from_id(id).ok())
}

/// Information about one output device
#[derive(Debug, Clone)]
pub struct AudioDevice {
    /// Identifier for configuration
    pub id: DeviceId,
    /// Device name
    pub name: String,
    /// Host backend name
    pub host: String,
    /// Whether this is its host's default output
    pub is_default: bool,
}

/// List output devices from all hosts
pub fn list_output_devices() -> AudioResult<Vec<AudioDevice>> {
    let mut all = Vec::new();

    for host_id in cpal::available_hosts() {
        let host = match cpal::host_from_id(host_id) {
            Ok(host) => host,
            Err(e) => {
                log::debug!("could not initialize host {:?}: {}", host_id, e);
                continue;
            }
        };
        let host_label = host_name(host_id);
        let default_name = host.default_output_device().and_then(|d| d.name().ok());

        let devices = match host.output_devices() {
            Ok(devices) => devices,
            Err(e) => {
                log::debug!("could not enumerate devices for {:?}: {}", host_id, e);
                continue;
            }
        };

        for device in devices {
            let Ok(name) = device.name() else { continue };
            let is_default = default_name.as_ref() == Some(&name);
            all.push(AudioDevice {
                id: DeviceId::with_host(&name, &host_label),
                name,
                host: host_label.clone(),
                is_default,
            });
        }
    }

    if all.is_empty() {
        return Err(AudioError::NoDevices);
    }
    Ok(all)
}

/// Find a cpal device by its configured id
pub fn find_device(id: &DeviceId) -> AudioResult<cpal::Device> {
    if let Some(host_label) = &id.host {
        if let Some(host) = host_by_name(host_label) {
            return host
                .output_devices()
                .map_err(|e| AudioError::ConfigError(e.to_string()))?
                .find(|d| d.name().ok().as_ref() == Some(&id.name))
                .ok_or_else(|| AudioError::DeviceNotFound(id.to_string()));
        }
    }

    for host_id in cpal::available_hosts() {
        if let Ok(host) = cpal::host_from_id(host_id) {
            if let Ok(mut devices) = host.output_devices() {
                if let Some(device) =
                    devices.find(|d| d.name().ok().as_ref() == Some(&id.name))
                {
                    return Ok(device);
                }
            }
        }
    }

    Err(AudioError::DeviceNotFound(id.to_string()))
}

/// Pick the engine's output device when none is configured
///
/// Prefers the default output of an ASIO host where one exists, then
/// falls back to the default host's default output.
pub fn preferred_output_device() -> AudioResult<cpal::Device> {
    for host_id in cpal::available_hosts() {
        if host_name(host_id) == "ASIO" {
            if let Ok(host) = cpal::host_from_id(host_id) {
                if let Some(device) = host.default_output_device() {
                    let name = device.name().unwrap_or_else(|_| "unknown".into());
                    log::info!("using ASIO output device: {}", name);
                    return Ok(device);
                }
            }
        }
    }

    cpal::default_host()
        .default_output_device()
        .ok_or_else(|| AudioError::NoDefaultDevice("no default output device".to_string()))
}
