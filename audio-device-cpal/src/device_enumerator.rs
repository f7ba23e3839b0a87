//! Audio endpoint enumeration.
//!
//! cpal has no stable endpoint identifiers, so the device name doubles as
//! its UID. An endpoint that shows up on both the input and output lists is
//! reported once with both directions set.

use std::collections::BTreeMap;

use audio_device_core::models::device_info::{self, AudioDeviceInfo};

#[cfg(feature = "cpal-host")]
use audio_device_core::models::error::DeviceError;
#[cfg(feature = "cpal-host")]
use cpal::traits::{DeviceTrait, HostTrait};

/// Merge input and output endpoint names into one sorted device list.
pub fn merge_endpoints<I, O>(inputs: I, outputs: O) -> Vec<AudioDeviceInfo>
where
    I: IntoIterator<Item = String>,
    O: IntoIterator<Item = String>,
{
    let mut by_name: BTreeMap<String, AudioDeviceInfo> = BTreeMap::new();
    for name in inputs {
        by_name
            .entry(name.clone())
            .or_insert_with(|| AudioDeviceInfo::new(name.clone(), name, false, false))
            .has_input = true;
    }
    for name in outputs {
        by_name
            .entry(name.clone())
            .or_insert_with(|| AudioDeviceInfo::new(name.clone(), name, false, false))
            .has_output = true;
    }

    let mut devices: Vec<_> = by_name.into_values().collect();
    device_info::sort_by_name(&mut devices);
    devices
}

/// List the endpoints `host` can open.
#[cfg(feature = "cpal-host")]
pub fn list_devices(host: &cpal::Host) -> Result<Vec<AudioDeviceInfo>, DeviceError> {
    let inputs = host
        .input_devices()
        .map_err(|e| DeviceError::Unknown(format!("failed to list input devices: {}", e)))?
        .filter_map(|d| d.name().ok());
    let outputs = host
        .output_devices()
        .map_err(|e| DeviceError::Unknown(format!("failed to list output devices: {}", e)))?
        .filter_map(|d| d.name().ok());
    Ok(merge_endpoints(inputs, outputs))
}

/// Input endpoint by UID, or the host default when `uid` is `None`.
#[cfg(feature = "cpal-host")]
pub fn find_input_device(host: &cpal::Host, uid: Option<&str>) -> Result<cpal::Device, DeviceError> {
    match uid {
        None => host.default_input_device().ok_or(DeviceError::DeviceNotAvailable),
        Some(uid) => host
            .input_devices()
            .map_err(|e| DeviceError::Unknown(format!("failed to list input devices: {}", e)))?
            .find(|d| d.name().map(|n| n == uid).unwrap_or(false))
            .ok_or(DeviceError::DeviceNotAvailable),
    }
}

/// Output endpoint by UID, or the host default when `uid` is `None`.
#[cfg(feature = "cpal-host")]
pub fn find_output_device(host: &cpal::Host, uid: Option<&str>) -> Result<cpal::Device, DeviceError> {
    match uid {
        None => host.default_output_device().ok_or(DeviceError::DeviceNotAvailable),
        Some(uid) => host
            .output_devices()
            .map_err(|e| DeviceError::Unknown(format!("failed to list output devices: {}", e)))?
            .find(|d| d.name().map(|n| n == uid).unwrap_or(false))
            .ok_or(DeviceError::DeviceNotAvailable),
    }
}
