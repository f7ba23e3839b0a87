use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::DeviceError;
use super::format::AudioFormat;

/// Host-side device selection.
///
/// Device UIDs are backend-specific identifiers. `None` (or an empty string
/// in JSON) selects the system default device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfiguration {
    pub input_device_uid: Option<String>,
    pub output_device_uid: Option<String>,
    pub input_channels: u16,
    pub output_channels: u16,
}

impl DeviceConfiguration {
    pub fn validate(&self) -> Result<(), String> {
        if self.input_channels == 0 || self.input_channels > 8 {
            return Err(format!("unsupported input channel count: {}", self.input_channels));
        }
        if self.output_channels == 0 || self.output_channels > 8 {
            return Err(format!("unsupported output channel count: {}", self.output_channels));
        }
        Ok(())
    }

    /// Empty UID strings collapse to the system default.
    pub fn normalized(mut self) -> Self {
        if self.input_device_uid.as_deref().is_some_and(str::is_empty) {
            self.input_device_uid = None;
        }
        if self.output_device_uid.as_deref().is_some_and(str::is_empty) {
            self.output_device_uid = None;
        }
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self, DeviceError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| DeviceError::ConfigurationFailed(format!("invalid device config: {}", e)))?;
        let config = config.normalized();
        config.validate().map_err(DeviceError::ConfigurationFailed)?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, DeviceError> {
        let json = fs::read_to_string(path).map_err(|e| {
            DeviceError::ConfigurationFailed(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }
}

impl Default for DeviceConfiguration {
    fn default() -> Self {
        Self {
            input_device_uid: None,
            output_device_uid: None,
            input_channels: 1,
            output_channels: 1,
        }
    }
}

/// Engine-side audio preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineAudioConfig {
    /// Format the engine asks the device for on the input side.
    pub preferred_input: AudioFormat,

    /// Format the engine asks the device for on the output side.
    pub preferred_output: AudioFormat,

    /// Capacity of the playout ring, in milliseconds of audio.
    pub playout_buffer_ms: u32,

    /// Capacity of the recorded-audio ring, in milliseconds of audio.
    pub record_buffer_ms: u32,

    /// Name of the engine worker thread backing `dispatch_async`/`dispatch_sync`.
    pub worker_thread_name: String,
}

impl EngineAudioConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.preferred_input
            .validate()
            .map_err(|e| format!("preferred input: {}", e))?;
        self.preferred_output
            .validate()
            .map_err(|e| format!("preferred output: {}", e))?;
        if self.playout_buffer_ms < 10 {
            return Err(format!("playout buffer too small: {} ms", self.playout_buffer_ms));
        }
        if self.record_buffer_ms < 10 {
            return Err(format!("record buffer too small: {} ms", self.record_buffer_ms));
        }
        if self.worker_thread_name.is_empty() {
            return Err("worker thread name must not be empty".into());
        }
        Ok(())
    }

    pub fn playout_buffer(&self) -> Duration {
        Duration::from_millis(self.playout_buffer_ms as u64)
    }

    pub fn record_buffer(&self) -> Duration {
        Duration::from_millis(self.record_buffer_ms as u64)
    }
}

impl Default for EngineAudioConfig {
    fn default() -> Self {
        Self {
            preferred_input: AudioFormat::default(),
            preferred_output: AudioFormat::default(),
            playout_buffer_ms: 500,
            record_buffer_ms: 500,
            worker_thread_name: "audio-engine-worker".into(),
        }
    }
}
