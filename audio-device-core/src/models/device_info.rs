use serde::{Deserialize, Serialize};

/// An audio endpoint a backend can open.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioDeviceInfo {
    pub uid: String,
    pub name: String,
    pub has_input: bool,
    pub has_output: bool,
}

impl AudioDeviceInfo {
    pub fn new(uid: impl Into<String>, name: impl Into<String>, has_input: bool, has_output: bool) -> Self {
        Self {
            uid: uid.into(),
            name: name.into(),
            has_input,
            has_output,
        }
    }
}

/// Sort devices by display name, ignoring case.
pub fn sort_by_name(devices: &mut [AudioDeviceInfo]) {
    devices.sort_by_cached_key(|d| d.name.to_lowercase());
}

pub fn input_devices(devices: &[AudioDeviceInfo]) -> Vec<AudioDeviceInfo> {
    devices.iter().filter(|d| d.has_input).cloned().collect()
}

pub fn output_devices(devices: &[AudioDeviceInfo]) -> Vec<AudioDeviceInfo> {
    devices.iter().filter(|d| d.has_output).cloned().collect()
}

pub fn find_by_uid<'a>(devices: &'a [AudioDeviceInfo], uid: &str) -> Option<&'a AudioDeviceInfo> {
    devices.iter().find(|d| d.uid == uid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_devices() -> Vec<AudioDeviceInfo> {
        vec![
            AudioDeviceInfo::new("spk", "speakers", false, true),
            AudioDeviceInfo::new("mic", "Built-in Microphone", true, false),
            AudioDeviceInfo::new("usb", "USB Headset", true, true),
        ]
    }

    #[test]
    fn sorts_case_insensitively() {
        let mut devices = sample_devices();
        sort_by_name(&mut devices);
        let names: Vec<&str> = devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Built-in Microphone", "speakers", "USB Headset"]);
    }

    #[test]
    fn filters_by_direction() {
        let devices = sample_devices();
        assert_eq!(input_devices(&devices).len(), 2);
        assert_eq!(output_devices(&devices).len(), 2);
    }

    #[test]
    fn finds_by_uid() {
        let devices = sample_devices();
        assert_eq!(find_by_uid(&devices, "usb").map(|d| d.name.as_str()), Some("USB Headset"));
        assert!(find_by_uid(&devices, "missing").is_none());
    }
}
