use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::DeviceError;

/// Smallest host-side capture scratch buffer, in frames.
const MIN_CAPTURE_FRAMES: usize = 256;

/// Capture scratch buffers are never sized below this many frames.
const CAPTURE_CAPACITY_FLOOR: usize = 4096;

/// Sample rate, I/O buffer duration and channel count of one stream direction.
///
/// Each side of the bridge keeps its own input and output instances. They
/// describe what was requested or negotiated and are not required to match.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate_hz: f64,
    #[serde(with = "duration_secs")]
    pub buffer_duration: Duration,
    pub channel_count: u16,
}

impl AudioFormat {
    pub fn new(sample_rate_hz: f64, buffer_duration: Duration, channel_count: u16) -> Self {
        Self {
            sample_rate_hz,
            buffer_duration,
            channel_count,
        }
    }

    pub fn validate(&self) -> Result<(), DeviceError> {
        if !(self.sample_rate_hz > 0.0) || !self.sample_rate_hz.is_finite() {
            return Err(DeviceError::InvalidFormat(format!(
                "sample rate must be positive, got {}",
                self.sample_rate_hz
            )));
        }
        if self.channel_count == 0 {
            return Err(DeviceError::InvalidFormat(
                "channel count must be at least 1".into(),
            ));
        }
        if self.buffer_duration.is_zero() {
            return Err(DeviceError::InvalidFormat(
                "buffer duration must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Frames delivered per I/O cycle at this rate and duration.
    pub fn frames_per_buffer(&self) -> usize {
        (self.sample_rate_hz * self.buffer_duration.as_secs_f64()).round() as usize
    }

    /// Interleaved samples per I/O cycle.
    pub fn samples_per_buffer(&self) -> usize {
        self.frames_per_buffer() * self.channel_count as usize
    }

    /// Frames of scratch a host should reserve for capture callbacks.
    ///
    /// Hardware may deliver larger slices than the nominal buffer duration,
    /// so the reservation never drops below 4096 frames.
    pub fn capture_capacity_frames(&self) -> usize {
        self.frames_per_buffer()
            .max(MIN_CAPTURE_FRAMES)
            .max(CAPTURE_CAPACITY_FLOOR)
    }

    /// Number of frames covering `duration` at this sample rate.
    pub fn frames_for(&self, duration: Duration) -> usize {
        (self.sample_rate_hz * duration.as_secs_f64()).round() as usize
    }

    /// Duration of `frames` frames at this sample rate.
    pub fn duration_of(&self, frames: usize) -> Duration {
        Duration::from_secs_f64(frames as f64 / self.sample_rate_hz)
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate_hz: 48000.0,
            buffer_duration: Duration::from_millis(10),
            channel_count: 1,
        }
    }
}

/// Requested vs negotiated format for one stream direction.
///
/// The requested side comes from the delegate's preferences; the negotiated
/// side is what the hardware actually granted and is what the device reports.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FormatNegotiation {
    pub requested: AudioFormat,
    pub negotiated: Option<AudioFormat>,
}

impl FormatNegotiation {
    pub fn new(requested: AudioFormat) -> Self {
        Self {
            requested,
            negotiated: None,
        }
    }

    /// The format currently in effect: negotiated if available, else requested.
    pub fn effective(&self) -> AudioFormat {
        self.negotiated.unwrap_or(self.requested)
    }

    /// Whether the hardware granted something different from the request.
    pub fn was_adjusted(&self) -> bool {
        match self.negotiated {
            Some(n) => n != self.requested,
            None => false,
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !(secs >= 0.0) || !secs.is_finite() {
            return Err(serde::de::Error::custom("duration must be a non-negative number of seconds"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn default_is_48k_10ms_mono() {
        let format = AudioFormat::default();
        assert_relative_eq!(format.sample_rate_hz, 48000.0);
        assert_eq!(format.buffer_duration, Duration::from_millis(10));
        assert_eq!(format.channel_count, 1);
        assert!(format.validate().is_ok());
    }

    #[test]
    fn frames_per_buffer_rounds() {
        let format = AudioFormat::new(44100.0, Duration::from_millis(10), 2);
        assert_eq!(format.frames_per_buffer(), 441);
        assert_eq!(format.samples_per_buffer(), 882);
    }

    #[test]
    fn rejects_zero_channels_and_bad_rates() {
        let zero_channels = AudioFormat::new(48000.0, Duration::from_millis(10), 0);
        assert!(zero_channels.validate().is_err());

        let negative = AudioFormat::new(-1.0, Duration::from_millis(10), 1);
        assert!(negative.validate().is_err());

        let nan = AudioFormat::new(f64::NAN, Duration::from_millis(10), 1);
        assert!(nan.validate().is_err());
    }

    #[test]
    fn capture_capacity_has_floor() {
        let small = AudioFormat::new(8000.0, Duration::from_millis(5), 1);
        assert_eq!(small.capture_capacity_frames(), 4096);

        let large = AudioFormat::new(192000.0, Duration::from_millis(100), 1);
        assert_eq!(large.capture_capacity_frames(), 19200);
    }

    #[test]
    fn negotiation_prefers_negotiated_values() {
        let requested = AudioFormat::default();
        let mut negotiation = FormatNegotiation::new(requested);
        assert_eq!(negotiation.effective(), requested);
        assert!(!negotiation.was_adjusted());

        let granted = AudioFormat::new(44100.0, Duration::from_millis(10), 1);
        negotiation.negotiated = Some(granted);
        assert_eq!(negotiation.effective(), granted);
        assert!(negotiation.was_adjusted());
    }

    #[test]
    fn serializes_duration_as_seconds() {
        let format = AudioFormat::new(48000.0, Duration::from_millis(20), 2);
        let json = serde_json::to_value(format).unwrap();
        assert_relative_eq!(json["buffer_duration"].as_f64().unwrap(), 0.02);

        let parsed: AudioFormat = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, format);
    }
}
