//! # audio-device-cpal
//!
//! cpal hardware backend for audio-device-core.
//!
//! Provides:
//! - `CpalBackend`: a `StreamBackend` over the platform's default cpal host
//! - `device_enumerator`: endpoint listing and lookup by UID
//!
//! ## Platform Requirements
//! The backend is behind the `cpal-host` feature. On Linux it links ALSA
//! (`libasound2-dev`); macOS and Windows need no extra packages.
//!
//! ## Usage
//! ```ignore
//! use audio_device_core::{make_factory, DeviceConfiguration, HostAudioDevice};
//! use audio_device_cpal::CpalBackend;
//!
//! let device = HostAudioDevice::new(CpalBackend::new(), DeviceConfiguration::default());
//! let factory = make_factory(Some(device));
//! ```

#[cfg(feature = "cpal-host")]
pub mod cpal_backend;
pub mod device_enumerator;

#[cfg(feature = "cpal-host")]
pub use cpal_backend::CpalBackend;
