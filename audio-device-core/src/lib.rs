//! # audio-device-core
//!
//! Pluggable audio device layer for a real-time media engine.
//!
//! A host pipeline supplies its own `AudioDevice`; the engine binds to it as
//! an `AudioDeviceDelegate` and exchanges 16-bit PCM through real-time
//! callbacks. `make_factory` assembles an engine around an optional device.
//! Hardware backends (virtual clock here, cpal in `audio-device-cpal`)
//! implement `StreamBackend` and plug into the generic `HostAudioDevice`.
//!
//! ## Architecture
//!
//! ```text
//! audio-device-core (this crate)
//! ├── traits/       ← AudioDevice, AudioDeviceDelegate, DispatchBridge, StreamBackend
//! ├── models/       ← AudioFormat, AudioBuffer, RenderActionFlags, errors, config, stats
//! ├── device/       ← HostAudioDevice (lifecycle + I/O trampolines), VirtualBackend
//! ├── engine/       ← EngineAudioModule (the engine-side delegate)
//! ├── dispatch/     ← DispatchQueue (serial engine worker)
//! ├── factory/      ← make_factory, PeerConnectionFactory, AudioSession
//! └── processing/   ← RingBuffer, sample conversion
//! ```

pub mod device;
pub mod dispatch;
pub mod engine;
pub mod factory;
pub mod models;
pub mod processing;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use device::host::{HostAudioDevice, INPUT_BUS, OUTPUT_BUS};
pub use device::virtual_backend::{VirtualBackend, VirtualBackendOptions, VirtualHardware};
pub use dispatch::queue::DispatchQueue;
pub use engine::audio_module::EngineAudioModule;
pub use factory::peer_connection::{make_factory, AudioLayer, FactoryBuilder, PeerConnectionFactory};
pub use factory::session::{AudioSession, AudioSessionInfo, SessionMode};
pub use models::buffer::{AudioBuffer, AudioBufferMut, AudioTimestamp, RenderActionFlags, SampleLayout};
pub use models::config::{DeviceConfiguration, EngineAudioConfig};
pub use models::device_info::AudioDeviceInfo;
pub use models::error::{DeviceError, FactoryError, RenderError, RenderResult};
pub use models::format::{AudioFormat, FormatNegotiation};
pub use models::state::DeviceLifecycleState;
pub use models::stats::AudioCallbackStats;
pub use processing::ring_buffer::RingBuffer;
pub use traits::audio_device::AudioDevice;
pub use traits::device_delegate::{AudioDeviceDelegate, RenderBlock};
pub use traits::dispatch::{DispatchBridge, DispatchWork};
pub use traits::stream_backend::{BackendEvent, CaptureCallback, EventSink, RenderCallback, StreamBackend};
