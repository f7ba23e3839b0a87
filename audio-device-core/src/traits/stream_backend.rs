use std::sync::Arc;
use std::time::Duration;

use crate::models::buffer::{AudioBuffer, AudioBufferMut, AudioTimestamp, RenderActionFlags};
use crate::models::config::DeviceConfiguration;
use crate::models::device_info::AudioDeviceInfo;
use crate::models::error::{DeviceError, RenderResult};
use crate::models::format::AudioFormat;

/// Invoked on the output I/O thread for every hardware output slice.
///
/// The callee fills the buffer (frame count is implied by its size).
pub type RenderCallback = Arc<
    dyn Fn(&mut RenderActionFlags, &AudioTimestamp, &mut AudioBufferMut<'_>) -> RenderResult
        + Send
        + Sync
        + 'static,
>;

/// Invoked on the input I/O thread for every hardware input slice.
///
/// Duplex backends that service input and output in one hardware callback
/// pass that slice's output buffer as the last argument.
pub type CaptureCallback = Arc<
    dyn Fn(
            &mut RenderActionFlags,
            &AudioTimestamp,
            &AudioBuffer<'_>,
            Option<&mut AudioBufferMut<'_>>,
        ) -> RenderResult
        + Send
        + Sync
        + 'static,
>;

/// Box a closure as a `RenderCallback`, pinning its argument lifetimes.
pub fn render_callback<F>(f: F) -> RenderCallback
where
    F: Fn(&mut RenderActionFlags, &AudioTimestamp, &mut AudioBufferMut<'_>) -> RenderResult
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// Box a closure as a `CaptureCallback`, pinning its argument lifetimes.
pub fn capture_callback<F>(f: F) -> CaptureCallback
where
    F: Fn(
            &mut RenderActionFlags,
            &AudioTimestamp,
            &AudioBuffer<'_>,
            Option<&mut AudioBufferMut<'_>>,
        ) -> RenderResult
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// Hardware events a backend reports outside of the I/O callbacks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackendEvent {
    /// The input stream was stopped by the system (device unplugged, taken
    /// by another client).
    InputInterrupted,
    OutputInterrupted,
    /// The hardware switched the input stream to a new format.
    InputFormatChanged(AudioFormat),
    OutputFormatChanged(AudioFormat),
}

/// Receives `BackendEvent`s on whatever thread the backend observes them.
pub type EventSink = Arc<dyn Fn(BackendEvent) + Send + Sync + 'static>;

/// Hardware seam under `HostAudioDevice`.
///
/// Implemented by:
/// - `VirtualBackend` (software clock, tests and headless hosts)
/// - `CpalBackend` (audio-device-cpal)
pub trait StreamBackend: Send {
    /// Claim the configured endpoints. Fails if they are busy or missing.
    fn acquire(&mut self, config: &DeviceConfiguration) -> Result<(), DeviceError>;

    /// Give the endpoints back. Streams are already closed when this runs.
    fn release(&mut self);

    /// Prepare the output stream and return the format the hardware granted.
    fn open_output(
        &mut self,
        requested: AudioFormat,
        callback: RenderCallback,
    ) -> Result<AudioFormat, DeviceError>;

    fn start_output(&mut self) -> Result<(), DeviceError>;

    fn stop_output(&mut self) -> Result<(), DeviceError>;

    fn close_output(&mut self);

    /// Prepare the input stream and return the format the hardware granted.
    fn open_input(
        &mut self,
        requested: AudioFormat,
        callback: CaptureCallback,
    ) -> Result<AudioFormat, DeviceError>;

    fn start_input(&mut self) -> Result<(), DeviceError>;

    fn stop_input(&mut self) -> Result<(), DeviceError>;

    fn close_input(&mut self);

    fn input_latency(&self) -> Duration;

    fn output_latency(&self) -> Duration;

    /// Endpoints this backend can open.
    fn available_devices(&self) -> Vec<AudioDeviceInfo>;

    /// Install the sink for hardware events. Called once, before `acquire`.
    ///
    /// The sink takes the device's control lock. It must not be invoked from
    /// inside another method of this trait, nor from a thread that closing a
    /// stream waits on (such as the hardware callback thread); backends
    /// forward events from those threads through a thread of their own.
    fn set_event_sink(&mut self, sink: EventSink);
}
