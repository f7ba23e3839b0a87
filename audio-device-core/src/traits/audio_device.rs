use std::sync::Weak;
use std::time::Duration;

use crate::models::format::AudioFormat;
use crate::traits::device_delegate::AudioDeviceDelegate;

/// Audio device supplied by the host pipeline in place of the engine's
/// built-in hardware I/O.
///
/// Lifecycle methods are called from the host's control thread and report
/// success as `bool`; a `false` return leaves the device state unchanged.
/// Property getters report the values actually negotiated with hardware and
/// are meaningful once `initialize_with_delegate` has succeeded.
pub trait AudioDevice: Send + Sync {
    fn device_input_sample_rate(&self) -> f64;
    fn input_io_buffer_duration(&self) -> Duration;
    fn input_number_of_channels(&self) -> u16;
    fn input_latency(&self) -> Duration;

    fn device_output_sample_rate(&self) -> f64;
    fn output_io_buffer_duration(&self) -> Duration;
    fn output_number_of_channels(&self) -> u16;
    fn output_latency(&self) -> Duration;

    fn is_initialized(&self) -> bool;

    /// Bind the delegate and acquire hardware.
    ///
    /// Fails when a delegate is already bound or hardware cannot be acquired.
    /// The device keeps the (non-owning) reference until `terminate_device`.
    fn initialize_with_delegate(&self, delegate: Weak<dyn AudioDeviceDelegate>) -> bool;

    /// Release hardware and the delegate. Fails while any stream is running.
    fn terminate_device(&self) -> bool;

    fn is_playout_initialized(&self) -> bool;
    fn initialize_playout(&self) -> bool;
    fn is_playing(&self) -> bool;
    fn start_playout(&self) -> bool;
    fn stop_playout(&self) -> bool;

    fn is_recording_initialized(&self) -> bool;
    fn initialize_recording(&self) -> bool;
    fn is_recording(&self) -> bool;
    fn start_recording(&self) -> bool;
    fn stop_recording(&self) -> bool;

    /// Negotiated input format as one value.
    fn input_format(&self) -> AudioFormat {
        AudioFormat::new(
            self.device_input_sample_rate(),
            self.input_io_buffer_duration(),
            self.input_number_of_channels(),
        )
    }

    /// Negotiated output format as one value.
    fn output_format(&self) -> AudioFormat {
        AudioFormat::new(
            self.device_output_sample_rate(),
            self.output_io_buffer_duration(),
            self.output_number_of_channels(),
        )
    }
}
