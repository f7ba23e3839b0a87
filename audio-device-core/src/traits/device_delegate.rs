use crate::models::buffer::{AudioBuffer, AudioBufferMut, AudioTimestamp, RenderActionFlags};
use crate::models::error::RenderResult;
use crate::models::format::AudioFormat;
use crate::traits::dispatch::DispatchBridge;

/// Device-supplied closure the delegate may call from inside
/// `deliver_recorded_data` to render one slice of playout in-place.
///
/// Parameters: action flags, output timestamp, bus number, frame count and
/// the buffer to fill. Borrowed for the single call it is passed to, so it
/// can neither be retained nor moved to another thread.
pub type RenderBlock<'a> = &'a mut dyn FnMut(
    &mut RenderActionFlags,
    &AudioTimestamp,
    usize,
    u32,
    &mut AudioBufferMut<'_>,
) -> RenderResult;

/// Callback surface the media engine exposes to an `AudioDevice`.
///
/// `deliver_recorded_data` runs on the input I/O thread and
/// `get_playout_data` on the output I/O thread. Neither may block, allocate,
/// or wait on a lock the control thread can hold during stop/terminate.
/// The notification hooks are never called from an I/O thread.
pub trait AudioDeviceDelegate: DispatchBridge {
    /// Format the engine would like on the input side.
    fn preferred_input_format(&self) -> AudioFormat;

    /// Format the engine would like on the output side.
    fn preferred_output_format(&self) -> AudioFormat;

    /// Hand one slice of recorded audio to the engine.
    ///
    /// `input` is `None` when the device has no capture data for this slice.
    /// When `render_block` is present the delegate may call it at most once
    /// to pull the matching playout slice (echo-cancellation reference).
    fn deliver_recorded_data(
        &self,
        action_flags: &mut RenderActionFlags,
        timestamp: &AudioTimestamp,
        input_bus: usize,
        frame_count: u32,
        input: Option<&AudioBuffer<'_>>,
        render_block: Option<RenderBlock<'_>>,
    ) -> RenderResult;

    /// Fill `output` with exactly `frame_count` frames, or zero it and set
    /// `OUTPUT_IS_SILENCE`.
    fn get_playout_data(
        &self,
        action_flags: &mut RenderActionFlags,
        timestamp: &AudioTimestamp,
        input_bus: usize,
        frame_count: u32,
        output: &mut AudioBufferMut<'_>,
    ) -> RenderResult;

    /// The device's negotiated input format changed; requery and resize.
    fn notify_audio_input_parameters_change(&self);

    /// The device's negotiated output format changed; requery and resize.
    fn notify_audio_output_parameters_change(&self);

    /// Capture was taken away; treat recording as stopped until restarted.
    fn notify_audio_input_interrupted(&self);

    /// Output was taken away; treat playout as stopped until restarted.
    fn notify_audio_output_interrupted(&self);
}
