use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;

use crate::models::buffer::{AudioBuffer, AudioBufferMut, AudioTimestamp, RenderActionFlags};
use crate::models::config::DeviceConfiguration;
use crate::models::device_info::AudioDeviceInfo;
use crate::models::error::{RenderError, RenderResult};
use crate::models::format::{AudioFormat, FormatNegotiation};
use crate::models::state::DeviceLifecycleState;
use crate::traits::audio_device::AudioDevice;
use crate::traits::device_delegate::AudioDeviceDelegate;
use crate::traits::stream_backend::{
    self, BackendEvent, CaptureCallback, RenderCallback, StreamBackend,
};

/// Bus number reported with playout callbacks.
pub const OUTPUT_BUS: usize = 0;

/// Bus number reported with capture callbacks.
pub const INPUT_BUS: usize = 1;

struct DelegateSlot(Weak<dyn AudioDeviceDelegate>);

/// State shared with the I/O threads. Read without locks.
struct RealtimeShared {
    delegate: ArcSwapOption<DelegateSlot>,
    playing: AtomicBool,
    recording: AtomicBool,
    output_latency_ns: AtomicU64,
}

struct ControlState {
    lifecycle: DeviceLifecycleState,
    input: FormatNegotiation,
    output: FormatNegotiation,
}

/// `AudioDevice` implementation that drives a `StreamBackend`.
///
/// Owns the lifecycle state machine and the real-time trampolines that
/// forward hardware callbacks to the bound delegate:
/// ```text
/// [backend output cb] → render()  → delegate.get_playout_data()
/// [backend input cb]  → capture() → delegate.deliver_recorded_data(.., render block)
/// ```
/// Lifecycle calls take the control lock and then the backend lock, in that
/// order. The I/O paths take neither.
pub struct HostAudioDevice<B: StreamBackend> {
    config: DeviceConfiguration,
    backend: Mutex<B>,
    control: Mutex<ControlState>,
    shared: Arc<RealtimeShared>,
}

impl<B: StreamBackend + 'static> HostAudioDevice<B> {
    pub fn new(backend: B, config: DeviceConfiguration) -> Arc<Self> {
        let config = config.normalized();
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let mut backend = backend;
            let events = weak.clone();
            backend.set_event_sink(Arc::new(move |event| {
                if let Some(device) = events.upgrade() {
                    device.handle_backend_event(event);
                }
            }));

            Self {
                config,
                backend: Mutex::new(backend),
                control: Mutex::new(ControlState {
                    lifecycle: DeviceLifecycleState::default(),
                    input: FormatNegotiation::default(),
                    output: FormatNegotiation::default(),
                }),
                shared: Arc::new(RealtimeShared {
                    delegate: ArcSwapOption::empty(),
                    playing: AtomicBool::new(false),
                    recording: AtomicBool::new(false),
                    output_latency_ns: AtomicU64::new(0),
                }),
            }
        })
    }
}

impl<B: StreamBackend> HostAudioDevice<B> {
    pub fn configuration(&self) -> &DeviceConfiguration {
        &self.config
    }

    /// Snapshot of the lifecycle flags.
    pub fn lifecycle_state(&self) -> DeviceLifecycleState {
        self.control.lock().lifecycle
    }

    pub fn input_negotiation(&self) -> FormatNegotiation {
        self.control.lock().input
    }

    pub fn output_negotiation(&self) -> FormatNegotiation {
        self.control.lock().output
    }

    pub fn available_devices(&self) -> Vec<AudioDeviceInfo> {
        self.backend.lock().available_devices()
    }

    /// Whether a delegate is currently bound.
    pub fn has_delegate(&self) -> bool {
        self.shared.delegate.load().is_some()
    }

    /// Apply a hardware event and tell the engine about it.
    ///
    /// Backends call this from their own threads, so the delegate
    /// notification is marshalled through `dispatch_async`.
    pub fn handle_backend_event(&self, event: BackendEvent) {
        {
            let mut control = self.control.lock();
            if !control.lifecycle.initialized {
                log::debug!("ignoring {:?} on uninitialized device", event);
                return;
            }
            match event {
                BackendEvent::InputInterrupted => {
                    self.shared.recording.store(false, Ordering::Release);
                    control.lifecycle.recording = false;
                    log::warn!("audio input interrupted");
                }
                BackendEvent::OutputInterrupted => {
                    self.shared.playing.store(false, Ordering::Release);
                    control.lifecycle.playing = false;
                    log::warn!("audio output interrupted");
                }
                BackendEvent::InputFormatChanged(format) => {
                    log::info!("input format changed: {:?}", format);
                    control.input.negotiated = Some(format);
                }
                BackendEvent::OutputFormatChanged(format) => {
                    log::info!("output format changed: {:?}", format);
                    control.output.negotiated = Some(format);
                    let latency = self.backend.lock().output_latency();
                    self.shared
                        .output_latency_ns
                        .store(latency.as_nanos() as u64, Ordering::Release);
                }
            }
        }

        let Some(slot) = self.shared.delegate.load_full() else {
            return;
        };
        let Some(delegate) = slot.0.upgrade() else {
            return;
        };
        let target = Arc::clone(&delegate);
        let shared = Arc::clone(&self.shared);
        delegate.dispatch_async(Box::new(move || {
            // Dropped if the device was terminated (or rebound) in the meantime.
            if !shared.is_bound_to(&slot) {
                log::debug!("dropping {:?} notification for an unbound delegate", event);
                return;
            }
            match event {
                BackendEvent::InputInterrupted => target.notify_audio_input_interrupted(),
                BackendEvent::OutputInterrupted => target.notify_audio_output_interrupted(),
                BackendEvent::InputFormatChanged(_) => target.notify_audio_input_parameters_change(),
                BackendEvent::OutputFormatChanged(_) => target.notify_audio_output_parameters_change(),
            }
        }));
    }

    fn make_render_callback(&self) -> RenderCallback {
        let shared = Arc::clone(&self.shared);
        stream_backend::render_callback(move |flags, timestamp, output| {
            shared.render(flags, timestamp, output)
        })
    }

    fn make_capture_callback(&self) -> CaptureCallback {
        let shared = Arc::clone(&self.shared);
        stream_backend::capture_callback(move |flags, timestamp, input, duplex_output| {
            shared.capture(flags, timestamp, input, duplex_output)
        })
    }
}

impl RealtimeShared {
    fn delegate(&self) -> Option<Arc<dyn AudioDeviceDelegate>> {
        self.delegate.load_full().and_then(|slot| slot.0.upgrade())
    }

    fn is_bound_to(&self, slot: &Arc<DelegateSlot>) -> bool {
        self.delegate
            .load_full()
            .is_some_and(|current| Arc::ptr_eq(&current, slot))
    }

    fn output_latency_ns(&self) -> u64 {
        self.output_latency_ns.load(Ordering::Acquire)
    }

    fn render(
        &self,
        flags: &mut RenderActionFlags,
        timestamp: &AudioTimestamp,
        output: &mut AudioBufferMut<'_>,
    ) -> RenderResult {
        if !self.playing.load(Ordering::Acquire) {
            silence(flags, output);
            return Ok(());
        }
        let Some(delegate) = self.delegate() else {
            silence(flags, output);
            return Ok(());
        };
        let frames = output.frame_count() as u32;
        delegate.get_playout_data(flags, timestamp, OUTPUT_BUS, frames, output)
    }

    fn capture(
        &self,
        flags: &mut RenderActionFlags,
        timestamp: &AudioTimestamp,
        input: &AudioBuffer<'_>,
        duplex_output: Option<&mut AudioBufferMut<'_>>,
    ) -> RenderResult {
        if !self.recording.load(Ordering::Acquire) {
            // The output half of a duplex slice still needs servicing.
            if let Some(output) = duplex_output {
                let mut out_flags = RenderActionFlags::NONE;
                let out_ts = timestamp.offset_host_time(self.output_latency_ns());
                let result = self.render(&mut out_flags, &out_ts, output);
                mark_output(flags, out_flags.contains(RenderActionFlags::OUTPUT_IS_SILENCE));
                return result;
            }
            return Ok(());
        }

        let Some(delegate) = self.delegate() else {
            if let Some(output) = duplex_output {
                silence(flags, output);
            }
            return Ok(());
        };
        let frames = input.frame_count() as u32;

        let output = match duplex_output {
            Some(output) if self.playing.load(Ordering::Acquire) => output,
            Some(output) => {
                let result =
                    delegate.deliver_recorded_data(flags, timestamp, INPUT_BUS, frames, Some(input), None);
                silence(flags, output);
                return result;
            }
            None => {
                return delegate.deliver_recorded_data(flags, timestamp, INPUT_BUS, frames, Some(input), None);
            }
        };

        // Exactly one playout pull per duplex slice: through the render
        // block if the delegate asks for it, otherwise right after delivery.
        let earliest_output = timestamp.offset_host_time(self.output_latency_ns());
        let mut pulled = false;
        let mut output_silent = false;
        let result = {
            let mut block = render_block(
                |block_flags: &mut RenderActionFlags,
                 block_ts: &AudioTimestamp,
                 bus: usize,
                 _frame_count: u32,
                 destination: &mut AudioBufferMut<'_>| {
                    if pulled {
                        silence(block_flags, destination);
                        return Err(RenderError::RenderBlockReused);
                    }
                    pulled = true;
                    let pull_ts = if block_ts.host_time_ns < earliest_output.host_time_ns {
                        earliest_output
                    } else {
                        *block_ts
                    };
                    let hardware_frames = output.frame_count() as u32;
                    let result = delegate.get_playout_data(block_flags, &pull_ts, bus, hardware_frames, output);
                    output_silent = block_flags.contains(RenderActionFlags::OUTPUT_IS_SILENCE);
                    destination.copy_from(&output.as_view());
                    result
                },
            );
            delegate.deliver_recorded_data(flags, timestamp, INPUT_BUS, frames, Some(input), Some(&mut block))
        };

        let result = if pulled {
            result
        } else {
            let mut out_flags = RenderActionFlags::NONE;
            let hardware_frames = output.frame_count() as u32;
            let pull = delegate.get_playout_data(&mut out_flags, &earliest_output, OUTPUT_BUS, hardware_frames, output);
            output_silent = out_flags.contains(RenderActionFlags::OUTPUT_IS_SILENCE);
            result.and(pull)
        };
        mark_output(flags, output_silent);
        result
    }
}

/// Pins a closure to the render block signature so its buffer argument is
/// higher-ranked.
fn render_block<F>(f: F) -> F
where
    F: FnMut(&mut RenderActionFlags, &AudioTimestamp, usize, u32, &mut AudioBufferMut<'_>) -> RenderResult,
{
    f
}

/// Report the duplex output half's silence state in the slice's flags.
fn mark_output(flags: &mut RenderActionFlags, silent: bool) {
    if silent {
        flags.insert(RenderActionFlags::OUTPUT_IS_SILENCE);
    } else {
        flags.remove(RenderActionFlags::OUTPUT_IS_SILENCE);
    }
}

fn silence(flags: &mut RenderActionFlags, output: &mut AudioBufferMut<'_>) {
    output.fill_silence();
    flags.insert(RenderActionFlags::OUTPUT_IS_SILENCE);
}

impl<B: StreamBackend> AudioDevice for HostAudioDevice<B> {
    fn device_input_sample_rate(&self) -> f64 {
        self.control.lock().input.effective().sample_rate_hz
    }

    fn input_io_buffer_duration(&self) -> Duration {
        self.control.lock().input.effective().buffer_duration
    }

    fn input_number_of_channels(&self) -> u16 {
        self.control.lock().input.effective().channel_count
    }

    fn input_latency(&self) -> Duration {
        self.backend.lock().input_latency()
    }

    fn device_output_sample_rate(&self) -> f64 {
        self.control.lock().output.effective().sample_rate_hz
    }

    fn output_io_buffer_duration(&self) -> Duration {
        self.control.lock().output.effective().buffer_duration
    }

    fn output_number_of_channels(&self) -> u16 {
        self.control.lock().output.effective().channel_count
    }

    fn output_latency(&self) -> Duration {
        self.backend.lock().output_latency()
    }

    fn is_initialized(&self) -> bool {
        self.control.lock().lifecycle.initialized
    }

    fn initialize_with_delegate(&self, delegate: Weak<dyn AudioDeviceDelegate>) -> bool {
        let mut control = self.control.lock();
        if control.lifecycle.initialized || self.shared.delegate.load().is_some() {
            log::warn!("initialize_with_delegate: a delegate is already bound");
            return false;
        }
        let Some(engine) = delegate.upgrade() else {
            log::warn!("initialize_with_delegate: delegate already dropped");
            return false;
        };

        // Rate and buffer duration come from the engine; channel layout is
        // the host's choice.
        let requested_input = AudioFormat {
            channel_count: self.config.input_channels,
            ..engine.preferred_input_format()
        };
        let requested_output = AudioFormat {
            channel_count: self.config.output_channels,
            ..engine.preferred_output_format()
        };
        drop(engine);

        if let Err(e) = requested_input.validate().and(requested_output.validate()) {
            log::error!("initialize_with_delegate: {}", e);
            return false;
        }

        if let Err(e) = self.backend.lock().acquire(&self.config) {
            log::error!("initialize_with_delegate: failed to acquire hardware: {}", e);
            return false;
        }

        control.input = FormatNegotiation::new(requested_input);
        control.output = FormatNegotiation::new(requested_output);
        self.shared.delegate.store(Some(Arc::new(DelegateSlot(delegate))));
        control.lifecycle.initialized = true;
        log::info!(
            "audio device initialized (input {:?}, output {:?})",
            requested_input,
            requested_output
        );
        true
    }

    fn terminate_device(&self) -> bool {
        let mut control = self.control.lock();
        if !control.lifecycle.initialized {
            return true;
        }
        if !control.lifecycle.is_quiescent() {
            log::warn!("terminate_device: streams still running, stop them first");
            return false;
        }

        {
            let mut backend = self.backend.lock();
            if control.lifecycle.playout_initialized {
                backend.close_output();
            }
            if control.lifecycle.recording_initialized {
                backend.close_input();
            }
            backend.release();
        }

        self.shared.delegate.store(None);
        self.shared.output_latency_ns.store(0, Ordering::Release);
        control.lifecycle.reset();
        control.input.negotiated = None;
        control.output.negotiated = None;
        log::info!("audio device terminated");
        true
    }

    fn is_playout_initialized(&self) -> bool {
        self.control.lock().lifecycle.playout_initialized
    }

    fn initialize_playout(&self) -> bool {
        let mut control = self.control.lock();
        if !control.lifecycle.can_initialize_playout() {
            log::warn!("initialize_playout: rejected in state {:?}", control.lifecycle);
            return false;
        }

        let requested = control.output.requested;
        let mut backend = self.backend.lock();
        let granted = match backend.open_output(requested, self.make_render_callback()) {
            Ok(granted) => granted,
            Err(e) => {
                log::error!("initialize_playout: {}", e);
                return false;
            }
        };
        if let Err(e) = granted.validate() {
            log::error!("initialize_playout: backend granted an invalid format: {}", e);
            backend.close_output();
            return false;
        }

        let latency = backend.output_latency();
        self.shared
            .output_latency_ns
            .store(latency.as_nanos() as u64, Ordering::Release);
        control.output.negotiated = Some(granted);
        control.lifecycle.playout_initialized = true;
        if control.output.was_adjusted() {
            log::info!("playout format adjusted by hardware: {:?} -> {:?}", requested, granted);
        }
        true
    }

    fn is_playing(&self) -> bool {
        self.control.lock().lifecycle.playing
    }

    fn start_playout(&self) -> bool {
        let mut control = self.control.lock();
        if !control.lifecycle.can_start_playout() {
            log::warn!("start_playout: playout not initialized");
            return false;
        }
        if control.lifecycle.playing {
            return true;
        }

        self.shared.playing.store(true, Ordering::Release);
        if let Err(e) = self.backend.lock().start_output() {
            self.shared.playing.store(false, Ordering::Release);
            log::error!("start_playout: {}", e);
            return false;
        }
        control.lifecycle.playing = true;
        true
    }

    fn stop_playout(&self) -> bool {
        let mut control = self.control.lock();
        if !control.lifecycle.playing {
            return true;
        }

        self.shared.playing.store(false, Ordering::Release);
        let mut backend = self.backend.lock();
        if let Err(e) = backend.stop_output() {
            self.shared.playing.store(true, Ordering::Release);
            log::error!("stop_playout: {}", e);
            return false;
        }
        backend.close_output();
        control.lifecycle.playout_stopped();
        true
    }

    fn is_recording_initialized(&self) -> bool {
        self.control.lock().lifecycle.recording_initialized
    }

    fn initialize_recording(&self) -> bool {
        let mut control = self.control.lock();
        if !control.lifecycle.can_initialize_recording() {
            log::warn!("initialize_recording: rejected in state {:?}", control.lifecycle);
            return false;
        }

        let requested = control.input.requested;
        let mut backend = self.backend.lock();
        let granted = match backend.open_input(requested, self.make_capture_callback()) {
            Ok(granted) => granted,
            Err(e) => {
                log::error!("initialize_recording: {}", e);
                return false;
            }
        };
        if let Err(e) = granted.validate() {
            log::error!("initialize_recording: backend granted an invalid format: {}", e);
            backend.close_input();
            return false;
        }

        control.input.negotiated = Some(granted);
        control.lifecycle.recording_initialized = true;
        if control.input.was_adjusted() {
            log::info!("recording format adjusted by hardware: {:?} -> {:?}", requested, granted);
        }
        true
    }

    fn is_recording(&self) -> bool {
        self.control.lock().lifecycle.recording
    }

    fn start_recording(&self) -> bool {
        let mut control = self.control.lock();
        if !control.lifecycle.can_start_recording() {
            log::warn!("start_recording: recording not initialized");
            return false;
        }
        if control.lifecycle.recording {
            return true;
        }

        self.shared.recording.store(true, Ordering::Release);
        if let Err(e) = self.backend.lock().start_input() {
            self.shared.recording.store(false, Ordering::Release);
            log::error!("start_recording: {}", e);
            return false;
        }
        control.lifecycle.recording = true;
        true
    }

    fn stop_recording(&self) -> bool {
        let mut control = self.control.lock();
        if !control.lifecycle.recording {
            return true;
        }

        self.shared.recording.store(false, Ordering::Release);
        let mut backend = self.backend.lock();
        if let Err(e) = backend.stop_input() {
            self.shared.recording.store(true, Ordering::Release);
            log::error!("stop_recording: {}", e);
            return false;
        }
        backend.close_input();
        control.lifecycle.recording_stopped();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::device::virtual_backend::{VirtualBackend, VirtualBackendOptions, VirtualHardware};
    use crate::traits::device_delegate::RenderBlock;
    use crate::traits::dispatch::{DispatchBridge, DispatchWork};

    /// Delegate that fills playout with a constant and calls the render
    /// block a fixed number of times per capture.
    struct ScriptedDelegate {
        fill: i16,
        block_calls: usize,
        playout_calls: AtomicUsize,
        playout_timestamps: parking_lot::Mutex<Vec<AudioTimestamp>>,
        input_timestamps: parking_lot::Mutex<Vec<AudioTimestamp>>,
        block_results: parking_lot::Mutex<Vec<RenderResult>>,
        block_output: parking_lot::Mutex<Vec<i16>>,
        delivered_frames: parking_lot::Mutex<Vec<u32>>,
        pulled_frames: parking_lot::Mutex<Vec<u32>>,
        events: parking_lot::Mutex<Vec<&'static str>>,
        // When set, dispatched work waits in `pending` until `run_pending`.
        defer_dispatch: AtomicBool,
        pending: parking_lot::Mutex<Vec<DispatchWork>>,
        fail_playout: AtomicBool,
    }

    impl ScriptedDelegate {
        fn new(fill: i16, block_calls: usize) -> Arc<Self> {
            Arc::new(Self {
                fill,
                block_calls,
                playout_calls: AtomicUsize::new(0),
                playout_timestamps: parking_lot::Mutex::new(Vec::new()),
                input_timestamps: parking_lot::Mutex::new(Vec::new()),
                block_results: parking_lot::Mutex::new(Vec::new()),
                block_output: parking_lot::Mutex::new(Vec::new()),
                delivered_frames: parking_lot::Mutex::new(Vec::new()),
                pulled_frames: parking_lot::Mutex::new(Vec::new()),
                events: parking_lot::Mutex::new(Vec::new()),
                defer_dispatch: AtomicBool::new(false),
                pending: parking_lot::Mutex::new(Vec::new()),
                fail_playout: AtomicBool::new(false),
            })
        }

        fn run_pending(&self) {
            let pending = std::mem::take(&mut *self.pending.lock());
            for work in pending {
                work();
            }
        }
    }

    impl DispatchBridge for ScriptedDelegate {
        fn dispatch_async(&self, work: DispatchWork) {
            if self.defer_dispatch.load(Ordering::SeqCst) {
                self.pending.lock().push(work);
            } else {
                work();
            }
        }

        fn dispatch_sync(&self, work: DispatchWork) {
            work();
        }
    }

    impl AudioDeviceDelegate for ScriptedDelegate {
        fn preferred_input_format(&self) -> AudioFormat {
            AudioFormat::default()
        }

        fn preferred_output_format(&self) -> AudioFormat {
            AudioFormat::default()
        }

        fn deliver_recorded_data(
            &self,
            _action_flags: &mut RenderActionFlags,
            timestamp: &AudioTimestamp,
            input_bus: usize,
            frame_count: u32,
            input: Option<&AudioBuffer<'_>>,
            render_block: Option<RenderBlock<'_>>,
        ) -> RenderResult {
            assert_eq!(input_bus, INPUT_BUS);
            assert_eq!(input.map(|b| b.frame_count() as u32), Some(frame_count));
            self.input_timestamps.lock().push(*timestamp);
            self.delivered_frames.lock().push(frame_count);

            if let Some(block) = render_block {
                for _ in 0..self.block_calls {
                    let mut storage = vec![0i16; frame_count as usize];
                    let mut out = AudioBufferMut::interleaved(&mut storage, 1);
                    let mut flags = RenderActionFlags::NONE;
                    let result = block(&mut flags, timestamp, OUTPUT_BUS, frame_count, &mut out);
                    self.block_results.lock().push(result);
                    *self.block_output.lock() = storage;
                }
            }
            Ok(())
        }

        fn get_playout_data(
            &self,
            action_flags: &mut RenderActionFlags,
            timestamp: &AudioTimestamp,
            input_bus: usize,
            frame_count: u32,
            output: &mut AudioBufferMut<'_>,
        ) -> RenderResult {
            assert_eq!(input_bus, OUTPUT_BUS);
            assert_eq!(output.frame_count() as u32, frame_count);
            self.playout_calls.fetch_add(1, Ordering::SeqCst);
            self.pulled_frames.lock().push(frame_count);
            if self.fail_playout.load(Ordering::SeqCst) {
                output.fill_silence();
                action_flags.insert(RenderActionFlags::OUTPUT_IS_SILENCE);
                return Err(RenderError::NoDelegate);
            }
            self.playout_timestamps.lock().push(*timestamp);
            output.samples_mut().fill(self.fill);
            action_flags.remove(RenderActionFlags::OUTPUT_IS_SILENCE);
            Ok(())
        }

        fn notify_audio_input_parameters_change(&self) {
            self.events.lock().push("input_params");
        }

        fn notify_audio_output_parameters_change(&self) {
            self.events.lock().push("output_params");
        }

        fn notify_audio_input_interrupted(&self) {
            self.events.lock().push("input_interrupted");
        }

        fn notify_audio_output_interrupted(&self) {
            self.events.lock().push("output_interrupted");
        }
    }

    fn device(options: VirtualBackendOptions) -> (Arc<HostAudioDevice<VirtualBackend>>, VirtualHardware) {
        let (backend, hardware) = VirtualBackend::new(options);
        (HostAudioDevice::new(backend, DeviceConfiguration::default()), hardware)
    }

    fn bind(device: &HostAudioDevice<VirtualBackend>, delegate: &Arc<ScriptedDelegate>) -> bool {
        let delegate: Arc<dyn AudioDeviceDelegate> = delegate.clone();
        device.initialize_with_delegate(Arc::downgrade(&delegate))
    }

    fn running_duplex(
        block_calls: usize,
    ) -> (Arc<HostAudioDevice<VirtualBackend>>, VirtualHardware, Arc<ScriptedDelegate>) {
        let (device, hardware) = device(VirtualBackendOptions::default());
        let delegate = ScriptedDelegate::new(321, block_calls);
        assert!(bind(&device, &delegate));
        assert!(device.initialize_playout());
        assert!(device.initialize_recording());
        assert!(device.start_playout());
        assert!(device.start_recording());
        (device, hardware, delegate)
    }

    #[test]
    fn full_lifecycle() {
        let (device, hardware) = device(VirtualBackendOptions::default());
        let delegate = ScriptedDelegate::new(1, 0);

        assert!(!device.is_initialized());
        assert!(bind(&device, &delegate));
        assert!(device.is_initialized());
        assert!(hardware.is_acquired());

        assert!(device.initialize_playout());
        assert!(device.start_playout());
        assert!(device.is_playing());
        assert!(device.initialize_recording());
        assert!(device.start_recording());
        assert!(device.is_recording());

        assert!(device.stop_playout());
        assert!(device.stop_recording());
        assert!(!device.is_playout_initialized());
        assert!(!device.is_recording_initialized());

        assert!(device.terminate_device());
        assert!(!device.is_initialized());
        assert!(!device.has_delegate());
        assert!(!hardware.is_acquired());
    }

    #[test]
    fn streams_require_initialization() {
        let (device, _hardware) = device(VirtualBackendOptions::default());
        assert!(!device.initialize_playout());
        assert!(!device.start_recording());

        let delegate = ScriptedDelegate::new(1, 0);
        assert!(bind(&device, &delegate));
        assert!(!device.start_recording());
        assert!(!device.is_recording());
        assert!(!device.start_playout());
    }

    #[test]
    fn second_delegate_is_rejected() {
        let (device, _hardware) = device(VirtualBackendOptions::default());
        let first = ScriptedDelegate::new(1, 0);
        let second = ScriptedDelegate::new(2, 0);
        assert!(bind(&device, &first));
        assert!(!bind(&device, &second));
        assert!(device.is_initialized());
    }

    #[test]
    fn dropped_delegate_cannot_bind() {
        let (device, _hardware) = device(VirtualBackendOptions::default());
        let delegate: Arc<dyn AudioDeviceDelegate> = ScriptedDelegate::new(1, 0);
        let weak = Arc::downgrade(&delegate);
        drop(delegate);
        assert!(!device.initialize_with_delegate(weak));
        assert!(!device.is_initialized());
    }

    #[test]
    fn busy_hardware_fails_initialization() {
        let (device, hardware) = device(VirtualBackendOptions::default());
        hardware.set_busy(true);
        let delegate = ScriptedDelegate::new(1, 0);
        assert!(!bind(&device, &delegate));
        assert!(!device.is_initialized());
        assert!(!device.has_delegate());
    }

    #[test]
    fn double_stream_initialization_is_rejected() {
        let (device, _hardware) = device(VirtualBackendOptions::default());
        let delegate = ScriptedDelegate::new(1, 0);
        assert!(bind(&device, &delegate));
        assert!(device.initialize_playout());
        assert!(!device.initialize_playout());
        assert!(device.is_playout_initialized());
    }

    #[test]
    fn failed_open_leaves_state_unchanged() {
        let (device, hardware) = device(VirtualBackendOptions::default());
        let delegate = ScriptedDelegate::new(1, 0);
        assert!(bind(&device, &delegate));
        hardware.set_fail_open(true);
        assert!(!device.initialize_recording());
        assert_eq!(
            device.lifecycle_state(),
            DeviceLifecycleState {
                initialized: true,
                ..Default::default()
            }
        );
    }

    #[test]
    fn terminate_refused_while_running() {
        let (device, _hardware, _delegate) = running_duplex(1);
        assert!(!device.terminate_device());
        assert!(device.is_initialized());
        assert!(device.is_playing());

        assert!(device.stop_playout());
        assert!(!device.terminate_device());
        assert!(device.stop_recording());
        assert!(device.terminate_device());
    }

    #[test]
    fn stop_and_terminate_are_idempotent() {
        let (device, _hardware) = device(VirtualBackendOptions::default());
        assert!(device.stop_playout());
        assert!(device.stop_recording());
        assert!(device.terminate_device());
        assert_eq!(device.lifecycle_state(), DeviceLifecycleState::default());
    }

    #[test]
    fn render_pulls_from_delegate() {
        let (device, hardware) = device(VirtualBackendOptions::default());
        let delegate = ScriptedDelegate::new(77, 0);
        assert!(bind(&device, &delegate));
        assert!(device.initialize_playout());
        assert!(device.start_playout());

        let slice = hardware.render_output(480).unwrap();
        assert!(slice.result.is_ok());
        assert!(slice.samples.iter().all(|&s| s == 77));
        assert!(!slice.flags.contains(RenderActionFlags::OUTPUT_IS_SILENCE));
    }

    #[test]
    fn render_is_silent_once_delegate_is_gone() {
        let (device, hardware) = device(VirtualBackendOptions::default());
        let delegate = ScriptedDelegate::new(77, 0);
        assert!(bind(&device, &delegate));
        assert!(device.initialize_playout());
        assert!(device.start_playout());
        drop(delegate);

        let slice = hardware.render_output(64).unwrap();
        assert!(slice.samples.iter().all(|&s| s == 0));
        assert!(slice.flags.contains(RenderActionFlags::OUTPUT_IS_SILENCE));
    }

    #[test]
    fn duplex_render_block_pulls_once() {
        let (_device, hardware, delegate) = running_duplex(1);

        let slice = hardware.run_duplex(&vec![5i16; 480]).unwrap();
        assert!(slice.result.is_ok());
        assert_eq!(delegate.playout_calls.load(Ordering::SeqCst), 1);
        assert_eq!(*delegate.block_results.lock(), vec![Ok(())]);
        assert!(delegate.block_output.lock().iter().all(|&s| s == 321));
        assert_eq!(*delegate.pulled_frames.lock(), *delegate.delivered_frames.lock());
        assert_eq!(*delegate.pulled_frames.lock(), vec![480]);
        assert!(!slice.flags.contains(RenderActionFlags::OUTPUT_IS_SILENCE));
        assert!(slice.output.unwrap().iter().all(|&s| s == 321));
    }

    #[test]
    fn duplex_render_block_rejects_reuse() {
        let (_device, hardware, delegate) = running_duplex(2);

        let slice = hardware.run_duplex(&vec![5i16; 480]).unwrap();
        assert!(slice.result.is_ok());
        assert_eq!(delegate.playout_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            *delegate.block_results.lock(),
            vec![Ok(()), Err(RenderError::RenderBlockReused)]
        );
        // The rejected call handed back silence.
        assert!(delegate.block_output.lock().iter().all(|&s| s == 0));
        assert!(slice.output.unwrap().iter().all(|&s| s == 321));
    }

    #[test]
    fn duplex_without_block_call_still_pulls_playout() {
        let (_device, hardware, delegate) = running_duplex(0);

        let slice = hardware.run_duplex(&vec![5i16; 480]).unwrap();
        assert_eq!(delegate.playout_calls.load(Ordering::SeqCst), 1);
        assert_eq!(*delegate.pulled_frames.lock(), vec![480]);
        assert!(slice.output.unwrap().iter().all(|&s| s == 321));
    }

    #[test]
    fn duplex_fallback_pull_failure_is_reported() {
        let (_device, hardware, delegate) = running_duplex(0);
        delegate.fail_playout.store(true, Ordering::SeqCst);

        let slice = hardware.run_duplex(&vec![5i16; 480]).unwrap();
        assert_eq!(slice.result, Err(RenderError::NoDelegate));
        assert!(slice.flags.contains(RenderActionFlags::OUTPUT_IS_SILENCE));
        assert!(slice.output.unwrap().iter().all(|&s| s == 0));
    }

    #[test]
    fn duplex_output_reports_silence_once_delegate_is_gone() {
        let (_device, hardware, delegate) = running_duplex(1);
        drop(delegate);

        let slice = hardware.run_duplex(&vec![5i16; 480]).unwrap();
        assert!(slice.result.is_ok());
        assert!(slice.flags.contains(RenderActionFlags::OUTPUT_IS_SILENCE));
        assert!(slice.output.unwrap().iter().all(|&s| s == 0));
    }

    #[test]
    fn notification_queued_before_terminate_is_dropped() {
        let (device, hardware, delegate) = running_duplex(1);
        delegate.defer_dispatch.store(true, Ordering::SeqCst);

        hardware.interrupt_input();
        assert!(delegate.events.lock().is_empty());
        assert!(device.stop_playout());
        assert!(device.terminate_device());

        delegate.run_pending();
        assert!(delegate.events.lock().is_empty());
    }

    #[test]
    fn notification_queued_while_bound_is_delivered() {
        let (_device, hardware, delegate) = running_duplex(1);
        delegate.defer_dispatch.store(true, Ordering::SeqCst);

        hardware.interrupt_output();
        delegate.run_pending();
        assert_eq!(*delegate.events.lock(), vec!["output_interrupted"]);
    }

    #[test]
    fn duplex_output_timestamp_follows_input() {
        let (device, hardware, delegate) = running_duplex(1);
        let latency = device.output_latency().as_nanos() as u64;

        for _ in 0..3 {
            hardware.run_duplex(&vec![0i16; 480]).unwrap();
        }
        let inputs = delegate.input_timestamps.lock().clone();
        let outputs = delegate.playout_timestamps.lock().clone();
        assert_eq!(inputs.len(), 3);
        assert_eq!(outputs.len(), 3);
        assert_eq!(*delegate.pulled_frames.lock(), *delegate.delivered_frames.lock());
        for (input, output) in inputs.iter().zip(&outputs) {
            assert!(input.host_time_ns <= output.host_time_ns);
            assert_eq!(output.host_time_ns, input.host_time_ns + latency);
        }
    }

    #[test]
    fn hardware_granted_format_is_reported() {
        let (device, _hardware) = device(VirtualBackendOptions {
            hardware_sample_rate: Some(44100.0),
            hardware_output_channels: Some(2),
            ..Default::default()
        });
        let delegate = ScriptedDelegate::new(1, 0);
        assert!(bind(&device, &delegate));
        assert!(device.initialize_playout());

        assert_eq!(device.device_output_sample_rate(), 44100.0);
        assert_eq!(device.output_number_of_channels(), 2);
        assert!(device.output_negotiation().was_adjusted());
        assert_eq!(device.output_negotiation().requested.sample_rate_hz, 48000.0);
    }

    #[test]
    fn input_interruption_stops_recording_and_notifies() {
        let (device, hardware, delegate) = running_duplex(1);
        hardware.interrupt_input();

        assert!(!device.is_recording());
        assert!(device.is_recording_initialized());
        assert_eq!(*delegate.events.lock(), vec!["input_interrupted"]);

        assert!(device.start_recording());
        assert!(hardware.is_input_running());
    }

    #[test]
    fn route_change_updates_format_and_notifies() {
        let (device, hardware, delegate) = running_duplex(1);
        let new_format = AudioFormat::new(16000.0, Duration::from_millis(20), 1);
        hardware.change_output_format(new_format);

        assert_eq!(device.device_output_sample_rate(), 16000.0);
        assert_eq!(device.output_io_buffer_duration(), Duration::from_millis(20));
        assert_eq!(*delegate.events.lock(), vec!["output_params"]);
    }
}
