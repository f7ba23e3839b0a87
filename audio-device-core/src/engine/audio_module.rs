use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::device::host::OUTPUT_BUS;
use crate::dispatch::queue::DispatchQueue;
use crate::models::buffer::{
    AudioBuffer, AudioBufferMut, AudioTimestamp, RenderActionFlags, SampleLayout,
};
use crate::models::config::EngineAudioConfig;
use crate::models::error::{FactoryError, RenderError, RenderResult};
use crate::models::format::AudioFormat;
use crate::models::stats::AudioCallbackStats;
use crate::processing::ring_buffer::RingBuffer;
use crate::processing::sample_convert;
use crate::traits::audio_device::AudioDevice;
use crate::traits::device_delegate::{AudioDeviceDelegate, RenderBlock};
use crate::traits::dispatch::{DispatchBridge, DispatchWork};

/// Playout side: engine-produced audio waiting for the output callback.
struct PlayoutPath {
    ring: RingBuffer,
    scratch: Vec<i16>,
    channels: u16,
}

impl PlayoutPath {
    fn new(format: AudioFormat, buffered: usize) -> Self {
        let channels = format.channel_count.max(1);
        Self {
            ring: RingBuffer::new(buffered * channels as usize),
            scratch: vec![0; format.capture_capacity_frames() * channels as usize],
            channels,
        }
    }
}

/// Record side: captured audio waiting for the engine to pull it.
struct RecordPath {
    ring: RingBuffer,
    scratch: Vec<i16>,
    channels: u16,
}

impl RecordPath {
    fn new(format: AudioFormat, buffered: usize) -> Self {
        let channels = format.channel_count.max(1);
        Self {
            ring: RingBuffer::new(buffered * channels as usize),
            scratch: vec![0; format.capture_capacity_frames() * channels as usize],
            channels,
        }
    }
}

/// Last playout slice pulled through a render block, kept as the
/// echo-cancellation reference.
struct EchoReference {
    samples: Vec<i16>,
    channels: u16,
    valid: usize,
}

impl EchoReference {
    fn new(format: AudioFormat) -> Self {
        let channels = format.channel_count.max(1);
        Self {
            samples: vec![0; format.capture_capacity_frames() * channels as usize],
            channels,
            valid: 0,
        }
    }
}

#[derive(Default)]
struct CallbackCounters {
    playout_callbacks: AtomicU64,
    playout_frames: AtomicU64,
    playout_underruns: AtomicU64,
    record_callbacks: AtomicU64,
    recorded_frames: AtomicU64,
    record_overruns: AtomicU64,
    duplex_renders: AtomicU64,
    render_block_rejections: AtomicU64,
    input_interruptions: AtomicU64,
    output_interruptions: AtomicU64,
    parameter_changes: AtomicU64,
    last_input_host_time_ns: AtomicU64,
    last_playout_host_time_ns: AtomicU64,
}

impl CallbackCounters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    fn snapshot(&self) -> AudioCallbackStats {
        AudioCallbackStats {
            playout_callbacks: self.playout_callbacks.load(Ordering::Relaxed),
            playout_frames: self.playout_frames.load(Ordering::Relaxed),
            playout_underruns: self.playout_underruns.load(Ordering::Relaxed),
            record_callbacks: self.record_callbacks.load(Ordering::Relaxed),
            recorded_frames: self.recorded_frames.load(Ordering::Relaxed),
            record_overruns: self.record_overruns.load(Ordering::Relaxed),
            duplex_renders: self.duplex_renders.load(Ordering::Relaxed),
            render_block_rejections: self.render_block_rejections.load(Ordering::Relaxed),
            input_interruptions: self.input_interruptions.load(Ordering::Relaxed),
            output_interruptions: self.output_interruptions.load(Ordering::Relaxed),
            parameter_changes: self.parameter_changes.load(Ordering::Relaxed),
            last_input_host_time_ns: self.last_input_host_time_ns.load(Ordering::Relaxed),
            last_playout_host_time_ns: self.last_playout_host_time_ns.load(Ordering::Relaxed),
        }
    }
}

/// Engine-side `AudioDeviceDelegate`.
///
/// Buffers playout audio for the device's output callback and recorded audio
/// for the engine, and drives the device lifecycle on the engine's behalf.
/// ```text
/// push_playout_samples() → [playout ring] → get_playout_data()      → device output
/// device input → deliver_recorded_data() → [record ring] → pull_recorded_samples()
///                              └─ render block → [echo reference]
/// ```
/// I/O callbacks only `try_lock` the rings; a contended lock counts as an
/// underrun (playout) or overrun (record) instead of blocking.
pub struct EngineAudioModule {
    config: EngineAudioConfig,
    device: Arc<dyn AudioDevice>,
    queue: DispatchQueue,
    self_ref: Weak<EngineAudioModule>,
    initialized: AtomicBool,

    playout: Mutex<PlayoutPath>,
    record: Mutex<RecordPath>,
    echo_reference: Mutex<EchoReference>,

    input_interrupted: AtomicBool,
    output_interrupted: AtomicBool,
    // f32 bits of the last captured slice's RMS level
    input_level: AtomicU32,
    counters: CallbackCounters,
}

impl EngineAudioModule {
    pub fn new(
        device: Arc<dyn AudioDevice>,
        config: EngineAudioConfig,
    ) -> Result<Arc<Self>, FactoryError> {
        config.validate().map_err(FactoryError::ConfigurationFailed)?;
        let queue = DispatchQueue::new(config.worker_thread_name.clone())
            .map_err(|e| FactoryError::ConfigurationFailed(e.to_string()))?;

        let playout = PlayoutPath::new(
            config.preferred_output,
            config.preferred_output.frames_for(config.playout_buffer()),
        );
        let record = RecordPath::new(
            config.preferred_input,
            config.preferred_input.frames_for(config.record_buffer()),
        );
        let echo_reference = EchoReference::new(config.preferred_output);

        Ok(Arc::new_cyclic(|self_ref| Self {
            config,
            device,
            queue,
            self_ref: self_ref.clone(),
            initialized: AtomicBool::new(false),
            playout: Mutex::new(playout),
            record: Mutex::new(record),
            echo_reference: Mutex::new(echo_reference),
            input_interrupted: AtomicBool::new(false),
            output_interrupted: AtomicBool::new(false),
            input_level: AtomicU32::new(0),
            counters: CallbackCounters::default(),
        }))
    }

    pub fn config(&self) -> &EngineAudioConfig {
        &self.config
    }

    pub fn device(&self) -> &Arc<dyn AudioDevice> {
        &self.device
    }

    pub fn dispatch_queue(&self) -> &DispatchQueue {
        &self.queue
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Bind this module to the device as its delegate.
    pub fn init(&self) -> bool {
        if self.is_initialized() {
            return true;
        }
        let Some(this) = self.self_ref.upgrade() else {
            return false;
        };
        let delegate: Arc<dyn AudioDeviceDelegate> = this;
        if !self.device.initialize_with_delegate(Arc::downgrade(&delegate)) {
            log::error!("audio device rejected the engine delegate");
            return false;
        }
        self.initialized.store(true, Ordering::Release);
        self.reconfigure_playout();
        self.reconfigure_record();
        log::info!(
            "engine audio module bound (input {:?}, output {:?})",
            self.device.input_format(),
            self.device.output_format()
        );
        true
    }

    pub fn init_playout(&self) -> bool {
        if !self.is_initialized() {
            return false;
        }
        if self.device.is_playout_initialized() {
            return true;
        }
        if !self.device.initialize_playout() {
            return false;
        }
        self.reconfigure_playout();
        true
    }

    /// Start playout, initializing the output stream first if needed.
    pub fn start_playout(&self) -> bool {
        if !self.device.is_playout_initialized() && !self.init_playout() {
            return false;
        }
        self.output_interrupted.store(false, Ordering::Release);
        self.device.start_playout()
    }

    pub fn stop_playout(&self) -> bool {
        if !self.device.stop_playout() {
            return false;
        }
        self.playout.lock().ring.reset();
        true
    }

    pub fn playout_active(&self) -> bool {
        self.device.is_playing() && !self.output_interrupted.load(Ordering::Acquire)
    }

    pub fn init_recording(&self) -> bool {
        if !self.is_initialized() {
            return false;
        }
        if self.device.is_recording_initialized() {
            return true;
        }
        if !self.device.initialize_recording() {
            return false;
        }
        self.reconfigure_record();
        true
    }

    /// Start recording, initializing the input stream first if needed.
    pub fn start_recording(&self) -> bool {
        if !self.device.is_recording_initialized() && !self.init_recording() {
            return false;
        }
        self.input_interrupted.store(false, Ordering::Release);
        self.device.start_recording()
    }

    pub fn stop_recording(&self) -> bool {
        self.device.stop_recording()
    }

    pub fn recording_active(&self) -> bool {
        self.device.is_recording() && !self.input_interrupted.load(Ordering::Acquire)
    }

    /// Stop both streams and release the device.
    pub fn terminate(&self) -> bool {
        if !self.is_initialized() {
            return true;
        }
        let stopped = self.stop_playout() & self.stop_recording();
        if !stopped {
            log::warn!("terminate: a stream refused to stop");
        }
        if !self.device.terminate_device() {
            log::error!("terminate: device refused to terminate");
            return false;
        }
        self.initialized.store(false, Ordering::Release);
        log::info!("engine audio module terminated");
        true
    }

    /// Queue interleaved samples for playout. Returns how many older samples
    /// were dropped to make room.
    pub fn push_playout_samples(&self, samples: &[i16]) -> usize {
        let dropped = self.playout.lock().ring.write(samples);
        if dropped > 0 {
            log::debug!("playout ring full, dropped {} samples", dropped);
        }
        dropped
    }

    /// Take up to `max_samples` interleaved recorded samples.
    pub fn pull_recorded_samples(&self, max_samples: usize) -> Vec<i16> {
        self.record.lock().ring.read(max_samples)
    }

    pub fn playout_channels(&self) -> u16 {
        self.playout.lock().channels
    }

    pub fn record_channels(&self) -> u16 {
        self.record.lock().channels
    }

    pub fn buffered_playout_samples(&self) -> usize {
        self.playout.lock().ring.count()
    }

    /// The most recent playout slice pulled during capture, interleaved.
    pub fn last_echo_reference(&self) -> Vec<i16> {
        let reference = self.echo_reference.lock();
        reference.samples[..reference.valid].to_vec()
    }

    /// RMS level of the most recent captured slice.
    pub fn input_level(&self) -> f32 {
        f32::from_bits(self.input_level.load(Ordering::Relaxed))
    }

    pub fn is_input_interrupted(&self) -> bool {
        self.input_interrupted.load(Ordering::Acquire)
    }

    pub fn is_output_interrupted(&self) -> bool {
        self.output_interrupted.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> AudioCallbackStats {
        self.counters.snapshot()
    }

    /// Block until everything already dispatched to the engine has run.
    pub fn flush(&self) {
        self.queue.dispatch_sync(Box::new(|| {}));
    }

    fn reconfigure_playout(&self) {
        let format = self.device.output_format();
        if format.validate().is_err() {
            return;
        }
        let buffered = format.frames_for(self.config.playout_buffer());
        *self.playout.lock() = PlayoutPath::new(format, buffered);
        *self.echo_reference.lock() = EchoReference::new(format);
        log::debug!("playout path sized for {:?}", format);
    }

    fn reconfigure_record(&self) {
        let format = self.device.input_format();
        if format.validate().is_err() {
            return;
        }
        let buffered = format.frames_for(self.config.record_buffer());
        *self.record.lock() = RecordPath::new(format, buffered);
        log::debug!("record path sized for {:?}", format);
    }

    fn store_input(&self, input: &AudioBuffer<'_>) {
        let Some(mut path) = self.record.try_lock() else {
            CallbackCounters::bump(&self.counters.record_overruns, 1);
            return;
        };
        let RecordPath {
            ring,
            scratch,
            channels,
        } = &mut *path;
        let channels = *channels as usize;

        let frames = input.frame_count().min(scratch.len() / channels);
        if frames < input.frame_count() {
            CallbackCounters::bump(&self.counters.record_overruns, 1);
        }
        let dst = &mut scratch[..frames * channels];
        if input.layout() == SampleLayout::Interleaved {
            sample_convert::remap_channels(
                input.samples(),
                input.channel_count() as usize,
                dst,
                channels,
            );
        } else if let Ok(mut view) =
            AudioBufferMut::new(dst, frames, channels as u16, SampleLayout::Interleaved)
        {
            view.copy_from(input);
        }

        let level = sample_convert::rms_level(&scratch[..frames * channels]);
        self.input_level.store(level.to_bits(), Ordering::Relaxed);

        if ring.write(&scratch[..frames * channels]) > 0 {
            CallbackCounters::bump(&self.counters.record_overruns, 1);
        }
        CallbackCounters::bump(&self.counters.recorded_frames, frames as u64);
    }

    fn pull_echo_reference(
        &self,
        timestamp: &AudioTimestamp,
        frame_count: u32,
        render_block: RenderBlock<'_>,
    ) -> RenderResult {
        let Some(mut reference) = self.echo_reference.try_lock() else {
            return Ok(());
        };
        let EchoReference {
            samples,
            channels,
            valid,
        } = &mut *reference;
        let frames = (frame_count as usize).min(samples.len() / *channels as usize);
        let len = frames * *channels as usize;

        let mut out = AudioBufferMut::new(&mut samples[..len], frames, *channels, SampleLayout::Interleaved)?;
        let mut flags = RenderActionFlags::NONE;
        let result = render_block(&mut flags, timestamp, OUTPUT_BUS, frames as u32, &mut out);
        *valid = if result.is_ok() { len } else { 0 };
        match result {
            Ok(()) => CallbackCounters::bump(&self.counters.duplex_renders, 1),
            Err(RenderError::RenderBlockReused) => {
                CallbackCounters::bump(&self.counters.render_block_rejections, 1)
            }
            Err(_) => {}
        }
        result
    }
}

impl DispatchBridge for EngineAudioModule {
    fn dispatch_async(&self, work: DispatchWork) {
        self.queue.dispatch_async(work);
    }

    fn dispatch_sync(&self, work: DispatchWork) {
        self.queue.dispatch_sync(work);
    }
}

impl AudioDeviceDelegate for EngineAudioModule {
    fn preferred_input_format(&self) -> AudioFormat {
        self.config.preferred_input
    }

    fn preferred_output_format(&self) -> AudioFormat {
        self.config.preferred_output
    }

    fn deliver_recorded_data(
        &self,
        _action_flags: &mut RenderActionFlags,
        timestamp: &AudioTimestamp,
        _input_bus: usize,
        frame_count: u32,
        input: Option<&AudioBuffer<'_>>,
        render_block: Option<RenderBlock<'_>>,
    ) -> RenderResult {
        CallbackCounters::bump(&self.counters.record_callbacks, 1);
        self.counters
            .last_input_host_time_ns
            .store(timestamp.host_time_ns, Ordering::Relaxed);

        if !self.input_interrupted.load(Ordering::Acquire) {
            if let Some(input) = input {
                self.store_input(input);
            }
        }

        match render_block {
            Some(block) if !self.output_interrupted.load(Ordering::Acquire) => {
                self.pull_echo_reference(timestamp, frame_count, block)
            }
            _ => Ok(()),
        }
    }

    fn get_playout_data(
        &self,
        action_flags: &mut RenderActionFlags,
        timestamp: &AudioTimestamp,
        _input_bus: usize,
        frame_count: u32,
        output: &mut AudioBufferMut<'_>,
    ) -> RenderResult {
        CallbackCounters::bump(&self.counters.playout_callbacks, 1);
        self.counters
            .last_playout_host_time_ns
            .store(timestamp.host_time_ns, Ordering::Relaxed);

        let frames = frame_count as usize;
        if output.frame_count() < frames {
            output.fill_silence();
            action_flags.insert(RenderActionFlags::OUTPUT_IS_SILENCE);
            return Err(RenderError::BufferTooSmall {
                required: frames * output.channel_count() as usize,
                available: output.samples().len(),
            });
        }

        let underrun = |output: &mut AudioBufferMut<'_>, flags: &mut RenderActionFlags| {
            CallbackCounters::bump(&self.counters.playout_underruns, 1);
            output.fill_silence();
            flags.insert(RenderActionFlags::OUTPUT_IS_SILENCE);
        };

        if self.output_interrupted.load(Ordering::Acquire) {
            output.fill_silence();
            action_flags.insert(RenderActionFlags::OUTPUT_IS_SILENCE);
            return Ok(());
        }
        let Some(mut path) = self.playout.try_lock() else {
            underrun(output, action_flags);
            return Ok(());
        };
        let PlayoutPath {
            ring,
            scratch,
            channels,
        } = &mut *path;
        let needed = frames * *channels as usize;
        if ring.count() < needed || scratch.len() < needed {
            underrun(output, action_flags);
            return Ok(());
        }

        ring.read_into(&mut scratch[..needed]);
        let source = AudioBuffer::new(&scratch[..needed], frames, *channels, SampleLayout::Interleaved)?;
        output.copy_from(&source);
        action_flags.remove(RenderActionFlags::OUTPUT_IS_SILENCE);
        CallbackCounters::bump(&self.counters.playout_frames, frames as u64);
        Ok(())
    }

    fn notify_audio_input_parameters_change(&self) {
        CallbackCounters::bump(&self.counters.parameter_changes, 1);
        log::info!("input parameters changed: {:?}", self.device.input_format());
        self.reconfigure_record();
    }

    fn notify_audio_output_parameters_change(&self) {
        CallbackCounters::bump(&self.counters.parameter_changes, 1);
        log::info!("output parameters changed: {:?}", self.device.output_format());
        self.reconfigure_playout();
    }

    fn notify_audio_input_interrupted(&self) {
        CallbackCounters::bump(&self.counters.input_interruptions, 1);
        self.input_interrupted.store(true, Ordering::Release);
        log::warn!("audio input interrupted, recording paused until restarted");
    }

    fn notify_audio_output_interrupted(&self) {
        CallbackCounters::bump(&self.counters.output_interruptions, 1);
        self.output_interrupted.store(true, Ordering::Release);
        log::warn!("audio output interrupted, playout paused until restarted");
    }
}
