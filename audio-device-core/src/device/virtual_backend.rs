use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::models::buffer::{AudioBuffer, AudioBufferMut, AudioTimestamp, RenderActionFlags};
use crate::models::config::DeviceConfiguration;
use crate::models::device_info::{self, AudioDeviceInfo};
use crate::models::error::{DeviceError, RenderResult};
use crate::models::format::AudioFormat;
use crate::traits::stream_backend::{
    BackendEvent, CaptureCallback, EventSink, RenderCallback, StreamBackend,
};

/// Value written into output buffers before the render callback runs, so a
/// callback that leaves samples untouched is visible to the caller.
pub const STALE_SAMPLE: i16 = 0x5A5A;

/// What the virtual hardware offers.
#[derive(Debug, Clone)]
pub struct VirtualBackendOptions {
    pub devices: Vec<AudioDeviceInfo>,
    /// Force every stream to this rate regardless of the request.
    pub hardware_sample_rate: Option<f64>,
    pub hardware_input_channels: Option<u16>,
    pub hardware_output_channels: Option<u16>,
    pub input_latency: Duration,
    pub output_latency: Duration,
}

impl Default for VirtualBackendOptions {
    fn default() -> Self {
        Self {
            devices: vec![AudioDeviceInfo::new("virtual-default", "Virtual Audio Device", true, true)],
            hardware_sample_rate: None,
            hardware_input_channels: None,
            hardware_output_channels: None,
            input_latency: Duration::from_millis(5),
            output_latency: Duration::from_millis(10),
        }
    }
}

struct StreamSlot<C> {
    callback: Option<C>,
    format: Option<AudioFormat>,
    running: bool,
    sample_time: u64,
}

impl<C> Default for StreamSlot<C> {
    fn default() -> Self {
        Self {
            callback: None,
            format: None,
            running: false,
            sample_time: 0,
        }
    }
}

impl<C: Clone> StreamSlot<C> {
    fn running(&self) -> Option<(C, AudioFormat, u64)> {
        if !self.running {
            return None;
        }
        Some((self.callback.clone()?, self.format?, self.sample_time))
    }
}

struct VirtualShared {
    options: Mutex<VirtualBackendOptions>,
    output: Mutex<StreamSlot<RenderCallback>>,
    input: Mutex<StreamSlot<CaptureCallback>>,
    sink: Mutex<Option<EventSink>>,
    acquired: AtomicBool,
    busy: AtomicBool,
    fail_open: AtomicBool,
}

impl VirtualShared {
    fn emit(&self, event: BackendEvent) {
        let sink = self.sink.lock().clone();
        match sink {
            Some(sink) => sink(event),
            None => log::debug!("no event sink installed, dropping {:?}", event),
        }
    }
}

/// Software `StreamBackend` driven by an explicit clock.
///
/// Nothing runs on its own: the paired `VirtualHardware` handle plays the
/// role of the audio hardware and pushes slices through the installed
/// callbacks on the calling thread.
pub struct VirtualBackend {
    shared: Arc<VirtualShared>,
}

/// Hardware side of a `VirtualBackend`.
#[derive(Clone)]
pub struct VirtualHardware {
    shared: Arc<VirtualShared>,
}

/// Result of one simulated output slice.
#[derive(Debug, Clone)]
pub struct RenderedSlice {
    pub samples: Vec<i16>,
    pub channels: u16,
    pub flags: RenderActionFlags,
    pub timestamp: AudioTimestamp,
    pub result: RenderResult,
}

/// Result of one simulated input (or duplex) slice.
#[derive(Debug, Clone)]
pub struct CapturedSlice {
    pub flags: RenderActionFlags,
    pub timestamp: AudioTimestamp,
    pub result: RenderResult,
    /// Output written during a duplex slice.
    pub output: Option<Vec<i16>>,
}

impl VirtualBackend {
    pub fn new(options: VirtualBackendOptions) -> (Self, VirtualHardware) {
        let mut options = options;
        device_info::sort_by_name(&mut options.devices);
        let shared = Arc::new(VirtualShared {
            options: Mutex::new(options),
            output: Mutex::new(StreamSlot::default()),
            input: Mutex::new(StreamSlot::default()),
            sink: Mutex::new(None),
            acquired: AtomicBool::new(false),
            busy: AtomicBool::new(false),
            fail_open: AtomicBool::new(false),
        });
        let hardware = VirtualHardware {
            shared: Arc::clone(&shared),
        };
        (Self { shared }, hardware)
    }

    fn grant(&self, requested: AudioFormat, forced_channels: Option<u16>) -> AudioFormat {
        let options = self.shared.options.lock();
        AudioFormat {
            sample_rate_hz: options.hardware_sample_rate.unwrap_or(requested.sample_rate_hz),
            buffer_duration: requested.buffer_duration,
            channel_count: forced_channels.unwrap_or(requested.channel_count),
        }
    }

    fn check_open(&self) -> Result<(), DeviceError> {
        if !self.shared.acquired.load(Ordering::Acquire) {
            return Err(DeviceError::StreamSetupFailed("hardware not acquired".into()));
        }
        if self.shared.fail_open.load(Ordering::Acquire) {
            return Err(DeviceError::StreamSetupFailed("stream open rejected by hardware".into()));
        }
        Ok(())
    }
}

fn check_endpoint(
    devices: &[AudioDeviceInfo],
    uid: Option<&str>,
    wants_input: bool,
) -> Result<(), DeviceError> {
    let Some(uid) = uid else {
        return Ok(());
    };
    match device_info::find_by_uid(devices, uid) {
        Some(info) if (wants_input && info.has_input) || (!wants_input && info.has_output) => Ok(()),
        _ => Err(DeviceError::DeviceNotAvailable),
    }
}

impl StreamBackend for VirtualBackend {
    fn acquire(&mut self, config: &DeviceConfiguration) -> Result<(), DeviceError> {
        if self.shared.busy.load(Ordering::Acquire) {
            return Err(DeviceError::DeviceBusy("virtual device held by another client".into()));
        }
        {
            let options = self.shared.options.lock();
            check_endpoint(&options.devices, config.input_device_uid.as_deref(), true)?;
            check_endpoint(&options.devices, config.output_device_uid.as_deref(), false)?;
        }
        self.shared.acquired.store(true, Ordering::Release);
        log::debug!("virtual backend acquired");
        Ok(())
    }

    fn release(&mut self) {
        self.shared.acquired.store(false, Ordering::Release);
        log::debug!("virtual backend released");
    }

    fn open_output(
        &mut self,
        requested: AudioFormat,
        callback: RenderCallback,
    ) -> Result<AudioFormat, DeviceError> {
        self.check_open()?;
        let forced = self.shared.options.lock().hardware_output_channels;
        let granted = self.grant(requested, forced);
        let mut slot = self.shared.output.lock();
        slot.callback = Some(callback);
        slot.format = Some(granted);
        slot.running = false;
        Ok(granted)
    }

    fn start_output(&mut self) -> Result<(), DeviceError> {
        let mut slot = self.shared.output.lock();
        if slot.callback.is_none() {
            return Err(DeviceError::StreamControlFailed("output stream not open".into()));
        }
        slot.running = true;
        Ok(())
    }

    fn stop_output(&mut self) -> Result<(), DeviceError> {
        self.shared.output.lock().running = false;
        Ok(())
    }

    fn close_output(&mut self) {
        let mut slot = self.shared.output.lock();
        slot.callback = None;
        slot.format = None;
        slot.running = false;
    }

    fn open_input(
        &mut self,
        requested: AudioFormat,
        callback: CaptureCallback,
    ) -> Result<AudioFormat, DeviceError> {
        self.check_open()?;
        let forced = self.shared.options.lock().hardware_input_channels;
        let granted = self.grant(requested, forced);
        let mut slot = self.shared.input.lock();
        slot.callback = Some(callback);
        slot.format = Some(granted);
        slot.running = false;
        Ok(granted)
    }

    fn start_input(&mut self) -> Result<(), DeviceError> {
        let mut slot = self.shared.input.lock();
        if slot.callback.is_none() {
            return Err(DeviceError::StreamControlFailed("input stream not open".into()));
        }
        slot.running = true;
        Ok(())
    }

    fn stop_input(&mut self) -> Result<(), DeviceError> {
        self.shared.input.lock().running = false;
        Ok(())
    }

    fn close_input(&mut self) {
        let mut slot = self.shared.input.lock();
        slot.callback = None;
        slot.format = None;
        slot.running = false;
    }

    fn input_latency(&self) -> Duration {
        self.shared.options.lock().input_latency
    }

    fn output_latency(&self) -> Duration {
        self.shared.options.lock().output_latency
    }

    fn available_devices(&self) -> Vec<AudioDeviceInfo> {
        self.shared.options.lock().devices.clone()
    }

    fn set_event_sink(&mut self, sink: EventSink) {
        *self.shared.sink.lock() = Some(sink);
    }
}

fn host_time_ns(sample_time: u64, sample_rate_hz: f64) -> u64 {
    (sample_time as f64 * 1e9 / sample_rate_hz).round() as u64
}

impl VirtualHardware {
    pub fn is_acquired(&self) -> bool {
        self.shared.acquired.load(Ordering::Acquire)
    }

    pub fn is_output_running(&self) -> bool {
        self.shared.output.lock().running
    }

    pub fn is_input_running(&self) -> bool {
        self.shared.input.lock().running
    }

    pub fn output_format(&self) -> Option<AudioFormat> {
        self.shared.output.lock().format
    }

    pub fn input_format(&self) -> Option<AudioFormat> {
        self.shared.input.lock().format
    }

    /// Make `acquire` fail as if another client held the device.
    pub fn set_busy(&self, busy: bool) {
        self.shared.busy.store(busy, Ordering::Release);
    }

    /// Make stream opens fail.
    pub fn set_fail_open(&self, fail: bool) {
        self.shared.fail_open.store(fail, Ordering::Release);
    }

    /// Pull `frames` frames from the output callback.
    ///
    /// Returns `None` when the output stream is not running.
    pub fn render_output(&self, frames: usize) -> Option<RenderedSlice> {
        let (callback, format, sample_time) = {
            let mut slot = self.shared.output.lock();
            let running = slot.running()?;
            slot.sample_time += frames as u64;
            running
        };

        let channels = format.channel_count;
        let mut samples = vec![STALE_SAMPLE; frames * channels as usize];
        let mut flags = RenderActionFlags::NONE;
        let timestamp = AudioTimestamp::new(
            sample_time as f64,
            host_time_ns(sample_time, format.sample_rate_hz),
        );
        let result = {
            let mut output = AudioBufferMut::interleaved(&mut samples, channels);
            callback(&mut flags, &timestamp, &mut output)
        };
        Some(RenderedSlice {
            samples,
            channels,
            flags,
            timestamp,
            result,
        })
    }

    /// Push interleaved samples through the input callback.
    ///
    /// Returns `None` when the input stream is not running.
    pub fn capture_input(&self, samples: &[i16]) -> Option<CapturedSlice> {
        let (callback, format, sample_time) = self.advance_input(samples.len())?;
        let input = AudioBuffer::interleaved(samples, format.channel_count);
        let mut flags = RenderActionFlags::NONE;
        let timestamp = AudioTimestamp::new(
            sample_time as f64,
            host_time_ns(sample_time, format.sample_rate_hz),
        );
        let result = callback(&mut flags, &timestamp, &input, None);
        Some(CapturedSlice {
            flags,
            timestamp,
            result,
            output: None,
        })
    }

    /// Run one duplex slice: input and output serviced in a single callback.
    ///
    /// The output half is only handed over while the output stream runs.
    pub fn run_duplex(&self, samples: &[i16]) -> Option<CapturedSlice> {
        let (callback, format, sample_time) = self.advance_input(samples.len())?;
        let input = AudioBuffer::interleaved(samples, format.channel_count);
        let frames = input.frame_count();

        let output_channels = {
            let mut slot = self.shared.output.lock();
            match slot.running() {
                Some((_, out_format, _)) => {
                    slot.sample_time += frames as u64;
                    Some(out_format.channel_count)
                }
                None => None,
            }
        };

        let mut flags = RenderActionFlags::NONE;
        let timestamp = AudioTimestamp::new(
            sample_time as f64,
            host_time_ns(sample_time, format.sample_rate_hz),
        );
        let mut out_storage = output_channels.map(|ch| vec![STALE_SAMPLE; frames * ch as usize]);
        let result = match (&mut out_storage, output_channels) {
            (Some(storage), Some(channels)) => {
                let mut output = AudioBufferMut::interleaved(storage, channels);
                callback(&mut flags, &timestamp, &input, Some(&mut output))
            }
            _ => callback(&mut flags, &timestamp, &input, None),
        };
        Some(CapturedSlice {
            flags,
            timestamp,
            result,
            output: out_storage,
        })
    }

    /// Stop the input stream from the hardware side and report it.
    pub fn interrupt_input(&self) {
        self.shared.input.lock().running = false;
        self.shared.emit(BackendEvent::InputInterrupted);
    }

    pub fn interrupt_output(&self) {
        self.shared.output.lock().running = false;
        self.shared.emit(BackendEvent::OutputInterrupted);
    }

    /// Simulate a route change that moves the input stream to `format`.
    pub fn change_input_format(&self, format: AudioFormat) {
        self.shared.input.lock().format = Some(format);
        self.shared.emit(BackendEvent::InputFormatChanged(format));
    }

    pub fn change_output_format(&self, format: AudioFormat) {
        self.shared.output.lock().format = Some(format);
        self.shared.emit(BackendEvent::OutputFormatChanged(format));
    }

    fn advance_input(&self, sample_count: usize) -> Option<(CaptureCallback, AudioFormat, u64)> {
        let mut slot = self.shared.input.lock();
        let (callback, format, sample_time) = slot.running()?;
        slot.sample_time += (sample_count / format.channel_count.max(1) as usize) as u64;
        Some((callback, format, sample_time))
    }
}
