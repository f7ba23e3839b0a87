//! `StreamBackend` on top of cpal.
//!
//! cpal streams are not `Send`, so each open stream lives on its own thread
//! and is driven through a command channel:
//! ```text
//! [control thread] ── Play/Pause/Close ──→ [stream thread: owns cpal::Stream]
//!                  ←──── Result ─────────
//! ```
//! The hardware callbacks convert between cpal's native sample format and
//! 16-bit PCM in scratch buffers allocated when the stream is built.
//!
//! Hardware events never reach the event sink from a cpal thread. They are
//! queued with `try_send` and delivered by a forwarding thread, because the
//! sink may wait on a control lock held by a caller that is tearing the
//! stream down.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};

use audio_device_core::models::buffer::{AudioBuffer, AudioBufferMut, AudioTimestamp, RenderActionFlags};
use audio_device_core::models::config::DeviceConfiguration;
use audio_device_core::models::device_info::AudioDeviceInfo;
use audio_device_core::models::error::DeviceError;
use audio_device_core::models::format::AudioFormat;
use audio_device_core::processing::sample_convert;
use audio_device_core::traits::stream_backend::{
    BackendEvent, CaptureCallback, EventSink, RenderCallback, StreamBackend,
};

use crate::device_enumerator;

enum StreamCommand {
    Play,
    Pause,
    Close,
}

/// Thread owning one cpal stream.
struct StreamWorker {
    commands: Sender<StreamCommand>,
    replies: Receiver<Result<(), DeviceError>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl StreamWorker {
    /// Build a stream on a new thread and return the format it runs at.
    fn spawn<F>(name: &str, build: F) -> Result<(Self, AudioFormat), DeviceError>
    where
        F: FnOnce() -> Result<(cpal::Stream, AudioFormat), DeviceError> + Send + 'static,
    {
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                let stream = match build() {
                    Ok((stream, format)) => {
                        let _ = ready_tx.send(Ok(format));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                for command in command_rx.iter() {
                    let result = match command {
                        StreamCommand::Play => stream
                            .play()
                            .map_err(|e| DeviceError::StreamControlFailed(e.to_string())),
                        StreamCommand::Pause => stream
                            .pause()
                            .map_err(|e| DeviceError::StreamControlFailed(e.to_string())),
                        StreamCommand::Close => break,
                    };
                    let _ = reply_tx.send(result);
                }
                // Dropping the stream stops the hardware callbacks.
            })
            .map_err(|e| DeviceError::Unknown(format!("failed to spawn {} thread: {}", name, e)))?;

        let format = ready_rx
            .recv()
            .map_err(|_| DeviceError::StreamSetupFailed(format!("{} thread exited", name)))??;
        Ok((
            Self {
                commands: command_tx,
                replies: reply_rx,
                handle: Some(handle),
            },
            format,
        ))
    }

    fn request(&self, command: StreamCommand) -> Result<(), DeviceError> {
        self.commands
            .send(command)
            .map_err(|_| DeviceError::StreamControlFailed("stream thread is gone".into()))?;
        self.replies
            .recv()
            .map_err(|_| DeviceError::StreamControlFailed("stream thread is gone".into()))?
    }

    fn close(mut self) {
        let _ = self.commands.send(StreamCommand::Close);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("stream thread panicked");
            }
        }
    }
}

/// Pending hardware events between cpal threads and the forwarding thread.
const EVENT_QUEUE_DEPTH: usize = 16;

/// Stream configuration chosen for a request.
struct Negotiated {
    config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    format: AudioFormat,
}

/// Pick the supported configuration closest to `requested`: an exact
/// channel and rate match if there is one, otherwise the device default.
///
/// The buffer size is clamped into the range the device supports. When the
/// device does not publish a range the requested duration is reported until
/// the first callback measures the real one.
fn negotiate<I>(
    requested: AudioFormat,
    supported: I,
    default: cpal::SupportedStreamConfig,
) -> Negotiated
where
    I: IntoIterator<Item = cpal::SupportedStreamConfigRange>,
{
    let rate = requested.sample_rate_hz.round() as u32;
    let chosen = supported
        .into_iter()
        .filter(|range| {
            matches!(range.sample_format(), cpal::SampleFormat::F32 | cpal::SampleFormat::I16)
        })
        .find(|range| {
            range.channels() == requested.channel_count
                && range.min_sample_rate().0 <= rate
                && range.max_sample_rate().0 >= rate
        })
        .map(|range| range.with_sample_rate(cpal::SampleRate(rate)))
        .unwrap_or(default);

    let mut format = AudioFormat {
        sample_rate_hz: chosen.sample_rate().0 as f64,
        buffer_duration: requested.buffer_duration,
        channel_count: chosen.channels(),
    };
    let frames = (format.frames_per_buffer() as u32).max(1);
    let buffer_size = match chosen.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } if min <= max => {
            let granted = frames.clamp(*min, *max);
            format.buffer_duration = format.duration_of(granted as usize);
            cpal::BufferSize::Fixed(granted)
        }
        _ => cpal::BufferSize::Default,
    };

    Negotiated {
        config: cpal::StreamConfig {
            channels: chosen.channels(),
            sample_rate: chosen.sample_rate(),
            buffer_size,
        },
        sample_format: chosen.sample_format(),
        format,
    }
}

fn host_time_ns(sample_time: u64, sample_rate_hz: f64) -> u64 {
    (sample_time as f64 * 1e9 / sample_rate_hz).round() as u64
}

/// Measures the hardware period on the first callback and reports it when
/// it differs from what was negotiated.
struct PeriodWatch {
    negotiated: AudioFormat,
    measured: bool,
    period_ns: Arc<AtomicU64>,
    events: Option<Sender<BackendEvent>>,
    changed: fn(AudioFormat) -> BackendEvent,
}

impl PeriodWatch {
    fn new(
        negotiated: AudioFormat,
        period_ns: Arc<AtomicU64>,
        events: Option<Sender<BackendEvent>>,
        changed: fn(AudioFormat) -> BackendEvent,
    ) -> Self {
        Self {
            negotiated,
            measured: false,
            period_ns,
            events,
            changed,
        }
    }

    fn observe(&mut self, frames: usize) {
        if self.measured {
            return;
        }
        self.measured = true;
        if frames == 0 || frames == self.negotiated.frames_per_buffer() {
            return;
        }
        let actual = AudioFormat {
            buffer_duration: self.negotiated.duration_of(frames),
            ..self.negotiated
        };
        self.period_ns
            .store(actual.buffer_duration.as_nanos() as u64, Ordering::Release);
        if let Some(events) = &self.events {
            let _ = events.try_send((self.changed)(actual));
        }
    }
}

fn error_callback(
    events: Option<Sender<BackendEvent>>,
    interrupted: BackendEvent,
) -> impl FnMut(cpal::StreamError) + Send + 'static {
    move |err| {
        log::error!("audio stream error: {}", err);
        if let (cpal::StreamError::DeviceNotAvailable, Some(events)) = (&err, &events) {
            let _ = events.try_send(interrupted);
        }
    }
}

/// Spawn the thread that hands queued hardware events to `sink`.
///
/// The thread exits once every sender is gone.
fn spawn_event_forwarder(sink: EventSink) -> Option<Sender<BackendEvent>> {
    let (tx, rx) = crossbeam_channel::bounded::<BackendEvent>(EVENT_QUEUE_DEPTH);
    let spawned = thread::Builder::new()
        .name("cpal-events".into())
        .spawn(move || {
            for event in rx.iter() {
                sink(event);
            }
        });
    match spawned {
        Ok(_) => Some(tx),
        Err(e) => {
            log::error!("failed to spawn cpal event thread, hardware events disabled: {}", e);
            None
        }
    }
}

fn build_output_stream(
    device: &cpal::Device,
    negotiated: &Negotiated,
    callback: RenderCallback,
    events: Option<Sender<BackendEvent>>,
    period_ns: Arc<AtomicU64>,
) -> Result<cpal::Stream, DeviceError> {
    let format = negotiated.format;
    let channels = format.channel_count;
    let on_error = error_callback(events.clone(), BackendEvent::OutputInterrupted);
    let mut period = PeriodWatch::new(format, period_ns, events, BackendEvent::OutputFormatChanged);
    let mut sample_time = 0u64;

    let stream = match negotiated.sample_format {
        cpal::SampleFormat::I16 => device.build_output_stream(
            &negotiated.config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                period.observe(data.len() / channels as usize);
                let mut flags = RenderActionFlags::NONE;
                let timestamp = AudioTimestamp::new(sample_time as f64, host_time_ns(sample_time, format.sample_rate_hz));
                let mut output = AudioBufferMut::interleaved(data, channels);
                if callback(&mut flags, &timestamp, &mut output).is_err() {
                    output.fill_silence();
                }
                sample_time += output.frame_count() as u64;
            },
            on_error,
            None,
        ),
        cpal::SampleFormat::F32 => {
            let mut scratch = vec![0i16; format.capture_capacity_frames() * channels as usize];
            device.build_output_stream(
                &negotiated.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    period.observe(data.len() / channels as usize);
                    for chunk in data.chunks_mut(scratch.len()) {
                        let pcm = &mut scratch[..chunk.len()];
                        let frames = {
                            let mut flags = RenderActionFlags::NONE;
                            let timestamp = AudioTimestamp::new(
                                sample_time as f64,
                                host_time_ns(sample_time, format.sample_rate_hz),
                            );
                            let mut output = AudioBufferMut::interleaved(pcm, channels);
                            if callback(&mut flags, &timestamp, &mut output).is_err() {
                                output.fill_silence();
                            }
                            output.frame_count()
                        };
                        sample_convert::i16_to_f32(pcm, chunk);
                        sample_time += frames as u64;
                    }
                },
                on_error,
                None,
            )
        }
        other => {
            return Err(DeviceError::InvalidFormat(format!("unsupported sample format {:?}", other)));
        }
    };
    stream.map_err(|e| DeviceError::StreamSetupFailed(e.to_string()))
}

fn build_input_stream(
    device: &cpal::Device,
    negotiated: &Negotiated,
    callback: CaptureCallback,
    events: Option<Sender<BackendEvent>>,
    period_ns: Arc<AtomicU64>,
) -> Result<cpal::Stream, DeviceError> {
    let format = negotiated.format;
    let channels = format.channel_count;
    let on_error = error_callback(events.clone(), BackendEvent::InputInterrupted);
    let mut period = PeriodWatch::new(format, period_ns, events, BackendEvent::InputFormatChanged);
    let mut sample_time = 0u64;

    let stream = match negotiated.sample_format {
        cpal::SampleFormat::I16 => device.build_input_stream(
            &negotiated.config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                period.observe(data.len() / channels as usize);
                let mut flags = RenderActionFlags::NONE;
                let timestamp = AudioTimestamp::new(sample_time as f64, host_time_ns(sample_time, format.sample_rate_hz));
                let input = AudioBuffer::interleaved(data, channels);
                let _ = callback(&mut flags, &timestamp, &input, None);
                sample_time += input.frame_count() as u64;
            },
            on_error,
            None,
        ),
        cpal::SampleFormat::F32 => {
            let mut scratch = vec![0i16; format.capture_capacity_frames() * channels as usize];
            device.build_input_stream(
                &negotiated.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    period.observe(data.len() / channels as usize);
                    for chunk in data.chunks(scratch.len()) {
                        let n = sample_convert::f32_to_i16(chunk, &mut scratch);
                        let input = AudioBuffer::interleaved(&scratch[..n], channels);
                        let mut flags = RenderActionFlags::NONE;
                        let timestamp = AudioTimestamp::new(
                            sample_time as f64,
                            host_time_ns(sample_time, format.sample_rate_hz),
                        );
                        let _ = callback(&mut flags, &timestamp, &input, None);
                        sample_time += input.frame_count() as u64;
                    }
                },
                on_error,
                None,
            )
        }
        other => {
            return Err(DeviceError::InvalidFormat(format!("unsupported sample format {:?}", other)));
        }
    };
    stream.map_err(|e| DeviceError::StreamSetupFailed(e.to_string()))
}

/// cpal-backed hardware for `HostAudioDevice`.
///
/// Input and output run as separate cpal streams, so capture callbacks never
/// carry a duplex output buffer.
pub struct CpalBackend {
    host: cpal::Host,
    input_device: Option<cpal::Device>,
    output_device: Option<cpal::Device>,
    output: Option<StreamWorker>,
    input: Option<StreamWorker>,
    // Current hardware period of each open stream, zero when closed.
    output_period_ns: Arc<AtomicU64>,
    input_period_ns: Arc<AtomicU64>,
    events: Option<Sender<BackendEvent>>,
}

impl CpalBackend {
    /// Backend on the platform's default cpal host.
    pub fn new() -> Self {
        Self::with_host(cpal::default_host())
    }

    pub fn with_host(host: cpal::Host) -> Self {
        Self {
            host,
            input_device: None,
            output_device: None,
            output: None,
            input: None,
            output_period_ns: Arc::new(AtomicU64::new(0)),
            input_period_ns: Arc::new(AtomicU64::new(0)),
            events: None,
        }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamBackend for CpalBackend {
    fn acquire(&mut self, config: &DeviceConfiguration) -> Result<(), DeviceError> {
        let input = device_enumerator::find_input_device(&self.host, config.input_device_uid.as_deref())?;
        let output = device_enumerator::find_output_device(&self.host, config.output_device_uid.as_deref())?;
        log::info!(
            "cpal devices: input '{}', output '{}'",
            input.name().unwrap_or_default(),
            output.name().unwrap_or_default()
        );
        self.input_device = Some(input);
        self.output_device = Some(output);
        Ok(())
    }

    fn release(&mut self) {
        self.close_output();
        self.close_input();
        self.input_device = None;
        self.output_device = None;
    }

    fn open_output(
        &mut self,
        requested: AudioFormat,
        callback: RenderCallback,
    ) -> Result<AudioFormat, DeviceError> {
        let device = self
            .output_device
            .clone()
            .ok_or_else(|| DeviceError::StreamSetupFailed("hardware not acquired".into()))?;
        let events = self.events.clone();
        let period_ns = Arc::clone(&self.output_period_ns);

        let (worker, granted) = StreamWorker::spawn("cpal-output", move || {
            let supported = device
                .supported_output_configs()
                .map_err(|e| DeviceError::StreamSetupFailed(e.to_string()))?;
            let default = device
                .default_output_config()
                .map_err(|e| DeviceError::StreamSetupFailed(e.to_string()))?;
            let negotiated = negotiate(requested, supported, default);
            period_ns.store(negotiated.format.buffer_duration.as_nanos() as u64, Ordering::Release);
            let stream = build_output_stream(&device, &negotiated, callback, events, period_ns)?;
            // Built streams may start running on some hosts.
            let _ = stream.pause();
            Ok((stream, negotiated.format))
        })?;

        self.output = Some(worker);
        Ok(granted)
    }

    fn start_output(&mut self) -> Result<(), DeviceError> {
        match &self.output {
            Some(worker) => worker.request(StreamCommand::Play),
            None => Err(DeviceError::StreamControlFailed("output stream not open".into())),
        }
    }

    fn stop_output(&mut self) -> Result<(), DeviceError> {
        match &self.output {
            Some(worker) => worker.request(StreamCommand::Pause),
            None => Ok(()),
        }
    }

    fn close_output(&mut self) {
        if let Some(worker) = self.output.take() {
            worker.close();
        }
        self.output_period_ns.store(0, Ordering::Release);
    }

    fn open_input(
        &mut self,
        requested: AudioFormat,
        callback: CaptureCallback,
    ) -> Result<AudioFormat, DeviceError> {
        let device = self
            .input_device
            .clone()
            .ok_or_else(|| DeviceError::StreamSetupFailed("hardware not acquired".into()))?;
        let events = self.events.clone();
        let period_ns = Arc::clone(&self.input_period_ns);

        let (worker, granted) = StreamWorker::spawn("cpal-input", move || {
            let supported = device
                .supported_input_configs()
                .map_err(|e| DeviceError::StreamSetupFailed(e.to_string()))?;
            let default = device
                .default_input_config()
                .map_err(|e| DeviceError::StreamSetupFailed(e.to_string()))?;
            let negotiated = negotiate(requested, supported, default);
            period_ns.store(negotiated.format.buffer_duration.as_nanos() as u64, Ordering::Release);
            let stream = build_input_stream(&device, &negotiated, callback, events, period_ns)?;
            let _ = stream.pause();
            Ok((stream, negotiated.format))
        })?;

        self.input = Some(worker);
        Ok(granted)
    }

    fn start_input(&mut self) -> Result<(), DeviceError> {
        match &self.input {
            Some(worker) => worker.request(StreamCommand::Play),
            None => Err(DeviceError::StreamControlFailed("input stream not open".into())),
        }
    }

    fn stop_input(&mut self) -> Result<(), DeviceError> {
        match &self.input {
            Some(worker) => worker.request(StreamCommand::Pause),
            None => Ok(()),
        }
    }

    fn close_input(&mut self) {
        if let Some(worker) = self.input.take() {
            worker.close();
        }
        self.input_period_ns.store(0, Ordering::Release);
    }

    fn input_latency(&self) -> Duration {
        Duration::from_nanos(self.input_period_ns.load(Ordering::Acquire))
    }

    fn output_latency(&self) -> Duration {
        Duration::from_nanos(self.output_period_ns.load(Ordering::Acquire))
    }

    fn available_devices(&self) -> Vec<AudioDeviceInfo> {
        device_enumerator::list_devices(&self.host).unwrap_or_else(|e| {
            log::warn!("device enumeration failed: {}", e);
            Vec::new()
        })
    }

    fn set_event_sink(&mut self, sink: EventSink) {
        self.events = spawn_event_forwarder(sink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(channels: u16, min: u32, max: u32, format: cpal::SampleFormat) -> cpal::SupportedStreamConfigRange {
        cpal::SupportedStreamConfigRange::new(
            channels,
            cpal::SampleRate(min),
            cpal::SampleRate(max),
            cpal::SupportedBufferSize::Range { min: 64, max: 4096 },
            format,
        )
    }

    fn default_config() -> cpal::SupportedStreamConfig {
        cpal::SupportedStreamConfig::new(
            2,
            cpal::SampleRate(44100),
            cpal::SupportedBufferSize::Unknown,
            cpal::SampleFormat::F32,
        )
    }

    #[test]
    fn exact_match_is_preferred() {
        let requested = AudioFormat::default();
        let negotiated = negotiate(
            requested,
            vec![
                range(2, 8000, 96000, cpal::SampleFormat::F32),
                range(1, 8000, 96000, cpal::SampleFormat::I16),
            ],
            default_config(),
        );
        assert_eq!(negotiated.format, requested);
        assert_eq!(negotiated.sample_format, cpal::SampleFormat::I16);
        assert_eq!(negotiated.config.buffer_size, cpal::BufferSize::Fixed(480));
    }

    #[test]
    fn falls_back_to_device_default() {
        let requested = AudioFormat::default();
        let negotiated = negotiate(
            requested,
            vec![range(1, 8000, 16000, cpal::SampleFormat::F32)],
            default_config(),
        );
        assert_eq!(negotiated.format.sample_rate_hz, 44100.0);
        assert_eq!(negotiated.format.channel_count, 2);
        assert_eq!(negotiated.format.buffer_duration, requested.buffer_duration);
        assert_eq!(negotiated.config.buffer_size, cpal::BufferSize::Default);
    }

    #[test]
    fn buffer_size_is_clamped_to_device_range() {
        let requested = AudioFormat::default();
        let narrow = cpal::SupportedStreamConfigRange::new(
            1,
            cpal::SampleRate(8000),
            cpal::SampleRate(96000),
            cpal::SupportedBufferSize::Range { min: 64, max: 256 },
            cpal::SampleFormat::I16,
        );
        let negotiated = negotiate(requested, vec![narrow], default_config());

        assert_eq!(negotiated.config.buffer_size, cpal::BufferSize::Fixed(256));
        assert_eq!(negotiated.format.frames_per_buffer(), 256);
        assert_ne!(negotiated.format.buffer_duration, requested.buffer_duration);
    }

    #[test]
    fn first_callback_reports_measured_period() {
        let negotiated = AudioFormat::default();
        let period_ns = Arc::new(AtomicU64::new(negotiated.buffer_duration.as_nanos() as u64));
        let (tx, rx) = crossbeam_channel::bounded(EVENT_QUEUE_DEPTH);
        let mut watch = PeriodWatch::new(
            negotiated,
            Arc::clone(&period_ns),
            Some(tx),
            BackendEvent::OutputFormatChanged,
        );

        watch.observe(1024);
        watch.observe(512);

        let expected = AudioFormat {
            buffer_duration: negotiated.duration_of(1024),
            ..negotiated
        };
        assert_eq!(rx.try_recv().unwrap(), BackendEvent::OutputFormatChanged(expected));
        assert!(rx.try_recv().is_err());
        assert_eq!(
            period_ns.load(Ordering::Acquire),
            expected.buffer_duration.as_nanos() as u64
        );
    }

    #[test]
    fn matching_period_is_not_reported() {
        let negotiated = AudioFormat::default();
        let (tx, rx) = crossbeam_channel::bounded(EVENT_QUEUE_DEPTH);
        let mut watch = PeriodWatch::new(
            negotiated,
            Arc::new(AtomicU64::new(0)),
            Some(tx),
            BackendEvent::InputFormatChanged,
        );
        watch.observe(negotiated.frames_per_buffer());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn device_loss_is_queued_not_delivered_inline() {
        let (tx, rx) = crossbeam_channel::bounded(EVENT_QUEUE_DEPTH);
        let mut on_error = error_callback(Some(tx), BackendEvent::InputInterrupted);
        on_error(cpal::StreamError::DeviceNotAvailable);
        on_error(cpal::StreamError::BackendSpecific {
            err: cpal::BackendSpecificError {
                description: "glitch".into(),
            },
        });
        assert_eq!(rx.try_recv().unwrap(), BackendEvent::InputInterrupted);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unsupported_sample_formats_are_skipped() {
        let negotiated = negotiate(
            AudioFormat::default(),
            vec![range(1, 8000, 96000, cpal::SampleFormat::U8)],
            default_config(),
        );
        assert_eq!(negotiated.format.sample_rate_hz, 44100.0);
    }
}
