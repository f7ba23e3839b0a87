//! Loopback demo: runs a media engine on a host-supplied audio device.
//!
//! Without `--hardware` the device is a virtual clock driven from this
//! thread: each cycle pushes a far-end tone into playout and feeds the
//! resulting output back as a quiet echo plus a near-end tone. With
//! `--hardware` (and the `hardware` feature) the cpal backend drives real
//! endpoints for the configured duration.

use std::f64::consts::PI;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use audio_device_core::{
    make_factory, AudioCallbackStats, AudioDevice, AudioFormat, AudioSessionInfo, DeviceConfiguration,
    EngineAudioConfig, FactoryBuilder, HostAudioDevice, PeerConnectionFactory, SessionMode,
    VirtualBackend, VirtualBackendOptions,
};
use audio_device_core::factory::peer_connection::FactoryInfo;
use audio_device_core::processing::sample_convert;

#[derive(Parser, Debug)]
#[command(name = "audio-device-demo", about = "Run a media engine on a host-supplied audio device")]
struct Args {
    /// JSON file with `device`, `engine` and demo settings.
    config: Option<PathBuf>,

    /// Use the cpal hardware backend instead of the virtual clock.
    #[arg(long)]
    hardware: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct DemoConfig {
    device: DeviceConfiguration,
    engine: EngineAudioConfig,
    cycles: u32,
    far_end_tone_hz: f64,
    near_end_tone_hz: f64,
    /// Linear gain applied to the output before it is fed back as input.
    echo_gain: f32,
    hardware_seconds: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfiguration::default(),
            engine: EngineAudioConfig::default(),
            cycles: 100,
            far_end_tone_hz: 440.0,
            near_end_tone_hz: 660.0,
            echo_gain: 0.25,
            hardware_seconds: 5,
        }
    }
}

#[derive(Debug, Serialize)]
struct DemoReport {
    factory: FactoryInfo,
    session: AudioSessionInfo,
    output_format: AudioFormat,
    input_format: AudioFormat,
    cycles: u32,
    recorded_samples: usize,
    echo_reference_rms: f32,
    last_input_level: f32,
    stats: AudioCallbackStats,
}

struct ToneGenerator {
    phase: f64,
    step: f64,
    amplitude: f64,
}

impl ToneGenerator {
    fn new(frequency_hz: f64, sample_rate_hz: f64, amplitude: f64) -> Self {
        Self {
            phase: 0.0,
            step: 2.0 * PI * frequency_hz / sample_rate_hz,
            amplitude,
        }
    }

    /// Next `frames` frames, duplicated across `channels`.
    fn next_block(&mut self, frames: usize, channels: u16) -> Vec<i16> {
        let mut samples = Vec::with_capacity(frames * channels as usize);
        for _ in 0..frames {
            let value = (self.phase.sin() * self.amplitude * i16::MAX as f64) as i16;
            self.phase = (self.phase + self.step) % (2.0 * PI);
            samples.extend(std::iter::repeat(value).take(channels as usize));
        }
        samples
    }
}

fn load_config(path: Option<PathBuf>) -> Result<DemoConfig, String> {
    let Some(path) = path else {
        return Ok(DemoConfig::default());
    };
    let json = std::fs::read_to_string(&path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    let config: DemoConfig =
        serde_json::from_str(&json).map_err(|e| format!("invalid config {}: {}", path.display(), e))?;
    config.device.validate()?;
    config.engine.validate()?;
    Ok(config)
}

fn build_factory(device: Arc<dyn AudioDevice>, engine: EngineAudioConfig) -> Result<PeerConnectionFactory, String> {
    Ok(FactoryBuilder::new()
        .audio_device(device)
        .engine_config(engine)
        .map_err(|e| e.to_string())?
        .build())
}

fn run_virtual(config: &DemoConfig) -> Result<DemoReport, String> {
    let (backend, hardware) = VirtualBackend::new(VirtualBackendOptions::default());
    let device = HostAudioDevice::new(backend, config.device.clone());
    log::info!("virtual devices: {:?}", device.available_devices());

    let factory = build_factory(device.clone(), config.engine.clone())?;
    let mut session = factory
        .create_audio_session(SessionMode::SendReceive)
        .map_err(|e| e.to_string())?;
    session.start().map_err(|e| e.to_string())?;
    let module = factory.audio_module().map_err(|e| e.to_string())?;

    let output_format = device.output_format();
    let input_format = device.input_format();
    let frames = output_format.frames_per_buffer();
    let mut far_end = ToneGenerator::new(config.far_end_tone_hz, output_format.sample_rate_hz, 0.5);
    let mut near_end = ToneGenerator::new(config.near_end_tone_hz, input_format.sample_rate_hz, 0.2);

    let mut echo = vec![0i16; frames * input_format.channel_count as usize];
    let mut recorded_samples = 0;
    for cycle in 0..config.cycles {
        module.push_playout_samples(&far_end.next_block(frames, output_format.channel_count));

        let mut mic = near_end.next_block(frames, input_format.channel_count);
        for (sample, echoed) in mic.iter_mut().zip(&echo) {
            let mixed = *sample as f32 + *echoed as f32 * config.echo_gain;
            *sample = mixed.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        }

        let slice = hardware
            .run_duplex(&mic)
            .ok_or_else(|| format!("duplex stream stopped at cycle {}", cycle))?;
        if let Err(e) = slice.result {
            log::warn!("cycle {}: {}", cycle, e);
        }
        if let Some(output) = slice.output {
            sample_convert::remap_channels(
                &output,
                output_format.channel_count as usize,
                &mut echo,
                input_format.channel_count as usize,
            );
        }
        recorded_samples += module.pull_recorded_samples(usize::MAX).len();
    }

    let report = DemoReport {
        factory: factory.info(),
        session: session.info(),
        output_format,
        input_format,
        cycles: config.cycles,
        recorded_samples,
        echo_reference_rms: sample_convert::rms_level(&module.last_echo_reference()),
        last_input_level: module.input_level(),
        stats: module.stats(),
    };
    session.stop().map_err(|e| e.to_string())?;
    Ok(report)
}

#[cfg(feature = "hardware")]
fn run_hardware(config: &DemoConfig) -> Result<DemoReport, String> {
    use audio_device_cpal::CpalBackend;

    let device = HostAudioDevice::new(CpalBackend::new(), config.device.clone());
    for info in device.available_devices() {
        log::info!("endpoint: {} (in: {}, out: {})", info.name, info.has_input, info.has_output);
    }

    let factory = build_factory(device.clone(), config.engine.clone())?;
    let mut session = factory
        .create_audio_session(SessionMode::SendReceive)
        .map_err(|e| e.to_string())?;
    session.start().map_err(|e| e.to_string())?;
    let module = factory.audio_module().map_err(|e| e.to_string())?;

    let output_format = device.output_format();
    let frames = output_format.frames_per_buffer();
    let mut tone = ToneGenerator::new(config.far_end_tone_hz, output_format.sample_rate_hz, 0.2);
    let cycles = (config.hardware_seconds * 1000 / output_format.buffer_duration.as_millis().max(1) as u64) as u32;

    let mut recorded_samples = 0;
    for _ in 0..cycles {
        module.push_playout_samples(&tone.next_block(frames, output_format.channel_count));
        recorded_samples += module.pull_recorded_samples(usize::MAX).len();
        std::thread::sleep(output_format.buffer_duration);
    }

    let report = DemoReport {
        factory: factory.info(),
        session: session.info(),
        output_format,
        input_format: device.input_format(),
        cycles,
        recorded_samples,
        echo_reference_rms: sample_convert::rms_level(&module.last_echo_reference()),
        last_input_level: module.input_level(),
        stats: module.stats(),
    };
    session.stop().map_err(|e| e.to_string())?;
    Ok(report)
}

#[cfg(not(feature = "hardware"))]
fn run_hardware(_config: &DemoConfig) -> Result<DemoReport, String> {
    Err("built without the `hardware` feature".into())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let config = match load_config(args.config) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    // A factory without a device runs on platform audio; the demo only logs it.
    let platform = make_factory(None);
    log::info!("platform factory {} uses {:?}", platform.id(), platform.audio_layer());

    let result = if args.hardware {
        run_hardware(&config)
    } else {
        run_virtual(&config)
    };
    match result.and_then(|report| serde_json::to_string_pretty(&report).map_err(|e| e.to_string())) {
        Ok(json) => {
            println!("{}", json);
            // Let the engine worker settle before the process exits.
            std::thread::sleep(Duration::from_millis(10));
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("demo failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
