use std::sync::Arc;
use std::time::Duration;

use audio_device_core::{
    make_factory, AudioDevice, AudioFormat, DeviceConfiguration, HostAudioDevice, RenderActionFlags,
    SessionMode, VirtualBackend, VirtualBackendOptions, VirtualHardware,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn stereo_device() -> (Arc<HostAudioDevice<VirtualBackend>>, VirtualHardware) {
    let (backend, hardware) = VirtualBackend::new(VirtualBackendOptions::default());
    let config = DeviceConfiguration {
        input_channels: 2,
        output_channels: 2,
        ..Default::default()
    };
    (HostAudioDevice::new(backend, config), hardware)
}

fn stereo_ramp(frames: usize, offset: i16) -> Vec<i16> {
    (0..frames)
        .flat_map(|f| {
            let v = offset.wrapping_add(f as i16);
            [v, v.wrapping_neg()]
        })
        .collect()
}

#[test]
fn stereo_duplex_call_end_to_end() {
    init_logging();
    let (device, hardware) = stereo_device();
    let factory = make_factory(Some(device.clone()));
    let mut session = factory.create_audio_session(SessionMode::SendReceive).unwrap();
    session.start().unwrap();
    let module = factory.audio_module().unwrap();

    let format = device.output_format();
    assert_eq!(format, AudioFormat::new(48000.0, Duration::from_millis(10), 2));
    let frames = format.frames_per_buffer();
    assert_eq!(frames, 480);

    for cycle in 0..5i16 {
        let far_end = stereo_ramp(frames, cycle * 1000);
        module.push_playout_samples(&far_end);

        let mic = stereo_ramp(frames, cycle * 100 + 7);
        let slice = hardware.run_duplex(&mic).unwrap();
        assert!(slice.result.is_ok());

        assert_eq!(slice.output.unwrap(), far_end);
        assert_eq!(module.last_echo_reference(), far_end);
        assert_eq!(module.pull_recorded_samples(frames * 2), mic);
    }

    let stats = module.stats();
    assert_eq!(stats.record_callbacks, 5);
    assert_eq!(stats.duplex_renders, 5);
    assert_eq!(stats.playout_callbacks, 5);
    assert_eq!(stats.playout_underruns, 0);
    assert_eq!(stats.recorded_frames, 5 * frames as u64);
}

#[test]
fn duplex_underrun_keeps_recording() {
    init_logging();
    let (device, hardware) = stereo_device();
    let factory = make_factory(Some(device));
    let mut session = factory.create_audio_session(SessionMode::SendReceive).unwrap();
    session.start().unwrap();
    let module = factory.audio_module().unwrap();

    let mic = stereo_ramp(480, 1);
    let slice = hardware.run_duplex(&mic).unwrap();

    assert!(slice.flags.contains(RenderActionFlags::OUTPUT_IS_SILENCE));
    let output = slice.output.unwrap();
    assert!(output.iter().all(|&s| s == 0));
    assert_eq!(module.pull_recorded_samples(960), mic);
    assert_eq!(module.stats().playout_underruns, 1);

    // Once playout data arrives the silence flag clears again.
    let far_end = stereo_ramp(480, 9);
    module.push_playout_samples(&far_end);
    let slice = hardware.run_duplex(&mic).unwrap();
    assert!(!slice.flags.contains(RenderActionFlags::OUTPUT_IS_SILENCE));
    assert_eq!(slice.output.unwrap(), far_end);
}

#[test]
fn receive_only_session_renders_without_capture() {
    init_logging();
    let (device, hardware) = stereo_device();
    let factory = make_factory(Some(device.clone()));
    let mut session = factory.create_audio_session(SessionMode::ReceiveOnly).unwrap();
    session.start().unwrap();
    let module = factory.audio_module().unwrap();

    assert!(device.is_playing());
    assert!(!device.is_recording());
    assert!(hardware.capture_input(&[0; 960]).is_none());

    module.push_playout_samples(&stereo_ramp(480, 5));
    let slice = hardware.render_output(480).unwrap();
    assert_eq!(slice.channels, 2);
    assert_eq!(slice.samples, stereo_ramp(480, 5));
    assert!(!slice.flags.contains(RenderActionFlags::OUTPUT_IS_SILENCE));
}

#[test]
fn input_interruption_is_survivable() {
    init_logging();
    let (device, hardware) = stereo_device();
    let factory = make_factory(Some(device.clone()));
    let mut session = factory.create_audio_session(SessionMode::SendOnly).unwrap();
    session.start().unwrap();
    let module = factory.audio_module().unwrap();

    hardware.interrupt_input();
    module.flush();
    assert!(module.is_input_interrupted());
    assert!(!device.is_recording());
    assert!(hardware.capture_input(&[1; 960]).is_none());

    // The host restarts capture once the hardware is back.
    assert!(module.start_recording());
    assert!(!module.is_input_interrupted());
    hardware.capture_input(&[1; 960]).unwrap();
    assert_eq!(module.pull_recorded_samples(960), vec![1; 960]);

    session.stop().unwrap();
    assert!(!device.is_recording());
}

#[test]
fn hardware_rate_mismatch_is_visible_to_engine() {
    init_logging();
    let (backend, hardware) = VirtualBackend::new(VirtualBackendOptions {
        hardware_sample_rate: Some(44100.0),
        ..Default::default()
    });
    let device = HostAudioDevice::new(backend, DeviceConfiguration::default());
    let factory = make_factory(Some(device.clone()));
    let mut session = factory.create_audio_session(SessionMode::ReceiveOnly).unwrap();
    session.start().unwrap();

    assert_eq!(device.device_output_sample_rate(), 44100.0);
    assert_eq!(device.output_format().frames_per_buffer(), 441);
    assert_eq!(hardware.output_format().map(|f| f.sample_rate_hz), Some(44100.0));
}
