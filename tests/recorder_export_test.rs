//! Recorder, export and device-selection tests on the virtual backend.

mod common;

use std::time::Duration;

use common::{
    assert_close, load, ramp_level, session_json, stub_player, write_dc, write_ramp, write_tone,
    RATE,
};
use mixplayer::error::{PlayerErrorCodes, RecorderErrorCodes};
use mixplayer::{
    DeviceDirection, ErrorCode, MixerDevice, MixerSettings, PlayerEvent, PlayerState,
    RecorderState,
};
use tempfile::tempdir;

const WAIT: Duration = Duration::from_secs(10);

fn read_wav(path: &std::path::Path) -> (hound::WavSpec, Vec<i16>) {
    let mut reader = hound::WavReader::open(path).expect("open rendered wav");
    let spec = reader.spec();
    let samples = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    (spec, samples)
}

#[test]
fn test_export_renders_whole_session() {
    let dir = tempdir().unwrap();
    let a = write_tone(dir.path(), "a.wav", 2.0, 440.0, 0.3);
    let b = write_tone(dir.path(), "b.wav", 1.0, 660.0, 0.3);
    let (player, _backend, events) = stub_player(1.0, MixerSettings::default(), false);
    load(&player, &events, &session_json(&[("a", &a, 0.0), ("b", &b, 2.0)]));

    let out = dir.path().join("mix.wav");
    player.export(Some(out.as_path())).unwrap();
    let event = events.wait_for(WAIT, |e| matches!(e, PlayerEvent::Export { .. }));
    assert!(matches!(event, PlayerEvent::Export { error: None, .. }));

    let (spec, samples) = read_wav(&out);
    assert_eq!(spec.sample_rate, RATE);
    assert_eq!(spec.channels, 2);
    assert_eq!(samples.len(), 3 * RATE as usize * 2);
    assert_eq!(player.state(), PlayerState::Ready, "export leaves the transport alone");
}

#[test]
fn test_export_repeat_retriggers_every_interval() {
    let dir = tempdir().unwrap();
    let blip = write_dc(dir.path(), "blip.wav", 0.25, 0.5);
    let json = serde_json::json!({
        "tracks": [{
            "id_": "blip",
            "path": blip.to_string_lossy(),
            "repeat": true,
            "repeatInterval": 1.0,
        }],
        "outputDuration": 3.0,
    })
    .to_string();
    let (player, _backend, events) = stub_player(1.0, MixerSettings::default(), false);
    load(&player, &events, &json);

    let out = dir.path().join("repeat.wav");
    player.export(Some(out.as_path())).unwrap();
    events.wait_for(WAIT, |e| matches!(e, PlayerEvent::Export { error: None, .. }));

    let (_, samples) = read_wav(&out);
    let at = |secs: f64| samples[(secs * RATE as f64) as usize * 2].abs();
    for sounding in [0.1, 1.1, 2.1] {
        assert!(at(sounding) > 1000, "blip at {sounding}s");
    }
    for silent in [0.5, 1.5, 2.5] {
        assert_eq!(at(silent), 0, "gap at {silent}s");
    }
}

#[test]
fn test_repeat_without_output_duration_spans_source() {
    let dir = tempdir().unwrap();
    let ramp = write_ramp(dir.path(), "ramp.wav", 10.0);
    let json = serde_json::json!({
        "tracks": [{
            "id_": "ramp",
            "path": ramp.to_string_lossy(),
            "repeat": true,
            "repeatInterval": 2.0,
        }],
    })
    .to_string();
    let (player, _backend, events) = stub_player(1.0, MixerSettings::default(), false);
    load(&player, &events, &json);
    assert_close(player.duration(), 10.0, 1e-3);

    let out = dir.path().join("repeat.wav");
    player.export(Some(out.as_path())).unwrap();
    events.wait_for(WAIT, |e| matches!(e, PlayerEvent::Export { error: None, .. }));

    let (_, samples) = read_wav(&out);
    assert_eq!(samples.len(), 10 * RATE as usize * 2);
    let at = |secs: f64| samples[(secs * RATE as f64) as usize * 2] as f64 / i16::MAX as f64;
    for start in [0.0, 2.0, 4.0, 6.0, 8.0] {
        assert_close(at(start + 0.1), ramp_level(0.1, 10.0), 2e-3);
        assert_close(at(start + 1.9), ramp_level(1.9, 10.0), 2e-3);
    }
}

#[test]
fn test_export_rejected_while_playing() {
    let dir = tempdir().unwrap();
    let a = write_tone(dir.path(), "a.wav", 10.0, 440.0, 0.3);
    let (player, _backend, events) = stub_player(1.0, MixerSettings::default(), false);
    load(&player, &events, &session_json(&[("a", &a, 0.0)]));
    player.play().unwrap();
    events.wait_state(PlayerState::Playing, WAIT);

    let out = dir.path().join("busy.wav");
    player.export(Some(out.as_path())).unwrap();
    let event = events.wait_for(WAIT, |e| matches!(e, PlayerEvent::Export { .. }));
    assert!(matches!(event, PlayerEvent::Export { error: Some(_), .. }));
    assert!(!out.exists());
}

#[test]
fn test_export_without_session_reports_no_session() {
    let dir = tempdir().unwrap();
    let (player, _backend, events) = stub_player(1.0, MixerSettings::default(), false);

    player.export(Some(dir.path().join("none.wav").as_path())).unwrap();
    let event = events.wait_for(WAIT, |e| matches!(e, PlayerEvent::Error { .. }));
    assert!(matches!(
        event,
        PlayerEvent::Error { code, .. } if code == PlayerErrorCodes::NO_SESSION
    ));
}

#[test]
fn test_unwritable_recorder_path_enters_error() {
    let dir = tempdir().unwrap();
    let (player, _backend, events) = stub_player(1.0, MixerSettings::default(), true);
    let path = dir.path().join("missing-dir").join("take.wav");

    let err = player.prepare_recorder(&path).unwrap_err();
    assert_eq!(err.code(), RecorderErrorCodes::IO);
    assert_eq!(player.recorder_state(), RecorderState::Error);
    events.wait_for(WAIT, |e| *e == PlayerEvent::RecorderState(RecorderState::Error));

    let err = player.start_recorder().unwrap_err();
    assert_eq!(err.code(), RecorderErrorCodes::NOT_PREPARED);
    let later = events.collect(Duration::from_millis(200));
    assert!(!later.contains(&PlayerEvent::RecorderState(RecorderState::Recording)));
    assert!(!path.exists());
}

#[test]
fn test_recorder_requires_wav() {
    let dir = tempdir().unwrap();
    let (player, _backend, _events) = stub_player(1.0, MixerSettings::default(), true);
    let err = player.prepare_recorder(dir.path().join("take.mp3")).unwrap_err();
    assert_eq!(err.code(), RecorderErrorCodes::UNSUPPORTED_FORMAT);
}

#[test]
fn test_record_take_writes_samples() {
    let dir = tempdir().unwrap();
    let (player, _backend, events) = stub_player(4.0, MixerSettings::default(), true);
    let path = dir.path().join("take.wav");

    player.prepare_recorder(&path).unwrap();
    player.start_recorder().unwrap();
    events.wait_for(WAIT, |e| *e == PlayerEvent::RecorderState(RecorderState::Recording));
    events.wait_for(WAIT, |e| matches!(e, PlayerEvent::RecorderLevel(level) if *level > 0.0));
    player.stop_recorder().unwrap();
    events.wait_for(WAIT, |e| *e == PlayerEvent::RecorderState(RecorderState::Stopped));

    assert!(player.recorder_elapsed() > 0.0);
    let (spec, samples) = read_wav(&path);
    assert_eq!(spec.channels, 1);
    assert!(!samples.is_empty());
    assert!(samples.iter().any(|&s| s != 0), "stub input is a sine");
}

#[test]
fn test_prepare_while_recording_reports_error() {
    let dir = tempdir().unwrap();
    let (player, _backend, events) = stub_player(4.0, MixerSettings::default(), true);
    let path = dir.path().join("take.wav");

    player.prepare_recorder(&path).unwrap();
    player.start_recorder().unwrap();
    events.wait_for(WAIT, |e| *e == PlayerEvent::RecorderState(RecorderState::Recording));

    let err = player.prepare_recorder(dir.path().join("second.wav")).unwrap_err();
    assert_eq!(err.code(), RecorderErrorCodes::ALREADY_RECORDING);
    let event = events.wait_for(WAIT, |e| matches!(e, PlayerEvent::Error { .. }));
    assert!(matches!(
        event,
        PlayerEvent::Error { code, .. } if code == RecorderErrorCodes::ALREADY_RECORDING
    ));
    assert_eq!(player.recorder_state(), RecorderState::Recording);
    assert!(!dir.path().join("second.wav").exists());

    player.stop_recorder().unwrap();
    events.wait_for(WAIT, |e| *e == PlayerEvent::RecorderState(RecorderState::Stopped));
}

#[test]
fn test_record_disabled_instance() {
    let dir = tempdir().unwrap();
    let (player, _backend, events) = stub_player(1.0, MixerSettings::default(), false);
    let err = player.prepare_recorder(dir.path().join("take.wav")).unwrap_err();
    assert_eq!(err.code(), RecorderErrorCodes::RECORDING_DISABLED);
    let event = events.wait_for(WAIT, |e| matches!(e, PlayerEvent::Error { .. }));
    assert!(matches!(
        event,
        PlayerEvent::Error { code, .. } if code == RecorderErrorCodes::RECORDING_DISABLED
    ));
}

#[test]
fn test_select_device_publishes_list() {
    let (player, backend, events) = stub_player(1.0, MixerSettings::default(), false);
    backend.add_device(MixerDevice::output("Second Output"));
    player.refresh_devices().unwrap();
    events.wait_for(WAIT, |e| match e {
        PlayerEvent::DeviceList(list) => list.contains(DeviceDirection::Output, "Second Output"),
        _ => false,
    });

    player
        .select_device(DeviceDirection::Output, "Second Output")
        .unwrap();
    let event = events.wait_for(WAIT, |e| match e {
        PlayerEvent::DeviceList(list) => {
            list.selected_name(DeviceDirection::Output) == Some("Second Output")
        }
        _ => false,
    });
    assert!(matches!(event, PlayerEvent::DeviceList(_)));
    assert_eq!(
        player.devices().selected_name(DeviceDirection::Output),
        Some("Second Output")
    );

    let err = player
        .select_device(DeviceDirection::Output, "Nowhere")
        .unwrap_err();
    assert_eq!(err.code(), PlayerErrorCodes::DEVICE_SELECTION_INVALID);
}
