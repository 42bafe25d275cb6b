mod common;

use std::process::Command;

use serde_json::Value;
use tempfile::tempdir;

fn cli() -> Command {
    Command::new(env!("CARGO_BIN_EXE_mixplayer_cli"))
}

#[test]
fn devices_lists_stub_endpoints() {
    let output = cli()
        .args(["--stub", "devices"])
        .output()
        .expect("run devices command");
    assert!(
        output.status.success(),
        "devices exited with {:?}",
        output.status.code()
    );

    let stdout = String::from_utf8(output.stdout).expect("stdout utf8");
    let json: Value = serde_json::from_str(stdout.trim()).expect("device list JSON");
    let names: Vec<&str> = json["devices"]
        .as_array()
        .expect("devices array")
        .iter()
        .filter_map(|d| d["name"].as_str())
        .collect();
    assert!(names.contains(&"Stub Output"));
    assert!(names.contains(&"Stub Input"));
}

#[test]
fn render_writes_session_mix() {
    let dir = tempdir().unwrap();
    let tone = common::write_tone(dir.path(), "tone.wav", 1.5, 440.0, 0.3);
    let session = dir.path().join("session.json");
    std::fs::write(&session, common::session_json(&[("tone", &tone, 0.5)])).unwrap();
    let out = dir.path().join("mix.wav");

    let output = cli()
        .args([
            "--stub",
            "render",
            "--session",
            session.to_str().unwrap(),
            "--output",
            out.to_str().unwrap(),
        ])
        .output()
        .expect("run render command");
    assert!(
        output.status.success(),
        "render exited with {:?}: {}",
        output.status.code(),
        String::from_utf8_lossy(&output.stderr)
    );

    let reader = hound::WavReader::open(&out).expect("rendered file");
    assert_eq!(reader.duration(), 2 * common::RATE);
}

#[test]
fn play_prints_events_until_completed() {
    let dir = tempdir().unwrap();
    let tone = common::write_tone(dir.path(), "tone.wav", 1.0, 440.0, 0.3);
    let session = dir.path().join("session.json");
    std::fs::write(&session, common::session_json(&[("tone", &tone, 0.0)])).unwrap();

    let output = cli()
        .args([
            "--stub",
            "--stub-speed",
            "20",
            "play",
            "--session",
            session.to_str().unwrap(),
        ])
        .output()
        .expect("run play command");
    assert!(
        output.status.success(),
        "play exited with {:?}",
        output.status.code()
    );

    let stdout = String::from_utf8(output.stdout).expect("stdout utf8");
    let last: Value = serde_json::from_str(stdout.lines().last().expect("event lines"))
        .expect("event JSON");
    assert_eq!(last["type"], "state");
    assert_eq!(last["value"], "COMPLETED");
}

#[test]
fn missing_session_file_fails() {
    let output = cli()
        .args(["--stub", "play", "--session", "/nonexistent/session.json"])
        .output()
        .expect("run play command");
    assert_eq!(output.status.code(), Some(1));
}
