//! Shared helpers for the integration tests: fixture WAVs, a fast virtual
//! device backend and an event recorder.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mixplayer::engine::{StubBackend, StubConfig};
use mixplayer::{MixPlayer, MixerSettings, PlayerEvent, PlayerOptions, PlayerState};

pub const RATE: u32 = 48_000;

/// Write a mono 16-bit sine of `secs` seconds at 48 kHz.
pub fn write_tone(dir: &Path, name: &str, secs: f64, freq: f32, amplitude: f32) -> PathBuf {
    write_wav(dir, name, secs, |t| {
        amplitude * (2.0 * std::f32::consts::PI * freq * t).sin()
    })
}

/// Write a mono 16-bit constant signal, handy for checking mixed levels.
pub fn write_dc(dir: &Path, name: &str, secs: f64, level: f32) -> PathBuf {
    write_wav(dir, name, secs, |_| level)
}

/// Write a mono 16-bit ramp rising from 0.05 to 0.95 over `secs`, so a
/// sample value identifies its source position.
pub fn write_ramp(dir: &Path, name: &str, secs: f64) -> PathBuf {
    write_wav(dir, name, secs, |t| ramp_level(t as f64, secs) as f32)
}

/// Level of a `write_ramp` fixture at `t` seconds.
pub fn ramp_level(t: f64, secs: f64) -> f64 {
    0.05 + 0.9 * t / secs
}

fn write_wav(dir: &Path, name: &str, secs: f64, signal: impl Fn(f32) -> f32) -> PathBuf {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).expect("create fixture wav");
    let frames = (secs * RATE as f64).round() as usize;
    for i in 0..frames {
        let t = i as f32 / RATE as f32;
        let sample = (signal(t).clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer.write_sample(sample).expect("write fixture sample");
    }
    writer.finalize().expect("finalize fixture wav");
    path
}

/// Session JSON with one entry per `(id, path, offset)`.
pub fn session_json(tracks: &[(&str, &Path, f64)]) -> String {
    let tracks: Vec<serde_json::Value> = tracks
        .iter()
        .map(|(id, path, offset)| {
            serde_json::json!({
                "id_": id,
                "path": path.to_string_lossy(),
                "offset": offset,
            })
        })
        .collect();
    serde_json::json!({ "tracks": tracks }).to_string()
}

/// Events delivered by a player, in order.
pub struct EventLog {
    rx: mpsc::Receiver<PlayerEvent>,
}

impl EventLog {
    pub fn attach(player: &MixPlayer) -> Self {
        let (tx, rx) = mpsc::channel();
        player.add_listener(
            None,
            Arc::new(move |event: &PlayerEvent| {
                let _ = tx.send(event.clone());
            }),
        );
        Self { rx }
    }

    /// Next event matching `pred`, skipping the rest; panics on timeout.
    pub fn wait_for(&self, timeout: Duration, mut pred: impl FnMut(&PlayerEvent) -> bool) -> PlayerEvent {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(_) => panic!("timed out waiting for event"),
            }
        }
    }

    pub fn wait_state(&self, state: PlayerState, timeout: Duration) {
        self.wait_for(timeout, |e| *e == PlayerEvent::State(state));
    }

    /// Everything delivered within `window`.
    pub fn collect(&self, window: Duration) -> Vec<PlayerEvent> {
        let deadline = Instant::now() + window;
        let mut events = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return events;
            }
            if let Ok(event) = self.rx.recv_timeout(remaining) {
                events.push(event);
            }
        }
    }

    pub fn states(events: &[PlayerEvent]) -> Vec<PlayerState> {
        events
            .iter()
            .filter_map(|e| match e {
                PlayerEvent::State(s) => Some(*s),
                _ => None,
            })
            .collect()
    }
}

pub fn stub_backend(speed: f64) -> Arc<StubBackend> {
    Arc::new(StubBackend::new(StubConfig {
        speed,
        ..StubConfig::default()
    }))
}

/// Player on a stub backend running `speed` times real time.
pub fn stub_player(
    speed: f64,
    settings: MixerSettings,
    record: bool,
) -> (MixPlayer, Arc<StubBackend>, EventLog) {
    let backend = stub_backend(speed);
    let options = PlayerOptions::new(record, true)
        .with_settings(settings)
        .with_backend(backend.clone());
    let player = MixPlayer::new(options).expect("player starts");
    let events = EventLog::attach(&player);
    (player, backend, events)
}

/// Set a session and wait for READY.
pub fn load(player: &MixPlayer, events: &EventLog, json: &str) {
    player.set_session_json(json).expect("session accepted");
    events.wait_state(PlayerState::Ready, Duration::from_secs(10));
}

pub fn assert_close(actual: f64, expected: f64, tolerance: f64) {
    assert!(
        approx::abs_diff_eq!(actual, expected, epsilon = tolerance),
        "expected {expected} ± {tolerance}, got {actual}"
    );
}
