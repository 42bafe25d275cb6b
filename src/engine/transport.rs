//! Transport: playback state machine and the position shared with the
//! audio thread.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::PlayerError;
use crate::mixer::{frames_to_secs, SnapshotCell};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum PlayerState {
    Idle = 0,
    Ready = 1,
    Playing = 2,
    Paused = 3,
    Stopped = 4,
    Completed = 5,
    Error = 6,
}

impl PlayerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerState::Idle => "IDLE",
            PlayerState::Ready => "READY",
            PlayerState::Playing => "PLAYING",
            PlayerState::Paused => "PAUSED",
            PlayerState::Stopped => "STOPPED",
            PlayerState::Completed => "COMPLETED",
            PlayerState::Error => "ERROR",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => PlayerState::Ready,
            2 => PlayerState::Playing,
            3 => PlayerState::Paused,
            4 => PlayerState::Stopped,
            5 => PlayerState::Completed,
            6 => PlayerState::Error,
            _ => PlayerState::Idle,
        }
    }

    /// A session is loaded and playable.
    pub fn has_session(&self) -> bool {
        !matches!(self, PlayerState::Idle | PlayerState::Error)
    }
}

impl std::fmt::Display for PlayerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportAction {
    Play,
    Pause,
    Stop,
    TogglePlayPause,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Already there, or not applicable; no event
    Ignore,
    Move(PlayerState),
    Reject(PlayerError),
}

/// Pure transition table for user-driven actions.
pub fn transition(current: PlayerState, action: TransportAction) -> Transition {
    use PlayerState::*;
    match action {
        TransportAction::TogglePlayPause => {
            if current == Playing {
                transition(current, TransportAction::Pause)
            } else {
                transition(current, TransportAction::Play)
            }
        }
        TransportAction::Play => match current {
            Playing => Transition::Ignore,
            Ready | Paused | Stopped | Completed => Transition::Move(Playing),
            Idle | Error => Transition::Reject(PlayerError::NoSession {
                operation: "play".to_string(),
            }),
        },
        TransportAction::Pause => match current {
            Playing => Transition::Move(Paused),
            _ => Transition::Ignore,
        },
        TransportAction::Stop => match current {
            Idle | Stopped => Transition::Ignore,
            _ => Transition::Move(Stopped),
        },
    }
}

/// State shared between the control worker, the façade and the audio thread.
pub struct TransportShared {
    pub snapshot: SnapshotCell,
    position: AtomicU64,
    playing: AtomicBool,
    state: AtomicU8,
    clipped: AtomicU64,
    output_rate: AtomicU32,
    buffer_frames: AtomicU32,
    output_latency_us: AtomicU32,
}

impl TransportShared {
    pub fn new() -> Self {
        Self {
            snapshot: SnapshotCell::new(),
            position: AtomicU64::new(0),
            playing: AtomicBool::new(false),
            state: AtomicU8::new(PlayerState::Idle as u8),
            clipped: AtomicU64::new(0),
            output_rate: AtomicU32::new(0),
            buffer_frames: AtomicU32::new(0),
            output_latency_us: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    pub fn set_position(&self, frames: u64) {
        self.position.store(frames, Ordering::Release);
    }

    /// Audio side: move the position forward unless a seek replaced it.
    #[inline]
    pub fn advance_position(&self, from: u64, to: u64) -> bool {
        self.position
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Release);
    }

    pub fn state(&self) -> PlayerState {
        PlayerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: PlayerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    #[inline]
    pub fn add_clipped(&self, count: u64) {
        if count > 0 {
            self.clipped.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn clipped(&self) -> u64 {
        self.clipped.load(Ordering::Relaxed)
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate.load(Ordering::Acquire)
    }

    pub(crate) fn set_output_rate(&self, rate: u32) {
        self.output_rate.store(rate, Ordering::Release);
    }

    #[inline]
    pub fn note_callback(&self, frames: usize) {
        self.buffer_frames.store(frames as u32, Ordering::Relaxed);
    }

    #[inline]
    pub fn note_latency_us(&self, micros: u32) {
        self.output_latency_us.store(micros, Ordering::Relaxed);
    }

    pub fn buffer_frames(&self) -> u32 {
        self.buffer_frames.load(Ordering::Relaxed)
    }

    pub fn output_latency_us(&self) -> u32 {
        self.output_latency_us.load(Ordering::Relaxed)
    }

    pub fn duration_secs(&self) -> f64 {
        self.snapshot.current().duration_secs()
    }

    pub fn position_secs(&self) -> f64 {
        let snapshot = self.snapshot.current();
        frames_to_secs(self.position().min(snapshot.total_frames), snapshot.sample_rate)
    }

    /// Position as a fraction of the total length, in [0, 1].
    pub fn progress(&self) -> f64 {
        let snapshot = self.snapshot.current();
        if snapshot.total_frames == 0 {
            return 0.0;
        }
        (self.position() as f64 / snapshot.total_frames as f64).clamp(0.0, 1.0)
    }

    /// Jump to `fraction` of the total length, clamped to [0, 1].
    ///
    /// Takes effect at the next audio callback; play/pause state is kept.
    pub fn seek_fraction(&self, fraction: f64) -> Result<u64, PlayerError> {
        let snapshot = self.snapshot.current();
        if !self.state().has_session() || !snapshot.is_loaded() {
            return Err(PlayerError::NoSession {
                operation: "seek".to_string(),
            });
        }
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        let frames = (fraction * snapshot.total_frames as f64).round() as u64;
        self.position.store(frames.min(snapshot.total_frames), Ordering::Release);
        snapshot.reset_holds();
        Ok(frames)
    }
}

impl Default for TransportShared {
    fn default() -> Self {
        Self::new()
    }
}
