//! Track scheduling, the mix bus and the snapshot handed to the audio thread.

pub mod bus;
pub mod snapshot;
pub mod track;

pub use bus::{mix_block, HoldMode};
pub use snapshot::{MixSnapshot, SnapshotCell, TrackPatch};
pub use track::{ScheduledTrack, TrackRuntime};

/// Seconds to whole frames at `rate`.
#[inline]
pub fn secs_to_frames(secs: f64, rate: u32) -> u64 {
    (secs.max(0.0) * rate as f64).round() as u64
}

#[inline]
pub fn frames_to_secs(frames: u64, rate: u32) -> f64 {
    if rate == 0 {
        0.0
    } else {
        frames as f64 / rate as f64
    }
}
