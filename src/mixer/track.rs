//! One scheduled source on the output timeline.
//!
//! All scheduling is in output frames. A track sounds from `offset + hold`
//! where `hold` is how long it has been disabled while it would have been
//! sounding; this keeps a disabled track's source position frozen so that
//! re-enabling resumes where it stopped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::decoder::DecodedSource;
use crate::model::MixerTrack;

use super::secs_to_frames;

/// Per-track state mutated by the audio thread.
///
/// Shared between snapshots of the same session so targeted patches keep it.
#[derive(Debug, Default)]
pub struct TrackRuntime {
    hold: AtomicU64,
}

impl TrackRuntime {
    #[inline]
    pub fn hold(&self) -> u64 {
        self.hold.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.hold.store(0, Ordering::Release);
    }
}

#[derive(Debug, Clone)]
pub struct ScheduledTrack {
    pub id: String,
    /// `None` when decoding failed; the track is then silent
    pub source: Option<Arc<DecodedSource>>,
    pub offset: u64,
    pub play_frames: Option<u64>,
    pub repeat_frames: Option<u64>,
    pub gain: f32,
    pub enabled: bool,
    pub runtime: Arc<TrackRuntime>,
}

impl ScheduledTrack {
    pub fn new(track: &MixerTrack, source: Option<Arc<DecodedSource>>, rate: u32) -> Self {
        Self {
            id: track.id.clone(),
            source,
            offset: secs_to_frames(track.offset, rate),
            play_frames: track.play_length().map(|d| secs_to_frames(d, rate)),
            repeat_frames: if track.repeat {
                Some(secs_to_frames(track.repeat_interval, rate).max(1))
            } else {
                None
            },
            gain: track.volume,
            enabled: track.enabled,
            runtime: Arc::new(TrackRuntime::default()),
        }
    }

    fn source_frames(&self) -> u64 {
        self.source.as_ref().map_or(0, |s| s.frames() as u64)
    }

    /// Frames of source audio one pass (or one repetition) plays.
    pub fn segment_frames(&self) -> u64 {
        let mut len = self.source_frames();
        if let Some(play) = self.play_frames {
            len = len.min(play);
        }
        if let Some(interval) = self.repeat_frames {
            len = len.min(interval);
        }
        len
    }

    /// Output-timeline end used for the derived session length, ignoring
    /// any hold; `None` when the track has nothing to play.
    ///
    /// A one-shot track ends after its single pass. A repeating track keeps
    /// retriggering across its play length, or the whole decoded source when
    /// no length is set.
    pub fn natural_end(&self) -> Option<u64> {
        self.source.as_ref()?;
        let span = match self.repeat_frames {
            Some(_) => self
                .play_frames
                .unwrap_or_else(|| self.source_frames())
                .max(self.segment_frames()),
            None => self.segment_frames(),
        };
        Some(self.offset + span)
    }

    /// Source frame audible at output frame `t`, given the current hold.
    #[inline]
    pub fn source_index(&self, t: u64, hold: u64, segment: u64) -> Option<usize> {
        let start = self.offset + hold;
        if t < start || segment == 0 {
            return None;
        }
        let local = t - start;
        let pos = match self.repeat_frames {
            Some(interval) => local % interval,
            None => local,
        };
        (pos < segment).then_some(pos as usize)
    }

    /// Output frames of the last (or only) trigger point at or before `t`.
    pub fn trigger_at(&self, t: u64) -> Option<u64> {
        let start = self.offset + self.runtime.hold();
        if t < start {
            return None;
        }
        match self.repeat_frames {
            Some(interval) => Some(start + (t - start) / interval * interval),
            None => Some(start),
        }
    }

    /// Extend the hold across `[t0, t1)` for a disabled track.
    ///
    /// Holding only happens while the track would be sounding: before its
    /// start nothing moves, and a finished one-shot track stays finished.
    ///
    /// Compare-and-swap so a concurrent `reset` from a seek is never
    /// overwritten with a stale value.
    #[inline]
    pub fn advance_hold(&self, t0: u64, t1: u64) {
        let segment = self.segment_frames();
        let _ = self
            .runtime
            .hold
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |hold| {
                let start = self.offset + hold;
                if t1 <= start {
                    return None;
                }
                let from = t0.max(start);
                if self.repeat_frames.is_none() && from - start >= segment {
                    return None;
                }
                Some(hold + (t1 - from))
            });
    }
}
