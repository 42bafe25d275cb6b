//! Immutable mix configuration shared with the audio thread.
//!
//! The control side builds a complete [`MixSnapshot`] and publishes it with a
//! single pointer swap. Replaced snapshots are parked in a retire list and
//! only dropped on the control side once the audio thread has rendered with
//! a newer generation, so no deallocation ever happens inside a callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::{ArcSwap, Guard};
use serde::{Deserialize, Serialize};

use super::track::ScheduledTrack;
use super::{frames_to_secs, secs_to_frames};

/// Targeted update of a single track, applied without reloading sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackPatch {
    pub id: String,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub volume: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct MixSnapshot {
    pub generation: u64,
    /// Load that produced the tracks; unchanged by patches
    pub session: u64,
    pub sample_rate: u32,
    pub total_frames: u64,
    pub tracks: Vec<ScheduledTrack>,
}

impl MixSnapshot {
    pub fn empty() -> Self {
        Self {
            generation: 0,
            session: 0,
            sample_rate: 0,
            total_frames: 0,
            tracks: Vec::new(),
        }
    }

    /// Build a snapshot; total length is `fixed_secs` when given, otherwise
    /// the latest natural end over the enabled, decoded tracks.
    ///
    /// The length is fixed here; later patches do not change it.
    pub fn from_tracks(
        generation: u64,
        sample_rate: u32,
        fixed_secs: Option<f64>,
        tracks: Vec<ScheduledTrack>,
    ) -> Self {
        let total_frames = match fixed_secs {
            Some(secs) => secs_to_frames(secs, sample_rate),
            None => tracks
                .iter()
                .filter(|t| t.enabled)
                .filter_map(|t| t.natural_end())
                .max()
                .unwrap_or(0),
        };
        Self {
            generation,
            session: 0,
            sample_rate,
            total_frames,
            tracks,
        }
    }

    pub fn with_session(mut self, session: u64) -> Self {
        self.session = session;
        self
    }

    pub fn is_loaded(&self) -> bool {
        self.sample_rate > 0 && !self.tracks.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        frames_to_secs(self.total_frames, self.sample_rate)
    }

    pub fn reset_holds(&self) {
        for track in &self.tracks {
            track.runtime.reset();
        }
    }

    /// Copy with `patch` applied; `None` when no track has that id.
    ///
    /// Decoded sources and per-track runtime state are shared, not copied.
    pub fn patched(&self, patch: &TrackPatch, generation: u64) -> Option<MixSnapshot> {
        let index = self.tracks.iter().position(|t| t.id == patch.id)?;
        let mut next = self.clone();
        next.generation = generation;
        let track = &mut next.tracks[index];
        if let Some(enabled) = patch.enabled {
            track.enabled = enabled;
        }
        if let Some(volume) = patch.volume {
            track.gain = volume.max(0.0);
        }
        Some(next)
    }
}

pub struct SnapshotCell {
    current: ArcSwap<MixSnapshot>,
    observed: AtomicU64,
    retired: Mutex<Vec<Arc<MixSnapshot>>>,
}

impl SnapshotCell {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(MixSnapshot::empty()),
            observed: AtomicU64::new(0),
            retired: Mutex::new(Vec::new()),
        }
    }

    /// Control side: make `next` current.
    pub fn publish(&self, next: MixSnapshot) -> Arc<MixSnapshot> {
        let next = Arc::new(next);
        let previous = self.current.swap(Arc::clone(&next));
        match self.retired.lock() {
            Ok(mut retired) => retired.push(previous),
            Err(poisoned) => poisoned.into_inner().push(previous),
        }
        next
    }

    /// Control side: current snapshot as an owned handle.
    pub fn current(&self) -> Arc<MixSnapshot> {
        self.current.load_full()
    }

    /// Audio side: borrow the current snapshot for one callback and record
    /// its generation as observed.
    #[inline]
    pub fn load_for_render(&self) -> Guard<Arc<MixSnapshot>> {
        let guard = self.current.load();
        self.observed.store(guard.generation, Ordering::Release);
        guard
    }

    /// Audio side, on a callback that renders nothing: no snapshot older
    /// than the current one can still be referenced.
    #[inline]
    pub fn mark_observed(&self) {
        let generation = self.current.load().generation;
        self.observed.store(generation, Ordering::Release);
    }

    pub fn observed_generation(&self) -> u64 {
        self.observed.load(Ordering::Acquire)
    }

    /// Control side: drop retired snapshots the audio thread can no longer
    /// reference. With `render_idle` set no callback is running and every
    /// retired snapshot goes.
    pub fn reclaim(&self, render_idle: bool) -> usize {
        let observed = self.observed_generation();
        let mut retired = match self.retired.lock() {
            Ok(retired) => retired,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = retired.len();
        if render_idle {
            retired.clear();
        } else {
            retired.retain(|snap| snap.generation >= observed);
        }
        before - retired.len()
    }

    pub fn retired_count(&self) -> usize {
        match self.retired.lock() {
            Ok(retired) => retired.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

impl Default for SnapshotCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::DecodedSource;
    use crate::model::MixerTrack;

    fn track(id: &str, offset: f64, frames: usize) -> ScheduledTrack {
        let spec = MixerTrack {
            id: id.to_string(),
            path: format!("/{}.wav", id),
            offset,
            ..Default::default()
        };
        let source = DecodedSource::new(vec![0.0; frames], 1, 100);
        ScheduledTrack::new(&spec, Some(Arc::new(source)), 100)
    }

    #[test]
    fn test_total_is_latest_track_end() {
        let snap = MixSnapshot::from_tracks(1, 100, None, vec![track("a", 0.0, 500), track("b", 5.0, 500)]);
        assert_eq!(snap.total_frames, 1000);
        assert_eq!(snap.duration_secs(), 10.0);
    }

    #[test]
    fn test_total_skips_disabled_and_undecoded_tracks() {
        let mut disabled = track("off", 60.0, 500);
        disabled.enabled = false;
        let missing_spec = MixerTrack {
            id: "gone".to_string(),
            path: "/gone.wav".to_string(),
            offset: 30.0,
            ..Default::default()
        };
        let missing = ScheduledTrack::new(&missing_spec, None, 100);
        let snap = MixSnapshot::from_tracks(
            1,
            100,
            None,
            vec![track("a", 0.0, 200), missing, disabled],
        );
        assert_eq!(snap.total_frames, 200);
        assert_eq!(snap.duration_secs(), 2.0);
    }

    #[test]
    fn test_fixed_duration_wins() {
        let snap = MixSnapshot::from_tracks(1, 100, Some(2.5), vec![track("a", 0.0, 500)]);
        assert_eq!(snap.total_frames, 250);
    }

    #[test]
    fn test_patch_shares_runtime() {
        let snap = MixSnapshot::from_tracks(1, 100, None, vec![track("a", 0.0, 10)]);
        let patch = TrackPatch {
            id: "a".to_string(),
            enabled: Some(false),
            volume: Some(0.5),
        };
        let next = snap.patched(&patch, 2).unwrap();
        assert_eq!(next.generation, 2);
        assert!(!next.tracks[0].enabled);
        assert_eq!(next.tracks[0].gain, 0.5);
        assert!(Arc::ptr_eq(&next.tracks[0].runtime, &snap.tracks[0].runtime));

        let missing = TrackPatch {
            id: "zzz".to_string(),
            ..Default::default()
        };
        assert!(snap.patched(&missing, 3).is_none());
    }

    #[test]
    fn test_reclaim_waits_for_audio_thread() {
        let cell = SnapshotCell::new();
        cell.publish(MixSnapshot::from_tracks(1, 100, None, vec![track("a", 0.0, 10)]));
        cell.publish(MixSnapshot::from_tracks(2, 100, None, vec![track("b", 0.0, 10)]));
        assert_eq!(cell.retired_count(), 2);

        // audio thread has not rendered anything newer yet
        assert_eq!(cell.reclaim(false), 0);
        assert_eq!(cell.retired_count(), 2);

        {
            let guard = cell.load_for_render();
            assert_eq!(guard.generation, 2);
        }
        assert_eq!(cell.reclaim(false), 2);
        assert_eq!(cell.retired_count(), 0);
    }

    #[test]
    fn test_idle_callbacks_release_retired_snapshots() {
        let cell = SnapshotCell::new();
        for generation in 1..=10 {
            cell.publish(MixSnapshot::from_tracks(generation, 100, None, vec![track("a", 0.0, 10)]));
        }
        assert_eq!(cell.retired_count(), 10);

        // stream running but transport paused
        cell.mark_observed();
        assert_eq!(cell.reclaim(false), 10);
        assert_eq!(cell.retired_count(), 0);
    }

    #[test]
    fn test_reclaim_when_idle_drops_everything() {
        let cell = SnapshotCell::new();
        cell.publish(MixSnapshot::from_tracks(5, 100, None, vec![track("a", 0.0, 10)]));
        assert_eq!(cell.reclaim(true), 1);
    }
}
