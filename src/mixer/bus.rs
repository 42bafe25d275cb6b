//! Mix bus
//!
//! Sums every enabled track into a caller-provided interleaved f32 buffer.
//! Runs on the audio thread: no allocation, no locks, work bounded by
//! frames × tracks.

use super::snapshot::MixSnapshot;

/// Whether disabled tracks accumulate hold while mixing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldMode {
    /// Live playback: disabled tracks are held in place
    Live,
    /// Offline render: runtime state is left untouched
    Frozen,
}

/// Mix `out.len() / channels` frames starting at output frame `start`.
///
/// Samples are hard-clamped to [-1, 1]; the number of clamped samples is
/// returned.
pub fn mix_block(
    snapshot: &MixSnapshot,
    start: u64,
    out: &mut [f32],
    channels: usize,
    hold: HoldMode,
) -> u64 {
    out.fill(0.0);
    if channels == 0 {
        return 0;
    }
    let frames = out.len() / channels;
    let end = start + frames as u64;

    for track in &snapshot.tracks {
        if !track.enabled {
            if hold == HoldMode::Live {
                track.advance_hold(start, end);
            }
            continue;
        }
        let Some(source) = track.source.as_deref() else {
            continue;
        };
        let segment = track.segment_frames();
        if segment == 0 || track.gain == 0.0 {
            continue;
        }
        let held = match hold {
            HoldMode::Live => track.runtime.hold(),
            HoldMode::Frozen => 0,
        };
        let src_ch = source.channels();
        let gain = track.gain;

        for (f, frame_out) in out.chunks_exact_mut(channels).enumerate() {
            let Some(idx) = track.source_index(start + f as u64, held, segment) else {
                continue;
            };
            let src = source.frame(idx);
            if src_ch == channels {
                for (o, s) in frame_out.iter_mut().zip(src) {
                    *o += s * gain;
                }
            } else if src_ch == 1 {
                let s = src[0] * gain;
                for o in frame_out.iter_mut() {
                    *o += s;
                }
            } else if channels == 1 {
                let sum: f32 = src.iter().sum();
                frame_out[0] += sum / src_ch as f32 * gain;
            } else {
                for (c, o) in frame_out.iter_mut().enumerate() {
                    *o += src[c % src_ch] * gain;
                }
            }
        }
    }

    let mut clipped = 0;
    for sample in out.iter_mut() {
        if *sample > 1.0 {
            *sample = 1.0;
            clipped += 1;
        } else if *sample < -1.0 {
            *sample = -1.0;
            clipped += 1;
        } else if sample.is_nan() {
            *sample = 0.0;
        }
    }
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::DecodedSource;
    use crate::mixer::ScheduledTrack;
    use crate::model::MixerTrack;
    use std::sync::Arc;

    fn constant_track(id: &str, value: f32, channels: usize, frames: usize, volume: f32) -> ScheduledTrack {
        let spec = MixerTrack {
            id: id.to_string(),
            path: format!("/{}.wav", id),
            volume,
            ..Default::default()
        };
        let source = DecodedSource::new(vec![value; frames * channels], channels, 100);
        ScheduledTrack::new(&spec, Some(Arc::new(source)), 100)
    }

    fn snapshot(tracks: Vec<ScheduledTrack>) -> MixSnapshot {
        MixSnapshot::from_tracks(1, 100, None, tracks)
    }

    #[test]
    fn test_sums_with_gain() {
        let snap = snapshot(vec![
            constant_track("a", 0.25, 2, 10, 1.0),
            constant_track("b", 0.25, 2, 10, 0.5),
        ]);
        let mut out = vec![0.0; 8];
        let clipped = mix_block(&snap, 0, &mut out, 2, HoldMode::Live);
        assert_eq!(clipped, 0);
        assert!(out.iter().all(|s| (*s - 0.375).abs() < 1e-6));
    }

    #[test]
    fn test_mono_source_fills_every_output_channel() {
        let snap = snapshot(vec![constant_track("m", 0.5, 1, 10, 1.0)]);
        let mut out = vec![0.0; 6];
        mix_block(&snap, 0, &mut out, 2, HoldMode::Live);
        assert_eq!(out, vec![0.5; 6]);
    }

    #[test]
    fn test_stereo_to_mono_averages() {
        let spec = MixerTrack {
            id: "s".to_string(),
            path: "/s.wav".to_string(),
            ..Default::default()
        };
        let source = DecodedSource::new(vec![1.0, 0.0, 1.0, 0.0], 2, 100);
        let snap = snapshot(vec![ScheduledTrack::new(&spec, Some(Arc::new(source)), 100)]);
        let mut out = vec![0.0; 2];
        mix_block(&snap, 0, &mut out, 1, HoldMode::Live);
        assert_eq!(out, vec![0.5, 0.5]);
    }

    #[test]
    fn test_clamps_and_counts() {
        let snap = snapshot(vec![
            constant_track("a", 0.8, 1, 4, 1.0),
            constant_track("b", 0.8, 1, 4, 1.0),
        ]);
        let mut out = vec![0.0; 4];
        let clipped = mix_block(&snap, 0, &mut out, 1, HoldMode::Live);
        assert_eq!(clipped, 4);
        assert!(out.iter().all(|s| *s == 1.0));
    }

    #[test]
    fn test_disabled_track_is_silent_and_held() {
        let mut track = constant_track("d", 0.5, 1, 100, 1.0);
        track.enabled = false;
        let runtime = Arc::clone(&track.runtime);
        let snap = snapshot(vec![track]);
        let mut out = vec![0.0; 10];
        mix_block(&snap, 0, &mut out, 1, HoldMode::Live);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(runtime.hold(), 10);

        mix_block(&snap, 10, &mut out, 1, HoldMode::Frozen);
        assert_eq!(runtime.hold(), 10);
    }

    #[test]
    fn test_failed_track_contributes_nothing() {
        let spec = MixerTrack {
            id: "x".to_string(),
            path: "/x.wav".to_string(),
            ..Default::default()
        };
        let snap = snapshot(vec![ScheduledTrack::new(&spec, None, 100)]);
        let mut out = vec![0.3; 4];
        mix_block(&snap, 0, &mut out, 2, HoldMode::Live);
        assert_eq!(out, vec![0.0; 4]);
    }
}
