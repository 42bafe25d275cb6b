//! Offline render of a loaded session to a 16-bit WAV file.
//!
//! Uses the same mix bus as playback, with track hold state frozen so an
//! export never disturbs the live transport.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::error::PlayerError;
use crate::mixer::{mix_block, HoldMode, MixSnapshot};

const BLOCK_FRAMES: usize = 4096;

/// Render all of `snapshot` into `path`; returns the frame count written.
///
/// A partially written file is removed on failure.
pub fn render_to_wav(
    snapshot: &MixSnapshot,
    path: &Path,
    channels: u16,
) -> Result<u64, PlayerError> {
    if !snapshot.is_loaded() {
        return Err(PlayerError::NoSession {
            operation: "export".to_string(),
        });
    }
    let is_wav = path
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("wav"));
    if !is_wav {
        return Err(PlayerError::ExportFailed {
            reason: format!("{} is not a .wav path", path.display()),
        });
    }

    let spec = WavSpec {
        channels: channels.max(1),
        sample_rate: snapshot.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let writer = WavWriter::create(path, spec).map_err(|e| PlayerError::ExportFailed {
        reason: format!("cannot create {}: {}", path.display(), e),
    })?;

    match write_all(snapshot, writer, spec.channels as usize) {
        Ok((frames, clipped)) => {
            log::info!(
                "[Export] Wrote {} frames to {} ({} samples clipped)",
                frames,
                path.display(),
                clipped
            );
            Ok(frames)
        }
        Err(err) => {
            let _ = std::fs::remove_file(path);
            Err(err)
        }
    }
}

fn write_all(
    snapshot: &MixSnapshot,
    mut writer: WavWriter<BufWriter<File>>,
    channels: usize,
) -> Result<(u64, u64), PlayerError> {
    let failed = |e: hound::Error| PlayerError::ExportFailed {
        reason: e.to_string(),
    };
    let mut block = vec![0.0f32; BLOCK_FRAMES * channels];
    let mut position = 0u64;
    let mut clipped = 0u64;

    while position < snapshot.total_frames {
        let frames = BLOCK_FRAMES.min((snapshot.total_frames - position) as usize);
        let out = &mut block[..frames * channels];
        clipped += mix_block(snapshot, position, out, channels, HoldMode::Frozen);
        for sample in out.iter() {
            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
            writer.write_sample(value).map_err(failed)?;
        }
        position += frames as u64;
    }

    writer.finalize().map_err(failed)?;
    Ok((position, clipped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::DecodedSource;
    use crate::mixer::ScheduledTrack;
    use crate::model::MixerTrack;
    use std::sync::Arc;

    fn snapshot(frames: usize, value: f32) -> MixSnapshot {
        let spec = MixerTrack {
            id: "a".to_string(),
            path: "/a.wav".to_string(),
            ..Default::default()
        };
        let source = DecodedSource::new(vec![value; frames], 1, 8000);
        let track = ScheduledTrack::new(&spec, Some(Arc::new(source)), 8000);
        MixSnapshot::from_tracks(1, 8000, None, vec![track])
    }

    #[test]
    fn test_export_writes_full_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mix.wav");
        let frames = render_to_wav(&snapshot(10_000, 0.5), &path, 2).unwrap();
        assert_eq!(frames, 10_000);

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 8000);
        assert_eq!(reader.duration(), 10_000);
        let first: i16 = reader.samples::<i16>().next().unwrap().unwrap();
        assert_eq!(first, (0.5 * i16::MAX as f32).round() as i16);
    }

    #[test]
    fn test_export_rejects_other_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mix.mp3");
        let err = render_to_wav(&snapshot(100, 0.1), &path, 2).unwrap_err();
        assert!(matches!(err, PlayerError::ExportFailed { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn test_export_needs_a_session() {
        let dir = tempfile::tempdir().unwrap();
        let err = render_to_wav(&MixSnapshot::empty(), &dir.path().join("x.wav"), 2).unwrap_err();
        assert!(matches!(err, PlayerError::NoSession { .. }));
    }

    #[test]
    fn test_export_leaves_hold_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut snap = snapshot(1000, 0.2);
        snap.tracks[0].enabled = false;
        render_to_wav(&snap, &dir.path().join("x.wav"), 1).unwrap();
        assert_eq!(snap.tracks[0].runtime.hold(), 0);
    }
}
