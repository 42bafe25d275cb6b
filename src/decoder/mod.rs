//! Decoder adapter
//!
//! A track source is opened through a [`DecoderFactory`], positioned at the
//! track's `fromTime`, and fully pre-buffered into a [`DecodedSource`] at the
//! engine rate on a worker thread. The mixer only ever reads decoded memory.

mod codec;
pub mod resample;

pub use codec::{SymphoniaFactory, SymphoniaSource};

use crate::config::DecoderConfig;
use crate::error::PlayerError;
use crate::model::MixerTrack;
use std::fmt;
use std::path::Path;

/// Native format of a PCM source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Source could not be opened, probed or decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeError {
    pub reason: String,
}

impl DecodeError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Attach the failing track for reporting.
    pub fn for_track(self, track: &MixerTrack) -> PlayerError {
        PlayerError::DecodeFailed {
            track_id: track.id.clone(),
            path: track.path.clone(),
            reason: self.reason,
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)
    }
}

impl std::error::Error for DecodeError {}

/// Pull-based PCM frame source.
///
/// A source is single-use: restarting means opening a new instance.
pub trait PcmSource: Send {
    fn spec(&self) -> SourceSpec;

    /// Position the source at `seconds`. Only valid before the first read.
    fn seek(&mut self, seconds: f64) -> Result<(), DecodeError>;

    /// Append the next block of interleaved frames to `out`.
    ///
    /// Returns the number of frames appended; 0 means end of stream.
    fn read_into(&mut self, out: &mut Vec<f32>) -> Result<usize, DecodeError>;
}

/// Opens sources by path.
pub trait DecoderFactory: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn PcmSource>, DecodeError>;
}

/// Fully decoded, interleaved audio at the engine rate.
#[derive(Debug, Clone)]
pub struct DecodedSource {
    samples: Vec<f32>,
    channels: usize,
    sample_rate: u32,
}

impl DecodedSource {
    pub fn new(samples: Vec<f32>, channels: usize, sample_rate: u32) -> Self {
        let channels = channels.max(1);
        let mut samples = samples;
        samples.truncate(samples.len() - samples.len() % channels);
        Self {
            samples,
            channels,
            sample_rate,
        }
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn frame(&self, index: usize) -> &[f32] {
        let start = index * self.channels;
        &self.samples[start..start + self.channels]
    }
}

/// Decode `track`'s source from `fromTime` for its play length (or to the
/// end), converted to `engine_rate`.
pub fn prebuffer(
    factory: &dyn DecoderFactory,
    track: &MixerTrack,
    engine_rate: u32,
    config: &DecoderConfig,
) -> Result<DecodedSource, DecodeError> {
    let mut source = factory.open(Path::new(&track.path))?;
    let spec = source.spec();
    if spec.sample_rate == 0 || spec.channels == 0 {
        return Err(DecodeError::new(format!(
            "invalid source format ({} Hz, {} channels)",
            spec.sample_rate, spec.channels
        )));
    }
    let channels = spec.channels as usize;

    if track.from_time > 0.0 {
        source.seek(track.from_time)?;
    }

    let limit = track
        .play_length()
        .map(|secs| (secs * spec.sample_rate as f64).ceil() as usize);

    let mut samples = Vec::new();
    loop {
        if let Some(limit) = limit {
            if samples.len() / channels >= limit {
                break;
            }
        }
        if source.read_into(&mut samples)? == 0 {
            break;
        }
    }
    if let Some(limit) = limit {
        samples.truncate(limit * channels);
    }

    let samples = if spec.sample_rate != engine_rate {
        resample::resample_interleaved(
            &samples,
            channels,
            spec.sample_rate,
            engine_rate,
            config.resample_chunk_frames,
        )?
    } else {
        samples
    };

    log::debug!(
        "[Decoder] Track '{}' buffered: {} frames at {} Hz ({} ch)",
        track.id,
        samples.len() / channels,
        engine_rate,
        channels
    );

    Ok(DecodedSource::new(samples, channels, engine_rate))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Ramp source: frame `i` has value `i` on every channel.
    pub(crate) struct RampSource {
        spec: SourceSpec,
        total: usize,
        pos: usize,
    }

    impl PcmSource for RampSource {
        fn spec(&self) -> SourceSpec {
            self.spec
        }

        fn seek(&mut self, seconds: f64) -> Result<(), DecodeError> {
            self.pos = (seconds * self.spec.sample_rate as f64) as usize;
            Ok(())
        }

        fn read_into(&mut self, out: &mut Vec<f32>) -> Result<usize, DecodeError> {
            let n = 100.min(self.total.saturating_sub(self.pos));
            for i in 0..n {
                for _ in 0..self.spec.channels {
                    out.push((self.pos + i) as f32);
                }
            }
            self.pos += n;
            Ok(n)
        }
    }

    #[derive(Default)]
    pub(crate) struct RampFactory {
        pub sources: HashMap<String, (SourceSpec, usize)>,
    }

    impl DecoderFactory for RampFactory {
        fn open(&self, path: &Path) -> Result<Box<dyn PcmSource>, DecodeError> {
            let key = path.to_string_lossy().to_string();
            let (spec, total) = self
                .sources
                .get(&key)
                .copied()
                .ok_or_else(|| DecodeError::new(format!("no such file: {}", key)))?;
            Ok(Box::new(RampSource {
                spec,
                total,
                pos: 0,
            }))
        }
    }

    fn factory_with(path: &str, rate: u32, channels: u16, frames: usize) -> Arc<RampFactory> {
        let mut factory = RampFactory::default();
        factory.sources.insert(
            path.to_string(),
            (
                SourceSpec {
                    sample_rate: rate,
                    channels,
                },
                frames,
            ),
        );
        Arc::new(factory)
    }

    fn track(path: &str) -> MixerTrack {
        MixerTrack {
            id: "t".to_string(),
            path: path.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_prebuffer_applies_from_time_and_duration() {
        let factory = factory_with("/ramp", 1000, 2, 5000);
        let mut t = track("/ramp");
        t.from_time = 1.0;
        t.duration = 0.5;

        let decoded = prebuffer(factory.as_ref(), &t, 1000, &DecoderConfig::default()).unwrap();
        assert_eq!(decoded.frames(), 500);
        assert_eq!(decoded.channels(), 2);
        assert_eq!(decoded.frame(0), &[1000.0, 1000.0]);
        assert_eq!(decoded.frame(499)[1], 1499.0);
    }

    #[test]
    fn test_prebuffer_until_exhausted() {
        let factory = factory_with("/ramp", 1000, 1, 1234);
        let decoded =
            prebuffer(factory.as_ref(), &track("/ramp"), 1000, &DecoderConfig::default()).unwrap();
        assert_eq!(decoded.frames(), 1234);
    }

    #[test]
    fn test_prebuffer_repeat_keeps_whole_source() {
        // the source length bounds how long a repeating track retriggers
        let factory = factory_with("/ramp", 1000, 1, 10_000);
        let mut t = track("/ramp");
        t.repeat = true;
        t.repeat_interval = 2.0;
        let decoded = prebuffer(factory.as_ref(), &t, 1000, &DecoderConfig::default()).unwrap();
        assert_eq!(decoded.frames(), 10_000);
    }

    #[test]
    fn test_prebuffer_missing_file() {
        let factory = RampFactory::default();
        let err = prebuffer(&factory, &track("/nope"), 1000, &DecoderConfig::default())
            .unwrap_err();
        let player_err = err.for_track(&track("/nope"));
        assert!(matches!(player_err, PlayerError::DecodeFailed { .. }));
    }

    #[test]
    fn test_prebuffer_resamples_to_engine_rate() {
        let factory = factory_with("/ramp", 24_000, 1, 24_000);
        let decoded =
            prebuffer(factory.as_ref(), &track("/ramp"), 48_000, &DecoderConfig::default())
                .unwrap();
        assert_eq!(decoded.sample_rate(), 48_000);
        assert_eq!(decoded.frames(), 48_000);
    }
}
