//! Symphonia-backed file decoding.

use super::{DecodeError, DecoderFactory, PcmSource, SourceSpec};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

/// Opens any container/codec the symphonia default registry knows.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaFactory;

impl DecoderFactory for SymphoniaFactory {
    fn open(&self, path: &Path) -> Result<Box<dyn PcmSource>, DecodeError> {
        Ok(Box::new(SymphoniaSource::open(path)?))
    }
}

pub struct SymphoniaSource {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    time_base: Option<TimeBase>,
    spec: SourceSpec,
    sample_buf: Option<SampleBuffer<f32>>,
    sample_buf_frames: usize,
    /// Frames still to drop after an inexact seek
    skip_frames: u64,
}

impl SymphoniaSource {
    pub fn open(path: &Path) -> Result<Self, DecodeError> {
        let file = File::open(path)
            .map_err(|e| DecodeError::new(format!("failed to open file: {}", e)))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| DecodeError::new(format!("unsupported format: {}", e)))?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DecodeError::new("no audio track found"))?;

        let track_id = track.id;
        let time_base = track.codec_params.time_base;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| DecodeError::new("unknown sample rate"))?;
        let channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .ok_or_else(|| DecodeError::new("unknown channel layout"))?;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::new(format!("unsupported codec: {}", e)))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            time_base,
            spec: SourceSpec {
                sample_rate,
                channels,
            },
            sample_buf: None,
            sample_buf_frames: 0,
            skip_frames: 0,
        })
    }

    fn ts_to_frames(&self, ts: u64) -> u64 {
        match self.time_base {
            Some(tb) => {
                let t = tb.calc_time(ts);
                ((t.seconds as f64 + t.frac) * self.spec.sample_rate as f64).round() as u64
            }
            None => ts,
        }
    }
}

impl PcmSource for SymphoniaSource {
    fn spec(&self) -> SourceSpec {
        self.spec
    }

    fn seek(&mut self, seconds: f64) -> Result<(), DecodeError> {
        let seconds = seconds.max(0.0);
        let time = Time::new(seconds.trunc() as u64, seconds.fract());
        let target = SeekTo::Time {
            time,
            track_id: Some(self.track_id),
        };
        match self.format.seek(SeekMode::Accurate, target) {
            Ok(seeked) => {
                self.decoder.reset();
                self.skip_frames = self.ts_to_frames(seeked.required_ts.saturating_sub(seeked.actual_ts));
            }
            Err(err) => {
                // Unseekable stream or target past the end: decode and discard.
                log::debug!("[Decoder] Seek to {:.3}s failed ({}), skipping frames", seconds, err);
                self.skip_frames = (seconds * self.spec.sample_rate as f64).round() as u64;
            }
        }
        Ok(())
    }

    fn read_into(&mut self, out: &mut Vec<f32>) -> Result<usize, DecodeError> {
        let channels = self.spec.channels as usize;
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(0);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(0),
                Err(e) => return Err(DecodeError::new(format!("packet read error: {}", e))),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    log::warn!("[Decoder] Skipping corrupt packet: {}", e);
                    continue;
                }
                Err(e) => return Err(DecodeError::new(format!("decode error: {}", e))),
            };

            if decoded.spec().channels.count() != channels {
                return Err(DecodeError::new("channel layout changed mid-stream"));
            }

            let capacity = decoded.capacity();
            if self.sample_buf.is_none() || self.sample_buf_frames < capacity {
                self.sample_buf = Some(SampleBuffer::new(capacity as u64, *decoded.spec()));
                self.sample_buf_frames = capacity;
            }

            let Some(buf) = self.sample_buf.as_mut() else {
                continue;
            };
            buf.copy_interleaved_ref(decoded);

            let mut samples = buf.samples();
            if self.skip_frames > 0 {
                let frames = (samples.len() / channels) as u64;
                let skip = self.skip_frames.min(frames);
                samples = &samples[skip as usize * channels..];
                self.skip_frames -= skip;
            }
            if samples.is_empty() {
                continue;
            }

            out.extend_from_slice(samples);
            return Ok(samples.len() / channels);
        }
    }
}
