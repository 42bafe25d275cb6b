//! Sample-rate conversion using rubato

use super::DecodeError;
use rubato::{FftFixedIn, Resampler};

/// Convert interleaved audio between rates.
///
/// Output length is `ceil(frames * to / from)` and the resampler's group
/// delay is trimmed so sample 0 stays aligned with the input.
pub fn resample_interleaved(
    samples: &[f32],
    channels: usize,
    from: u32,
    to: u32,
    chunk_frames: usize,
) -> Result<Vec<f32>, DecodeError> {
    if from == to || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    let channels = channels.max(1);
    let frames = samples.len() / channels;
    let expected = (frames as f64 * to as f64 / from as f64).ceil() as usize;

    let mut resampler = FftFixedIn::<f32>::new(
        from as usize,
        to as usize,
        chunk_frames.max(64),
        2,
        channels,
    )
    .map_err(|e| DecodeError::new(format!("resampler setup failed: {}", e)))?;

    let delay = resampler.output_delay();
    let mut planes: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay); channels];
    let mut chunk: Vec<Vec<f32>> = vec![Vec::new(); channels];

    let mut pos = 0;
    while planes[0].len() < expected + delay {
        let needed = resampler.input_frames_next();
        for (ch, buf) in chunk.iter_mut().enumerate() {
            buf.clear();
            buf.extend((pos..pos + needed).map(|frame| {
                if frame < frames {
                    samples[frame * channels + ch]
                } else {
                    0.0
                }
            }));
        }
        let output = resampler
            .process(&chunk, None)
            .map_err(|e| DecodeError::new(format!("resampling failed: {}", e)))?;
        for (plane, out) in planes.iter_mut().zip(output) {
            plane.extend_from_slice(&out);
        }
        pos += needed;
    }

    let mut interleaved = Vec::with_capacity(expected * channels);
    for frame in delay..delay + expected {
        for plane in &planes {
            interleaved.push(plane[frame]);
        }
    }
    Ok(interleaved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_rate_passthrough() {
        let input = vec![0.1, 0.2, 0.3, 0.4];
        let out = resample_interleaved(&input, 2, 44_100, 44_100, 1024).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn test_upsample_length_and_level() {
        let frames = 44_100;
        let input: Vec<f32> = (0..frames * 2).map(|_| 0.5).collect();
        let out = resample_interleaved(&input, 2, 44_100, 48_000, 1024).unwrap();
        assert_eq!(out.len(), 48_000 * 2);
        // DC level survives away from the edges
        let mid = out[48_000];
        assert!((mid - 0.5).abs() < 0.01, "mid sample {}", mid);
    }

    #[test]
    fn test_downsample_length() {
        let input = vec![0.0f32; 48_000];
        let out = resample_interleaved(&input, 1, 48_000, 16_000, 512).unwrap();
        assert_eq!(out.len(), 16_000);
    }
}
