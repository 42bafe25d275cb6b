//! Engine tuning configuration
//!
//! Values here are fixed for the lifetime of a player instance and are not
//! part of the caller-facing settings JSON. They are loaded from a JSON file
//! so buffer and polling behaviour can be tuned without recompiling.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub decoder: DecoderConfig,
    pub recorder: RecorderConfig,
}

/// Output stream and control worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Channel count requested from the output device
    pub output_channels: u16,
    /// Capacity of the audio-thread to control-thread event queue
    pub rt_event_capacity: usize,
    /// Scratch buffer for non-f32 device formats, in samples
    pub render_scratch_samples: usize,
    /// Control worker housekeeping tick in milliseconds
    pub worker_tick_ms: u64,
    /// Device re-enumeration interval in milliseconds
    pub device_poll_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            output_channels: 2,
            rt_event_capacity: 64,
            render_scratch_samples: 8192,
            worker_tick_ms: 10,
            device_poll_ms: 2000,
        }
    }
}

/// Source decoding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Input chunk size handed to the resampler, in frames
    pub resample_chunk_frames: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            resample_chunk_frames: 1024,
        }
    }
}

/// Recorder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Number of pre-allocated capture buffers
    pub buffer_pool_size: usize,
    /// Size of each capture buffer in samples
    pub buffer_size: usize,
    /// Writer thread sleep when no buffers are pending, in milliseconds
    pub writer_idle_ms: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            buffer_pool_size: 64,
            buffer_size: 2048,
            writer_idle_ms: 5,
        }
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// Falls back to defaults when the file is missing or invalid.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    pub fn load() -> Self {
        Self::load_from_file("assets/mixplayer_config.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.audio.output_channels, 2);
        assert_eq!(config.decoder.resample_chunk_frames, 1024);
        assert_eq!(config.recorder.buffer_pool_size, 64);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let parsed: AppConfig =
            serde_json::from_str(r#"{ "audio": { "device_poll_ms": 500 } }"#).unwrap();
        assert_eq!(parsed.audio.device_poll_ms, 500);
        assert_eq!(parsed.audio.output_channels, 2);
        assert_eq!(parsed.recorder.buffer_size, 2048);
    }

    #[test]
    fn test_load_from_file_falls_back_on_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not json").unwrap();
        let config = AppConfig::load_from_file(file.path());
        assert_eq!(config.audio.worker_tick_ms, 10);
    }

    #[test]
    fn test_load_from_missing_file() {
        let config = AppConfig::load_from_file("/nonexistent/mixplayer_config.json");
        assert_eq!(config.recorder.writer_idle_ms, 5);
    }
}
