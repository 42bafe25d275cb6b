//! Runtime playback settings supplied by the caller.

use crate::error::PlayerError;
use serde::{Deserialize, Serialize};

pub const MIN_SAMPLE_RATE: u32 = 8_000;
pub const MAX_SAMPLE_RATE: u32 = 192_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MixerSettings {
    /// Seconds between progress events
    pub progress_update_interval: f64,
    /// Engine operating rate; changing it reopens the output device
    pub sample_rate: u32,
    /// Restart from 0 on natural completion (ignored while recording)
    #[serde(rename = "loop")]
    pub looping: bool,
    /// startRecorder also starts playback
    pub rec_bg_playback: bool,
}

impl Default for MixerSettings {
    fn default() -> Self {
        Self {
            progress_update_interval: 0.1,
            sample_rate: 48_000,
            looping: false,
            rec_bg_playback: false,
        }
    }
}

impl MixerSettings {
    pub fn from_json(json: &str) -> Result<Self, PlayerError> {
        let settings: MixerSettings =
            serde_json::from_str(json).map_err(|e| PlayerError::SettingsInvalid {
                reason: e.to_string(),
            })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), PlayerError> {
        if !self.progress_update_interval.is_finite() || self.progress_update_interval <= 0.0 {
            return Err(PlayerError::SettingsInvalid {
                reason: format!(
                    "progressUpdateInterval must be > 0 (got {})",
                    self.progress_update_interval
                ),
            });
        }
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            return Err(PlayerError::SettingsInvalid {
                reason: format!(
                    "sampleRate must be within {}..={} (got {})",
                    MIN_SAMPLE_RATE, MAX_SAMPLE_RATE, self.sample_rate
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_json() {
        let s = MixerSettings::from_json(r#"{ "progressUpdateInterval": 0.05, "sampleRate": 44100 }"#)
            .unwrap();
        assert_eq!(s.progress_update_interval, 0.05);
        assert_eq!(s.sample_rate, 44100);
        assert!(!s.looping);
    }

    #[test]
    fn test_settings_defaults_and_loop_key() {
        let s = MixerSettings::from_json(r#"{ "loop": true }"#).unwrap();
        assert!(s.looping);
        assert_eq!(s.sample_rate, 48_000);
        assert_eq!(s.progress_update_interval, 0.1);
    }

    #[test]
    fn test_settings_rejects_bad_values() {
        assert!(MixerSettings::from_json(r#"{ "progressUpdateInterval": 0 }"#).is_err());
        assert!(MixerSettings::from_json(r#"{ "sampleRate": 100 }"#).is_err());
    }
}
