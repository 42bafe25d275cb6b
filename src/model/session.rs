//! Session and track description.
//!
//! All times are fractional seconds. Integer JSON values are accepted as-is,
//! and the legacy `enable` spelling is read as `enabled`.

use crate::error::PlayerError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One scheduled audio source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MixerTrack {
    #[serde(rename = "id_")]
    pub id: String,
    pub path: String,
    /// Linear gain, 1.0 = unity
    pub volume: f32,
    /// Start on the output timeline
    pub offset: f64,
    /// Start within the source file
    pub from_time: f64,
    /// Play length; 0 means until the source is exhausted
    pub duration: f64,
    #[serde(alias = "enable")]
    pub enabled: bool,
    pub repeat: bool,
    pub repeat_interval: f64,
}

impl Default for MixerTrack {
    fn default() -> Self {
        Self {
            id: String::new(),
            path: String::new(),
            volume: 1.0,
            offset: 0.0,
            from_time: 0.0,
            duration: 0.0,
            enabled: true,
            repeat: false,
            repeat_interval: 0.0,
        }
    }
}

impl MixerTrack {
    /// Requested play length, `None` when unset.
    pub fn play_length(&self) -> Option<f64> {
        (self.duration > 0.0).then_some(self.duration)
    }

    fn validate(&self) -> Result<(), PlayerError> {
        let invalid = |reason: String| PlayerError::SessionInvalid { reason };

        if self.id.is_empty() {
            return Err(invalid("track with empty id_".to_string()));
        }
        if self.path.is_empty() {
            return Err(invalid(format!("track '{}' has no path", self.id)));
        }
        let times = [
            ("offset", self.offset),
            ("fromTime", self.from_time),
            ("duration", self.duration),
            ("repeatInterval", self.repeat_interval),
        ];
        for (name, value) in times {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(format!(
                    "track '{}': {} must be a non-negative number (got {})",
                    self.id, name, value
                )));
            }
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(invalid(format!(
                "track '{}': volume must be >= 0 (got {})",
                self.id, self.volume
            )));
        }
        if self.repeat && self.repeat_interval <= 0.0 {
            return Err(invalid(format!(
                "track '{}': repeat requires repeatInterval > 0",
                self.id
            )));
        }
        Ok(())
    }
}

/// Complete description of what to mix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MixerSession {
    pub tracks: Vec<MixerTrack>,
    /// Render-to-file destination used by export when no path is given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Total length; 0 means derived from the tracks
    pub output_duration: f64,
}

impl MixerSession {
    /// Parse and validate session JSON.
    pub fn from_json(json: &str) -> Result<Self, PlayerError> {
        let session: MixerSession = serde_json::from_str(json)?;
        session.validate()?;
        Ok(session)
    }

    pub fn to_json(&self) -> Result<String, PlayerError> {
        serde_json::to_string(self).map_err(|e| PlayerError::SessionInvalid {
            reason: e.to_string(),
        })
    }

    /// Explicit total length, `None` when derived from the tracks.
    pub fn fixed_duration(&self) -> Option<f64> {
        (self.output_duration > 0.0).then_some(self.output_duration)
    }

    pub fn track(&self, id: &str) -> Option<&MixerTrack> {
        self.tracks.iter().find(|t| t.id == id)
    }

    /// Structural validation; decode failures are reported later per track.
    pub fn validate(&self) -> Result<(), PlayerError> {
        if self.tracks.is_empty() {
            return Err(PlayerError::SessionInvalid {
                reason: "session has no tracks".to_string(),
            });
        }
        if !self.output_duration.is_finite() || self.output_duration < 0.0 {
            return Err(PlayerError::SessionInvalid {
                reason: format!(
                    "outputDuration must be >= 0 (got {})",
                    self.output_duration
                ),
            });
        }

        let mut seen = HashSet::new();
        for track in &self.tracks {
            track.validate()?;
            if !seen.insert(track.id.as_str()) {
                return Err(PlayerError::SessionInvalid {
                    reason: format!("duplicate track id_ '{}'", track.id),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_defaults_from_minimal_json() {
        let track: MixerTrack =
            serde_json::from_str(r#"{ "id_": "a", "path": "/a.wav" }"#).unwrap();
        assert_eq!(track.volume, 1.0);
        assert!(track.enabled);
        assert!(!track.repeat);
        assert_eq!(track.play_length(), None);
        assert_eq!(track.from_time, 0.0);
    }

    #[test]
    fn test_track_roundtrip_keeps_defaults() {
        let track: MixerTrack =
            serde_json::from_str(r#"{ "id_": "vocal", "path": "/v.wav", "offset": 2 }"#).unwrap();
        let json = serde_json::to_string(&track).unwrap();
        assert!(json.contains("\"id_\":\"vocal\""));
        let back: MixerTrack = serde_json::from_str(&json).unwrap();
        assert_eq!(back, track);
    }

    #[test]
    fn test_legacy_enable_field() {
        let track: MixerTrack =
            serde_json::from_str(r#"{ "id_": "a", "path": "/a.wav", "enable": false }"#).unwrap();
        assert!(!track.enabled);
    }

    #[test]
    fn test_session_example_shape_parses() {
        let json = r#"{ "tracks": [
            { "id_": "vocal", "path": "/v.wav", "volume": 1.0, "offset": 2.0,
              "fromTime": 10.0, "duration": 0, "enabled": true,
              "repeat": false, "repeatInterval": 2.0 }
          ],
          "outputDuration": 150.0 }"#;
        let session = MixerSession::from_json(json).unwrap();
        assert_eq!(session.fixed_duration(), Some(150.0));
        assert_eq!(session.tracks[0].from_time, 10.0);
        assert_eq!(session.tracks[0].play_length(), None);
    }

    #[test]
    fn test_rejects_malformed_json() {
        let err = MixerSession::from_json("{ tracks: ").unwrap_err();
        assert!(matches!(err, PlayerError::SessionInvalid { .. }));
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let json = r#"{ "tracks": [
            { "id_": "a", "path": "/a.wav" }, { "id_": "a", "path": "/b.wav" } ] }"#;
        let err = MixerSession::from_json(json).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_rejects_negative_offset_and_bad_repeat() {
        let neg = r#"{ "tracks": [ { "id_": "a", "path": "/a.wav", "offset": -1 } ] }"#;
        assert!(MixerSession::from_json(neg).is_err());

        let repeat = r#"{ "tracks": [ { "id_": "a", "path": "/a.wav", "repeat": true } ] }"#;
        assert!(MixerSession::from_json(repeat).is_err());

        let volume = r#"{ "tracks": [ { "id_": "a", "path": "/a.wav", "volume": -0.5 } ] }"#;
        assert!(MixerSession::from_json(volume).is_err());
    }

    #[test]
    fn test_rejects_empty_session() {
        assert!(MixerSession::from_json(r#"{ "tracks": [] }"#).is_err());
    }
}
