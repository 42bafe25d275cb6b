// Playback error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Playback error code constants exposed through the C bridge
///
/// Error code range: 2001-2014
pub struct PlayerErrorCodes {}

impl PlayerErrorCodes {
    /// Session JSON is malformed or fails validation
    pub const SESSION_INVALID: i32 = 2001;

    /// A track source could not be opened or decoded
    pub const DECODE_FAILED: i32 = 2002;

    /// No usable audio device
    pub const DEVICE_UNAVAILABLE: i32 = 2003;

    /// Failed to open audio stream
    pub const STREAM_OPEN_FAILED: i32 = 2004;

    /// A running stream reported a fatal error (device removed, etc.)
    pub const STREAM_FAILURE: i32 = 2005;

    /// Filesystem error outside of decoding
    pub const IO: i32 = 2006;

    /// Operation needs a loaded session
    pub const NO_SESSION: i32 = 2007;

    /// Playback was disabled at init
    pub const NOT_ENABLED: i32 = 2008;

    /// Operation conflicts with an operation in progress
    pub const BUSY: i32 = 2009;

    /// Engine has been shut down
    pub const ENGINE_SHUT_DOWN: i32 = 2010;

    /// Handle passed across the C bridge is unknown or destroyed
    pub const INVALID_HANDLE: i32 = 2011;

    /// Offline render to file failed
    pub const EXPORT_FAILED: i32 = 2012;

    /// Settings JSON is malformed or out of range
    pub const SETTINGS_INVALID: i32 = 2013;

    /// Device selection names an unknown device or selects two per direction
    pub const DEVICE_SELECTION_INVALID: i32 = 2014;
}

/// Log a playback error with structured context
pub fn log_player_error(err: &PlayerError, context: &str) {
    error!(
        "Player error in {}: code={}, component=MixPlayer, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Playback-related errors
///
/// Covers session validation, per-track decoding, device/stream management
/// and the façade's own lifecycle.
///
/// Error code ranges: 2001-2014
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerError {
    /// Session JSON is malformed or fails validation
    SessionInvalid { reason: String },

    /// A track source could not be opened or decoded
    DecodeFailed {
        track_id: String,
        path: String,
        reason: String,
    },

    /// No usable audio device
    DeviceUnavailable { reason: String },

    /// Failed to open audio stream
    StreamOpenFailed { reason: String },

    /// A running stream failed
    StreamFailure { reason: String },

    /// Filesystem error outside of decoding
    Io { details: String },

    /// Operation needs a loaded session
    NoSession { operation: String },

    /// Playback was disabled at init
    NotEnabled { operation: String },

    /// Operation conflicts with an operation in progress
    Busy { reason: String },

    /// Engine has been shut down
    EngineShutDown,

    /// Unknown or destroyed bridge handle
    InvalidHandle { handle: u64 },

    /// Offline render failed
    ExportFailed { reason: String },

    /// Settings JSON is malformed or out of range
    SettingsInvalid { reason: String },

    /// Device selection cannot be applied
    DeviceSelectionInvalid { reason: String },
}

impl ErrorCode for PlayerError {
    fn code(&self) -> i32 {
        match self {
            PlayerError::SessionInvalid { .. } => PlayerErrorCodes::SESSION_INVALID,
            PlayerError::DecodeFailed { .. } => PlayerErrorCodes::DECODE_FAILED,
            PlayerError::DeviceUnavailable { .. } => PlayerErrorCodes::DEVICE_UNAVAILABLE,
            PlayerError::StreamOpenFailed { .. } => PlayerErrorCodes::STREAM_OPEN_FAILED,
            PlayerError::StreamFailure { .. } => PlayerErrorCodes::STREAM_FAILURE,
            PlayerError::Io { .. } => PlayerErrorCodes::IO,
            PlayerError::NoSession { .. } => PlayerErrorCodes::NO_SESSION,
            PlayerError::NotEnabled { .. } => PlayerErrorCodes::NOT_ENABLED,
            PlayerError::Busy { .. } => PlayerErrorCodes::BUSY,
            PlayerError::EngineShutDown => PlayerErrorCodes::ENGINE_SHUT_DOWN,
            PlayerError::InvalidHandle { .. } => PlayerErrorCodes::INVALID_HANDLE,
            PlayerError::ExportFailed { .. } => PlayerErrorCodes::EXPORT_FAILED,
            PlayerError::SettingsInvalid { .. } => PlayerErrorCodes::SETTINGS_INVALID,
            PlayerError::DeviceSelectionInvalid { .. } => {
                PlayerErrorCodes::DEVICE_SELECTION_INVALID
            }
        }
    }

    fn message(&self) -> String {
        match self {
            PlayerError::SessionInvalid { reason } => format!("Invalid session: {}", reason),
            PlayerError::DecodeFailed {
                track_id,
                path,
                reason,
            } => format!(
                "Track '{}' could not be decoded from {}: {}",
                track_id, path, reason
            ),
            PlayerError::DeviceUnavailable { reason } => {
                format!("Audio device unavailable: {}", reason)
            }
            PlayerError::StreamOpenFailed { reason } => {
                format!("Failed to open audio stream: {}", reason)
            }
            PlayerError::StreamFailure { reason } => format!("Audio stream failed: {}", reason),
            PlayerError::Io { details } => format!("I/O error: {}", details),
            PlayerError::NoSession { operation } => {
                format!("{} requires a loaded session. Call set() first.", operation)
            }
            PlayerError::NotEnabled { operation } => {
                format!("{} is unavailable: playback was disabled at init", operation)
            }
            PlayerError::Busy { reason } => format!("Engine busy: {}", reason),
            PlayerError::EngineShutDown => "Engine has been shut down".to_string(),
            PlayerError::InvalidHandle { handle } => {
                format!("Invalid or destroyed player handle {}", handle)
            }
            PlayerError::ExportFailed { reason } => format!("Export failed: {}", reason),
            PlayerError::SettingsInvalid { reason } => format!("Invalid settings: {}", reason),
            PlayerError::DeviceSelectionInvalid { reason } => {
                format!("Invalid device selection: {}", reason)
            }
        }
    }
}

impl fmt::Display for PlayerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PlayerError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for PlayerError {}

impl From<std::io::Error> for PlayerError {
    fn from(err: std::io::Error) -> Self {
        PlayerError::Io {
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for PlayerError {
    fn from(err: serde_json::Error) -> Self {
        PlayerError::SessionInvalid {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_error_codes() {
        assert_eq!(
            PlayerError::SessionInvalid {
                reason: "x".to_string()
            }
            .code(),
            PlayerErrorCodes::SESSION_INVALID
        );
        assert_eq!(
            PlayerError::EngineShutDown.code(),
            PlayerErrorCodes::ENGINE_SHUT_DOWN
        );
        assert_eq!(
            PlayerError::InvalidHandle { handle: 7 }.code(),
            PlayerErrorCodes::INVALID_HANDLE
        );
        assert_eq!(
            PlayerError::ExportFailed {
                reason: "x".to_string()
            }
            .code(),
            2012
        );
    }

    #[test]
    fn test_decode_error_message_names_track() {
        let err = PlayerError::DecodeFailed {
            track_id: "vocal".to_string(),
            path: "/tmp/missing.wav".to_string(),
            reason: "not found".to_string(),
        };
        let msg = err.message();
        assert!(msg.contains("vocal"));
        assert!(msg.contains("/tmp/missing.wav"));
    }

    #[test]
    fn test_player_error_display() {
        let err = PlayerError::NoSession {
            operation: "seek".to_string(),
        };
        let display = format!("{}", err);
        assert!(display.contains("PlayerError"));
        assert!(display.contains(&err.code().to_string()));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: PlayerError = json_err.into();
        assert_eq!(err.code(), PlayerErrorCodes::SESSION_INVALID);
    }
}
