// Recorder error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Recorder error code constants exposed through the C bridge
///
/// Error code range: 3001-3008
pub struct RecorderErrorCodes {}

impl RecorderErrorCodes {
    /// start called before a successful prepare
    pub const NOT_PREPARED: i32 = 3001;

    /// Recorder is already capturing
    pub const ALREADY_RECORDING: i32 = 3002;

    /// Destination extension is not a supported container
    pub const UNSUPPORTED_FORMAT: i32 = 3003;

    /// Destination could not be created or opened
    pub const IO: i32 = 3004;

    /// No usable input device
    pub const DEVICE_UNAVAILABLE: i32 = 3005;

    /// Writing or finalizing the destination failed mid-recording
    pub const WRITE_FAILED: i32 = 3006;

    /// Recording was disabled at init
    pub const RECORDING_DISABLED: i32 = 3007;

    /// Engine has been shut down
    pub const ENGINE_SHUT_DOWN: i32 = 3008;
}

/// Log a recorder error with structured context
pub fn log_recorder_error(err: &RecorderError, context: &str) {
    error!(
        "Recorder error in {}: code={}, component=Recorder, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Recorder-related errors
///
/// Error code ranges: 3001-3008
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderError {
    NotPrepared,
    AlreadyRecording,
    UnsupportedFormat { path: String },
    Io { path: String, details: String },
    DeviceUnavailable { reason: String },
    WriteFailed { details: String },
    RecordingDisabled,
    EngineShutDown,
}

impl ErrorCode for RecorderError {
    fn code(&self) -> i32 {
        match self {
            RecorderError::NotPrepared => RecorderErrorCodes::NOT_PREPARED,
            RecorderError::AlreadyRecording => RecorderErrorCodes::ALREADY_RECORDING,
            RecorderError::UnsupportedFormat { .. } => RecorderErrorCodes::UNSUPPORTED_FORMAT,
            RecorderError::Io { .. } => RecorderErrorCodes::IO,
            RecorderError::DeviceUnavailable { .. } => RecorderErrorCodes::DEVICE_UNAVAILABLE,
            RecorderError::WriteFailed { .. } => RecorderErrorCodes::WRITE_FAILED,
            RecorderError::RecordingDisabled => RecorderErrorCodes::RECORDING_DISABLED,
            RecorderError::EngineShutDown => RecorderErrorCodes::ENGINE_SHUT_DOWN,
        }
    }

    fn message(&self) -> String {
        match self {
            RecorderError::NotPrepared => {
                "Recorder not prepared. Call prepare_recorder() first.".to_string()
            }
            RecorderError::AlreadyRecording => "Recorder is already recording".to_string(),
            RecorderError::UnsupportedFormat { path } => {
                format!("Unsupported recording format for {} (expected .wav)", path)
            }
            RecorderError::Io { path, details } => {
                format!("Cannot write recording to {}: {}", path, details)
            }
            RecorderError::DeviceUnavailable { reason } => {
                format!("Input device unavailable: {}", reason)
            }
            RecorderError::WriteFailed { details } => {
                format!("Recording write failed: {}", details)
            }
            RecorderError::RecordingDisabled => {
                "Recording was disabled at init".to_string()
            }
            RecorderError::EngineShutDown => "Engine has been shut down".to_string(),
        }
    }
}

impl fmt::Display for RecorderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RecorderError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for RecorderError {}

impl From<hound::Error> for RecorderError {
    fn from(err: hound::Error) -> Self {
        RecorderError::WriteFailed {
            details: err.to_string(),
        }
    }
}
