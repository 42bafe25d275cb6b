// Error types for the mixplayer engine
//
// This module defines the error enums for playback and recording, each
// carrying a stable numeric code so callers on the far side of the C bridge
// can branch on them without parsing messages.

mod player;
mod recorder;

pub use player::{log_player_error, PlayerError, PlayerErrorCodes};
pub use recorder::{log_recorder_error, RecorderError, RecorderErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the FFI boundary.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
