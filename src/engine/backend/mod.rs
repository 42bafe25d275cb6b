//! Device backend abstraction.
//!
//! The engine never talks to a platform audio API directly: it enumerates
//! devices and opens streams through [`AudioBackend`]. A stream stays alive
//! for as long as its handle; dropping the handle stops the callbacks before
//! returning, so the renderer or capture moved into it is released only
//! after the audio thread is done with it.

use std::sync::Arc;

use crate::audio::{InputCapture, OutputRenderer};
use crate::error::PlayerError;
use crate::model::MixerDevice;

/// Parameters for opening a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    /// Device name; `None` selects the system default
    pub device: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// What a backend actually opened (or would open).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub device: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Called from a backend thread when a running stream fails.
pub type StreamErrorSink = Arc<dyn Fn(String) + Send + Sync>;

pub trait StreamHandle {
    fn info(&self) -> &StreamInfo;
}

/// Trait implemented by platform audio backends.
pub trait AudioBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Full device snapshot, one entry per device and direction.
    fn enumerate(&self) -> Result<Vec<MixerDevice>, PlayerError>;

    /// Resolve the input configuration a capture stream would use.
    fn input_config(
        &self,
        device: Option<&str>,
        preferred_rate: u32,
    ) -> Result<StreamInfo, PlayerError>;

    fn open_output(
        &self,
        request: &StreamRequest,
        renderer: OutputRenderer,
        on_error: StreamErrorSink,
    ) -> Result<Box<dyn StreamHandle>, PlayerError>;

    fn open_input(
        &self,
        request: &StreamRequest,
        capture: InputCapture,
        on_error: StreamErrorSink,
    ) -> Result<Box<dyn StreamHandle>, PlayerError>;
}

mod cpal;
pub use cpal::CpalBackend;

mod stub;
pub use stub::{StubBackend, StubConfig};
