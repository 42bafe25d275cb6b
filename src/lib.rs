// MixPlayer - real-time multi-track mixing and playback engine
// Sample-accurate track scheduling with lock-free control/audio handoff,
// synchronized recording and device hot-swap

// Module declarations
pub mod api;
pub mod audio;
pub mod config;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod export;
pub mod managers;
pub mod mixer;
pub mod model;
pub mod recorder;

// Re-exports for convenience
pub use config::AppConfig;
pub use engine::{LatencyInfo, MixPlayer, PlayerOptions, PlayerState};
pub use error::{ErrorCode, PlayerError, RecorderError};
pub use managers::{EventCategory, PlayerEvent};
pub use model::{DeviceDirection, MixerDevice, MixerDeviceList, MixerSession, MixerSettings, MixerTrack};
pub use recorder::RecorderState;
