//! Caller-facing data model: session, settings and device snapshots.
//!
//! Everything here is plain serde data validated once at the boundary.

pub mod device;
pub mod session;
pub mod settings;

pub use device::{DeviceDirection, MixerDevice, MixerDeviceList};
pub use session::{MixerSession, MixerTrack};
pub use settings::MixerSettings;
