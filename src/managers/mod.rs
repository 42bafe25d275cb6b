// Managers Module
//
// Focused manager classes owned by the control worker.
//
// Each manager handles one specific concern:
// - EventHub: per-instance event fan-out
// - DeviceManager: device list snapshot and selection

pub mod device_manager;
pub mod event_hub;

pub use device_manager::{DeviceManager, SelectionChange};
pub use event_hub::{EventCategory, EventHub, ListenerFn, PlayerEvent};
