//! Engine module housing the playback core.
//!
//! `core` is the caller-facing façade, `controller` the worker that owns all
//! state transitions, `transport` the state machine and the atomics shared
//! with the audio thread, and `backend` the device abstraction.

pub mod backend;
mod command;
mod controller;
pub mod core;
pub mod transport;

pub use backend::{AudioBackend, CpalBackend, StubBackend, StubConfig};
pub use core::{LatencyInfo, MixPlayer, PlayerOptions};
pub use transport::{PlayerState, TransportAction};
