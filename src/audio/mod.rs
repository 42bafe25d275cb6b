// Real-time audio side: everything here runs inside device callbacks.
pub mod buffer_pool;
pub mod capture;
pub mod renderer;

pub use buffer_pool::{BufferPool, BufferPoolChannels, CaptureBlock};
pub use capture::InputCapture;
pub use renderer::{OutputRenderer, RtEvent};
