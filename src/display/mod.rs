//! Display components for lock-free frame hand-off and rendering

pub mod frame_channel;
pub mod surface;

pub use frame_channel::FrameChannel;
pub use surface::PresentationSurface;
