//! Background worker tasks
//!
//! Long-running drivers for grab sessions.

pub mod grabber;

pub use grabber::GrabWorker;
