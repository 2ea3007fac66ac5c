//! Persistence sinks for decoded media

pub mod wave;

pub use wave::WaveWriter;
