//! Local media processing

pub mod audio;

pub use audio::{AudioFrame, AudioFrameProcessor, AudioSink};
