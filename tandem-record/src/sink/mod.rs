//! Video sinks: one encoder per output file.

mod ffmpeg;
mod lazy;
mod set;

pub use ffmpeg::{FfmpegFactory, FfmpegOptions, FfmpegSink};
pub use lazy::LazySink;
pub use set::{OutputFile, SinkSet, output_path};

use crate::error::SinkError;
use image::RgbImage;
use std::path::PathBuf;

/// Parameters an encoder is opened with. Fixed for the sink's lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkSpec {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f32,
}

/// An open encoder bound to one file.
pub trait VideoSink: Send {
    /// Append a frame. Frames are written in call order.
    fn write(&mut self, frame: &RgbImage) -> Result<(), SinkError>;

    /// Flush and finalize the file. Calling it again is a no-op.
    fn close(&mut self) -> Result<(), SinkError>;
}

/// Creates encoders once the first frame's size is known.
pub trait SinkFactory: Send + Sync {
    fn open(&self, spec: &SinkSpec) -> Result<Box<dyn VideoSink>, SinkError>;

    /// File extension of the container this factory writes.
    fn extension(&self) -> &str;
}
