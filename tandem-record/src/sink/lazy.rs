//! Sink that opens its encoder on the first frame.

use super::{SinkFactory, SinkSpec, VideoSink};
use crate::error::SinkError;
use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing::info;

enum State {
    Pending,
    Open {
        sink: Box<dyn VideoSink>,
        width: u32,
        height: u32,
    },
    Closed,
}

/// One output stream. The resolution is taken from the first frame and
/// never changes afterwards.
pub struct LazySink {
    path: PathBuf,
    frame_rate: f32,
    state: State,
    frames: u64,
    resolution: Option<(u32, u32)>,
}

impl LazySink {
    pub fn new(path: PathBuf, frame_rate: f32) -> Self {
        Self {
            path,
            frame_rate,
            state: State::Pending,
            frames: 0,
            resolution: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, State::Open { .. })
    }

    /// Resolution the encoder was opened at. Kept after closing.
    pub fn resolution(&self) -> Option<(u32, u32)> {
        self.resolution
    }

    /// Whether a frame of this size can be written.
    pub fn accepts(&self, dimensions: (u32, u32)) -> bool {
        match self.state {
            State::Pending => true,
            State::Open { width, height, .. } => (width, height) == dimensions,
            State::Closed => false,
        }
    }

    pub fn write(&mut self, factory: &dyn SinkFactory, frame: &RgbImage) -> Result<(), SinkError> {
        if let State::Pending = self.state {
            let (width, height) = frame.dimensions();
            let sink = factory.open(&SinkSpec {
                path: self.path.clone(),
                width,
                height,
                frame_rate: self.frame_rate,
            })?;
            info!("Video writer initialized: {} {}x{}", self.path.display(), width, height);
            self.resolution = Some((width, height));
            self.state = State::Open {
                sink,
                width,
                height,
            };
        }

        match &mut self.state {
            State::Open { sink, width, height } => {
                if frame.dimensions() != (*width, *height) {
                    return Err(SinkError::ResolutionMismatch {
                        path: self.path.clone(),
                        expected: (*width, *height),
                        got: frame.dimensions(),
                    });
                }
                sink.write(frame)?;
                self.frames += 1;
                Ok(())
            }
            State::Pending | State::Closed => Err(SinkError::Closed(self.path.clone())),
        }
    }

    /// Finalize the file. Only the first call reaches the encoder.
    pub fn close(&mut self) -> Result<(), SinkError> {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Open { mut sink, .. } => sink.close(),
            State::Pending | State::Closed => Ok(()),
        }
    }
}
