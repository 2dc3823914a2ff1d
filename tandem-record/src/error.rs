//! Error types for recording sessions.

use std::path::PathBuf;
use tandem_capture::CaptureError;
use thiserror::Error;

/// Errors raised by a video sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to start encoder for {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write frame to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Encoder for {path} exited with {status}")]
    Encoder { path: PathBuf, status: String },

    #[error("Frame is {got:?} but sink for {path} was opened at {expected:?}")]
    ResolutionMismatch {
        path: PathBuf,
        expected: (u32, u32),
        got: (u32, u32),
    },

    #[error("Sink for {0} is already closed")]
    Closed(PathBuf),
}

/// Session-level failures. Anything that reaches the caller ended the session.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Source '{name}' failed: {source}")]
    Source {
        name: String,
        #[source]
        source: CaptureError,
    },

    #[error("Stream '{stream}' failed: {source}")]
    Sink {
        stream: String,
        #[source]
        source: SinkError,
    },

    #[error("Failed to finalize output: {0}")]
    Finalize(#[from] SinkError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecordError {
    pub fn source_failed(name: &str, source: CaptureError) -> Self {
        RecordError::Source {
            name: name.to_string(),
            source,
        }
    }
}
