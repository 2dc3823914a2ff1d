//! The output files of one recording session.

use super::{LazySink, SinkFactory};
use crate::error::SinkError;
use chrono::Local;
use image::RgbImage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tandem_capture::FrameKind;
use tracing::{debug, error};

/// Path of a stream's output file: `<dir>/<key>[_<label>]_<stamp>.<ext>`.
pub fn output_path(dir: &Path, key: &str, label: Option<&str>, stamp: &str, ext: &str) -> PathBuf {
    let name = match label {
        Some(label) => format!("{key}_{label}_{stamp}.{ext}"),
        None => format!("{key}_{stamp}.{ext}"),
    };
    dir.join(name)
}

/// A finished (or in-progress) output file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputFile {
    pub stream: String,
    pub path: PathBuf,
    pub frames: u64,
    pub resolution: Option<(u32, u32)>,
}

/// Lazily created sinks keyed by stream name, all sharing one directory and
/// timestamp. Dropping the set closes every sink it opened.
pub struct SinkSet {
    dir: PathBuf,
    label: Option<String>,
    stamp: String,
    factory: Arc<dyn SinkFactory>,
    sinks: Vec<(String, LazySink)>,
}

impl SinkSet {
    /// Create the output directory if needed and stamp the session with the local time.
    pub fn create(
        dir: impl Into<PathBuf>,
        label: Option<&str>,
        factory: Arc<dyn SinkFactory>,
    ) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            label: label.map(str::to_string),
            stamp: Local::now().format("%Y%m%d_%H%M%S").to_string(),
            factory,
            sinks: Vec::new(),
        })
    }

    /// Override the timestamp used in file names.
    pub fn with_stamp(mut self, stamp: &str) -> Self {
        self.stamp = stamp.to_string();
        self
    }

    /// Stream key for a source's frames of one kind, e.g. `tof_depth`, `usb_camera`.
    pub fn stream_key(source: &str, kind: FrameKind) -> String {
        format!("{}_{}", source, kind.file_suffix())
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        output_path(
            &self.dir,
            key,
            self.label.as_deref(),
            &self.stamp,
            self.factory.extension(),
        )
    }

    fn find(&self, key: &str) -> Option<&LazySink> {
        self.sinks.iter().find(|(k, _)| k == key).map(|(_, s)| s)
    }

    /// Whether the stream can take a frame of this size. Streams without a
    /// sink yet accept anything.
    pub fn accepts(&self, key: &str, dimensions: (u32, u32)) -> bool {
        self.find(key).is_none_or(|sink| sink.accepts(dimensions))
    }

    pub fn frames_written(&self, key: &str) -> u64 {
        self.find(key).map_or(0, LazySink::frames_written)
    }

    /// Append a frame to the stream, opening its sink on first use.
    pub fn write(&mut self, key: &str, frame_rate: f32, frame: &RgbImage) -> Result<(), SinkError> {
        let index = match self.sinks.iter().position(|(k, _)| k == key) {
            Some(index) => index,
            None => {
                let path = self.path_for(key);
                debug!("New stream {} -> {}", key, path.display());
                self.sinks
                    .push((key.to_string(), LazySink::new(path, frame_rate)));
                self.sinks.len() - 1
            }
        };
        let factory = self.factory.as_ref();
        self.sinks[index].1.write(factory, frame)
    }

    /// Close every sink. All sinks are attempted; the first error is returned.
    pub fn close_all(&mut self) -> Result<(), SinkError> {
        let mut first_error = None;
        for (key, sink) in &mut self.sinks {
            if let Err(e) = sink.close() {
                error!("Failed to close stream {}: {}", key, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn outputs(&self) -> Vec<OutputFile> {
        self.sinks
            .iter()
            .map(|(key, sink)| OutputFile {
                stream: key.clone(),
                path: sink.path().to_path_buf(),
                frames: sink.frames_written(),
                resolution: sink.resolution(),
            })
            .collect()
    }
}

impl Drop for SinkSet {
    fn drop(&mut self) {
        let _ = self.close_all();
    }
}
