//! One-shot checks against a live source.

use crate::convert::Converter;
use crate::error::RecordError;
use crate::sink::SinkSet;
use chrono::Local;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tandem_capture::{CaptureSource, FrameKind};
use tracing::info;

/// A frame seen while probing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbedFrame {
    pub kind: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Whether a source delivered a frame, and what it looked like.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub source: String,
    pub passed: bool,
    pub latency_ms: f64,
    pub frames: Vec<ProbedFrame>,
    pub error: Option<String>,
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.passed {
            write!(f, "{}: PASS ({:.1}ms)", self.source, self.latency_ms)?;
            for frame in &self.frames {
                write!(f, "\n  {}: {}x{}", frame.kind, frame.width, frame.height)?;
            }
            Ok(())
        } else {
            write!(
                f,
                "{}: FAIL - {}",
                self.source,
                self.error.as_deref().unwrap_or("no frames")
            )
        }
    }
}

fn kind_name(kind: FrameKind) -> &'static str {
    match kind {
        FrameKind::Depth => "depth",
        FrameKind::Amplitude => "amplitude",
        FrameKind::Color => "color",
    }
}

/// Try to acquire one sample from `source`.
pub fn probe(source: &mut dyn CaptureSource, timeout: Duration) -> ProbeReport {
    let started = Instant::now();
    let result = source.acquire(timeout);
    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

    let (frames, error) = match result {
        Ok(sample) => (
            sample
                .frames
                .iter()
                .map(|frame| {
                    let (width, height) = frame.dimensions();
                    ProbedFrame {
                        kind: kind_name(frame.kind()),
                        width,
                        height,
                    }
                })
                .collect::<Vec<_>>(),
            None,
        ),
        Err(e) => (Vec::new(), Some(e.to_string())),
    };

    ProbeReport {
        source: source.name().to_string(),
        passed: !frames.is_empty(),
        latency_ms,
        frames,
        error,
    }
}

/// Save one converted frame per stream as PNG into `dir`.
pub fn snapshot(
    source: &mut dyn CaptureSource,
    converter: &Converter,
    dir: &Path,
    timeout: Duration,
) -> Result<Vec<PathBuf>, RecordError> {
    std::fs::create_dir_all(dir)?;
    let sample = source
        .acquire(timeout)
        .map_err(|e| RecordError::source_failed(source.name(), e))?;

    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let mut saved = Vec::with_capacity(sample.frames.len());
    for frame in &sample.frames {
        let key = SinkSet::stream_key(source.name(), frame.kind());
        let path = dir.join(format!("{}_{}.png", key, stamp));
        converter.convert(frame).save(&path)?;
        info!("Saved {}", path.display());
        saved.push(path);
    }
    Ok(saved)
}
