//! Lossless per-frame dumps of 16-bit planes.
//!
//! Video sinks only see 8-bit display frames. For analysis every plane is
//! also kept as a 16-bit PNG next to a JSON file of statistics. Depth is
//! additionally written as CSV (one image row per line) for spreadsheets:
//!
//! ```text
//! tof_raw_20260101_120000/
//!   depth_0001.png
//!   depth_0001.csv
//!   amplitude_0001.png
//!   frame_0001.json
//! ```

use crate::error::RecordError;
use crate::stop::StopSignal;
use chrono::Local;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tandem_capture::{CaptureSource, Frame, Gray16Image, Sample};
use tracing::{debug, info};

/// Statistics of one plane. Zero pixels carry no measurement and are
/// excluded from min, max and mean.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaneStats {
    pub width: u32,
    pub height: u32,
    pub valid: u64,
    pub total: u64,
    pub min: Option<u16>,
    pub max: Option<u16>,
    pub mean: Option<f64>,
}

impl PlaneStats {
    pub fn of(image: &Gray16Image) -> Self {
        let (width, height) = image.dimensions();
        let mut valid = 0u64;
        let mut sum = 0u64;
        let mut min = u16::MAX;
        let mut max = 0u16;
        for &value in image.as_raw() {
            if value == 0 {
                continue;
            }
            valid += 1;
            sum += u64::from(value);
            min = min.min(value);
            max = max.max(value);
        }
        let any = valid > 0;
        Self {
            width,
            height,
            valid,
            total: u64::from(width) * u64::from(height),
            min: any.then_some(min),
            max: any.then_some(max),
            mean: any.then(|| sum as f64 / valid as f64),
        }
    }
}

#[derive(Debug, Serialize)]
struct FrameMeta {
    index: u64,
    sequence: u64,
    timestamp: f64,
    raw: bool,
    planes: BTreeMap<&'static str, PlaneStats>,
}

/// Writes numbered 16-bit plane dumps into one directory.
pub struct RawDump {
    dir: PathBuf,
    written: u64,
}

impl RawDump {
    /// Create `<parent>/tof_raw_<timestamp>/`.
    pub fn create(parent: &Path) -> std::io::Result<Self> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        Self::create_in(parent.join(format!("tof_raw_{}", stamp)))
    }

    /// Dump into exactly `dir`.
    pub fn create_in(dir: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, written: 0 })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn frames_written(&self) -> u64 {
        self.written
    }

    /// Write every 16-bit plane of `sample` and its statistics. Color frames
    /// are not part of the dump. Returns the 1-based frame number.
    pub fn write(&mut self, sample: &Sample) -> Result<u64, RecordError> {
        let index = self.written + 1;
        let mut planes = BTreeMap::new();
        let mut timestamp = 0.0;
        let mut raw = false;

        for frame in &sample.frames {
            let (name, image) = match frame {
                Frame::Depth(depth) => {
                    raw = depth.raw;
                    ("depth", &depth.image)
                }
                Frame::Amplitude(amplitude) => ("amplitude", &amplitude.image),
                Frame::Color(_) => continue,
            };
            timestamp = frame.timestamp();
            image.save(self.dir.join(format!("{}_{:04}.png", name, index)))?;
            if name == "depth" {
                write_csv(&self.dir.join(format!("depth_{:04}.csv", index)), image)?;
            }
            planes.insert(name, PlaneStats::of(image));
        }

        let meta = FrameMeta {
            index,
            sequence: sample.sequence,
            timestamp,
            raw,
            planes,
        };
        let mut out = BufWriter::new(File::create(self.dir.join(format!("frame_{:04}.json", index)))?);
        serde_json::to_writer_pretty(&mut out, &meta)?;
        out.flush()?;

        self.written = index;
        Ok(index)
    }

    /// Dump samples from `source` until the duration or frame limit is
    /// reached or stop is signalled. Returns the number of frames written.
    pub fn record(
        &mut self,
        source: &mut dyn CaptureSource,
        stop: &StopSignal,
        duration: Option<Duration>,
        max_frames: Option<u64>,
        timeout: Duration,
    ) -> Result<u64, RecordError> {
        info!("Dumping raw frames from {} to {}", source.name(), self.dir.display());
        let started = Instant::now();
        let first = self.written;

        while !stop.is_stopped()
            && !duration.is_some_and(|d| started.elapsed() >= d)
            && !max_frames.is_some_and(|max| self.written - first >= max)
        {
            match source.acquire(timeout) {
                Ok(sample) if !sample.is_empty() => {
                    let index = self.write(&sample)?;
                    if index % 10 == 0 {
                        info!("Dumped {} frames", index - first);
                    }
                }
                Ok(_) => {}
                Err(e) if e.is_fatal() => {
                    source.stop();
                    return Err(RecordError::source_failed(source.name(), e));
                }
                Err(e) => {
                    debug!("{} frame capture failed: {}", source.name(), e);
                    stop.wait_timeout(Duration::from_millis(10));
                }
            }
        }

        source.stop();
        Ok(self.written - first)
    }
}

fn write_csv(path: &Path, image: &Gray16Image) -> std::io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for row in image.rows() {
        for (i, pixel) in row.enumerate() {
            if i > 0 {
                out.write_all(b",")?;
            }
            write!(out, "{}", pixel.0[0])?;
        }
        out.write_all(b"\n")?;
    }
    out.flush()
}
