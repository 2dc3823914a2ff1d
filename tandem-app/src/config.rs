//! Recorder configuration file.
//!
//! Every field has a default, so an empty file (or no file) is valid:
//!
//! ```toml
//! output_dir = "recordings"
//! duration_secs = 30
//! fps = 20
//!
//! [usb]
//! index = 0
//! width = 640
//! height = 480
//!
//! [tof]
//! device = "/dev/video2"
//! layout = "stacked"
//!
//! [convert]
//! max_distance_mm = 4000
//! depth_colormap = "jet"
//!
//! [encoder]
//! codec = "libx264"
//! quality = 23
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tandem_capture::{TofLayout, TofSettings};
use tandem_record::{ConvertOptions, FfmpegOptions, SyncConfig};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid ToF setting: {0}")]
    Tof(String),
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub enable_tracy: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            enable_tracy: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsbConfig {
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Try indices from 0 up to `max_probe_index` and keep the first that works.
    pub auto_detect: bool,
    pub max_probe_index: u32,
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: 640,
            height: 480,
            fps: 30,
            auto_detect: false,
            max_probe_index: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TofConfig {
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// `depth`, `stacked` or `raw`.
    pub layout: String,
    pub fps: f32,
}

impl Default for TofConfig {
    fn default() -> Self {
        let defaults = TofSettings::default();
        Self {
            device: defaults.device,
            width: defaults.width,
            height: defaults.height,
            layout: "depth".to_string(),
            fps: defaults.fps,
        }
    }
}

impl TofConfig {
    pub fn layout(&self) -> Result<TofLayout, ConfigError> {
        self.layout.parse().map_err(ConfigError::Tof)
    }

    pub fn settings(&self) -> Result<TofSettings, ConfigError> {
        Ok(TofSettings {
            device: self.device.clone(),
            width: self.width,
            height: self.height,
            layout: self.layout()?,
            fps: self.fps,
        })
    }
}

/// Tuning of the synchronized loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncTuning {
    /// Per-source wait within a cycle; derived from `fps` when unset.
    pub acquire_timeout_ms: Option<u64>,
    pub max_cycles: Option<u64>,
    pub timing_log_interval: u64,
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: None,
            max_cycles: None,
            timing_log_interval: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub output_dir: PathBuf,
    /// Recording length; zero records until interrupted.
    pub duration_secs: f64,
    /// Cycle rate of synchronized recording.
    pub fps: f32,
    /// How long independent workers get to finish after a stop.
    pub grace_secs: f64,
    pub logging: LoggingConfig,
    pub usb: UsbConfig,
    pub tof: TofConfig,
    pub convert: ConvertOptions,
    pub encoder: FfmpegOptions,
    pub sync: SyncTuning,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("recordings"),
            duration_secs: 10.0,
            fps: 20.0,
            grace_secs: 5.0,
            logging: LoggingConfig::default(),
            usb: UsbConfig::default(),
            tof: TofConfig::default(),
            convert: ConvertOptions::default(),
            encoder: FfmpegOptions::default(),
            sync: SyncTuning::default(),
        }
    }
}

impl RecorderConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn duration(&self) -> Option<Duration> {
        (self.duration_secs > 0.0).then(|| Duration::from_secs_f64(self.duration_secs))
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs_f64(self.grace_secs.max(0.0))
    }

    pub fn sync_config(&self) -> SyncConfig {
        let mut sync = SyncConfig::at_rate(self.fps);
        sync.duration = self.duration();
        sync.max_cycles = self.sync.max_cycles;
        sync.timing_log_interval = self.sync.timing_log_interval;
        if let Some(ms) = self.sync.acquire_timeout_ms {
            sync.acquire_timeout = Duration::from_millis(ms);
        }
        sync
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_record::Colormap;

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config = RecorderConfig::parse("", Path::new("empty.toml")).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("recordings"));
        assert_eq!(config.duration(), Some(Duration::from_secs(10)));
        assert_eq!(config.usb.width, 640);
        assert_eq!(config.tof.settings().unwrap(), TofSettings::default());
        assert_eq!(config.encoder, FfmpegOptions::default());
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let text = r#"
            duration_secs = 0
            fps = 10

            [tof]
            device = "/dev/video2"
            layout = "stacked"

            [convert]
            depth_colormap = "jet"

            [encoder]
            codec = "libx264"
            shutdown_timeout = 2.5

            [sync]
            max_cycles = 50
        "#;
        let config = RecorderConfig::parse(text, Path::new("test.toml")).unwrap();
        assert_eq!(config.duration(), None);
        assert_eq!(config.tof.layout().unwrap(), TofLayout::Stacked);
        assert_eq!(config.tof.width, 240);
        assert_eq!(config.convert.depth_colormap, Some(Colormap::Jet));
        assert_eq!(config.convert.max_distance_mm, 4000.0);
        assert_eq!(config.encoder.codec, "libx264");
        assert_eq!(config.encoder.container, "mp4");
        assert_eq!(config.encoder.shutdown_timeout, Duration::from_millis(2500));

        let sync = config.sync_config();
        assert_eq!(sync.cycle_period, Duration::from_millis(100));
        assert_eq!(sync.max_cycles, Some(50));
        assert_eq!(sync.duration, None);
        assert!(sync.acquire_timeout < sync.cycle_period);
    }

    #[test]
    fn test_bad_layout_is_reported() {
        let config = RecorderConfig::parse("[tof]\nlayout = \"sideways\"", Path::new("x.toml")).unwrap();
        assert!(matches!(config.tof.settings(), Err(ConfigError::Tof(_))));
    }

    #[test]
    fn test_load_reports_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("tandem.toml");
        std::fs::write(&path, "fps = \"fast\"").unwrap();
        let err = RecorderConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("tandem.toml"));

        let missing = RecorderConfig::load(&tmp.path().join("missing.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
    }
}
