//! Video encoding through an ffmpeg subprocess fed raw RGB frames on stdin.

use super::{SinkFactory, SinkSpec, VideoSink};
use crate::error::SinkError;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Encoder settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FfmpegOptions {
    pub ffmpeg_path: String,
    /// Output container, also used as the file extension.
    pub container: String,
    pub codec: String,
    /// Fixed quantizer passed as `-q:v` when set.
    pub quality: Option<u32>,
    /// How long `close` waits for the encoder to finish the file.
    #[serde(with = "secs")]
    pub shutdown_timeout: Duration,
}

impl Default for FfmpegOptions {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            container: "mp4".to_string(),
            codec: "mpeg4".to_string(),
            quality: Some(5),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// Opens `FfmpegSink`s.
#[derive(Debug, Clone, Default)]
pub struct FfmpegFactory {
    options: FfmpegOptions,
}

impl FfmpegFactory {
    pub fn new(options: FfmpegOptions) -> Self {
        Self { options }
    }

    /// Build the ffmpeg command for one output file.
    pub fn build_command(&self, spec: &SinkSpec) -> Command {
        let mut cmd = Command::new(&self.options.ffmpeg_path);
        cmd.arg("-y").arg("-loglevel").arg("error");

        // Raw RGB frames on stdin
        cmd.arg("-f").arg("rawvideo");
        cmd.arg("-pix_fmt").arg("rgb24");
        cmd.arg("-s").arg(format!("{}x{}", spec.width, spec.height));
        cmd.arg("-r").arg(format!("{}", spec.frame_rate));
        cmd.arg("-i").arg("pipe:0");

        cmd.arg("-an");
        cmd.arg("-c:v").arg(&self.options.codec);
        if let Some(q) = self.options.quality {
            cmd.arg("-q:v").arg(q.to_string());
        }
        // 4:2:0 needs even dimensions.
        cmd.arg("-vf").arg("pad=ceil(iw/2)*2:ceil(ih/2)*2");
        cmd.arg("-pix_fmt").arg("yuv420p");

        cmd.arg(&spec.path);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        // Keep terminal signals away from the encoder; the recorder ends the
        // file itself by closing stdin.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        cmd
    }
}

impl SinkFactory for FfmpegFactory {
    fn open(&self, spec: &SinkSpec) -> Result<Box<dyn VideoSink>, SinkError> {
        let sink = FfmpegSink::spawn(self.build_command(spec), spec, self.options.shutdown_timeout)?;
        Ok(Box::new(sink))
    }

    fn extension(&self) -> &str {
        &self.options.container
    }
}

/// A running ffmpeg process writing one file.
pub struct FfmpegSink {
    path: PathBuf,
    child: Option<Child>,
    stdin: Option<BufWriter<ChildStdin>>,
    stderr_thread: Option<JoinHandle<()>>,
    frame_size: (u32, u32),
    shutdown_timeout: Duration,
}

impl FfmpegSink {
    fn spawn(mut cmd: Command, spec: &SinkSpec, shutdown_timeout: Duration) -> Result<Self, SinkError> {
        let spawn_error = |source| SinkError::Spawn {
            path: spec.path.clone(),
            source,
        };
        let mut child = cmd.spawn().map_err(spawn_error)?;

        let stdin = child.stdin.take().ok_or_else(|| {
            spawn_error(std::io::Error::other("encoder stdin not captured"))
        })?;

        let stderr_thread = child.stderr.take().map(|stderr| {
            let label = spec.path.display().to_string();
            thread::spawn(move || {
                let reader = BufReader::new(stderr);
                for line in reader.lines() {
                    match line {
                        Ok(line) => warn!("[ffmpeg {}] {}", label, line),
                        Err(e) => {
                            debug!("[ffmpeg {}] failed to read line: {}", label, e);
                            break;
                        }
                    }
                }
            })
        });

        info!(
            "Encoder started for {} ({}x{} @ {} fps)",
            spec.path.display(),
            spec.width,
            spec.height,
            spec.frame_rate
        );

        Ok(Self {
            path: spec.path.clone(),
            child: Some(child),
            stdin: Some(BufWriter::new(stdin)),
            stderr_thread,
            frame_size: (spec.width, spec.height),
            shutdown_timeout,
        })
    }

    fn wait_for_exit(&mut self, mut child: Child) -> Result<(), SinkError> {
        let started = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) if status.success() => return Ok(()),
                Ok(Some(status)) => {
                    return Err(SinkError::Encoder {
                        path: self.path.clone(),
                        status: status.to_string(),
                    });
                }
                Ok(None) if started.elapsed() > self.shutdown_timeout => {
                    warn!("Encoder for {} did not exit in time, killing it", self.path.display());
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(SinkError::Encoder {
                        path: self.path.clone(),
                        status: "killed after shutdown timeout".to_string(),
                    });
                }
                Ok(None) => thread::sleep(Duration::from_millis(20)),
                Err(source) => {
                    return Err(SinkError::Write {
                        path: self.path.clone(),
                        source,
                    });
                }
            }
        }
    }
}

impl VideoSink for FfmpegSink {
    fn write(&mut self, frame: &RgbImage) -> Result<(), SinkError> {
        if frame.dimensions() != self.frame_size {
            return Err(SinkError::ResolutionMismatch {
                path: self.path.clone(),
                expected: self.frame_size,
                got: frame.dimensions(),
            });
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| SinkError::Closed(self.path.clone()))?;
        stdin.write_all(frame.as_raw()).map_err(|source| SinkError::Write {
            path: self.path.clone(),
            source,
        })
    }

    fn close(&mut self) -> Result<(), SinkError> {
        let Some(child) = self.child.take() else {
            return Ok(());
        };

        // Closing stdin tells ffmpeg the stream ended.
        let flushed = match self.stdin.take() {
            Some(mut stdin) => stdin.flush(),
            None => Ok(()),
        };

        let exited = self.wait_for_exit(child);
        if let Some(handle) = self.stderr_thread.take() {
            let _ = handle.join();
        }

        flushed.map_err(|source| SinkError::Write {
            path: self.path.clone(),
            source,
        })?;
        exited?;
        info!("Encoder finished {}", self.path.display());
        Ok(())
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("{}", e);
        }
    }
}
