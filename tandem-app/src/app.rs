//! Command dispatch, device setup and logging.

use crate::config::{LoggingConfig, RecorderConfig, TofConfig, UsbConfig};
use crate::{Args, Camera, Command, ProbeArgs, RecordArgs, SnapshotArgs};
use serde::Serialize;
use std::error::Error;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tandem_capture::{CaptureSource, PatternKind, PatternSource, TofLayout};
use tandem_record::{
    Converter, FfmpegFactory, RawDump, SinkSet, StopHandle, StreamJob, SyncRecorder, probe,
    record_independent, snapshot,
};
use tracing::{error, info, warn};

type BoxError = Box<dyn Error>;
type Source = Box<dyn CaptureSource + Send>;

pub fn run(args: Args) -> Result<(), BoxError> {
    let mut config = match &args.config {
        Some(path) => RecorderConfig::load(path)?,
        None => RecorderConfig::default(),
    };
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    init_logging(&config.logging);

    let stop = Arc::new(StopHandle::new());
    install_stop_handler(&stop);

    match args.command {
        Command::Sync(record) => {
            record.apply(&mut config);
            record_sync(&config, &record, &stop)
        }
        Command::Dual(record) => {
            record.apply(&mut config);
            let jobs = vec![
                usb_job(&config, record.synthetic, Some("dual"))?,
                tof_job(&config, record.synthetic, Some("dual"))?,
            ];
            record_jobs(jobs, &config, &record, &stop)
        }
        Command::Usb(record) => {
            record.apply(&mut config);
            let jobs = vec![usb_job(&config, record.synthetic, None)?];
            record_jobs(jobs, &config, &record, &stop)
        }
        Command::Tof {
            record,
            raw,
            max_frames,
        } => {
            record.apply(&mut config);
            if raw {
                dump_raw(&config, &record, max_frames, &stop)
            } else {
                let jobs = vec![tof_job(&config, record.synthetic, None)?];
                record_jobs(jobs, &config, &record, &stop)
            }
        }
        Command::Probe(args) => run_probe(&config, &args),
        Command::Snapshot(args) => run_snapshot(&mut config, &args),
        Command::List => {
            list_devices();
            Ok(())
        }
    }
}

impl RecordArgs {
    /// Command-line values win over the config file.
    fn apply(&self, config: &mut RecorderConfig) {
        if let Some(duration) = self.duration {
            config.duration_secs = duration;
        }
        if let Some(output) = &self.output {
            config.output_dir = output.clone();
        }
        if let Some(fps) = self.fps {
            config.fps = fps;
        }
        if let Some(max_cycles) = self.max_cycles {
            config.sync.max_cycles = Some(max_cycles);
        }
        if let Some(index) = self.usb_index {
            config.usb.index = index;
        }
        if let Some(device) = &self.tof_device {
            config.tof.device = device.clone();
        }
        if self.colormap.is_some() {
            config.convert.depth_colormap = self.colormap;
        }
    }
}

fn record_sync(config: &RecorderConfig, args: &RecordArgs, stop: &StopHandle) -> Result<(), BoxError> {
    // Opened in order; a failure on the second drops (and releases) the first.
    let tof = open_tof(&config.tof, args.synthetic)?;
    let usb = open_usb(&config.usb, args.synthetic)?;

    let recorder = SyncRecorder::new(
        tof,
        usb,
        Converter::new(config.convert.clone()),
        sink_set(config, Some("sync"))?,
        stop.signal(),
        config.sync_config(),
    );
    let report = recorder.run()?;

    println!("{}", report);
    write_json(args.json.as_deref(), &report)
}

fn record_jobs(
    jobs: Vec<StreamJob>,
    config: &RecorderConfig,
    args: &RecordArgs,
    stop: &StopHandle,
) -> Result<(), BoxError> {
    match config.duration() {
        Some(d) => info!("Recording for {:.1} seconds (Ctrl-C to stop early)", d.as_secs_f64()),
        None => info!("Recording until Ctrl-C"),
    }

    let report = record_independent(jobs, stop, config.duration(), config.grace());

    println!("{}", report);
    write_json(args.json.as_deref(), &report)?;
    if report.all_completed() {
        Ok(())
    } else {
        Err("one or more cameras did not record successfully".into())
    }
}

fn dump_raw(
    config: &RecorderConfig,
    args: &RecordArgs,
    max_frames: Option<u64>,
    stop: &StopHandle,
) -> Result<(), BoxError> {
    let mut tof = open_tof(&config.tof, args.synthetic)?;
    let mut dump = RawDump::create(&config.output_dir)?;
    let frames = dump.record(
        tof.as_mut(),
        &stop.signal(),
        config.duration(),
        max_frames,
        Duration::from_millis(200),
    )?;
    println!("Saved {} raw frames to {}", frames, dump.dir().display());
    Ok(())
}

fn run_probe(config: &RecorderConfig, args: &ProbeArgs) -> Result<(), BoxError> {
    let timeout = Duration::from_millis(args.timeout_ms);
    let cameras = match args.only {
        Some(camera) => vec![camera],
        None => vec![Camera::Usb, Camera::Tof],
    };

    let mut reports = Vec::with_capacity(cameras.len());
    for camera in cameras {
        let report = match open_camera(config, camera, args.synthetic) {
            Ok(mut source) => {
                let report = probe(source.as_mut(), timeout);
                source.stop();
                report
            }
            Err(e) => {
                warn!("Failed to open {:?} camera: {}", camera, e);
                tandem_record::ProbeReport {
                    source: camera_name(camera).to_string(),
                    passed: false,
                    latency_ms: 0.0,
                    frames: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        };
        println!("{}", report);
        reports.push(report);
    }

    write_json(args.json.as_deref(), &reports)?;
    if reports.iter().all(|r| r.passed) {
        Ok(())
    } else {
        Err("camera check failed".into())
    }
}

fn run_snapshot(config: &mut RecorderConfig, args: &SnapshotArgs) -> Result<(), BoxError> {
    if args.colormap.is_some() {
        config.convert.depth_colormap = args.colormap;
    }
    let mut source = open_camera(config, args.camera, args.synthetic)?;
    let converter = Converter::new(config.convert.clone());
    let saved = snapshot(
        source.as_mut(),
        &converter,
        &args.output,
        Duration::from_millis(args.timeout_ms),
    )?;
    for path in saved {
        println!("{}", path.display());
    }
    Ok(())
}

fn list_devices() {
    #[cfg(feature = "webcam")]
    {
        match tandem_capture::WebcamSource::list_devices() {
            Ok(devices) if devices.is_empty() => println!("No webcams found"),
            Ok(devices) => {
                println!("Webcams:");
                for device in devices {
                    println!("  {}", device);
                }
            }
            Err(e) => println!("Failed to list webcams: {}", e),
        }
    }
    #[cfg(not(feature = "webcam"))]
    {
        println!("Webcam support not compiled in");
    }

    #[cfg(feature = "tof")]
    {
        let devices = tandem_capture::TofSource::list_devices();
        if devices.is_empty() {
            println!("No V4L2 devices found");
        } else {
            println!("V4L2 devices:");
            for device in devices {
                println!("  {}", device);
            }
        }
    }
    #[cfg(not(feature = "tof"))]
    {
        println!("ToF support not compiled in");
    }
}

fn camera_name(camera: Camera) -> &'static str {
    match camera {
        Camera::Usb => "usb",
        Camera::Tof => "tof",
    }
}

fn open_camera(config: &RecorderConfig, camera: Camera, synthetic: bool) -> Result<Source, BoxError> {
    match camera {
        Camera::Usb => open_usb(&config.usb, synthetic),
        Camera::Tof => open_tof(&config.tof, synthetic),
    }
}

fn open_usb(usb: &UsbConfig, synthetic: bool) -> Result<Source, BoxError> {
    if synthetic {
        return Ok(Box::new(PatternSource::new(
            "usb",
            PatternKind::Color,
            usb.width,
            usb.height,
            usb.fps as f32,
        )));
    }
    open_webcam(usb)
}

#[cfg(feature = "webcam")]
fn open_webcam(usb: &UsbConfig) -> Result<Source, BoxError> {
    use tandem_capture::{WebcamSettings, WebcamSource};

    let settings = WebcamSettings {
        index: usb.index,
        width: usb.width,
        height: usb.height,
        fps: usb.fps,
    };
    let source = if usb.auto_detect {
        WebcamSource::detect(usb.max_probe_index, settings, Duration::from_secs(2))?
    } else {
        WebcamSource::open(settings)?
    };
    Ok(Box::new(source))
}

#[cfg(not(feature = "webcam"))]
fn open_webcam(_usb: &UsbConfig) -> Result<Source, BoxError> {
    Err("built without webcam support; use --synthetic".into())
}

fn open_tof(tof: &TofConfig, synthetic: bool) -> Result<Source, BoxError> {
    let settings = tof.settings()?;
    if synthetic {
        let kind = match settings.layout {
            TofLayout::Stacked => PatternKind::DepthAmplitude,
            TofLayout::Depth | TofLayout::Raw => PatternKind::Depth,
        };
        return Ok(Box::new(PatternSource::new(
            "tof",
            kind,
            settings.width,
            settings.height,
            settings.fps,
        )));
    }
    open_tof_device(settings)
}

#[cfg(feature = "tof")]
fn open_tof_device(settings: tandem_capture::TofSettings) -> Result<Source, BoxError> {
    Ok(Box::new(tandem_capture::TofSource::open(settings)?))
}

#[cfg(not(feature = "tof"))]
fn open_tof_device(_settings: tandem_capture::TofSettings) -> Result<Source, BoxError> {
    Err("built without ToF support; use --synthetic".into())
}

fn sink_set(config: &RecorderConfig, label: Option<&str>) -> Result<SinkSet, BoxError> {
    let factory = Arc::new(FfmpegFactory::new(config.encoder.clone()));
    Ok(SinkSet::create(&config.output_dir, label, factory)?)
}

fn usb_job(config: &RecorderConfig, synthetic: bool, label: Option<&str>) -> Result<StreamJob, BoxError> {
    let source = open_usb(&config.usb, synthetic)?;
    let frame_rate = config.usb.fps as f32;
    Ok(StreamJob::new(source, sink_set(config, label)?, Converter::new(config.convert.clone()))
        .with_frame_rate(frame_rate))
}

fn tof_job(config: &RecorderConfig, synthetic: bool, label: Option<&str>) -> Result<StreamJob, BoxError> {
    let source = open_tof(&config.tof, synthetic)?;
    Ok(StreamJob::new(source, sink_set(config, label)?, Converter::new(config.convert.clone()))
        .with_frame_rate(config.tof.fps))
}

fn write_json<T: Serialize + ?Sized>(path: Option<&Path>, value: &T) -> Result<(), BoxError> {
    if let Some(path) = path {
        let mut out = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut out, value)?;
        out.flush()?;
        info!("Wrote summary to {}", path.display());
    }
    Ok(())
}

fn install_stop_handler(stop: &Arc<StopHandle>) {
    let handle = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Interrupt received, stopping");
        handle.stop();
    }) {
        error!("Failed to set Ctrl-C handler: {}", e);
    }
}

fn init_logging(logging: &LoggingConfig) {
    #[cfg(feature = "tracy")]
    {
        if logging.enable_tracy {
            use tracing_subscriber::Layer;
            use tracing_subscriber::layer::SubscriberExt;
            use tracing_subscriber::util::SubscriberInitExt;
            tracing_subscriber::registry()
                .with(tracing_tracy::TracyLayer::default())
                .with(
                    tracing_subscriber::fmt::layer().with_filter(
                        tracing_subscriber::EnvFilter::try_from_default_env()
                            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level)),
                    ),
                )
                .init();
            return;
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level)),
        )
        .with_target(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_record::Colormap;

    #[test]
    fn test_cli_overrides_config() {
        let mut config = RecorderConfig::default();
        let args = RecordArgs {
            duration: Some(0.0),
            fps: Some(15.0),
            max_cycles: Some(3),
            tof_device: Some("/dev/video4".into()),
            colormap: Some(Colormap::Hot),
            ..RecordArgs::default()
        };
        args.apply(&mut config);
        assert_eq!(config.duration(), None);
        assert_eq!(config.fps, 15.0);
        assert_eq!(config.sync.max_cycles, Some(3));
        assert_eq!(config.tof.device, "/dev/video4");
        assert_eq!(config.convert.depth_colormap, Some(Colormap::Hot));
        assert_eq!(config.usb.index, 0);
    }

    #[test]
    fn test_synthetic_sources_follow_config() {
        let mut config = RecorderConfig::default();
        config.tof.layout = "stacked".into();
        let mut tof = open_tof(&config.tof, true).unwrap();
        let sample = tof.acquire(Duration::from_secs(1)).unwrap();
        assert_eq!(sample.frames.len(), 2);
        assert_eq!(sample.frames[0].dimensions(), (240, 180));

        let usb = open_usb(&config.usb, true).unwrap();
        assert_eq!(usb.name(), "usb");
    }

    #[test]
    fn test_write_json_writes_whole_document() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("summary.json");
        let values: Vec<u32> = (0..5000).collect();
        write_json(Some(&path), &values).unwrap();

        let read: Vec<u32> = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(read, values);
        write_json(None, &values).unwrap();
    }

    #[test]
    fn test_sync_encoder_open_failure_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = RecorderConfig::default();
        config.output_dir = tmp.path().join("out");
        config.encoder.ffmpeg_path = "tandem-test-missing-ffmpeg".into();
        config.usb.width = 32;
        config.usb.height = 24;
        config.tof.width = 16;
        config.tof.height = 12;

        // No encoder available: the first matched cycle fails on sink open.
        let args = RecordArgs {
            max_cycles: Some(5),
            synthetic: true,
            ..RecordArgs::default()
        };
        args.apply(&mut config);
        let stop = StopHandle::new();
        let err = record_sync(&config, &args, &stop).unwrap_err();
        assert!(err.to_string().contains("tof_depth"));
        assert!(config.output_dir.is_dir());
    }
}
