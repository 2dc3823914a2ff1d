use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use image::RgbImage;
use tandem_capture::{
    CaptureError, CaptureSource, ColorFrame, DepthFrame, Frame, Gray16Image, PatternKind,
    PatternSource, Sample,
};
use tandem_record::{
    Converter, RecordError, SinkError, SinkFactory, SinkSet, SinkSpec, StopHandle, StreamJob,
    StreamStatus, SyncConfig, SyncRecorder, VideoSink, record_independent,
};

#[derive(Debug, Default)]
struct Recorded {
    path: PathBuf,
    size: (u32, u32),
    frames: u64,
    closes: u32,
}

/// Factory whose sinks only count what they receive.
#[derive(Clone, Default)]
struct MemoryFactory {
    files: Arc<Mutex<Vec<Recorded>>>,
    /// Sinks fail on close, like an encoder that died mid-file.
    fail_close: bool,
}

impl MemoryFactory {
    fn file(&self, suffix: &str) -> Option<(u64, u32, (u32, u32))> {
        let files = self.files.lock().unwrap();
        files
            .iter()
            .find(|f| f.path.to_string_lossy().contains(suffix))
            .map(|f| (f.frames, f.closes, f.size))
    }

    fn failing_close() -> Self {
        Self {
            fail_close: true,
            ..Self::default()
        }
    }

    fn count(&self) -> usize {
        self.files.lock().unwrap().len()
    }
}

struct MemorySink {
    files: Arc<Mutex<Vec<Recorded>>>,
    index: usize,
    closed: bool,
    fail_close: bool,
}

impl VideoSink for MemorySink {
    fn write(&mut self, frame: &RgbImage) -> Result<(), SinkError> {
        let mut files = self.files.lock().unwrap();
        let file = &mut files[self.index];
        assert_eq!(frame.dimensions(), file.size);
        file.frames += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        if !self.closed {
            self.closed = true;
            let mut files = self.files.lock().unwrap();
            files[self.index].closes += 1;
            if self.fail_close {
                return Err(SinkError::Encoder {
                    path: files[self.index].path.clone(),
                    status: "exit status: 255".to_string(),
                });
            }
        }
        Ok(())
    }
}

impl SinkFactory for MemoryFactory {
    fn open(&self, spec: &SinkSpec) -> Result<Box<dyn VideoSink>, SinkError> {
        let mut files = self.files.lock().unwrap();
        files.push(Recorded {
            path: spec.path.clone(),
            size: (spec.width, spec.height),
            ..Recorded::default()
        });
        Ok(Box::new(MemorySink {
            files: self.files.clone(),
            index: files.len() - 1,
            closed: false,
            fail_close: self.fail_close,
        }))
    }

    fn extension(&self) -> &str {
        "mp4"
    }
}

/// What a scripted source does on its n-th poll (1-based).
#[derive(Clone, Copy)]
enum Poll {
    Frame(u32, u32),
    Timeout,
    Gone,
}

struct ScriptedSource {
    name: &'static str,
    depth: bool,
    script: Box<dyn FnMut(u64) -> Poll + Send>,
    polls: u64,
    active: bool,
}

impl ScriptedSource {
    fn new(name: &'static str, depth: bool, script: impl FnMut(u64) -> Poll + Send + 'static) -> Self {
        Self {
            name,
            depth,
            script: Box::new(script),
            polls: 0,
            active: true,
        }
    }
}

impl CaptureSource for ScriptedSource {
    fn name(&self) -> &str {
        self.name
    }

    fn acquire(&mut self, timeout: Duration) -> Result<Sample, CaptureError> {
        self.polls += 1;
        match (self.script)(self.polls) {
            Poll::Frame(w, h) => {
                let frame = if self.depth {
                    Frame::Depth(DepthFrame {
                        image: Gray16Image::new(w, h),
                        timestamp: 0.0,
                        raw: false,
                    })
                } else {
                    Frame::Color(ColorFrame {
                        image: RgbImage::new(w, h),
                        timestamp: 0.0,
                    })
                };
                Ok(Sample::new(vec![frame], self.polls))
            }
            Poll::Timeout => Err(CaptureError::Timeout(timeout)),
            Poll::Gone => Err(CaptureError::Disconnected(self.name.to_string())),
        }
    }

    fn frame_rate(&self) -> Option<f32> {
        None
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn stop(&mut self) {
        self.active = false;
    }
}

fn unpaced(max_cycles: u64) -> SyncConfig {
    SyncConfig {
        cycle_period: Duration::ZERO,
        acquire_timeout: Duration::from_millis(1),
        output_fps: 20.0,
        duration: None,
        max_cycles: Some(max_cycles),
        timing_log_interval: 10,
    }
}

fn sink_set(dir: &std::path::Path, factory: &MemoryFactory) -> SinkSet {
    SinkSet::create(dir, Some("sync"), Arc::new(factory.clone()))
        .unwrap()
        .with_stamp("20260101_120000")
}

#[test]
fn test_sync_writes_only_matched_cycles() {
    let tmp = tempfile::tempdir().unwrap();
    let factory = MemoryFactory::default();
    let stop = StopHandle::new();

    let a = ScriptedSource::new("tof", true, |_| Poll::Frame(24, 18));
    let b = ScriptedSource::new("usb", false, |n| {
        if n % 3 == 0 { Poll::Timeout } else { Poll::Frame(64, 48) }
    });

    let report = SyncRecorder::new(
        a,
        b,
        Converter::default(),
        sink_set(tmp.path(), &factory),
        stop.signal(),
        unpaced(30),
    )
    .run()
    .unwrap();

    assert_eq!(report.counters.matched, 20);
    assert_eq!(report.counters.failed_b_only, 10);
    assert_eq!(report.counters.failed_a_only, 0);
    assert_eq!(report.counters.failed_both, 0);
    assert_eq!(report.counters.matched + report.failed, 30);
    assert!(!report.stopped_early);

    assert_eq!(factory.file("tof_depth_sync_"), Some((20, 1, (24, 18))));
    assert_eq!(factory.file("usb_camera_sync_"), Some((20, 1, (64, 48))));
    assert!(report.outputs.iter().all(|o| o.frames == report.counters.matched));
    assert!((report.success_percent() - 66.666).abs() < 0.01);
}

#[test]
fn test_sync_classifies_every_failure_pattern() {
    let tmp = tempfile::tempdir().unwrap();
    let factory = MemoryFactory::default();
    let stop = StopHandle::new();

    // a misses polls 2 and 4, b misses 3 and 4.
    let a = ScriptedSource::new("a", false, |n| {
        if n == 2 || n == 4 { Poll::Timeout } else { Poll::Frame(8, 8) }
    });
    let b = ScriptedSource::new("b", false, |n| {
        if n == 3 || n == 4 { Poll::Timeout } else { Poll::Frame(8, 8) }
    });

    let report = SyncRecorder::new(
        a,
        b,
        Converter::default(),
        sink_set(tmp.path(), &factory),
        stop.signal(),
        unpaced(5),
    )
    .run()
    .unwrap();

    assert_eq!(report.counters.matched, 2);
    assert_eq!(report.counters.failed_a_only, 1);
    assert_eq!(report.counters.failed_b_only, 1);
    assert_eq!(report.counters.failed_both, 1);
    assert_eq!(factory.file("a_camera").unwrap().0, 2);
    assert_eq!(factory.file("b_camera").unwrap().0, 2);
}

#[test]
fn test_sync_resolution_change_drops_cycle() {
    let tmp = tempfile::tempdir().unwrap();
    let factory = MemoryFactory::default();
    let stop = StopHandle::new();

    let a = ScriptedSource::new("usb", false, |n| {
        if n > 5 { Poll::Frame(32, 24) } else { Poll::Frame(16, 12) }
    });
    let b = ScriptedSource::new("tof", true, |_| Poll::Frame(8, 6));

    let report = SyncRecorder::new(
        a,
        b,
        Converter::default(),
        sink_set(tmp.path(), &factory),
        stop.signal(),
        unpaced(8),
    )
    .run()
    .unwrap();

    assert_eq!(report.counters.matched, 5);
    assert_eq!(report.counters.failed_a_only, 3);
    assert_eq!(factory.file("usb_camera"), Some((5, 1, (16, 12))));
    assert_eq!(factory.file("tof_depth"), Some((5, 1, (8, 6))));
}

#[test]
fn test_sync_fatal_error_closes_sinks() {
    let tmp = tempfile::tempdir().unwrap();
    let factory = MemoryFactory::default();
    let stop = StopHandle::new();

    let a = ScriptedSource::new("usb", false, |_| Poll::Frame(8, 8));
    let b = ScriptedSource::new("tof", true, |n| if n == 5 { Poll::Gone } else { Poll::Frame(4, 4) });

    let err = SyncRecorder::new(
        a,
        b,
        Converter::default(),
        sink_set(tmp.path(), &factory),
        stop.signal(),
        unpaced(100),
    )
    .run()
    .unwrap_err();

    assert!(matches!(err, RecordError::Source { ref name, .. } if name == "tof"));
    assert_eq!(factory.file("usb_camera"), Some((4, 1, (8, 8))));
    assert_eq!(factory.file("tof_depth"), Some((4, 1, (4, 4))));
}

#[test]
fn test_sync_stop_before_start() {
    let tmp = tempfile::tempdir().unwrap();
    let factory = MemoryFactory::default();
    let stop = StopHandle::new();
    stop.stop();

    let a = ScriptedSource::new("usb", false, |_| Poll::Frame(8, 8));
    let b = ScriptedSource::new("tof", true, |_| Poll::Frame(4, 4));

    let report = SyncRecorder::new(
        a,
        b,
        Converter::default(),
        sink_set(tmp.path(), &factory),
        stop.signal(),
        unpaced(100),
    )
    .run()
    .unwrap();

    assert!(report.stopped_early);
    assert_eq!(report.counters.total(), 0);
    assert_eq!(report.average_fps, 0.0);
    assert_eq!(report.success_ratio, 0.0);
    assert!(report.outputs.is_empty());
    assert_eq!(factory.count(), 0);
}

#[test]
fn test_sync_paced_run_stops_on_signal() {
    let tmp = tempfile::tempdir().unwrap();
    let factory = MemoryFactory::default();
    let stop = Arc::new(StopHandle::new());

    let a = PatternSource::new("usb", PatternKind::Color, 16, 12, 100.0);
    let b = PatternSource::new("tof", PatternKind::DepthAmplitude, 8, 6, 100.0);
    let config = SyncConfig {
        duration: None,
        ..SyncConfig::at_rate(50.0)
    };
    let recorder = SyncRecorder::new(
        a,
        b,
        Converter::default(),
        sink_set(tmp.path(), &factory),
        stop.signal(),
        config,
    );

    let stopper = {
        let stop = stop.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            stop.stop();
        })
    };
    let started = Instant::now();
    let report = recorder.run().unwrap();
    stopper.join().unwrap();

    assert!(report.stopped_early);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(report.counters.matched > 0);
    assert_eq!(report.outputs.len(), 3);
    for output in &report.outputs {
        assert_eq!(output.frames, report.counters.matched);
    }
}

#[test]
fn test_sync_interrupted_session_reports_despite_close_error() {
    let tmp = tempfile::tempdir().unwrap();
    let factory = MemoryFactory::failing_close();
    let stop = Arc::new(StopHandle::new());

    let a = PatternSource::new("tof", PatternKind::Depth, 8, 6, 100.0);
    let b = PatternSource::new("usb", PatternKind::Color, 16, 12, 100.0);
    let config = SyncConfig {
        duration: None,
        ..SyncConfig::at_rate(50.0)
    };
    let recorder = SyncRecorder::new(
        a,
        b,
        Converter::default(),
        sink_set(tmp.path(), &factory),
        stop.signal(),
        config,
    );

    let stopper = {
        let stop = stop.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            stop.stop();
        })
    };
    let report = recorder.run().unwrap();
    stopper.join().unwrap();

    assert!(report.stopped_early);
    assert!(report.counters.matched > 0);
    assert_eq!(report.outputs.len(), 2);
    assert_eq!(factory.file("tof_depth").unwrap().1, 1);
    assert_eq!(factory.file("usb_camera").unwrap().1, 1);
}

#[test]
fn test_sync_close_error_fails_completed_session() {
    let tmp = tempfile::tempdir().unwrap();
    let factory = MemoryFactory::failing_close();
    let stop = StopHandle::new();

    let a = ScriptedSource::new("tof", true, |_| Poll::Frame(4, 4));
    let b = ScriptedSource::new("usb", false, |_| Poll::Frame(8, 8));

    let err = SyncRecorder::new(
        a,
        b,
        Converter::default(),
        sink_set(tmp.path(), &factory),
        stop.signal(),
        unpaced(5),
    )
    .run()
    .unwrap_err();

    assert!(matches!(err, RecordError::Finalize(SinkError::Encoder { .. })));
}

#[test]
fn test_independent_records_each_source() {
    let tmp = tempfile::tempdir().unwrap();
    let factory = MemoryFactory::default();
    let stop = StopHandle::new();

    let jobs = vec![
        StreamJob::new(
            Box::new(PatternSource::new("usb", PatternKind::Color, 16, 12, 60.0)),
            sink_set(&tmp.path().join("usb"), &factory),
            Converter::default(),
        ),
        StreamJob::new(
            Box::new(PatternSource::new("tof", PatternKind::Depth, 8, 6, 30.0)),
            sink_set(&tmp.path().join("tof"), &factory),
            Converter::default(),
        ),
    ];

    let report = record_independent(jobs, &stop, Some(Duration::from_millis(300)), Duration::from_secs(5));

    assert!(report.all_completed());
    assert_eq!(report.streams.len(), 2);
    assert_eq!(report.streams[0].source, "usb");
    for stream in &report.streams {
        assert!(stream.frames > 0);
        assert_eq!(stream.outputs.len(), 1);
        assert_eq!(stream.outputs[0].frames, stream.frames);
    }
    assert_eq!(factory.file("usb_camera").unwrap().1, 1);
}

#[test]
fn test_independent_failure_is_isolated() {
    let tmp = tempfile::tempdir().unwrap();
    let factory = MemoryFactory::default();
    let stop = StopHandle::new();

    let jobs = vec![
        StreamJob::new(
            Box::new(ScriptedSource::new("tof", true, |n| {
                if n > 3 { Poll::Gone } else { Poll::Frame(4, 4) }
            })),
            sink_set(tmp.path(), &factory),
            Converter::default(),
        ),
        StreamJob::new(
            Box::new(PatternSource::new("usb", PatternKind::Color, 8, 8, 60.0)),
            sink_set(tmp.path(), &factory),
            Converter::default(),
        ),
    ];

    let report = record_independent(jobs, &stop, Some(Duration::from_millis(200)), Duration::from_secs(5));

    assert!(matches!(report.streams[0].status, StreamStatus::Failed(_)));
    assert_eq!(report.streams[0].frames, 3);
    assert_eq!(report.streams[1].status, StreamStatus::Completed);
    assert!(report.streams[1].frames > 0);
    assert_eq!(factory.file("tof_depth"), Some((3, 1, (4, 4))));
}

#[test]
fn test_independent_stuck_worker_is_unfinished() {
    let tmp = tempfile::tempdir().unwrap();
    let factory = MemoryFactory::default();
    let stop = StopHandle::new();

    let stuck = ScriptedSource::new("stuck", false, |_| {
        thread::sleep(Duration::from_secs(2));
        Poll::Timeout
    });
    let jobs = vec![StreamJob::new(
        Box::new(stuck),
        sink_set(tmp.path(), &factory),
        Converter::default(),
    )];

    let started = Instant::now();
    let report = record_independent(jobs, &stop, Some(Duration::from_millis(50)), Duration::from_millis(100));

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(report.streams[0].status, StreamStatus::Unfinished);
    assert!(!report.all_completed());
    assert!(stop.is_stopped());
}
