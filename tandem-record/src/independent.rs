//! Free-running recording: every source on its own thread, no pairing.
//!
//! Workers own their source and sinks outright and report back exactly once
//! over a completion channel. Nothing is shared between workers but the stop
//! signal.

use crate::convert::Converter;
use crate::report::{IndependentReport, StreamReport, StreamStatus};
use crate::sink::SinkSet;
use crate::stop::{StopHandle, StopSignal};
use crate::sync::convert_sample;
use crossbeam_channel::{after, never, select, unbounded};
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::{Duration, Instant};
use tandem_capture::CaptureSource;
use tracing::{debug, error, info, warn};

/// Default wait for workers to report after a stop.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// One source and the sinks its frames go to.
pub struct StreamJob {
    pub source: Box<dyn CaptureSource + Send>,
    pub sinks: SinkSet,
    pub converter: Converter,
    pub acquire_timeout: Duration,
    /// Rate written into the output files.
    pub frame_rate: f32,
    /// Pause after a failed poll.
    pub idle_backoff: Duration,
}

impl StreamJob {
    pub fn new(source: Box<dyn CaptureSource + Send>, sinks: SinkSet, converter: Converter) -> Self {
        let frame_rate = source.frame_rate().unwrap_or(30.0);
        Self {
            source,
            sinks,
            converter,
            acquire_timeout: Duration::from_millis(200),
            frame_rate,
            idle_backoff: Duration::from_millis(10),
        }
    }

    pub fn with_frame_rate(mut self, frame_rate: f32) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

/// Record every job on its own thread until `duration` elapses or `stop` fires.
///
/// Once either happens the stop is broadcast to all workers and they get
/// `grace` to report. Workers that miss it are listed as unfinished and
/// left detached.
pub fn record_independent(
    jobs: Vec<StreamJob>,
    stop: &StopHandle,
    duration: Option<Duration>,
    grace: Duration,
) -> IndependentReport {
    let started = Instant::now();
    let (done_tx, done_rx) = unbounded::<(usize, StreamReport)>();
    let mut names = Vec::with_capacity(jobs.len());
    let mut reports: Vec<Option<StreamReport>> = Vec::with_capacity(jobs.len());
    let mut handles = Vec::with_capacity(jobs.len());

    for (index, job) in jobs.into_iter().enumerate() {
        let name = job.source.name().to_string();
        names.push(name.clone());
        reports.push(None);

        let signal = stop.signal();
        let done = done_tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-recorder", name))
            .spawn(move || {
                let report = panic::catch_unwind(AssertUnwindSafe(|| {
                    run_stream(job, &signal, duration)
                }))
                .unwrap_or_else(|_| {
                    StreamReport::summarize(
                        &name,
                        StreamStatus::Failed("recorder thread panicked".into()),
                        0,
                        0,
                        Duration::ZERO,
                        Vec::new(),
                    )
                });
                let _ = done.send((index, report));
            });

        match spawned {
            Ok(handle) => handles.push(Some(handle)),
            Err(e) => {
                error!("Failed to start recorder for {}: {}", names[index], e);
                reports[index] = Some(StreamReport::summarize(
                    &names[index],
                    StreamStatus::Failed(e.to_string()),
                    0,
                    0,
                    Duration::ZERO,
                    Vec::new(),
                ));
                handles.push(None);
            }
        }
    }
    drop(done_tx);

    let mut pending = reports.iter().filter(|r| r.is_none()).count();
    let signal = stop.signal();
    let timer = match duration {
        Some(d) => after(d),
        None => never(),
    };

    while pending > 0 {
        select! {
            recv(done_rx) -> msg => match msg {
                Ok((index, report)) => {
                    debug!("{} recorder finished", report.source);
                    reports[index] = Some(report);
                    pending -= 1;
                }
                Err(_) => break,
            },
            recv(signal.channel()) -> _ => break,
            recv(timer) -> _ => break,
        }
    }

    stop.stop();
    let deadline = Instant::now() + grace;
    while pending > 0 {
        match done_rx.recv_deadline(deadline) {
            Ok((index, report)) => {
                reports[index] = Some(report);
                pending -= 1;
            }
            Err(_) => break,
        }
    }

    let streams = reports
        .into_iter()
        .zip(handles)
        .zip(&names)
        .map(|((report, handle), name)| match report {
            Some(report) => {
                if let Some(handle) = handle {
                    let _ = handle.join();
                }
                report
            }
            None => {
                warn!("{} recorder did not finish within {:?}", name, grace);
                StreamReport::unfinished(name)
            }
        })
        .collect();

    IndependentReport {
        elapsed_secs: started.elapsed().as_secs_f64(),
        streams,
    }
}

fn run_stream(mut job: StreamJob, stop: &StopSignal, duration: Option<Duration>) -> StreamReport {
    let name = job.source.name().to_string();
    info!("Recording {} at {:.1} fps", name, job.frame_rate);

    let started = Instant::now();
    let mut frames = 0u64;
    let mut failed_polls = 0u64;

    let status = loop {
        if stop.is_stopped() || duration.is_some_and(|d| started.elapsed() >= d) {
            break StreamStatus::Completed;
        }

        let sample = match job.source.acquire(job.acquire_timeout) {
            Ok(sample) if !sample.is_empty() => sample,
            Ok(_) => {
                failed_polls += 1;
                if stop.wait_timeout(job.idle_backoff) {
                    break StreamStatus::Completed;
                }
                continue;
            }
            Err(e) if e.is_fatal() => {
                error!("{} failed: {}", name, e);
                break StreamStatus::Failed(e.to_string());
            }
            Err(e) => {
                debug!("{} frame capture failed: {}", name, e);
                failed_polls += 1;
                if stop.wait_timeout(job.idle_backoff) {
                    break StreamStatus::Completed;
                }
                continue;
            }
        };

        let Some(converted) = convert_sample(&name, &sample, &job.converter, &job.sinks) else {
            failed_polls += 1;
            continue;
        };

        let written = converted
            .iter()
            .try_for_each(|(key, image)| job.sinks.write(key, job.frame_rate, image));
        if let Err(e) = written {
            error!("{} failed to write: {}", name, e);
            break StreamStatus::Failed(e.to_string());
        }

        frames += 1;
        if frames % 100 == 0 {
            debug!("{}: {} frames", name, frames);
        }
    };

    job.source.stop();
    let status = match (status, job.sinks.close_all()) {
        (StreamStatus::Completed, Err(e)) => StreamStatus::Failed(e.to_string()),
        (status, _) => status,
    };

    let report = StreamReport::summarize(
        &name,
        status,
        frames,
        failed_polls,
        started.elapsed(),
        job.sinks.outputs(),
    );
    info!(
        "{} stopped after {} frames ({:.2} fps)",
        name, report.frames, report.average_fps
    );
    report
}
