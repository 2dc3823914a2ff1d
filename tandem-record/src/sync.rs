//! Lockstep recording of two sources.
//!
//! Neither camera has a hardware trigger, so lockstep is emulated: each
//! cycle polls both sources with a bounded wait and only a cycle where both
//! delivered is written. A missed cycle is data loss, never a stall.

use crate::convert::Converter;
use crate::error::RecordError;
use crate::report::{CycleCounters, CycleOutcome, SessionReport};
use crate::sink::SinkSet;
use crate::stop::StopSignal;
use image::RgbImage;
use std::time::{Duration, Instant};
use tandem_capture::{CaptureSource, Sample};
use tracing::{debug, info, warn};

/// Cadence and termination of a synchronized run.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Target length of one cycle; the loop idles for whatever is left.
    pub cycle_period: Duration,
    /// Longest wait for each source within a cycle.
    pub acquire_timeout: Duration,
    /// Frame rate written into every output file.
    pub output_fps: f32,
    pub duration: Option<Duration>,
    pub max_cycles: Option<u64>,
    /// Log per-source latency every this many cycles (0 disables).
    pub timing_log_interval: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cycle_period: Duration::from_millis(50),
            acquire_timeout: Duration::from_millis(40),
            output_fps: 20.0,
            duration: Some(Duration::from_secs(10)),
            max_cycles: None,
            timing_log_interval: 100,
        }
    }
}

impl SyncConfig {
    /// Cycle period and output rate for a target rate in Hz.
    pub fn at_rate(fps: f32) -> Self {
        let fps = fps.max(0.1);
        let period = Duration::from_secs_f64(1.0 / f64::from(fps));
        Self {
            cycle_period: period,
            acquire_timeout: period.mul_f32(0.8),
            output_fps: fps,
            ..Self::default()
        }
    }
}

pub(crate) type Converted = Vec<(String, RgbImage)>;

/// Records matched frame pairs from sources A and B.
pub struct SyncRecorder<A, B> {
    a: A,
    b: B,
    converter: Converter,
    sinks: SinkSet,
    stop: StopSignal,
    config: SyncConfig,
}

impl<A: CaptureSource, B: CaptureSource> SyncRecorder<A, B> {
    pub fn new(
        a: A,
        b: B,
        converter: Converter,
        sinks: SinkSet,
        stop: StopSignal,
        config: SyncConfig,
    ) -> Self {
        if a.name() == b.name() {
            warn!("Both sources are named '{}'; their streams will share files", a.name());
        }
        if config.acquire_timeout >= config.cycle_period && !config.cycle_period.is_zero() {
            warn!(
                "Acquire timeout {:?} is not shorter than the cycle period {:?}",
                config.acquire_timeout, config.cycle_period
            );
        }
        Self {
            a,
            b,
            converter,
            sinks,
            stop,
            config,
        }
    }

    /// Run until the duration elapses, the cycle limit is hit, or stop is signalled.
    ///
    /// Sources are stopped and every sink is closed before this returns,
    /// whether it succeeds or not.
    pub fn run(mut self) -> Result<SessionReport, RecordError> {
        info!(
            "Starting synchronized recording of {} and {} ({:?} per cycle)",
            self.a.name(),
            self.b.name(),
            self.config.cycle_period
        );

        let result = self.run_cycles();

        self.a.stop();
        self.b.stop();
        let closed = self.sinks.close_all();

        let (counters, elapsed, stopped_early) = result?;
        match closed {
            Ok(()) => {}
            // An interrupted session still reports what it recorded.
            Err(e) if stopped_early => warn!("Output not finalized cleanly after stop: {}", e),
            Err(e) => return Err(e.into()),
        }

        Ok(SessionReport::summarize(
            self.a.name(),
            self.b.name(),
            counters,
            elapsed,
            stopped_early,
            self.sinks.outputs(),
        ))
    }

    fn run_cycles(&mut self) -> Result<(CycleCounters, Duration, bool), RecordError> {
        let mut counters = CycleCounters::default();
        let started = Instant::now();
        let mut stopped_early = false;

        loop {
            if self.stop.is_stopped() {
                info!("Stop requested, ending recording");
                stopped_early = true;
                break;
            }
            if self.config.duration.is_some_and(|d| started.elapsed() >= d) {
                break;
            }
            if self.config.max_cycles.is_some_and(|max| counters.total() >= max) {
                break;
            }

            let cycle_start = Instant::now();
            let a = poll(&mut self.a, &self.converter, &self.sinks, self.config.acquire_timeout)?;
            let a_time = cycle_start.elapsed();
            let b = poll(&mut self.b, &self.converter, &self.sinks, self.config.acquire_timeout)?;
            let b_time = cycle_start.elapsed() - a_time;

            let outcome = CycleOutcome::classify(a.is_some(), b.is_some());
            let interval = self.config.timing_log_interval;
            if interval > 0 && counters.total() % interval == 0 {
                debug!(
                    "Cycle {} - {}: {:.1}ms, {}: {:.1}ms, {:?}",
                    counters.total(),
                    self.a.name(),
                    a_time.as_secs_f64() * 1000.0,
                    self.b.name(),
                    b_time.as_secs_f64() * 1000.0,
                    outcome
                );
            }
            counters.record(outcome);

            match (a, b) {
                (Some(a), Some(b)) => {
                    for (key, image) in a.into_iter().chain(b) {
                        self.sinks
                            .write(&key, self.config.output_fps, &image)
                            .map_err(|source| RecordError::Sink {
                                stream: key.clone(),
                                source,
                            })?;
                    }
                }
                _ => debug!("Cycle {} - {:?}", counters.total(), outcome),
            }

            let busy = cycle_start.elapsed();
            if busy < self.config.cycle_period
                && self.stop.wait_timeout(self.config.cycle_period - busy)
            {
                info!("Stop requested, ending recording");
                stopped_early = true;
                break;
            }
        }

        Ok((counters, started.elapsed(), stopped_early))
    }
}

/// Acquire and convert one sample. `None` marks the source as failed for
/// this cycle; only a fatal source error escapes.
fn poll<S: CaptureSource>(
    source: &mut S,
    converter: &Converter,
    sinks: &SinkSet,
    timeout: Duration,
) -> Result<Option<Converted>, RecordError> {
    let sample = match source.acquire(timeout) {
        Ok(sample) if !sample.is_empty() => sample,
        Ok(_) => {
            debug!("{} returned an empty sample", source.name());
            return Ok(None);
        }
        Err(e) if e.is_fatal() => return Err(RecordError::source_failed(source.name(), e)),
        Err(e) => {
            debug!("{} frame capture failed: {}", source.name(), e);
            return Ok(None);
        }
    };

    Ok(convert_sample(source.name(), &sample, converter, sinks))
}

/// Convert every frame of a sample for display. `None` if any frame no
/// longer fits the stream it belongs to, so nothing of the sample is written.
pub(crate) fn convert_sample(
    source: &str,
    sample: &Sample,
    converter: &Converter,
    sinks: &SinkSet,
) -> Option<Converted> {
    let mut converted = Vec::with_capacity(sample.frames.len());
    for frame in &sample.frames {
        let key = SinkSet::stream_key(source, frame.kind());
        let image = converter.convert(frame);
        if !sinks.accepts(&key, image.dimensions()) {
            warn!(
                "{} frame is {:?}, which does not match its open stream; dropping sample",
                key,
                image.dimensions()
            );
            return None;
        }
        converted.push((key, image));
    }
    Some(converted)
}
