//! Session summaries.

use crate::sink::OutputFile;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Frames per second over a span; zero when no time elapsed.
pub fn average_rate(frames: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { frames as f64 / secs } else { 0.0 }
}

/// Fraction of cycles that matched; zero when no cycles ran.
pub fn success_ratio(matched: u64, failed: u64) -> f64 {
    let total = matched + failed;
    if total > 0 {
        matched as f64 / total as f64
    } else {
        0.0
    }
}

/// Result of one sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Matched,
    /// Only source A missed the cycle.
    FailedA,
    /// Only source B missed the cycle.
    FailedB,
    FailedBoth,
}

impl CycleOutcome {
    pub fn classify(a_ok: bool, b_ok: bool) -> Self {
        match (a_ok, b_ok) {
            (true, true) => CycleOutcome::Matched,
            (false, true) => CycleOutcome::FailedA,
            (true, false) => CycleOutcome::FailedB,
            (false, false) => CycleOutcome::FailedBoth,
        }
    }
}

/// Running tally of cycle outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleCounters {
    pub matched: u64,
    pub failed_a_only: u64,
    pub failed_b_only: u64,
    pub failed_both: u64,
}

impl CycleCounters {
    pub fn record(&mut self, outcome: CycleOutcome) {
        match outcome {
            CycleOutcome::Matched => self.matched += 1,
            CycleOutcome::FailedA => self.failed_a_only += 1,
            CycleOutcome::FailedB => self.failed_b_only += 1,
            CycleOutcome::FailedBoth => self.failed_both += 1,
        }
    }

    pub fn failed(&self) -> u64 {
        self.failed_a_only + self.failed_b_only + self.failed_both
    }

    pub fn total(&self) -> u64 {
        self.matched + self.failed()
    }
}

/// Summary of a synchronized recording. Built once at the end of a run.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub source_a: String,
    pub source_b: String,
    pub counters: CycleCounters,
    pub failed: u64,
    pub elapsed_secs: f64,
    pub average_fps: f64,
    /// Matched cycles over all cycles, in `[0, 1]`.
    pub success_ratio: f64,
    pub stopped_early: bool,
    pub outputs: Vec<OutputFile>,
}

impl SessionReport {
    pub fn summarize(
        source_a: &str,
        source_b: &str,
        counters: CycleCounters,
        elapsed: Duration,
        stopped_early: bool,
        outputs: Vec<OutputFile>,
    ) -> Self {
        Self {
            source_a: source_a.to_string(),
            source_b: source_b.to_string(),
            counters,
            failed: counters.failed(),
            elapsed_secs: elapsed.as_secs_f64(),
            average_fps: average_rate(counters.matched, elapsed),
            success_ratio: success_ratio(counters.matched, counters.failed()),
            stopped_early,
            outputs,
        }
    }

    pub fn success_percent(&self) -> f64 {
        self.success_ratio * 100.0
    }
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Synchronized recording completed:")?;
        writeln!(f, "  Duration: {:.2} seconds", self.elapsed_secs)?;
        writeln!(f, "  Synchronized frames: {}", self.counters.matched)?;
        writeln!(f, "  Sync failures: {}", self.failed)?;
        writeln!(f, "    - {} only failures: {}", self.source_a, self.counters.failed_a_only)?;
        writeln!(f, "    - {} only failures: {}", self.source_b, self.counters.failed_b_only)?;
        writeln!(f, "    - Both failed: {}", self.counters.failed_both)?;
        writeln!(f, "  Sync success rate: {:.1}%", self.success_percent())?;
        write!(f, "  Average FPS: {:.2}", self.average_fps)?;
        if self.stopped_early {
            write!(f, "\n  Stopped early on request")?;
        }
        for output in &self.outputs {
            write!(f, "\n  {}: {} ({} frames)", output.stream, output.path.display(), output.frames)?;
        }
        Ok(())
    }
}

/// How an independently recorded stream ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "lowercase")]
pub enum StreamStatus {
    Completed,
    Failed(String),
    /// The worker did not report back within the grace period.
    Unfinished,
}

/// Summary of one independently recorded stream.
#[derive(Debug, Clone, Serialize)]
pub struct StreamReport {
    pub source: String,
    pub status: StreamStatus,
    pub frames: u64,
    pub failed_polls: u64,
    pub elapsed_secs: f64,
    pub average_fps: f64,
    pub outputs: Vec<OutputFile>,
}

impl StreamReport {
    pub fn summarize(
        source: &str,
        status: StreamStatus,
        frames: u64,
        failed_polls: u64,
        elapsed: Duration,
        outputs: Vec<OutputFile>,
    ) -> Self {
        Self {
            source: source.to_string(),
            status,
            frames,
            failed_polls,
            elapsed_secs: elapsed.as_secs_f64(),
            average_fps: average_rate(frames, elapsed),
            outputs,
        }
    }

    pub fn unfinished(source: &str) -> Self {
        Self::summarize(source, StreamStatus::Unfinished, 0, 0, Duration::ZERO, Vec::new())
    }
}

impl fmt::Display for StreamReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            StreamStatus::Completed => writeln!(f, "{} camera: SUCCESS", self.source)?,
            StreamStatus::Failed(error) => writeln!(f, "{} camera: ERROR - {}", self.source, error)?,
            StreamStatus::Unfinished => {
                writeln!(f, "{} camera: did not finish within the grace period", self.source)?
            }
        }
        for output in &self.outputs {
            writeln!(f, "  Video file: {}", output.path.display())?;
        }
        writeln!(f, "  Frames: {}", self.frames)?;
        writeln!(f, "  Failed polls: {}", self.failed_polls)?;
        writeln!(f, "  Duration: {:.2} seconds", self.elapsed_secs)?;
        write!(f, "  FPS: {:.2}", self.average_fps)
    }
}

/// Summary of a recording where every source ran on its own thread.
#[derive(Debug, Clone, Serialize)]
pub struct IndependentReport {
    pub elapsed_secs: f64,
    pub streams: Vec<StreamReport>,
}

impl IndependentReport {
    pub fn all_completed(&self) -> bool {
        self.streams
            .iter()
            .all(|s| s.status == StreamStatus::Completed)
    }
}

impl fmt::Display for IndependentReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Recording completed in {:.2} seconds", self.elapsed_secs)?;
        for stream in &self.streams {
            write!(f, "\n{}", stream)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_rate_zero_elapsed() {
        assert_eq!(average_rate(10, Duration::ZERO), 0.0);
        assert_eq!(average_rate(40, Duration::from_secs(2)), 20.0);
    }

    #[test]
    fn test_success_ratio_no_cycles() {
        assert_eq!(success_ratio(0, 0), 0.0);
        assert_eq!(success_ratio(3, 1), 0.75);
    }

    #[test]
    fn test_classify_is_exhaustive() {
        assert_eq!(CycleOutcome::classify(true, true), CycleOutcome::Matched);
        assert_eq!(CycleOutcome::classify(false, true), CycleOutcome::FailedA);
        assert_eq!(CycleOutcome::classify(true, false), CycleOutcome::FailedB);
        assert_eq!(CycleOutcome::classify(false, false), CycleOutcome::FailedBoth);
    }

    #[test]
    fn test_counters_add_up() {
        let mut counters = CycleCounters::default();
        for (a, b) in [(true, true), (false, true), (true, false), (false, false), (true, true)] {
            counters.record(CycleOutcome::classify(a, b));
        }
        assert_eq!(counters.matched, 2);
        assert_eq!(counters.failed(), 3);
        assert_eq!(counters.total(), 5);
    }

    #[test]
    fn test_session_report_derived_values() {
        let counters = CycleCounters {
            matched: 18,
            failed_a_only: 1,
            failed_b_only: 1,
            failed_both: 0,
        };
        let report =
            SessionReport::summarize("tof", "usb", counters, Duration::from_secs(2), false, Vec::new());
        assert_eq!(report.failed, 2);
        assert_eq!(report.average_fps, 9.0);
        assert!((report.success_percent() - 90.0).abs() < 1e-9);

        let text = report.to_string();
        assert!(text.contains("Synchronized frames: 18"));
        assert!(text.contains("tof only failures: 1"));
        assert!(text.contains("Sync success rate: 90.0%"));
    }

    #[test]
    fn test_report_serializes_to_json() {
        let report = SessionReport::summarize(
            "tof",
            "usb",
            CycleCounters::default(),
            Duration::ZERO,
            true,
            Vec::new(),
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["average_fps"], 0.0);
        assert_eq!(json["counters"]["matched"], 0);
        assert_eq!(json["stopped_early"], true);
    }

    #[test]
    fn test_stream_status_display() {
        let failed = StreamReport::summarize(
            "usb",
            StreamStatus::Failed("device gone".into()),
            3,
            1,
            Duration::from_secs(1),
            Vec::new(),
        );
        assert!(failed.to_string().contains("ERROR - device gone"));
        assert!(StreamReport::unfinished("tof").to_string().contains("grace period"));
    }
}
