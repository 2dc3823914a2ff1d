//! Tandem Record - recording sessions on top of `tandem-capture` sources
//!
//! Two ways to record:
//!
//! - [`SyncRecorder`] polls two sources in lockstep and writes only the
//!   cycles where both delivered a frame, so the output videos stay aligned
//!   frame for frame.
//! - [`record_independent`] runs every source on its own thread at its own
//!   rate with no pairing.
//!
//! Frames are converted to 8-bit RGB by [`Converter`] and written through
//! lazily opened [`sink`]s whose resolution is fixed by the first frame.
//! [`RawDump`] keeps the 16-bit planes losslessly.

pub mod convert;
pub mod error;
pub mod independent;
pub mod probe;
pub mod raw_dump;
pub mod report;
pub mod sink;
pub mod stop;
pub mod sync;

pub use convert::{Colormap, ConvertOptions, Converter, scale_to_u8};
pub use error::{RecordError, SinkError};
pub use independent::{DEFAULT_GRACE, StreamJob, record_independent};
pub use probe::{ProbeReport, probe, snapshot};
pub use raw_dump::{PlaneStats, RawDump};
pub use report::{CycleCounters, CycleOutcome, IndependentReport, SessionReport, StreamReport, StreamStatus};
pub use sink::{FfmpegFactory, FfmpegOptions, SinkFactory, SinkSet, SinkSpec, VideoSink};
pub use stop::{StopHandle, StopSignal};
pub use sync::{SyncConfig, SyncRecorder};
