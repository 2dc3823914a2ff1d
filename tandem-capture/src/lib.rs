//! Tandem Capture - frame acquisition from USB and ToF cameras
//!
//! This crate provides implementations of the `CaptureSource` trait for:
//!
//! - Webcams (via nokhwa, requires `webcam` feature)
//! - ToF depth cameras exposed as V4L2 nodes (via v4l, requires `tof` feature)
//! - Synthetic test patterns (always available)
//!
//! Every source answers `acquire(timeout)` without blocking past the timeout,
//! which is what the recorders in `tandem-record` build on.
//!
//! ## Example
//!
//! ```ignore
//! use std::time::Duration;
//! use tandem_capture::{CaptureSource, WebcamSource};
//!
//! let mut camera = WebcamSource::new(0)?;
//! let sample = camera.acquire(Duration::from_millis(200))?;
//! ```

mod frame;
mod layout;
mod pattern;
mod reader;
mod source;

#[cfg(feature = "webcam")]
mod webcam;

#[cfg(feature = "tof")]
mod tof;

pub use frame::{AmplitudeFrame, ColorFrame, DepthFrame, Frame, FrameKind, Gray16Image, Sample};
pub use layout::{TofLayout, TofSettings, split_planes};
pub use pattern::{PatternKind, PatternSource};
pub use source::{CaptureError, CaptureSource};

#[cfg(feature = "webcam")]
pub use webcam::{WebcamSettings, WebcamSource};

#[cfg(feature = "tof")]
pub use tof::TofSource;
