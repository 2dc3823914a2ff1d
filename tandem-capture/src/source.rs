//! Common capture source types and traits.

use crate::frame::Sample;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during capture.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open device {device}: {reason}")]
    OpenFailed { device: String, reason: String },

    #[error("No frame within {0:?}")]
    Timeout(Duration),

    #[error("Failed to capture frame: {0}")]
    CaptureFailed(String),

    #[error("Device disconnected: {0}")]
    Disconnected(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errno values a V4L2 dequeue fails with once the device is unplugged
/// (ENODEV, ENXIO, EIO).
const UNPLUGGED_ERRNOS: [i32; 3] = [19, 6, 5];

impl CaptureError {
    /// Whether the error ends the session rather than a single poll.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CaptureError::Disconnected(_))
    }

    /// Classify an I/O error from a driver frame read. `waited` is the
    /// driver-level timeout that produced a `TimedOut`.
    pub fn from_read_error(err: &std::io::Error, waited: Duration) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => CaptureError::Timeout(waited),
            ErrorKind::NotFound | ErrorKind::BrokenPipe => CaptureError::Disconnected(err.to_string()),
            _ if err.raw_os_error().is_some_and(|code| UNPLUGGED_ERRNOS.contains(&code)) => {
                CaptureError::Disconnected(err.to_string())
            }
            _ => CaptureError::CaptureFailed(err.to_string()),
        }
    }

    /// Classify a driver error that only survives as text, such as
    /// "No such device (os error 19)".
    pub fn from_driver_message(message: String) -> Self {
        let unplugged = UNPLUGGED_ERRNOS
            .iter()
            .any(|code| message.contains(&format!("(os error {code})")));
        if unplugged {
            CaptureError::Disconnected(message)
        } else {
            CaptureError::CaptureFailed(message)
        }
    }
}

/// Trait for capture sources that provide frames on demand.
///
/// Implementations own their device handle exclusively. `stop` releases it
/// and must be safe to call more than once; dropping a source stops it.
pub trait CaptureSource {
    /// Short name used for file names and logs ("usb", "tof").
    fn name(&self) -> &str;

    /// Wait at most `timeout` for the next sample.
    ///
    /// Returns `CaptureError::Timeout` when nothing arrived in time. Any
    /// driver-level buffer has been released by the time this returns.
    fn acquire(&mut self, timeout: Duration) -> Result<Sample, CaptureError>;

    /// Get the frame rate, if known.
    fn frame_rate(&self) -> Option<f32>;

    /// Check if the source is still active.
    fn is_active(&self) -> bool;

    /// Stop capturing and release the device.
    fn stop(&mut self);
}

impl<S: CaptureSource + ?Sized> CaptureSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn acquire(&mut self, timeout: Duration) -> Result<Sample, CaptureError> {
        (**self).acquire(timeout)
    }

    fn frame_rate(&self) -> Option<f32> {
        (**self).frame_rate()
    }

    fn is_active(&self) -> bool {
        (**self).is_active()
    }

    fn stop(&mut self) {
        (**self).stop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_disconnect_is_fatal() {
        assert!(CaptureError::Disconnected("usb".into()).is_fatal());
        assert!(!CaptureError::Timeout(Duration::from_millis(200)).is_fatal());
        assert!(!CaptureError::CaptureFailed("decode".into()).is_fatal());
    }

    #[test]
    fn test_unplugged_device_errors_are_fatal() {
        for code in [19, 6, 5] {
            let err = std::io::Error::from_raw_os_error(code);
            let classified = CaptureError::from_read_error(&err, Duration::from_millis(200));
            assert!(classified.is_fatal(), "errno {code} should be fatal");
        }
        let gone = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        assert!(CaptureError::from_read_error(&gone, Duration::ZERO).is_fatal());
    }

    #[test]
    fn test_read_timeout_and_transient_errors_are_not_fatal() {
        let waited = Duration::from_millis(200);
        let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "VIDIOC_DQBUF");
        assert!(matches!(
            CaptureError::from_read_error(&timed_out, waited),
            CaptureError::Timeout(d) if d == waited
        ));

        // EINTR
        let interrupted = std::io::Error::from_raw_os_error(4);
        assert!(matches!(
            CaptureError::from_read_error(&interrupted, waited),
            CaptureError::CaptureFailed(_)
        ));
    }

    #[test]
    fn test_driver_message_classification() {
        let gone = CaptureError::from_driver_message("No such device (os error 19)".into());
        assert!(gone.is_fatal());
        let corrupt = CaptureError::from_driver_message("Could not decode MJPEG".into());
        assert!(matches!(corrupt, CaptureError::CaptureFailed(_)));
    }

    #[test]
    fn test_open_failed_message_names_device() {
        let err = CaptureError::OpenFailed {
            device: "/dev/video0".into(),
            reason: "busy".into(),
        };
        assert_eq!(err.to_string(), "Failed to open device /dev/video0: busy");
    }
}
