//! Device reader running on its own thread.
//!
//! Driver calls such as a webcam `frame()` or a V4L2 dequeue block until the
//! hardware delivers. The reader thread owns the device and keeps only the
//! freshest result in a one-slot channel, so `recv` can be bounded by a
//! timeout and never waits on the driver directly.
//!
//! `read` is expected to return within a short driver timeout of its own
//! (reported as `CaptureError::Timeout`), so the thread notices a stop
//! between reads. A run of failed reads is treated as a lost device.

use crate::frame::{Frame, Sample};
use crate::source::CaptureError;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError, bounded};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

type ReadResult = Result<Vec<Frame>, CaptureError>;

/// Consecutive failed reads after which the device counts as gone.
pub(crate) const MAX_CONSECUTIVE_FAILURES: u32 = 30;

/// Pause after a failed read before trying the device again.
const ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// How long `stop` waits for the thread to release the device.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

pub(crate) struct ReaderThread {
    name: String,
    frames: Receiver<ReadResult>,
    stop_tx: Option<Sender<()>>,
    /// Disconnects when the thread exits.
    done: Receiver<()>,
    handle: Option<JoinHandle<()>>,
    sequence: u64,
}

impl ReaderThread {
    /// Open a device on a new thread and start reading from it.
    ///
    /// `open` runs on the reader thread; its error is returned from here.
    /// `read` receives the seconds elapsed since the device opened.
    pub(crate) fn spawn<D, O, R>(name: &str, open: O, mut read: R) -> Result<Self, CaptureError>
    where
        D: 'static,
        O: FnOnce() -> Result<D, CaptureError> + Send + 'static,
        R: FnMut(&mut D, f64) -> ReadResult + Send + 'static,
    {
        let (ready_tx, ready_rx) = bounded::<Result<(), CaptureError>>(1);
        let (frame_tx, frame_rx) = bounded::<ReadResult>(1);
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let (done_tx, done_rx) = bounded::<()>(0);
        let evict_rx = frame_rx.clone();
        let reader_name = name.to_string();

        let handle = thread::Builder::new()
            .name(format!("{name}-reader"))
            .spawn(move || {
                let _done = done_tx;
                let mut device = match open() {
                    Ok(device) => {
                        let _ = ready_tx.send(Ok(()));
                        device
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let started = Instant::now();
                let mut failures = 0u32;
                loop {
                    if !matches!(stop_rx.try_recv(), Err(TryRecvError::Empty)) {
                        break;
                    }

                    let result = match read(&mut device, started.elapsed().as_secs_f64()) {
                        // Driver wait expired; nothing to hand over.
                        Err(CaptureError::Timeout(_)) => continue,
                        Err(e) if !e.is_fatal() => {
                            failures += 1;
                            if failures >= MAX_CONSECUTIVE_FAILURES {
                                warn!("{}: {} reads failed in a row, last: {}", reader_name, failures, e);
                                Err(CaptureError::Disconnected(format!(
                                    "{reader_name} stopped delivering frames: {e}"
                                )))
                            } else {
                                Err(e)
                            }
                        }
                        other => {
                            if other.is_ok() {
                                failures = 0;
                            }
                            other
                        }
                    };
                    let failed = result.is_err();
                    let fatal = matches!(&result, Err(e) if e.is_fatal());

                    let mut pending = result;
                    loop {
                        match frame_tx.try_send(pending) {
                            Ok(()) => break,
                            Err(TrySendError::Full(back)) => {
                                // Nobody took the previous frame; replace it.
                                if evict_rx.try_recv().is_ok() {
                                    trace!("{}: dropping stale frame", reader_name);
                                }
                                pending = back;
                            }
                            Err(TrySendError::Disconnected(_)) => return,
                        }
                    }

                    if fatal {
                        break;
                    }
                    if failed
                        && !matches!(stop_rx.recv_timeout(ERROR_BACKOFF), Err(RecvTimeoutError::Timeout))
                    {
                        break;
                    }
                }
                debug!("{} reader exiting", reader_name);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                name: name.to_string(),
                frames: frame_rx,
                stop_tx: Some(stop_tx),
                done: done_rx,
                handle: Some(handle),
                sequence: 0,
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(CaptureError::OpenFailed {
                    device: name.to_string(),
                    reason: "reader thread exited during open".to_string(),
                })
            }
        }
    }

    /// Wait up to `timeout` for the next result from the device.
    pub(crate) fn recv(&mut self, timeout: Duration) -> Result<Sample, CaptureError> {
        match self.frames.recv_timeout(timeout) {
            Ok(Ok(frames)) => {
                self.sequence += 1;
                Ok(Sample::new(frames, self.sequence))
            }
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Err(CaptureError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => {
                Err(CaptureError::Disconnected(self.name.clone()))
            }
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Ask the reader to exit and wait, for a bounded time, for it to
    /// release the device. A reader stuck in the driver is left behind.
    pub(crate) fn stop(&mut self) {
        self.stop_tx.take();
        let Some(handle) = self.handle.take() else {
            return;
        };
        if matches!(self.done.recv_timeout(STOP_JOIN_TIMEOUT), Err(RecvTimeoutError::Timeout)) {
            warn!(
                "{} reader did not exit within {:?}, abandoning it",
                self.name, STOP_JOIN_TIMEOUT
            );
            return;
        }
        if handle.join().is_err() {
            debug!("{} reader panicked", self.name);
        }
    }
}

impl Drop for ReaderThread {
    fn drop(&mut self) {
        self.stop();
    }
}
