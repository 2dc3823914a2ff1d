//! Cooperative cancellation broadcast over a channel.
//!
//! Nothing is ever sent on the channel. Stopping drops the only sender, which
//! disconnects every receiver at once, so any number of loops and threads
//! observe the same stop without shared flags.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use std::sync::Mutex;
use std::time::Duration;

/// Owner side: triggers the stop.
pub struct StopHandle {
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

/// Observer side, cheap to clone into every worker.
#[derive(Clone)]
pub struct StopSignal {
    rx: Receiver<()>,
}

impl StopHandle {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            tx: Mutex::new(Some(tx)),
            rx,
        }
    }

    pub fn signal(&self) -> StopSignal {
        StopSignal {
            rx: self.rx.clone(),
        }
    }

    /// Request a stop. Later calls do nothing.
    pub fn stop(&self) {
        let mut tx = match self.tx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tx.take();
    }

    pub fn is_stopped(&self) -> bool {
        self.signal().is_stopped()
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleep for up to `timeout`, waking early on stop. Returns true if stopped.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        !matches!(self.rx.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
    }

    /// Receiver that becomes ready (disconnected) on stop, for `select!`.
    pub(crate) fn channel(&self) -> &Receiver<()> {
        &self.rx
    }
}
