use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use super::error::UploadError;

/// One event in the life of an upload attempt
///
/// `InProgress` may recur any number of times. `Completed` and `Failed` are
/// terminal: exactly one of them is delivered per attempt and nothing
/// follows it.
#[derive(Debug)]
pub enum TransferOutcome {
    InProgress(u8),
    Completed(String),
    Failed(UploadError),
}

impl TransferOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress(_))
    }
}

/// Caller-owned sink for upload events
///
/// Callbacks may run on a worker task rather than the caller's context, so
/// implementations must be cheap and must not block.
pub trait UploadListener: Send + Sync {
    fn on_progress_changed(&self, percentage: u8);
    fn on_transfer_completed(&self, object_url: &str);
    fn on_error(&self, error: UploadError);
}

/// Forward events into a channel, for callers that prefer to `recv().await`
impl UploadListener for UnboundedSender<TransferOutcome> {
    fn on_progress_changed(&self, percentage: u8) {
        let _ = self.send(TransferOutcome::InProgress(percentage));
    }

    fn on_transfer_completed(&self, object_url: &str) {
        let _ = self.send(TransferOutcome::Completed(object_url.to_string()));
    }

    fn on_error(&self, error: UploadError) {
        let _ = self.send(TransferOutcome::Failed(error));
    }
}

/// Bytes sent so far against a fixed total
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressState {
    pub bytes_written: u64,
    pub total_bytes: u64,
}

impl ProgressState {
    pub fn new(bytes_written: u64, total_bytes: u64) -> Self {
        Self {
            bytes_written,
            total_bytes,
        }
    }

    /// `floor(100 * written / total)` clamped to `0..=100`
    ///
    /// A zero total reports 0, since nothing meaningful is known yet.
    pub fn percentage(&self) -> u8 {
        if self.total_bytes == 0 {
            return 0;
        }
        let pct = (self.bytes_written as u128 * 100) / self.total_bytes as u128;
        pct.min(100) as u8
    }
}

/// Delivers [`TransferOutcome`]s for one upload attempt
///
/// Progress is forwarded only when the percentage increases, terminal
/// events are forwarded once, and anything after the terminal event is
/// dropped. If the emitter goes away without a terminal event the listener
/// receives [`UploadError::Interrupted`].
///
/// Delivery is serialized: the listener is called with the emitter's lock
/// held, so it must not call back into the same emitter.
pub struct EventEmitter {
    listener: Arc<dyn UploadListener>,
    state: Mutex<EmitterState>,
}

#[derive(Default)]
struct EmitterState {
    last_percentage: Option<u8>,
    terminated: bool,
}

impl EventEmitter {
    pub fn new(listener: Arc<dyn UploadListener>) -> Self {
        Self {
            listener,
            state: Mutex::new(EmitterState::default()),
        }
    }

    pub fn emit(&self, outcome: TransferOutcome) {
        match outcome {
            TransferOutcome::InProgress(pct) => self.progress(pct),
            TransferOutcome::Completed(url) => self.complete(&url),
            TransferOutcome::Failed(err) => self.fail(err),
        }
    }

    pub fn progress(&self, percentage: u8) {
        let pct = percentage.min(100);
        let mut state = self.state();
        if state.terminated || state.last_percentage.is_some_and(|last| last >= pct) {
            return;
        }
        state.last_percentage = Some(pct);
        self.listener.on_progress_changed(pct);
    }

    pub fn complete(&self, object_url: &str) {
        let mut state = self.state();
        if state.terminated {
            debug!("Ignoring completion after terminal event: {}", object_url);
            return;
        }
        state.terminated = true;
        self.listener.on_transfer_completed(object_url);
    }

    pub fn fail(&self, error: UploadError) {
        let mut state = self.state();
        if state.terminated {
            debug!("Ignoring error after terminal event: {}", error);
            return;
        }
        state.terminated = true;
        self.listener.on_error(error);
    }

    pub fn is_terminated(&self) -> bool {
        self.state().terminated
    }

    // a poisoned lock only means a listener panicked; the state is intact
    fn state(&self) -> MutexGuard<'_, EmitterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for EventEmitter {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !state.terminated {
            state.terminated = true;
            warn!("Upload ended without an outcome, reporting interruption");
            self.listener.on_error(UploadError::Interrupted);
        }
    }
}
