//! Cooperative cancellation of a running build

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Shared flag telling workers to stop
///
/// Clones observe the same flag. Running processes are killed when it is set, and
/// steps that have not started yet fail immediately.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Cancels this token on Ctrl+C or SIGTERM
    ///
    /// Can only be installed once per process.
    pub fn cancel_on_shutdown_signal(&self) -> Result<(), ctrlc::Error> {
        let token = self.clone();
        ctrlc::set_handler(move || {
            tracing::warn!("Shutdown requested, terminating running tools");
            token.cancel();
        })
    }
}
