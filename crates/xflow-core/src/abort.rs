//! Cancellation token shared between a statement's caller and its scheduler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Settable from any thread; polled between scheduler steps and inside long
/// stream loops.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag {
    flag: Arc<AtomicBool>,
}

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Re-arm for the next statement.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }
}
