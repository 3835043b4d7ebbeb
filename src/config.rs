//! Focus run options and cancellation.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Warn when a single node exposes more reverse-dep edges than this
/// during the mark phase.
pub const RDEP_WARNING_THRESHOLD: usize = 10_000;

/// Warn when a single node exposes more direct-dep edges than this
/// during the mark phase.
pub const DEP_WARNING_THRESHOLD: usize = 10_000;

/// Cloneable cancellation token shared between the caller and a focus run.
///
/// Cancelling mid-run leaves the graph in an intermediate state; the caller
/// is expected to discard it.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Options for a focus run.
#[derive(Clone, Debug, Default)]
pub struct FocusOptions {
    parallelism: Option<NonZeroUsize>,
    fanout_warning_threshold: Option<usize>,
    cancel: CancelFlag,
}

impl FocusOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the worker parallelism. Defaults to the available hardware
    /// concurrency.
    pub fn with_parallelism(mut self, workers: NonZeroUsize) -> Self {
        self.parallelism = Some(workers);
        self
    }

    /// Override both fan-out warning thresholds at once.
    pub fn with_fanout_warning_threshold(mut self, threshold: usize) -> Self {
        self.fanout_warning_threshold = Some(threshold);
        self
    }

    /// Attach a cancellation token. The same flag may be handed to several
    /// runs; a cancelled flag aborts each of them.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Resolved worker count for the visitor pool.
    pub fn parallelism(&self) -> usize {
        match self.parallelism {
            Some(workers) => workers.get(),
            None => std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
        }
    }

    pub fn rdep_warning_threshold(&self) -> usize {
        self.fanout_warning_threshold
            .unwrap_or(RDEP_WARNING_THRESHOLD)
    }

    pub fn dep_warning_threshold(&self) -> usize {
        self.fanout_warning_threshold
            .unwrap_or(DEP_WARNING_THRESHOLD)
    }

    pub fn cancel(&self) -> &CancelFlag {
        &self.cancel
    }
}
