//! Asset generation module.
//!
//! Provides the per-track pipeline and the batch runner that drives a whole
//! catalog through generation and assembly.

pub mod batch;
pub mod pipeline;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// Re-export commonly used items
pub use batch::{BatchRunner, RunSummary};
pub use pipeline::{TrackOutcome, TrackPipeline};

/// Cooperative cancellation shared between pipelines.
///
/// Cloning yields a handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of all work holding this flag.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
