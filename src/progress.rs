//! Progress-callback trait for stage transitions and per-item analysis events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to observe a
//! run as it happens. The library itself only logs through `tracing`; any
//! operator-facing rendering (progress bars, JSON event streams) lives in the
//! callback implementation.
//!
//! # Example
//!
//! ```rust
//! use pagemill::{PipelineConfig, PipelineProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//! use std::time::Duration;
//!
//! struct Counter(AtomicUsize);
//!
//! impl PipelineProgressCallback for Counter {
//!     fn on_item_complete(&self, _index: usize, _total: usize, _subject: &str, _elapsed: Duration) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(Counter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::orchestrator::PipelineState;
use crate::runner::AnalysisSummary;
use std::sync::Arc;
use std::time::Duration;

/// Called by the pipeline as a task moves through its stages.
///
/// All methods have default no-op implementations. With
/// `concurrency > 1` the item callbacks may fire from several tasks at once,
/// so implementations must synchronise their own state.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called on every state-machine transition, including `Failed`.
    fn on_state(&self, state: &PipelineState) {
        let _ = state;
    }

    /// Called once before the first item is analysed.
    fn on_analysis_start(&self, total_items: usize) {
        let _ = total_items;
    }

    /// Called just before the backend is invoked for an item.
    ///
    /// # Arguments
    /// * `index`   — 1-based position in the input sequence
    /// * `total`   — number of items in the batch
    /// * `subject` — file name of the image being analysed
    fn on_item_start(&self, index: usize, total: usize, subject: &str) {
        let _ = (index, total, subject);
    }

    /// Called when an item's artifact has been persisted.
    fn on_item_complete(&self, index: usize, total: usize, subject: &str, elapsed: Duration) {
        let _ = (index, total, subject, elapsed);
    }

    /// Called when an item failed; the batch continues.
    fn on_item_error(&self, index: usize, total: usize, subject: &str, error: &str) {
        let _ = (index, total, subject, error);
    }

    /// Called once after every item was attempted or skipped.
    fn on_analysis_complete(&self, summary: &AnalysisSummary) {
        let _ = summary;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
