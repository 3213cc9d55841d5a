//! Progress reporting for a certificate batch.
//!
//! Two pieces live here:
//!
//! * [`GenerationProgressCallback`], an optional observer injected via
//!   [`crate::config::GenerationConfigBuilder::progress_callback`] that
//!   receives per-candidate events as the batch runs.
//! * [`BatchContext`], the per-request counters behind the batch's
//!   percentage. Each `generate` call owns one; nothing is process-wide.
//!
//! # Example
//!
//! ```rust
//! use certbatch::{GenerationProgressCallback, GenerationConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl GenerationProgressCallback for CountingCallback {
//!     fn on_candidate_complete(&self, index: usize, total: usize, identifier: &str) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Candidate {}/{} ({}) done", index, total, identifier);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = GenerationConfig::builder()
//!     .progress_callback(counter as Arc<dyn GenerationProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

/// Called by the generation pipeline as it processes each candidate.
///
/// Implementations must be `Send + Sync`: candidates render on tokio's
/// blocking pool and events may arrive from several threads at once. All
/// methods default to no-ops.
pub trait GenerationProgressCallback: Send + Sync {
    /// Called once after inputs validate and before any candidate renders.
    ///
    /// # Arguments
    /// * `total`: number of unique candidates that will be rendered
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    /// Called just before a candidate's document is rendered.
    ///
    /// # Arguments
    /// * `index`     : 1-indexed position among unique candidates
    /// * `total`     : number of unique candidates
    /// * `identifier`: the candidate's identifier
    fn on_candidate_start(&self, index: usize, total: usize, identifier: &str) {
        let _ = (index, total, identifier);
    }

    /// Called when a candidate's document was rendered and recorded.
    fn on_candidate_complete(&self, index: usize, total: usize, identifier: &str) {
        let _ = (index, total, identifier);
    }

    /// Called when a candidate fails; the batch continues.
    fn on_candidate_error(&self, index: usize, total: usize, identifier: &str, error: &str) {
        let _ = (index, total, identifier, error);
    }

    /// Called whenever the batch percentage moves (10 once inputs validate,
    /// up to 90 across candidates, 100 when packaged).
    fn on_progress(&self, percent: u8) {
        let _ = percent;
    }

    /// Called once after the archive has been packaged.
    ///
    /// # Arguments
    /// * `total`   : unique candidates attempted
    /// * `packaged`: documents written into the archive
    fn on_batch_complete(&self, total: usize, packaged: usize) {
        let _ = (total, packaged);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl GenerationProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::GenerationConfig`].
pub type ProgressCallback = Arc<dyn GenerationProgressCallback>;

/// Percentage reached once inputs have been validated and ingested.
const PERCENT_VALIDATED: u8 = 10;
/// Percentage reached when every candidate has been attempted.
const PERCENT_RENDERED: u8 = 90;

/// Per-request progress counters.
///
/// The percentage moves 0 → 10 once inputs validate, scales linearly to 90
/// across candidates, and reaches 100 when the archive is packaged.
#[derive(Debug, Default)]
pub struct BatchContext {
    total: AtomicUsize,
    processed: AtomicUsize,
    failed: AtomicUsize,
    percent: AtomicU8,
}

impl BatchContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that inputs are valid and `total` unique candidates will run.
    pub fn begin(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
        self.percent.store(PERCENT_VALIDATED, Ordering::SeqCst);
    }

    /// Record one attempted candidate. Returns the updated processed count.
    pub fn record(&self, success: bool) -> usize {
        if !success {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
        let done = self.processed.fetch_add(1, Ordering::SeqCst) + 1;
        let total = self.total.load(Ordering::SeqCst).max(1);
        let span = (PERCENT_RENDERED - PERCENT_VALIDATED) as usize;
        let pct = PERCENT_VALIDATED as usize + span * done.min(total) / total;
        self.percent.fetch_max(pct as u8, Ordering::SeqCst);
        done
    }

    pub fn finish(&self) {
        self.percent.store(100, Ordering::SeqCst);
    }

    pub fn progress_percent(&self) -> u8 {
        self.percent.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }
}
