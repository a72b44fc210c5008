//! Progress-callback trait for per-stage, per-document events.
//!
//! Inject an [`Arc<dyn PipelineProgress>`] via
//! [`crate::orchestrator::Pipeline::with_progress`] to receive events as the
//! run moves through its stages. The CLI renders them as a single-line
//! progress bar; a dashboard could forward them to a channel instead.
//!
//! # Example
//!
//! ```rust
//! use anymd::{PipelineProgress, StageKind};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingProgress {
//!     completed: AtomicUsize,
//! }
//!
//! impl PipelineProgress for CountingProgress {
//!     fn on_item_complete(&self, stage: StageKind, name: &str, chars: usize) {
//!         let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("[{stage}] #{done} {name} ({chars} chars)");
//!     }
//! }
//!
//! let progress: Arc<dyn PipelineProgress> = Arc::new(CountingProgress {
//!     completed: AtomicUsize::new(0),
//! });
//! progress.on_item_complete(StageKind::Enhance, "a.md", 10);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The unit of work a progress event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Classify,
    Convert,
    Ocr,
    Enhance,
    Validate,
    Lint,
    Dataset,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageKind::Classify => "classify",
            StageKind::Convert => "convert",
            StageKind::Ocr => "ocr",
            StageKind::Enhance => "enhance",
            StageKind::Validate => "validate",
            StageKind::Lint => "lint",
            StageKind::Dataset => "dataset",
        };
        f.write_str(s)
    }
}

/// Called by the pipeline as it processes each stage.
///
/// Implementations must be `Send + Sync`: conversion events arrive from the
/// merged worker stream while enhancement events arrive from the background
/// poller. All methods default to no-ops.
pub trait PipelineProgress: Send + Sync {
    /// A stage is about to process `total` items (0 when unknown).
    fn on_stage_start(&self, stage: StageKind, total: usize) {
        let _ = (stage, total);
    }

    /// One item finished successfully.
    fn on_item_complete(&self, stage: StageKind, name: &str, chars: usize) {
        let _ = (stage, name, chars);
    }

    /// One item failed; the stage continues.
    fn on_item_error(&self, stage: StageKind, name: &str, error: &str) {
        let _ = (stage, name, error);
    }

    /// A stage finished after attempting `total` items.
    fn on_stage_complete(&self, stage: StageKind, succeeded: usize, total: usize) {
        let _ = (stage, succeeded, total);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgress;

impl PipelineProgress for NoopProgress {}

/// Convenience alias for the shared callback handle.
pub type ProgressCallback = Arc<dyn PipelineProgress>;
