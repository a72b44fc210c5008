//! Pipeline stages for document-to-corpus conversion.
//!
//! Each submodule implements one step. The orchestrator sequences them;
//! external collaborators (text extractor, worker processes, office suite,
//! markdown fixer) sit behind traits so stages can be tested in-process.
//!
//! ## Data Flow
//!
//! ```text
//! discover ──▶ classify ──▶ convert / OCR ──▶ enhance ──▶ validate ──▶ lint ──▶ dataset
//! (walkdir)   (pdftotext)   (workers)         (rules)     (patterns)  (fixer)  (sha256)
//! ```
//!
//! 1. [`discover`]: enumerate inputs, derive output names, resume index
//! 2. [`classify`]: triage PDFs into native / mixed / scanned
//! 3. [`crate::convert`]: shard native PDFs and DOC/DOCX across workers
//! 4. [`enhance`]: deterministic markdown cleanup ([`html`] for HTML input)
//! 5. [`validate`]: artifact scan and `quality-report.json`
//! 6. [`lint`]: external markdown auto-fix
//! 7. [`dataset`]: dedup into `dataset.jsonl`
//!
//! [`preflight`] runs before all of them.

pub mod classify;
pub mod dataset;
pub mod discover;
pub mod enhance;
pub mod html;
pub mod lint;
pub mod preflight;
pub mod validate;

use crate::error::PipelineError;
use serde::Serialize;
use std::path::Path;

/// Serialise `value` as pretty JSON to a temp file, then rename into place.
pub(crate) async fn write_json_atomic<T: Serialize>(
    path: &Path,
    value: &T,
) -> Result<(), PipelineError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| PipelineError::Sidecar {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .map_err(|e| PipelineError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| PipelineError::io(path, e))
}
