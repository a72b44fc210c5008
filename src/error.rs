//! Error types for the anymd pipeline.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PipelineError`] is **fatal**: the run cannot proceed at all (missing
//!   input directory, unreadable config, a required tool absent from `PATH`).
//!   Returned as `Err(PipelineError)` from the orchestrator entry points.
//!
//! * [`DocumentError`] is **non-fatal**: one document failed (worker reported
//!   an error, the office pre-converter choked, the worker died before
//!   reporting) but every other document is fine. Rendered into
//!   [`crate::output::ConversionResult::error`] and collected into
//!   [`crate::output::PipelineStats::errors`] for the end-of-run report.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the anymd library.
///
/// Document-level failures use [`DocumentError`] and are stored in
/// results rather than propagated here.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The input directory does not exist or is not a directory.
    #[error("Input directory not found: '{path}'\nCheck the path exists and is a directory.")]
    InputDirNotFound { path: PathBuf },

    // ── Config errors ─────────────────────────────────────────────────────
    /// The config file exists but could not be read.
    #[error("Failed to read config '{path}': {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON for [`crate::config::PipelineConfig`].
    #[error("Failed to parse config '{path}': {detail}")]
    ConfigParse { path: PathBuf, detail: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Environment errors ────────────────────────────────────────────────
    /// A required external tool is not on `PATH`.
    #[error("Required tool '{tool}' not found on PATH.\n{hint}")]
    MissingTool { tool: String, hint: String },

    /// A worker process could not be started at all.
    #[error("Failed to start {worker}: {detail}")]
    WorkerSpawn { worker: String, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Reading or writing a pipeline artifact failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A sidecar file could not be serialised or parsed.
    #[error("Failed to (de)serialise '{path}': {detail}")]
    Sidecar { path: PathBuf, detail: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A non-fatal error for a single document.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DocumentError {
    /// The `.doc` → `.docx` step failed; extraction was skipped.
    #[error("failed to convert .doc to .docx")]
    PreconversionFailed,

    /// A `.doc` input was found but no office converter is installed.
    #[error("office converter not available")]
    OfficeUnavailable,

    /// The worker emitted an `error` event for this manifest entry.
    #[error("{detail}")]
    Worker { detail: String },

    /// The worker exited without ever reporting on this entry.
    #[error("worker exited (code {}) without reporting a result", .exit_code.map(|c| c.to_string()).unwrap_or_else(|| "none".into()))]
    NoResult { exit_code: Option<i32> },

    /// The text extractor could not read the PDF during classification.
    #[error("text extraction failed: {detail}")]
    Extraction { detail: String },

    /// Reading or writing one markdown file failed.
    #[error("{op} '{path}': {detail}")]
    File {
        op: &'static str,
        path: PathBuf,
        detail: String,
    },
}
