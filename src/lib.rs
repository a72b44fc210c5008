//! # anymd
//!
//! Turn a directory tree of PDF, DOC and DOCX files into a cleaned,
//! deduplicated Markdown corpus.
//!
//! ## Why this crate?
//!
//! Legal and administrative document dumps are a mix of born-digital PDFs,
//! scans, and Word files of every vintage. Each needs a different extractor,
//! each extractor fails in its own way, and a full run over tens of thousands
//! of files takes hours. This crate is the orchestrator: it triages PDFs by
//! how much text they carry, fans documents out to external workers, sends
//! scans to OCR, cleans everything with deterministic rules, checks the result
//! for known artifacts, and writes a JSONL dataset. Every stage can be killed
//! and resumed; the output directory is the checkpoint.
//!
//! ## Pipeline Overview
//!
//! ```text
//! input dir
//!  │
//!  ├─ 0. Preflight  required tools on PATH, optional ones degrade
//!  ├─ 1. Classify   pdftotext sample → native / mixed / scanned
//!  ├─ 2. Convert    sharded worker processes (native PDF, DOC/DOCX)
//!  │     OCR        scanned + mixed PDFs, in parallel with conversion
//!  │     Enhance    rule-based cleanup as files land
//!  └─ 3. Validate   artifact scan → quality-report.json
//!        Lint       external markdown auto-fix
//!        Dataset    SHA-256 dedup → dataset.jsonl
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use anymd::{preflight, Collaborators, Pipeline, PipelineConfig, PipelinePaths};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::load(Path::new("config.json"))?;
//!     let report = preflight::check(&config)?;
//!     let paths = PipelinePaths::new(Path::new("data"), Path::new("output"))?;
//!     let collab = Collaborators::from_config(&config, &report);
//!     let stats = Pipeline::new(config, paths, collab).run_resumable().await?;
//!     eprintln!(
//!         "{} converted, {} resumed, {} failed",
//!         stats.converted, stats.resumed, stats.failed
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `anymd` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! anymd = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod paths;
pub mod pipeline;
pub mod progress;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ArtifactSettings, ExtraArtifactPattern, PipelineConfig, PipelineConfigBuilder};
pub use error::{DocumentError, PipelineError};
pub use orchestrator::{
    next_stage, snapshot_of, BatchOcrRunner, Collaborators, OcrProgress, OcrRunner, Pipeline,
    RunSnapshot, RunState, Stage, StageGates,
};
pub use output::{CleanResult, ConversionResult, PipelineStats};
pub use paths::PipelinePaths;
pub use pipeline::enhance::enhance_markdown;
pub use pipeline::preflight;
pub use progress::{NoopProgress, PipelineProgress, ProgressCallback, StageKind};
