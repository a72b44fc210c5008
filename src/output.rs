//! Result types produced by the pipeline stages.
//!
//! Results are plain data: created once by the stage that owns them and never
//! mutated afterwards. All of them serialise so a caller can dump a run
//! summary as JSON.

use crate::error::DocumentError;
use crate::pipeline::dataset::DatasetResult;
use crate::pipeline::validate::QualityReport;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Outcome of converting one input document to raw markdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionResult {
    /// The original input document (a `.doc`, not its temporary `.docx`).
    pub input: PathBuf,
    /// Where the raw markdown landed; `None` on failure.
    pub output: Option<PathBuf>,
    pub success: bool,
    /// Characters of markdown the worker reported writing.
    pub chars: usize,
    pub error: Option<String>,
    /// `true` when the output already existed and no worker was invoked.
    pub resumed: bool,
}

impl ConversionResult {
    pub fn converted(input: PathBuf, output: PathBuf, chars: usize) -> Self {
        Self {
            input,
            output: Some(output),
            success: true,
            chars,
            error: None,
            resumed: false,
        }
    }

    pub fn resumed(input: PathBuf, output: PathBuf) -> Self {
        Self {
            resumed: true,
            ..Self::converted(input, output, 0)
        }
    }

    pub fn failed(input: PathBuf, error: &DocumentError) -> Self {
        Self {
            input,
            output: None,
            success: false,
            chars: 0,
            error: Some(error.to_string()),
            resumed: false,
        }
    }
}

/// Outcome of enhancing one markdown file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanResult {
    pub input: PathBuf,
    pub output: PathBuf,
    pub success: bool,
    pub original_len: usize,
    pub cleaned_len: usize,
    pub error: Option<String>,
}

/// End-of-run summary assembled by the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Inputs discovered (PDF + DOC + DOCX).
    pub discovered: usize,
    /// Documents converted by a worker during this run.
    pub converted: usize,
    /// Documents whose raw output already existed.
    pub resumed: usize,
    /// Documents that failed conversion.
    pub failed: usize,
    /// PDFs handed to the OCR collaborator.
    pub ocr_queued: usize,
    /// Markdown files enhanced during this run.
    pub enhanced: usize,
    /// Characters of raw markdown reported by workers.
    pub raw_chars: usize,
    /// Characters of enhanced markdown written.
    pub enhanced_chars: usize,
    /// Every non-fatal error, formatted as `<file>: <message>`.
    pub errors: Vec<String>,
    pub quality: Option<QualityReport>,
    pub dataset: Option<DatasetResult>,
    pub total_duration_ms: u64,
}

impl PipelineStats {
    /// Fold a batch of conversion results into the counters.
    pub fn record_conversions(&mut self, results: &[ConversionResult]) {
        for r in results {
            if r.resumed {
                self.resumed += 1;
            } else if r.success {
                self.converted += 1;
                self.raw_chars += r.chars;
            } else {
                self.failed += 1;
                self.errors.push(format!(
                    "{}: {}",
                    display_name(&r.input),
                    r.error.as_deref().unwrap_or("unknown error")
                ));
            }
        }
    }

    /// Fold a batch of enhancement results into the counters.
    pub fn record_cleans(&mut self, results: &[CleanResult]) {
        for r in results {
            if r.success {
                self.enhanced += 1;
                self.enhanced_chars += r.cleaned_len;
            } else {
                self.errors.push(format!(
                    "{}: {}",
                    display_name(&r.input),
                    r.error.as_deref().unwrap_or("unknown error")
                ));
            }
        }
    }
}

pub(crate) fn display_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
