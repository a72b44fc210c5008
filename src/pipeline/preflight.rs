//! Startup check for the external tools the pipeline drives.
//!
//! Required tools missing → the run refuses to start. Optional tools missing →
//! the features that need them are switched off with a warning: without an
//! office suite `.doc` inputs fail individually, without a markdown fixer the
//! lint pass is skipped.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use tracing::warn;

/// Which optional features are available.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreflightReport {
    pub missing_optional: Vec<String>,
    pub doc_support: bool,
    pub lint_support: bool,
}

fn on_path(bin: &str) -> bool {
    which::which(bin).is_ok()
}

/// Verify required tools; report optional ones.
pub fn check(config: &PipelineConfig) -> Result<PreflightReport, PipelineError> {
    let required = [
        (
            config.python_bin.as_str(),
            "Install Python 3 and the worker requirements (see scripts/).",
        ),
        (
            config.pdftotext_bin.as_str(),
            "Install poppler-utils (apt install poppler-utils / brew install poppler).",
        ),
    ];
    for (tool, hint) in required {
        if !on_path(tool) {
            return Err(PipelineError::MissingTool {
                tool: tool.to_string(),
                hint: hint.to_string(),
            });
        }
    }

    let mut report = PreflightReport {
        doc_support: on_path(&config.office_bin),
        lint_support: on_path(&config.lint_bin),
        ..Default::default()
    };
    if !report.doc_support {
        warn!(
            "'{}' not found: .doc files will be reported as failed",
            config.office_bin
        );
        report.missing_optional.push(config.office_bin.clone());
    }
    if !report.lint_support {
        warn!("'{}' not found: markdown lint pass disabled", config.lint_bin);
        report.missing_optional.push(config.lint_bin.clone());
    }
    Ok(report)
}
