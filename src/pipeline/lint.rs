//! Markdown auto-fix pass over the enhanced corpus.
//!
//! The fixer is an external tool (`markdownlint-cli2 --fix`). It exits
//! non-zero whenever issues remain that it cannot fix, which is routine for
//! converted documents, so a non-zero exit is logged and otherwise ignored.

use crate::error::PipelineError;
use futures::future::BoxFuture;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, warn};

/// Files per fixer invocation, keeping the argument list well under `ARG_MAX`.
const FILES_PER_RUN: usize = 200;

/// What the fixer did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LintOutcome {
    pub files: usize,
    pub runs: usize,
    /// Runs that exited non-zero (issues left unfixed).
    pub runs_with_issues: usize,
}

/// Applies in-place markdown fixes to a set of files.
pub trait MarkdownLinter: Send + Sync {
    fn fix<'a>(&'a self, files: &'a [PathBuf]) -> BoxFuture<'a, Result<LintOutcome, PipelineError>>;
}

/// `markdownlint-cli2` reads arguments as globs; a leading `:` makes it take
/// the path literally, so names with `[`, `*` or `!` still match themselves.
fn literal_path_arg(path: &Path) -> OsString {
    let mut arg = OsString::from(":");
    arg.push(path);
    arg
}

/// [`MarkdownLinter`] backed by `markdownlint-cli2`.
#[derive(Debug, Clone)]
pub struct MarkdownLintCli {
    bin: String,
}

impl MarkdownLintCli {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }
}

impl MarkdownLinter for MarkdownLintCli {
    fn fix<'a>(&'a self, files: &'a [PathBuf]) -> BoxFuture<'a, Result<LintOutcome, PipelineError>> {
        Box::pin(async move {
            let mut outcome = LintOutcome {
                files: files.len(),
                ..Default::default()
            };
            for chunk in files.chunks(FILES_PER_RUN) {
                let status = tokio::process::Command::new(&self.bin)
                    .arg("--fix")
                    .args(chunk.iter().map(|p| literal_path_arg(p)))
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .kill_on_drop(true)
                    .status()
                    .await
                    .map_err(|e| PipelineError::WorkerSpawn {
                        worker: self.bin.clone(),
                        detail: e.to_string(),
                    })?;
                outcome.runs += 1;
                if !status.success() {
                    outcome.runs_with_issues += 1;
                    debug!("{} left unfixed issues ({})", self.bin, status);
                }
            }
            if outcome.runs_with_issues > 0 {
                warn!(
                    "Markdown lint left issues in {} of {} batches",
                    outcome.runs_with_issues, outcome.runs
                );
            }
            Ok(outcome)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_passed_literally() {
        assert_eq!(
            literal_path_arg(Path::new("out/markdown/QĐ [2020] *a*.md")),
            OsString::from(":out/markdown/QĐ [2020] *a*.md")
        );
    }

    #[tokio::test]
    async fn empty_file_list_runs_nothing() {
        let linter = MarkdownLintCli::new("definitely-not-a-real-binary");
        let outcome = linter.fix(&[]).await.unwrap();
        assert_eq!(outcome, LintOutcome::default());
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let linter = MarkdownLintCli::new("definitely-not-a-real-binary");
        let err = linter.fix(&[PathBuf::from("a.md")]).await.unwrap_err();
        assert!(matches!(err, PipelineError::WorkerSpawn { .. }));
    }
}
