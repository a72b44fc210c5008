//! PDF triage: native text layer, mixed, or scanned.
//!
//! ## Why classify at all?
//!
//! Native extraction is fast and exact but produces nothing for image-only
//! pages; OCR handles those but is an order of magnitude slower. Counting the
//! alphabetic characters in the first few pages of each PDF is a cheap,
//! surprisingly reliable way to route every file to the right tool.
//!
//! The result is persisted to `classification.json`, which is also the input
//! contract of the OCR collaborator (it reads `files.scanned` and
//! `files.mixed`).

use crate::config::PipelineConfig;
use crate::error::{DocumentError, PipelineError};
use crate::output::display_name;
use crate::pipeline::write_json_atomic;
use crate::progress::{PipelineProgress, StageKind};
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, info, warn};

/// Triage bucket for one PDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Native,
    Mixed,
    Scanned,
    /// Text extraction failed; the file is excluded from every bucket.
    Error,
}

/// File lists per bucket, each sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifiedFiles {
    pub native: Vec<PathBuf>,
    pub mixed: Vec<PathBuf>,
    pub scanned: Vec<PathBuf>,
    /// PDFs the extractor could not read.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<PathBuf>,
}

/// Persisted triage result (`classification.json`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub total: usize,
    pub native: usize,
    pub mixed: usize,
    pub scanned: usize,
    pub errors: usize,
    pub files: ClassifiedFiles,
}

impl Classification {
    /// PDFs routed to the OCR collaborator.
    pub fn ocr_bound(&self) -> HashSet<&Path> {
        self.files
            .scanned
            .iter()
            .chain(self.files.mixed.iter())
            .map(PathBuf::as_path)
            .collect()
    }

    fn push(&mut self, path: PathBuf, category: Category) {
        self.total += 1;
        match category {
            Category::Native => {
                self.native += 1;
                self.files.native.push(path);
            }
            Category::Mixed => {
                self.mixed += 1;
                self.files.mixed.push(path);
            }
            Category::Scanned => {
                self.scanned += 1;
                self.files.scanned.push(path);
            }
            Category::Error => {
                self.errors += 1;
                self.files.failed.push(path);
            }
        }
    }

    fn sort(&mut self) {
        self.files.native.sort();
        self.files.mixed.sort();
        self.files.scanned.sort();
        self.files.failed.sort();
    }
}

// ── Text extraction collaborator ─────────────────────────────────────────────

/// Extracts the plain text of the first `pages` pages of a PDF.
pub trait TextExtractor: Send + Sync {
    fn extract<'a>(
        &'a self,
        path: &'a Path,
        pages: usize,
    ) -> BoxFuture<'a, Result<String, DocumentError>>;
}

/// [`TextExtractor`] backed by poppler's `pdftotext`.
#[derive(Debug, Clone)]
pub struct PdfToText {
    bin: String,
}

impl PdfToText {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }
}

impl TextExtractor for PdfToText {
    fn extract<'a>(
        &'a self,
        path: &'a Path,
        pages: usize,
    ) -> BoxFuture<'a, Result<String, DocumentError>> {
        Box::pin(async move {
            let out = tokio::process::Command::new(&self.bin)
                .arg("-f")
                .arg("1")
                .arg("-l")
                .arg(pages.max(1).to_string())
                .arg("-q")
                .arg(path)
                .arg("-") // write to stdout
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| DocumentError::Extraction {
                    detail: format!("{}: {e}", self.bin),
                })?;
            if !out.status.success() {
                return Err(DocumentError::Extraction {
                    detail: format!(
                        "{} exited with {}: {}",
                        self.bin,
                        out.status,
                        String::from_utf8_lossy(&out.stderr).trim()
                    ),
                });
            }
            Ok(String::from_utf8_lossy(&out.stdout).into_owned())
        })
    }
}

// ── Classification ───────────────────────────────────────────────────────────

/// Count Unicode-alphabetic characters (Vietnamese extended Latin included).
pub fn count_alpha(text: &str) -> usize {
    text.chars().filter(|c| c.is_alphabetic()).count()
}

/// Bucket an alphabetic-character count.
pub fn classify_count(alpha: usize, config: &PipelineConfig) -> Category {
    if alpha < config.scanned_threshold {
        Category::Scanned
    } else if alpha < config.native_threshold {
        Category::Mixed
    } else {
        Category::Native
    }
}

/// Classify every PDF, at most `classify_batch_size` extractions at a time.
pub async fn classify_pdfs(
    pdfs: &[PathBuf],
    extractor: &dyn TextExtractor,
    config: &PipelineConfig,
    progress: &dyn PipelineProgress,
) -> Classification {
    progress.on_stage_start(StageKind::Classify, pdfs.len());
    let pages = config.classify_sample_pages;

    let outcomes: Vec<(PathBuf, Category)> = stream::iter(pdfs.iter())
        .map(|pdf| async move {
            let name = display_name(pdf);
            match extractor.extract(pdf, pages).await {
                Ok(text) => {
                    let alpha = count_alpha(&text);
                    let category = classify_count(alpha, config);
                    debug!("{}: {} alphabetic chars → {:?}", name, alpha, category);
                    progress.on_item_complete(StageKind::Classify, &name, alpha);
                    (pdf.clone(), category)
                }
                Err(e) => {
                    warn!("Classification failed for {}: {}", name, e);
                    progress.on_item_error(StageKind::Classify, &name, &e.to_string());
                    (pdf.clone(), Category::Error)
                }
            }
        })
        .buffer_unordered(config.classify_batch_size)
        .collect()
        .await;

    let mut classification = Classification::default();
    for (path, category) in outcomes {
        classification.push(path, category);
    }
    classification.sort();
    progress.on_stage_complete(
        StageKind::Classify,
        classification.total - classification.errors,
        classification.total,
    );
    classification
}

/// Read a persisted classification, if present and parseable.
pub async fn read_classification(path: &Path) -> Option<Classification> {
    let raw = tokio::fs::read_to_string(path).await.ok()?;
    match serde_json::from_str(&raw) {
        Ok(c) => Some(c),
        Err(e) => {
            warn!("Ignoring unparseable {}: {}", path.display(), e);
            None
        }
    }
}

/// Reuse `classification.json` when its total matches the PDF count;
/// otherwise classify and persist.
pub async fn load_or_classify(
    path: &Path,
    pdfs: &[PathBuf],
    extractor: &dyn TextExtractor,
    config: &PipelineConfig,
    progress: &dyn PipelineProgress,
) -> Result<Classification, PipelineError> {
    if let Some(existing) = read_classification(path).await {
        if existing.total == pdfs.len() {
            info!(
                "Reusing classification: {} native, {} mixed, {} scanned, {} errors",
                existing.native, existing.mixed, existing.scanned, existing.errors
            );
            return Ok(existing);
        }
        info!(
            "PDF count changed ({} → {}), reclassifying",
            existing.total,
            pdfs.len()
        );
    }

    info!("Classifying {} PDFs", pdfs.len());
    let classification = classify_pdfs(pdfs, extractor, config, progress).await;
    write_json_atomic(path, &classification).await?;
    info!(
        "Classified: {} native, {} mixed, {} scanned, {} errors",
        classification.native, classification.mixed, classification.scanned, classification.errors
    );
    Ok(classification)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopProgress;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Treats the PDF's bytes as its text layer.
    #[derive(Default)]
    struct FileAsText {
        calls: AtomicUsize,
    }

    impl TextExtractor for FileAsText {
        fn extract<'a>(
            &'a self,
            path: &'a Path,
            _pages: usize,
        ) -> BoxFuture<'a, Result<String, DocumentError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| DocumentError::Extraction {
                        detail: e.to_string(),
                    })
            })
        }
    }

    #[test]
    fn thresholds_bucket_counts() {
        let c = PipelineConfig::default();
        assert_eq!(classify_count(0, &c), Category::Scanned);
        assert_eq!(classify_count(49, &c), Category::Scanned);
        assert_eq!(classify_count(50, &c), Category::Mixed);
        assert_eq!(classify_count(499, &c), Category::Mixed);
        assert_eq!(classify_count(500, &c), Category::Native);
    }

    #[test]
    fn vietnamese_letters_are_alphabetic() {
        assert_eq!(count_alpha("Điều 5. Quyền"), 9);
        assert_eq!(count_alpha("123 --- ..."), 0);
    }

    #[tokio::test]
    async fn classifies_and_persists_then_reuses() {
        let dir = tempfile::tempdir().unwrap();
        let native = dir.path().join("native.pdf");
        let scanned = dir.path().join("scanned.pdf");
        let mixed = dir.path().join("mixed.pdf");
        std::fs::write(&native, "a".repeat(600)).unwrap();
        std::fs::write(&scanned, "12 34").unwrap();
        std::fs::write(&mixed, "b".repeat(100)).unwrap();
        let missing = dir.path().join("missing.pdf");
        let pdfs = vec![native.clone(), scanned.clone(), mixed.clone(), missing.clone()];

        let out = dir.path().join("classification.json");
        let extractor = FileAsText::default();
        let config = PipelineConfig::default();
        let c = load_or_classify(&out, &pdfs, &extractor, &config, &NoopProgress)
            .await
            .unwrap();
        assert_eq!((c.total, c.native, c.mixed, c.scanned, c.errors), (4, 1, 1, 1, 1));
        assert_eq!(c.files.native, vec![native]);
        assert_eq!(c.files.failed, vec![missing]);
        assert!(c.ocr_bound().contains(scanned.as_path()));

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(raw["total"], 4);
        assert!(raw["files"]["scanned"].is_array());

        let again = load_or_classify(&out, &pdfs, &extractor, &config, &NoopProgress)
            .await
            .unwrap();
        assert_eq!(again, c);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn count_mismatch_triggers_reclassification() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.pdf");
        std::fs::write(&a, "x".repeat(700)).unwrap();
        let out = dir.path().join("classification.json");
        let stale = Classification {
            total: 5,
            ..Default::default()
        };
        write_json_atomic(&out, &stale).await.unwrap();

        let extractor = FileAsText::default();
        let c = load_or_classify(&out, &[a], &extractor, &PipelineConfig::default(), &NoopProgress)
            .await
            .unwrap();
        assert_eq!(c.total, 1);
        assert_eq!(c.native, 1);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    }
}
