//! Corpus assembly: content-hash dedup into a JSONL dataset.
//!
//! Legal documents are frequently republished under several file names (an
//! amended decree bundled with its original, the same circular in two
//! folders). Exact duplicates are removed by SHA-256 of the trimmed text; the
//! first file in sorted order wins, so the output is stable across runs.

use crate::error::PipelineError;
use crate::output::display_name;
use crate::pipeline::validate::list_markdown;
use crate::progress::{PipelineProgress, StageKind};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// One line of `dataset.jsonl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub source: String,
    pub text: String,
}

/// Summary of a dataset build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetResult {
    pub path: PathBuf,
    pub written: usize,
    pub duplicates: usize,
    /// Too short or unreadable.
    pub skipped: usize,
    pub total_chars: usize,
}

/// Hex SHA-256 of `text`.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Build `out_file` from every `*.md` in `enhanced_dir`.
///
/// Files are read concurrently but emitted in sorted order.
pub async fn build_dataset(
    enhanced_dir: &Path,
    out_file: &Path,
    min_text_length: usize,
    concurrency: usize,
    progress: &dyn PipelineProgress,
) -> Result<DatasetResult, PipelineError> {
    let files = list_markdown(enhanced_dir).await?;
    progress.on_stage_start(StageKind::Dataset, files.len());

    let mut texts = stream::iter(files.iter())
        .map(|path| async move {
            let text = tokio::fs::read_to_string(path).await;
            (path, text)
        })
        .buffered(concurrency.max(1));

    if let Some(parent) = out_file.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PipelineError::io(parent, e))?;
    }
    let tmp = out_file.with_extension("jsonl.tmp");
    let file = tokio::fs::File::create(&tmp)
        .await
        .map_err(|e| PipelineError::io(&tmp, e))?;
    let mut writer = tokio::io::BufWriter::new(file);

    let mut result = DatasetResult {
        path: out_file.to_path_buf(),
        ..Default::default()
    };
    let mut seen: HashSet<String> = HashSet::new();

    while let Some((path, text)) = texts.next().await {
        let source = display_name(path);
        let text = match text {
            Ok(t) => t,
            Err(e) => {
                warn!("Skipping unreadable {}: {}", source, e);
                progress.on_item_error(StageKind::Dataset, &source, &e.to_string());
                result.skipped += 1;
                continue;
            }
        };
        let text = text.trim();
        let chars = text.chars().count();
        if chars < min_text_length {
            debug!("Skipping {} ({} chars)", source, chars);
            result.skipped += 1;
            continue;
        }
        if !seen.insert(content_hash(text)) {
            debug!("Duplicate content: {}", source);
            result.duplicates += 1;
            continue;
        }

        let record = DatasetRecord {
            source: source.clone(),
            text: text.to_string(),
        };
        let mut line = serde_json::to_string(&record).map_err(|e| PipelineError::Sidecar {
            path: out_file.to_path_buf(),
            detail: e.to_string(),
        })?;
        line.push('\n');
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| PipelineError::io(&tmp, e))?;
        result.written += 1;
        result.total_chars += chars;
        progress.on_item_complete(StageKind::Dataset, &source, chars);
    }

    writer.flush().await.map_err(|e| PipelineError::io(&tmp, e))?;
    drop(writer);
    tokio::fs::rename(&tmp, out_file)
        .await
        .map_err(|e| PipelineError::io(out_file, e))?;

    progress.on_stage_complete(StageKind::Dataset, result.written, files.len());
    info!(
        "Dataset: {} written, {} duplicates, {} skipped, {} chars",
        result.written, result.duplicates, result.skipped, result.total_chars
    );
    Ok(result)
}

/// `true` when `dataset_file` exists and is not older than any markdown file
/// in `enhanced_dir`.
pub fn is_up_to_date(dataset_file: &Path, enhanced_dir: &Path) -> bool {
    let Some(built) = modified(dataset_file) else {
        return false;
    };
    let Ok(entries) = std::fs::read_dir(enhanced_dir) else {
        return true;
    };
    entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|e| e == "md"))
        .filter_map(|p| modified(&p))
        .all(|m| m <= built)
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
