//! Filesystem layout of a run.
//!
//! Every stage reads and writes beneath one output directory. The layout is
//! fixed so that an interrupted run can be restarted against the same
//! directory and pick up where it left off:
//!
//! ```text
//! output/
//!  ├─ classification.json     PDF triage (reused when the PDF count matches)
//!  ├─ .native-file-list.txt   PDFs queued for native extraction
//!  ├─ raw-md/                 worker output (native PDFs, DOC/DOCX)
//!  ├─ ocr-raw/                OCR collaborator output
//!  ├─ markdown/               enhanced markdown
//!  ├─ quality-report.json
//!  ├─ dataset/dataset.jsonl
//!  ├─ pipeline-log.txt, errors.log
//!  ├─ ocr-progress.json, ocr-log.txt   owned by the OCR collaborator
//!  └─ tmp/                    manifests and .doc pre-conversion scratch
//! ```

use crate::error::PipelineError;
use std::path::{Path, PathBuf};

/// Resolved paths for one run. Construct once with [`PipelinePaths::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelinePaths {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub classification: PathBuf,
    pub native_file_list: PathBuf,
    pub raw_md_dir: PathBuf,
    pub ocr_raw_dir: PathBuf,
    pub enhanced_dir: PathBuf,
    pub quality_report: PathBuf,
    pub dataset_dir: PathBuf,
    pub dataset_file: PathBuf,
    pub pipeline_log: PathBuf,
    pub errors_log: PathBuf,
    pub ocr_progress: PathBuf,
    pub ocr_log: PathBuf,
    pub tmp_dir: PathBuf,
}

impl PipelinePaths {
    /// Resolve the layout.
    ///
    /// The input directory is canonicalised because output names are derived
    /// from paths relative to it; a missing input directory fails here rather
    /// than halfway through a run. The output directory does not need to exist.
    pub fn new(input_dir: &Path, output_dir: &Path) -> Result<Self, PipelineError> {
        let input_dir = input_dir
            .canonicalize()
            .ok()
            .filter(|p| p.is_dir())
            .ok_or_else(|| PipelineError::InputDirNotFound {
                path: input_dir.to_path_buf(),
            })?;
        let output_dir = absolutize(output_dir)?;
        Ok(Self::with_dirs(input_dir, output_dir))
    }

    fn with_dirs(input_dir: PathBuf, output_dir: PathBuf) -> Self {
        let dataset_dir = output_dir.join("dataset");
        Self {
            classification: output_dir.join("classification.json"),
            native_file_list: output_dir.join(".native-file-list.txt"),
            raw_md_dir: output_dir.join("raw-md"),
            ocr_raw_dir: output_dir.join("ocr-raw"),
            enhanced_dir: output_dir.join("markdown"),
            quality_report: output_dir.join("quality-report.json"),
            dataset_file: dataset_dir.join("dataset.jsonl"),
            dataset_dir,
            pipeline_log: output_dir.join("pipeline-log.txt"),
            errors_log: output_dir.join("errors.log"),
            ocr_progress: output_dir.join("ocr-progress.json"),
            ocr_log: output_dir.join("ocr-log.txt"),
            tmp_dir: output_dir.join("tmp"),
            input_dir,
            output_dir,
        }
    }

    /// Create every directory the stages write into.
    pub async fn ensure_dirs(&self) -> Result<(), PipelineError> {
        for dir in [
            &self.output_dir,
            &self.raw_md_dir,
            &self.ocr_raw_dir,
            &self.enhanced_dir,
            &self.dataset_dir,
            &self.tmp_dir,
        ] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| PipelineError::io(dir, e))?;
        }
        Ok(())
    }
}

fn absolutize(path: &Path) -> Result<PathBuf, PipelineError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| PipelineError::io(path, e))?;
    Ok(cwd.join(path))
}
