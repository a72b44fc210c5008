//! Configuration types for a pipeline run.
//!
//! All run behaviour is controlled through [`PipelineConfig`]. It is built
//! once at startup (usually by [`PipelineConfig::load`], which merges an
//! optional JSON file over the defaults) and then passed by reference into
//! every stage. Nothing reads configuration from globals.
//!
//! Every field is optional in the JSON file; keys use camelCase:
//!
//! ```json
//! {
//!   "classifyBatchSize": 8,
//!   "pdfWorkers": 3,
//!   "minTextLength": 200,
//!   "scannedThreshold": 50,
//!   "nativeThreshold": 500,
//!   "artifacts": { "severity": { "soft-hyphen": "error" } }
//! }
//! ```

use crate::error::PipelineError;
use crate::pipeline::validate::Severity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Configuration for a pipeline run.
///
/// Built via [`PipelineConfig::builder()`], [`PipelineConfig::load`], or
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use anymd::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .pdf_workers(4)
///     .min_text_length(200)
///     .build()
///     .unwrap();
/// assert_eq!(config.pdf_workers, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Maximum PDFs classified at once (each spawns a text extractor). Default: 8.
    pub classify_batch_size: usize,

    /// Pages sampled from the start of each PDF during classification. Default: 3.
    pub classify_sample_pages: usize,

    /// Alphabetic characters below which a PDF is `scanned`. Default: 50.
    pub scanned_threshold: usize,

    /// Alphabetic characters at or above which a PDF is `native`. Default: 500.
    ///
    /// Counts in `[scanned_threshold, native_threshold)` classify as `mixed`.
    pub native_threshold: usize,

    /// Number of concurrent PDF extraction worker processes. Default: 2.
    ///
    /// Each worker loads its own layout model, so memory rather than CPU is
    /// usually the limit here.
    pub pdf_workers: usize,

    /// Concurrent markdown enhancement tasks. Default: 16.
    pub enhance_concurrency: usize,

    /// Concurrent quality-validation reads. Default: 16.
    pub validate_concurrency: usize,

    /// Concurrent dataset reads. Default: 16.
    pub dataset_concurrency: usize,

    /// Documents shorter than this many characters (after trimming) are left
    /// out of the dataset. Default: 100.
    pub min_text_length: usize,

    /// Python interpreter used for the worker scripts. Default: `python3`.
    pub python_bin: String,

    /// Directory holding `pdf-to-md.py`, `docx-to-md.py` and `batch-ocr.py`.
    pub scripts_dir: PathBuf,

    /// Office suite binary used for `.doc` → `.docx`. Default: `soffice`.
    pub office_bin: String,

    /// Text extractor used by the classifier. Default: `pdftotext`.
    pub pdftotext_bin: String,

    /// Markdown auto-fixer run after validation. Default: `markdownlint-cli2`.
    pub lint_bin: String,

    /// How often the interactive run polls for newly landed markdown. Default: 2000 ms.
    pub poll_interval_ms: u64,

    /// Quality-validator pattern overrides.
    pub artifacts: ArtifactSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            classify_batch_size: 8,
            classify_sample_pages: 3,
            scanned_threshold: 50,
            native_threshold: 500,
            pdf_workers: 2,
            enhance_concurrency: 16,
            validate_concurrency: 16,
            dataset_concurrency: 16,
            min_text_length: 100,
            python_bin: "python3".to_string(),
            scripts_dir: PathBuf::from("./scripts"),
            office_bin: "soffice".to_string(),
            pdftotext_bin: "pdftotext".to_string(),
            lint_bin: "markdownlint-cli2".to_string(),
            poll_interval_ms: 2000,
            artifacts: ArtifactSettings::default(),
        }
    }
}

/// Adjustments to the built-in artifact pattern list.
///
/// The defaults are tuned to one family of extraction tools; a different
/// upstream converter leaves different fingerprints, so severities can be
/// overridden, patterns disabled, and new ones appended.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ArtifactSettings {
    /// Severity overrides keyed by pattern name.
    pub severity: BTreeMap<String, Severity>,
    /// Built-in pattern names to skip entirely.
    pub disabled: Vec<String>,
    /// Extra patterns appended after the built-ins.
    pub extra: Vec<ExtraArtifactPattern>,
}

/// A user-supplied artifact pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraArtifactPattern {
    pub name: String,
    pub pattern: String,
    pub severity: Severity,
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Load a config file and merge it over the defaults.
    ///
    /// A missing file is not an error: the defaults are returned. A file that
    /// exists but cannot be read or parsed is.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(PipelineError::ConfigRead {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        let parsed: PipelineConfig =
            serde_json::from_str(&raw).map_err(|e| PipelineError::ConfigParse {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        PipelineConfigBuilder { config: parsed }.build()
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn classify_batch_size(mut self, n: usize) -> Self {
        self.config.classify_batch_size = n.max(1);
        self
    }

    pub fn classify_sample_pages(mut self, n: usize) -> Self {
        self.config.classify_sample_pages = n.max(1);
        self
    }

    pub fn thresholds(mut self, scanned: usize, native: usize) -> Self {
        self.config.scanned_threshold = scanned;
        self.config.native_threshold = native;
        self
    }

    pub fn pdf_workers(mut self, n: usize) -> Self {
        self.config.pdf_workers = n.max(1);
        self
    }

    pub fn enhance_concurrency(mut self, n: usize) -> Self {
        self.config.enhance_concurrency = n.max(1);
        self
    }

    pub fn validate_concurrency(mut self, n: usize) -> Self {
        self.config.validate_concurrency = n.max(1);
        self
    }

    pub fn dataset_concurrency(mut self, n: usize) -> Self {
        self.config.dataset_concurrency = n.max(1);
        self
    }

    pub fn min_text_length(mut self, n: usize) -> Self {
        self.config.min_text_length = n;
        self
    }

    pub fn python_bin(mut self, bin: impl Into<String>) -> Self {
        self.config.python_bin = bin.into();
        self
    }

    pub fn scripts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scripts_dir = dir.into();
        self
    }

    pub fn office_bin(mut self, bin: impl Into<String>) -> Self {
        self.config.office_bin = bin.into();
        self
    }

    pub fn pdftotext_bin(mut self, bin: impl Into<String>) -> Self {
        self.config.pdftotext_bin = bin.into();
        self
    }

    pub fn lint_bin(mut self, bin: impl Into<String>) -> Self {
        self.config.lint_bin = bin.into();
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms.max(10);
        self
    }

    pub fn artifacts(mut self, settings: ArtifactSettings) -> Self {
        self.config.artifacts = settings;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.scanned_threshold >= c.native_threshold {
            return Err(PipelineError::InvalidConfig(format!(
                "scannedThreshold ({}) must be below nativeThreshold ({})",
                c.scanned_threshold, c.native_threshold
            )));
        }
        let limits = [
            ("classifyBatchSize", c.classify_batch_size),
            ("classifySamplePages", c.classify_sample_pages),
            ("pdfWorkers", c.pdf_workers),
            ("enhanceConcurrency", c.enhance_concurrency),
            ("validateConcurrency", c.validate_concurrency),
            ("datasetConcurrency", c.dataset_concurrency),
        ];
        if let Some((name, _)) = limits.iter().find(|(_, v)| *v == 0) {
            return Err(PipelineError::InvalidConfig(format!("{name} must be ≥ 1")));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        let c = PipelineConfig::builder().build().unwrap();
        assert_eq!(c, PipelineConfig::default());
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let err = PipelineConfig::builder().thresholds(500, 50).build().unwrap_err();
        assert!(err.to_string().contains("scannedThreshold"));
    }

    #[test]
    fn builder_clamps_worker_count() {
        let c = PipelineConfig::builder().pdf_workers(0).build().unwrap();
        assert_eq!(c.pdf_workers, 1);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let c = PipelineConfig::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(c, PipelineConfig::default());
    }

    #[test]
    fn partial_file_merges_over_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{"pdfWorkers": 5, "minTextLength": 10, "unknownKey": true}}"#).unwrap();
        let c = PipelineConfig::load(f.path()).unwrap();
        assert_eq!(c.pdf_workers, 5);
        assert_eq!(c.min_text_length, 10);
        assert_eq!(c.classify_batch_size, 8);
        assert_eq!(c.native_threshold, 500);
    }

    #[test]
    fn zero_concurrency_in_file_rejected() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{"datasetConcurrency": 0}}"#).unwrap();
        let err = PipelineConfig::load(f.path()).unwrap_err();
        assert!(err.to_string().contains("datasetConcurrency"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "{{ not json").unwrap();
        assert!(matches!(
            PipelineConfig::load(f.path()),
            Err(PipelineError::ConfigParse { .. })
        ));
    }

    #[test]
    fn artifact_overrides_parse() {
        let json = r#"{"artifacts": {"severity": {"soft-hyphen": "error"}, "disabled": ["zero-width"],
            "extra": [{"name": "lorem", "pattern": "(?i)lorem ipsum", "severity": "warning"}]}}"#;
        let c: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(c.artifacts.severity.get("soft-hyphen"), Some(&Severity::Error));
        assert_eq!(c.artifacts.disabled, vec!["zero-width".to_string()]);
        assert_eq!(c.artifacts.extra[0].severity, Severity::Warning);
    }
}
