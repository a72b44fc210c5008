//! Stage sequencing, resume gates, and the live run.
//!
//! A run is a fixed state machine:
//!
//! ```text
//! Classify ──▶ ConvertAndOcrAndEnhance ──▶ Dataset ──▶ Done
//! ```
//!
//! ## Why gates instead of a checkpoint file?
//!
//! Every stage writes its results into the output directory, so the output
//! directory itself is the checkpoint. On start (and after each stage) the
//! gates are recomputed from what is on disk, and the machine jumps to the
//! first stage whose output is missing or stale. Killing the process at any
//! point is safe: outputs are written atomically and the next run redoes
//! only what is missing.
//!
//! Each stage runs at most once per invocation; the machine only moves
//! forward, even when a stage left individual documents failed.

use crate::config::PipelineConfig;
use crate::convert::{
    self, Dispatcher, OfficeConverter, ProcessLauncher, SofficeConverter, WorkerLauncher,
};
use crate::error::PipelineError;
use crate::output::{display_name, CleanResult, ConversionResult, PipelineStats};
use crate::paths::PipelinePaths;
use crate::pipeline::classify::{self, Classification, PdfToText, TextExtractor};
use crate::pipeline::dataset;
use crate::pipeline::discover::{self, DocKind, SourceDocument};
use crate::pipeline::enhance;
use crate::pipeline::lint::{MarkdownLintCli, MarkdownLinter};
use crate::pipeline::preflight::PreflightReport;
use crate::pipeline::validate::{self, ArtifactPattern};
use crate::progress::{NoopProgress, ProgressCallback, StageKind};
use crate::stream::read_lines;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

// ── State machine ────────────────────────────────────────────────────────────

/// Orchestrator stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    Classify,
    ConvertAndOcrAndEnhance,
    Dataset,
    Done,
}

impl Stage {
    const ALL: [Stage; 4] = [
        Stage::Classify,
        Stage::ConvertAndOcrAndEnhance,
        Stage::Dataset,
        Stage::Done,
    ];

    fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.get(usize::from(v)).copied()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Classify => "classify",
            Stage::ConvertAndOcrAndEnhance => "convert+ocr+enhance",
            Stage::Dataset => "dataset",
            Stage::Done => "done",
        };
        f.write_str(s)
    }
}

/// Completion of each stage, derived from the output directory alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageGates {
    /// `classification.json` exists and covers every discovered PDF.
    pub classified: bool,
    /// Every expected output name exists in `markdown/`.
    pub enhanced: bool,
    /// `dataset.jsonl` is no older than any enhanced file.
    pub dataset_current: bool,
}

impl StageGates {
    pub fn compute(
        paths: &PipelinePaths,
        docs: &[SourceDocument],
        classification: Option<&Classification>,
    ) -> Self {
        let pdf_count = docs.iter().filter(|d| d.kind == DocKind::Pdf).count();
        let classification = classification.filter(|c| c.total == pdf_count);
        let enhanced = classification.is_some_and(|c| {
            let failed: HashSet<&Path> = c.files.failed.iter().map(PathBuf::as_path).collect();
            let done = discover::existing_outputs(&paths.enhanced_dir);
            docs.iter()
                .filter(|d| !failed.contains(d.path.as_path()))
                .all(|d| done.contains(&discover::to_output_name(&d.path, &paths.input_dir)))
        });
        Self {
            classified: classification.is_some(),
            enhanced,
            dataset_current: dataset::is_up_to_date(&paths.dataset_file, &paths.enhanced_dir),
        }
    }

    fn satisfied(&self, stage: Stage) -> bool {
        match stage {
            Stage::Classify => self.classified,
            Stage::ConvertAndOcrAndEnhance => self.enhanced,
            Stage::Dataset => self.dataset_current,
            Stage::Done => false,
        }
    }
}

/// The first unsatisfied stage strictly after `after` (or from the start when
/// `after` is `None`).
pub fn next_stage(after: Option<Stage>, gates: &StageGates) -> Stage {
    Stage::ALL
        .into_iter()
        .filter(|s| after.map_or(true, |a| *s > a))
        .find(|s| !gates.satisfied(*s))
        .unwrap_or(Stage::Done)
}

// ── OCR collaborator ─────────────────────────────────────────────────────────

/// Runs OCR over every scanned and mixed PDF listed in `classification.json`,
/// writing `ocr-raw/<name>.md` and `ocr-progress.json`.
pub trait OcrRunner: Send + Sync {
    fn run<'a>(&'a self, paths: &'a PipelinePaths) -> BoxFuture<'a, Result<Option<i32>, PipelineError>>;
}

/// [`OcrRunner`] running `<python> <scripts_dir>/batch-ocr.py`.
#[derive(Debug, Clone)]
pub struct BatchOcrRunner {
    python: String,
    scripts_dir: PathBuf,
}

impl BatchOcrRunner {
    pub fn new(python: impl Into<String>, scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
            scripts_dir: scripts_dir.into(),
        }
    }
}

impl OcrRunner for BatchOcrRunner {
    fn run<'a>(&'a self, paths: &'a PipelinePaths) -> BoxFuture<'a, Result<Option<i32>, PipelineError>> {
        Box::pin(async move {
            let script = self.scripts_dir.join("batch-ocr.py");
            let mut child = tokio::process::Command::new(&self.python)
                .arg(&script)
                .arg("--data-dir")
                .arg(&paths.input_dir)
                .arg("--classification")
                .arg(&paths.classification)
                .arg("--output-base")
                .arg(&paths.ocr_raw_dir)
                .arg("--status-file")
                .arg(&paths.ocr_progress)
                .arg("--log-file")
                .arg(&paths.ocr_log)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| PipelineError::WorkerSpawn {
                    worker: script.display().to_string(),
                    detail: e.to_string(),
                })?;
            let stdout = child.stdout.take();
            let stderr = child.stderr.take();
            let forward_out = async {
                if let Some(out) = stdout {
                    let _ = read_lines(out, |line| debug!("[ocr] {}", line)).await;
                }
            };
            let forward_err = async {
                if let Some(err) = stderr {
                    let _ = read_lines(err, |line| debug!("[ocr:stderr] {}", line)).await;
                }
            };
            tokio::join!(forward_out, forward_err);
            let status = child
                .wait()
                .await
                .map_err(|e| PipelineError::io(&script, e))?;
            Ok(status.code())
        })
    }
}

/// Snapshot written by the OCR tool to `ocr-progress.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrProgress {
    pub done: usize,
    pub total: usize,
    pub errors: usize,
    pub pct: f64,
    pub current_file: String,
    pub elapsed: String,
    pub eta: String,
}

/// Read `ocr-progress.json`; absent or half-written files yield `None`.
pub fn read_ocr_progress(path: &Path) -> Option<OcrProgress> {
    let raw = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

// ── Collaborators ────────────────────────────────────────────────────────────

/// External tools the orchestrator drives, each behind a trait.
#[derive(Clone)]
pub struct Collaborators {
    pub text_extractor: Arc<dyn TextExtractor>,
    pub workers: Arc<dyn WorkerLauncher>,
    /// `None` when no office suite is installed.
    pub office: Option<Arc<dyn OfficeConverter>>,
    pub ocr: Arc<dyn OcrRunner>,
    /// `None` when no markdown fixer is installed.
    pub linter: Option<Arc<dyn MarkdownLinter>>,
}

impl Collaborators {
    /// The real process-backed collaborators, with optional ones switched on
    /// according to `preflight`.
    pub fn from_config(config: &PipelineConfig, preflight: &PreflightReport) -> Self {
        let office = preflight.doc_support.then(|| {
            Arc::new(SofficeConverter::new(config.office_bin.clone())) as Arc<dyn OfficeConverter>
        });
        let linter = preflight.lint_support.then(|| {
            Arc::new(MarkdownLintCli::new(config.lint_bin.clone())) as Arc<dyn MarkdownLinter>
        });
        Self {
            text_extractor: Arc::new(PdfToText::new(config.pdftotext_bin.clone())),
            workers: Arc::new(ProcessLauncher::new(
                config.python_bin.clone(),
                config.scripts_dir.clone(),
            )),
            office,
            ocr: Arc::new(BatchOcrRunner::new(
                config.python_bin.clone(),
                config.scripts_dir.clone(),
            )),
            linter,
        }
    }
}

// ── Live run state ───────────────────────────────────────────────────────────

const NO_STAGE: u8 = u8::MAX;

/// Counters shared between the run and anyone polling it.
#[derive(Debug)]
pub struct RunState {
    stage: AtomicU8,
    converted: AtomicUsize,
    failed: AtomicUsize,
    enhanced: AtomicUsize,
    /// Raw-output names (without `.md`) whose worker has reported success.
    landed: Mutex<HashSet<String>>,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            stage: AtomicU8::new(NO_STAGE),
            converted: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            enhanced: AtomicUsize::new(0),
            landed: Mutex::new(HashSet::new()),
        }
    }
}

impl RunState {
    fn set_stage(&self, stage: Stage) {
        self.stage.store(stage as u8, Ordering::SeqCst);
    }

    pub fn stage(&self) -> Option<Stage> {
        Stage::from_u8(self.stage.load(Ordering::SeqCst))
    }

    fn record_landed(&self, result: &ConversionResult) {
        if !result.success {
            self.failed.fetch_add(1, Ordering::SeqCst);
            return;
        }
        self.converted.fetch_add(1, Ordering::SeqCst);
        let name = result
            .output
            .as_deref()
            .and_then(Path::file_stem)
            .map(|s| s.to_string_lossy().into_owned());
        if let (Some(name), Ok(mut landed)) = (name, self.landed.lock()) {
            landed.insert(name);
        }
    }

    fn has_landed(&self, name: &str) -> bool {
        self.landed
            .lock()
            .map(|l| l.contains(name))
            .unwrap_or(false)
    }
}

/// Point-in-time view of a run for dashboards.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSnapshot {
    pub stage: Option<Stage>,
    pub converted: usize,
    pub failed: usize,
    pub enhanced: usize,
    pub ocr: Option<OcrProgress>,
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    /// Stages strictly one after another.
    Batch,
    /// Convert ∥ OCR with enhancement polling alongside.
    Resumable,
}

/// One configured run over an input directory.
pub struct Pipeline {
    config: PipelineConfig,
    paths: PipelinePaths,
    collab: Collaborators,
    progress: ProgressCallback,
    state: Arc<RunState>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, paths: PipelinePaths, collab: Collaborators) -> Self {
        Self {
            config,
            paths,
            collab,
            progress: Arc::new(NoopProgress),
            state: Arc::new(RunState::default()),
        }
    }

    /// Receive per-stage and per-document events.
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn paths(&self) -> &PipelinePaths {
        &self.paths
    }

    /// Shared handle to the live counters.
    pub fn state(&self) -> Arc<RunState> {
        Arc::clone(&self.state)
    }

    /// Current counters plus the OCR tool's latest progress file.
    pub fn snapshot(&self) -> RunSnapshot {
        snapshot_of(&self.state, &self.paths)
    }

    /// Run every pending stage sequentially.
    pub async fn run_batch(&self) -> Result<PipelineStats, PipelineError> {
        self.run(RunMode::Batch).await
    }

    /// Run every pending stage, overlapping conversion, OCR and enhancement.
    pub async fn run_resumable(&self) -> Result<PipelineStats, PipelineError> {
        self.run(RunMode::Resumable).await
    }

    /// Blocking wrapper; creates its own tokio runtime.
    pub fn run_blocking(&self, interactive: bool) -> Result<PipelineStats, PipelineError> {
        let mode = if interactive {
            RunMode::Resumable
        } else {
            RunMode::Batch
        };
        tokio::runtime::Runtime::new()
            .map_err(|e| PipelineError::Internal(format!("Failed to create tokio runtime: {}", e)))?
            .block_on(self.run(mode))
    }

    async fn run(&self, mode: RunMode) -> Result<PipelineStats, PipelineError> {
        let start = Instant::now();
        let paths = &self.paths;
        paths.ensure_dirs().await?;
        let patterns = validate::build_patterns(&self.config.artifacts)?;

        let docs = discover::discover_documents(&paths.input_dir)?;
        let pdfs: Vec<PathBuf> = docs
            .iter()
            .filter(|d| d.kind == DocKind::Pdf)
            .map(|d| d.path.clone())
            .collect();
        info!(
            "Discovered {} documents ({} PDF) in {}",
            docs.len(),
            pdfs.len(),
            paths.input_dir.display()
        );

        let mut stats = PipelineStats {
            discovered: docs.len(),
            ..Default::default()
        };
        let mut classification = classify::read_classification(&paths.classification).await;
        let mut gates = StageGates::compute(paths, &docs, classification.as_ref());
        let mut stage = next_stage(None, &gates);

        while stage != Stage::Done {
            info!("── Stage: {} ──", stage);
            self.state.set_stage(stage);
            match stage {
                Stage::Classify => {
                    classification = Some(self.classify(&pdfs).await?);
                }
                Stage::ConvertAndOcrAndEnhance => {
                    let c = match classification.take() {
                        Some(c) if c.total == pdfs.len() => c,
                        _ => self.classify(&pdfs).await?,
                    };
                    self.convert_and_enhance(mode, &docs, &c, &mut stats).await?;
                    classification = Some(c);
                }
                Stage::Dataset => self.quality_and_dataset(&patterns, &mut stats).await?,
                Stage::Done => {}
            }
            gates = StageGates::compute(paths, &docs, classification.as_ref());
            stage = next_stage(Some(stage), &gates);
        }

        self.state.set_stage(Stage::Done);
        stats.total_duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Run finished in {}ms: {} converted, {} resumed, {} failed, {} enhanced",
            stats.total_duration_ms, stats.converted, stats.resumed, stats.failed, stats.enhanced
        );
        Ok(stats)
    }

    async fn classify(&self, pdfs: &[PathBuf]) -> Result<Classification, PipelineError> {
        classify::load_or_classify(
            &self.paths.classification,
            pdfs,
            self.collab.text_extractor.as_ref(),
            &self.config,
            self.progress.as_ref(),
        )
        .await
    }

    // ── Stage 2 ──────────────────────────────────────────────────────────

    async fn convert_and_enhance(
        &self,
        mode: RunMode,
        docs: &[SourceDocument],
        classification: &Classification,
        stats: &mut PipelineStats,
    ) -> Result<(), PipelineError> {
        let plan = convert::plan(docs, classification, &self.paths);
        info!(
            "Plan: {} resumed, {} native PDFs, {} office documents, {} for OCR, {} unclassifiable",
            plan.resumed.len(),
            plan.native_pdfs.len(),
            plan.office_docs.len(),
            plan.ocr_pdfs.len(),
            plan.unclassifiable
        );
        stats.record_conversions(&plan.resumed);
        stats.ocr_queued = plan.ocr_pdfs.len();
        let convert_total = plan.native_pdfs.len() + plan.office_docs.len();

        let on_landed = |r: &ConversionResult| self.state.record_landed(r);
        let dispatcher = Dispatcher {
            launcher: self.collab.workers.as_ref(),
            office: self.collab.office.as_deref(),
            paths: &self.paths,
            pdf_workers: self.config.pdf_workers,
            progress: self.progress.as_ref(),
            on_landed: &on_landed,
        };
        let convert_all = async {
            self.progress.on_stage_start(StageKind::Convert, convert_total);
            let mut results = dispatcher.convert_pdfs(plan.native_pdfs).await?;
            results.extend(dispatcher.convert_office(plan.office_docs).await);
            let ok = results.iter().filter(|r| r.success).count();
            self.progress.on_stage_complete(StageKind::Convert, ok, results.len());
            Ok::<_, PipelineError>(results)
        };
        let ocr_count = plan.ocr_pdfs.len();

        let (converted, ocr_error, cleans) = match mode {
            RunMode::Batch => {
                let converted = convert_all.await;
                let ocr_error = self.run_ocr(ocr_count).await;
                self.progress.on_stage_start(StageKind::Enhance, 0);
                let cleans = self.enhance_sweep(&HashSet::new(), None).await;
                (converted, ocr_error, cleans)
            }
            RunMode::Resumable => {
                let (done_tx, done_rx) = watch::channel(false);
                let extraction = async {
                    let out = tokio::join!(convert_all, self.run_ocr(ocr_count));
                    let _ = done_tx.send(true);
                    out
                };
                self.progress.on_stage_start(StageKind::Enhance, 0);
                let ((converted, ocr_error), cleans) =
                    tokio::join!(extraction, self.enhance_poller(done_rx));
                (converted, ocr_error, cleans)
            }
        };

        stats.record_conversions(&converted?);
        if let Some(e) = ocr_error {
            stats.errors.push(e);
        }
        stats.record_cleans(&cleans);
        let ok = cleans.iter().filter(|c| c.success).count();
        self.progress.on_stage_complete(StageKind::Enhance, ok, cleans.len());
        Ok(())
    }

    /// Run the OCR collaborator when anything is queued for it. Failures are
    /// returned as a message for the run summary.
    async fn run_ocr(&self, queued: usize) -> Option<String> {
        if queued == 0 {
            return None;
        }
        info!("Running OCR over {} PDFs", queued);
        self.progress.on_stage_start(StageKind::Ocr, queued);
        let outcome = self.collab.ocr.run(&self.paths).await;
        let done = read_ocr_progress(&self.paths.ocr_progress)
            .map(|p| p.done.saturating_sub(p.errors))
            .unwrap_or(0);
        self.progress.on_stage_complete(StageKind::Ocr, done, queued);
        match outcome {
            Ok(Some(0)) => None,
            Ok(code) => {
                let msg = format!(
                    "ocr: batch-ocr exited with code {}",
                    code.map_or_else(|| "none".to_string(), |c| c.to_string())
                );
                warn!("{}", msg);
                Some(msg)
            }
            Err(e) => {
                warn!("OCR failed: {}", e);
                Some(format!("ocr: {e}"))
            }
        }
    }

    /// Enhance pending files once. With `only_landed`, raw outputs are limited
    /// to names the dispatcher has reported complete; OCR outputs are always
    /// eligible because the OCR tool renames them into place atomically.
    async fn enhance_sweep(
        &self,
        skip: &HashSet<PathBuf>,
        only_landed: Option<&RunState>,
    ) -> Vec<CleanResult> {
        let paths = &self.paths;
        let candidates: Vec<PathBuf> = enhance::pending_sources(
            &[paths.raw_md_dir.as_path(), paths.ocr_raw_dir.as_path()],
            &paths.enhanced_dir,
        )
        .into_iter()
        .filter(|p| !skip.contains(p))
        .filter(|p| match only_landed {
            Some(state) if p.starts_with(&paths.raw_md_dir) => p
                .file_stem()
                .is_some_and(|n| state.has_landed(&n.to_string_lossy())),
            _ => true,
        })
        .collect();
        if candidates.is_empty() {
            return Vec::new();
        }
        debug!("Enhancing {} files", candidates.len());
        let results = enhance::enhance_files(
            candidates,
            &paths.enhanced_dir,
            self.config.enhance_concurrency,
            self.progress.as_ref(),
        )
        .await;
        let ok = results.iter().filter(|r| r.success).count();
        self.state.enhanced.fetch_add(ok, Ordering::SeqCst);
        results
    }

    /// Enhance newly landed files every poll interval until extraction is
    /// done, then sweep once more over everything.
    async fn enhance_poller(&self, mut done: watch::Receiver<bool>) -> Vec<CleanResult> {
        let interval = Duration::from_millis(self.config.poll_interval_ms);
        let mut all: Vec<CleanResult> = Vec::new();
        let mut failed: HashSet<PathBuf> = HashSet::new();
        let mut sender_gone = false;
        loop {
            let finished = *done.borrow_and_update() || sender_gone;
            let only_landed = (!finished).then_some(self.state.as_ref());
            for r in self.enhance_sweep(&failed, only_landed).await {
                if !r.success {
                    failed.insert(r.input.clone());
                }
                all.push(r);
            }
            if finished {
                break;
            }
            tokio::select! {
                changed = done.changed() => sender_gone = changed.is_err(),
                _ = tokio::time::sleep(interval) => {}
            }
        }
        all
    }

    // ── Stage 3 ──────────────────────────────────────────────────────────

    async fn quality_and_dataset(
        &self,
        patterns: &[ArtifactPattern],
        stats: &mut PipelineStats,
    ) -> Result<(), PipelineError> {
        let paths = &self.paths;
        let report = validate::validate_dir(
            &paths.enhanced_dir,
            patterns,
            self.config.validate_concurrency,
            &paths.quality_report,
            self.progress.as_ref(),
        )
        .await?;
        if !report.pass {
            warn!(
                "Quality gate: {} files with errors ({} error occurrences); see {}",
                report.files_failed,
                report.total_errors,
                display_name(&paths.quality_report)
            );
        }
        stats.quality = Some(report);

        if let Some(linter) = &self.collab.linter {
            let files = validate::list_markdown(&paths.enhanced_dir).await?;
            self.progress.on_stage_start(StageKind::Lint, files.len());
            match linter.fix(&files).await {
                Ok(outcome) => {
                    self.progress.on_stage_complete(
                        StageKind::Lint,
                        outcome.runs - outcome.runs_with_issues,
                        outcome.runs,
                    );
                }
                Err(e) => {
                    warn!("Markdown lint skipped: {}", e);
                    self.progress.on_stage_complete(StageKind::Lint, 0, files.len());
                }
            }
        } else {
            debug!("No markdown fixer available; lint pass skipped");
        }

        let result = dataset::build_dataset(
            &paths.enhanced_dir,
            &paths.dataset_file,
            self.config.min_text_length,
            self.config.dataset_concurrency,
            self.progress.as_ref(),
        )
        .await?;
        stats.dataset = Some(result);
        Ok(())
    }
}

/// Snapshot from a shared state handle, for pollers that do not hold the
/// [`Pipeline`] itself.
pub fn snapshot_of(state: &RunState, paths: &PipelinePaths) -> RunSnapshot {
    RunSnapshot {
        stage: state.stage(),
        converted: state.converted.load(Ordering::SeqCst),
        failed: state.failed.load(Ordering::SeqCst),
        enhanced: state.enhanced.load(Ordering::SeqCst),
        ocr: read_ocr_progress(&paths.ocr_progress),
    }
}
