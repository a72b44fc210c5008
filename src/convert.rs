//! Conversion dispatch: route pending documents to external workers.
//!
//! ## Why manifests and shards?
//!
//! Each extraction worker loads a layout model that takes tens of seconds to
//! initialise and gigabytes of memory. Starting one process per document would
//! spend most of the run loading models, so every worker instead receives a
//! manifest (a JSON array of `{input, output}` pairs) and streams one event per
//! entry back on stdout. Native PDFs are split into `pdf_workers` contiguous,
//! balanced shards that run concurrently; all DOCX go to a single worker.
//!
//! ```text
//! shard 0 ──▶ pdf-to-md.py ──▶ events ─┐
//! shard 1 ──▶ pdf-to-md.py ──▶ events ─┼──▶ select_all ──▶ results
//! docx    ──▶ docx-to-md.py ─▶ events ─┘
//! ```
//!
//! Legacy `.doc` files are first converted to `.docx` by an office suite,
//! strictly one at a time; office suites do not tolerate concurrent headless
//! instances sharing a profile.

use crate::error::{DocumentError, PipelineError};
use crate::output::{display_name, ConversionResult};
use crate::paths::PipelinePaths;
use crate::pipeline::classify::Classification;
use crate::pipeline::discover::{
    existing_outputs, partition_pending, to_output_name, DocKind, PendingDocument, SourceDocument,
};
use crate::progress::{PipelineProgress, StageKind};
use crate::stream::{read_lines, spawn_event_channel, WorkerEvent};
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use tokio::io::AsyncRead;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

// ── Worker collaborators ─────────────────────────────────────────────────────

/// One manifest line handed to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub input: PathBuf,
    pub output: PathBuf,
}

/// Which worker script a manifest is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    Pdf,
    Docx,
}

impl WorkerKind {
    pub fn script(self) -> &'static str {
        match self {
            WorkerKind::Pdf => "pdf-to-md.py",
            WorkerKind::Docx => "docx-to-md.py",
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.script())
    }
}

/// A running worker: its event stream and a future for its exit code.
pub struct WorkerProcess {
    pub stdout: Pin<Box<dyn AsyncRead + Send>>,
    pub exit: BoxFuture<'static, std::io::Result<Option<i32>>>,
}

/// Starts extraction workers.
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, kind: WorkerKind, manifest: &Path) -> Result<WorkerProcess, PipelineError>;
}

/// [`WorkerLauncher`] running `<python> <scripts_dir>/<script> <manifest>`.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    python: String,
    scripts_dir: PathBuf,
}

impl ProcessLauncher {
    pub fn new(python: impl Into<String>, scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
            scripts_dir: scripts_dir.into(),
        }
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, kind: WorkerKind, manifest: &Path) -> Result<WorkerProcess, PipelineError> {
        let script = self.scripts_dir.join(kind.script());
        let mut child = tokio::process::Command::new(&self.python)
            .arg(&script)
            .arg(manifest)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PipelineError::WorkerSpawn {
                worker: script.display().to_string(),
                detail: e.to_string(),
            })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PipelineError::Internal("worker stdout not captured".into()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let _ = read_lines(stderr, |line| debug!("[{}] {}", kind, line)).await;
            });
        }
        Ok(WorkerProcess {
            stdout: Box::pin(stdout),
            exit: Box::pin(async move { child.wait().await.map(|s| s.code()) }),
        })
    }
}

/// Converts a legacy `.doc` into a `.docx` inside `out_dir`.
pub trait OfficeConverter: Send + Sync {
    fn to_docx<'a>(
        &'a self,
        doc: &'a Path,
        out_dir: &'a Path,
    ) -> BoxFuture<'a, Result<PathBuf, DocumentError>>;
}

/// [`OfficeConverter`] backed by a headless LibreOffice.
#[derive(Debug)]
pub struct SofficeConverter {
    bin: String,
    lock: tokio::sync::Mutex<()>,
}

impl SofficeConverter {
    pub fn new(bin: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }
}

impl OfficeConverter for SofficeConverter {
    fn to_docx<'a>(
        &'a self,
        doc: &'a Path,
        out_dir: &'a Path,
    ) -> BoxFuture<'a, Result<PathBuf, DocumentError>> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            let status = tokio::process::Command::new(&self.bin)
                .args(["--headless", "--convert-to", "docx", "--outdir"])
                .arg(out_dir)
                .arg(doc)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status()
                .await
                .map_err(|e| DocumentError::Worker {
                    detail: format!("{}: {e}", self.bin),
                })?;
            let stem = doc
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let docx = out_dir.join(format!("{stem}.docx"));
            if status.success() && docx.is_file() {
                Ok(docx)
            } else {
                debug!("{} exited with {} for {}", self.bin, status, doc.display());
                Err(DocumentError::PreconversionFailed)
            }
        })
    }
}

// ── Planning ─────────────────────────────────────────────────────────────────

/// Pending work split by route.
#[derive(Debug, Default)]
pub struct WorkPlan {
    /// Inputs whose raw output already exists.
    pub resumed: Vec<ConversionResult>,
    /// Native PDFs for the PDF workers.
    pub native_pdfs: Vec<PendingDocument>,
    /// DOC and DOCX inputs.
    pub office_docs: Vec<PendingDocument>,
    /// Scanned and mixed PDFs with no OCR output yet.
    pub ocr_pdfs: Vec<PathBuf>,
    /// PDFs the classifier could not read.
    pub unclassifiable: usize,
}

/// Partition discovered documents into resumed, extractable and OCR-bound
/// groups.
pub fn plan(docs: &[SourceDocument], classification: &Classification, paths: &PipelinePaths) -> WorkPlan {
    let ocr_bound = classification.ocr_bound();
    let failed: std::collections::HashSet<&Path> =
        classification.files.failed.iter().map(PathBuf::as_path).collect();
    let ocr_done = existing_outputs(&paths.ocr_raw_dir);

    let mut plan = WorkPlan::default();
    let mut extractable = Vec::new();
    for doc in docs {
        if doc.kind != DocKind::Pdf {
            extractable.push(doc.clone());
        } else if failed.contains(doc.path.as_path()) {
            plan.unclassifiable += 1;
        } else if ocr_bound.contains(doc.path.as_path()) {
            if !ocr_done.contains(&to_output_name(&doc.path, &paths.input_dir)) {
                plan.ocr_pdfs.push(doc.path.clone());
            }
        } else {
            extractable.push(doc.clone());
        }
    }

    let (resumed, pending) = partition_pending(&extractable, &paths.input_dir, &paths.raw_md_dir);
    plan.resumed = resumed;
    for p in pending {
        if p.doc.kind == DocKind::Pdf {
            plan.native_pdfs.push(p);
        } else {
            plan.office_docs.push(p);
        }
    }
    plan
}

/// Split `n` items into `min(k, n)` contiguous shards whose sizes differ by at
/// most one.
pub fn shard_ranges(n: usize, k: usize) -> Vec<Range<usize>> {
    let k = k.max(1).min(n);
    if k == 0 {
        return Vec::new();
    }
    let (base, extra) = (n / k, n % k);
    let mut ranges = Vec::with_capacity(k);
    let mut start = 0;
    for i in 0..k {
        let len = base + usize::from(i < extra);
        ranges.push(start..start + len);
        start += len;
    }
    ranges
}

// ── Dispatch ─────────────────────────────────────────────────────────────────

/// Called once per document as soon as its worker reports on it.
pub type LandedHook<'a> = &'a (dyn Fn(&ConversionResult) + Send + Sync);

struct ShardItem {
    /// The document as discovered (a `.doc`, not its temporary `.docx`).
    original: PathBuf,
    entry: ManifestEntry,
}

struct Shard {
    kind: WorkerKind,
    items: Vec<ShardItem>,
}

/// Drives workers for one run.
pub struct Dispatcher<'a> {
    pub launcher: &'a dyn WorkerLauncher,
    pub office: Option<&'a dyn OfficeConverter>,
    pub paths: &'a PipelinePaths,
    pub pdf_workers: usize,
    pub progress: &'a dyn PipelineProgress,
    pub on_landed: LandedHook<'a>,
}

impl Dispatcher<'_> {
    /// Extract native PDFs across `pdf_workers` concurrent workers.
    pub async fn convert_pdfs(&self, pending: Vec<PendingDocument>) -> Result<Vec<ConversionResult>, PipelineError> {
        let inputs: Vec<PathBuf> = pending.iter().map(|p| p.doc.path.clone()).collect();
        write_native_file_list(&self.paths.native_file_list, &inputs).await?;
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let ranges = shard_ranges(pending.len(), self.pdf_workers);
        info!("Extracting {} PDFs across {} workers", pending.len(), ranges.len());
        let mut items: Vec<ShardItem> = pending.into_iter().map(shard_item).collect();
        let mut shards = Vec::with_capacity(ranges.len());
        // Drain back to front so earlier ranges keep their indices.
        for range in ranges.into_iter().rev() {
            shards.push(Shard {
                kind: WorkerKind::Pdf,
                items: items.drain(range).collect(),
            });
        }
        shards.reverse();
        Ok(self.run_shards(shards).await)
    }

    /// Pre-convert `.doc` files sequentially, then extract every `.docx` in a
    /// single worker.
    pub async fn convert_office(&self, pending: Vec<PendingDocument>) -> Vec<ConversionResult> {
        if pending.is_empty() {
            return Vec::new();
        }
        let mut results = Vec::new();
        let mut items = Vec::new();
        // Scratch directories must outlive the worker reading from them.
        let mut scratch = Vec::new();

        for p in pending {
            if p.doc.kind != DocKind::Doc {
                items.push(shard_item(p));
                continue;
            }
            let name = display_name(&p.doc.path);
            let Some(office) = self.office else {
                results.push(self.fail(&p.doc.path, DocumentError::OfficeUnavailable));
                continue;
            };
            let dir = match tempfile::Builder::new()
                .prefix("doc-")
                .tempdir_in(&self.paths.tmp_dir)
            {
                Ok(d) => d,
                Err(e) => {
                    warn!("Cannot create scratch dir for {}: {}", name, e);
                    results.push(self.fail(&p.doc.path, DocumentError::PreconversionFailed));
                    continue;
                }
            };
            match office.to_docx(&p.doc.path, dir.path()).await {
                Ok(docx) => {
                    debug!("Pre-converted {} → {}", name, docx.display());
                    items.push(ShardItem {
                        original: p.doc.path,
                        entry: ManifestEntry {
                            input: docx,
                            output: p.output,
                        },
                    });
                    scratch.push(dir);
                }
                Err(e) => {
                    debug!("Pre-conversion of {} failed: {}", name, e);
                    results.push(self.fail(&p.doc.path, DocumentError::PreconversionFailed));
                }
            }
        }

        if !items.is_empty() {
            info!("Extracting {} DOCX files", items.len());
            results.extend(
                self.run_shards(vec![Shard {
                    kind: WorkerKind::Docx,
                    items,
                }])
                .await,
            );
        }
        drop(scratch);
        results
    }

    fn fail(&self, input: &Path, error: DocumentError) -> ConversionResult {
        let name = display_name(input);
        warn!("{}: {}", name, error);
        self.progress.on_item_error(StageKind::Convert, &name, &error.to_string());
        ConversionResult::failed(input.to_path_buf(), &error)
    }

    /// Launch one worker per shard, merge their event streams, and fill in a
    /// failure for every entry no worker reported on.
    async fn run_shards(&self, shards: Vec<Shard>) -> Vec<ConversionResult> {
        let mut slots: Vec<Vec<Option<ConversionResult>>> =
            shards.iter().map(|s| vec![None; s.items.len()]).collect();
        let mut launch_errors: Vec<Option<String>> = vec![None; shards.len()];
        let mut exits = Vec::with_capacity(shards.len());
        let mut readers = Vec::new();
        let mut channels = Vec::new();
        let mut manifests = Vec::new();

        for (i, shard) in shards.iter().enumerate() {
            let launched = write_manifest(&self.paths.tmp_dir, &shard.items).and_then(|manifest| {
                let process = self.launcher.launch(shard.kind, manifest.path())?;
                Ok((manifest, process))
            });
            match launched {
                Ok((manifest, process)) => {
                    let (rx, reader) = spawn_event_channel(process.stdout);
                    channels.push(UnboundedReceiverStream::new(rx).map(move |ev| (i, ev)));
                    readers.push(reader);
                    exits.push(Some(process.exit));
                    manifests.push(manifest);
                }
                Err(e) => {
                    warn!("{} shard {} not started: {}", shard.kind, i, e);
                    launch_errors[i] = Some(e.to_string());
                    exits.push(None);
                }
            }
        }

        let mut merged = stream::select_all(channels);
        while let Some((i, event)) = merged.next().await {
            let index = event.index();
            let Some(item) = shards[i].items.get(index) else {
                debug!("Ignoring event for out-of-range index {} (shard {})", index, i);
                continue;
            };
            if slots[i][index].is_some() {
                continue;
            }
            let result = self.event_result(item, event);
            (self.on_landed)(&result);
            slots[i][index] = Some(result);
        }

        for reader in readers {
            match reader.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Worker stdout read failed: {}", e),
                Err(e) => warn!("Worker reader task failed: {}", e),
            }
        }

        let mut results = Vec::new();
        for (i, (shard, exit)) in shards.iter().zip(exits).enumerate() {
            let exit_code = match exit {
                Some(exit) => match exit.await {
                    Ok(code) => code,
                    Err(e) => {
                        warn!("Waiting for {} failed: {}", shard.kind, e);
                        None
                    }
                },
                None => None,
            };
            if exit_code != Some(0) && launch_errors[i].is_none() {
                warn!(
                    "{} worker (shard {}) exited with code {}",
                    shard.kind,
                    i,
                    exit_code.map_or_else(|| "none".to_string(), |c| c.to_string())
                );
            }
            for (index, item) in shard.items.iter().enumerate() {
                let result = match slots[i][index].take() {
                    Some(r) => r,
                    None => {
                        let error = match &launch_errors[i] {
                            Some(detail) => DocumentError::Worker {
                                detail: detail.clone(),
                            },
                            None => DocumentError::NoResult { exit_code },
                        };
                        self.fail(&item.original, error)
                    }
                };
                results.push(result);
            }
        }
        // Manifests are deleted on drop.
        drop(manifests);
        results
    }

    fn event_result(&self, item: &ShardItem, event: WorkerEvent) -> ConversionResult {
        match event {
            WorkerEvent::Converted { chars, .. } => {
                let name = display_name(&item.original);
                debug!("Converted {} ({} chars)", name, chars);
                self.progress.on_item_complete(StageKind::Convert, &name, chars);
                ConversionResult::converted(item.original.clone(), item.entry.output.clone(), chars)
            }
            WorkerEvent::Error { error, .. } => self.fail(
                &item.original,
                DocumentError::Worker {
                    detail: if error.is_empty() {
                        "worker reported an error".to_string()
                    } else {
                        error
                    },
                },
            ),
        }
    }
}

fn shard_item(p: PendingDocument) -> ShardItem {
    ShardItem {
        entry: ManifestEntry {
            input: p.doc.path.clone(),
            output: p.output,
        },
        original: p.doc.path,
    }
}

fn write_manifest(
    tmp_dir: &Path,
    items: &[ShardItem],
) -> Result<tempfile::NamedTempFile, PipelineError> {
    let entries: Vec<&ManifestEntry> = items.iter().map(|i| &i.entry).collect();
    let mut file = tempfile::Builder::new()
        .prefix("manifest-")
        .suffix(".json")
        .tempfile_in(tmp_dir)
        .map_err(|e| PipelineError::io(tmp_dir, e))?;
    serde_json::to_writer(&mut file, &entries).map_err(|e| PipelineError::Sidecar {
        path: file.path().to_path_buf(),
        detail: e.to_string(),
    })?;
    file.flush().map_err(|e| PipelineError::io(tmp_dir, e))?;
    Ok(file)
}

/// Write the newline-separated list of PDFs queued for native extraction.
pub async fn write_native_file_list(path: &Path, pdfs: &[PathBuf]) -> Result<(), PipelineError> {
    let mut body = String::new();
    for pdf in pdfs {
        body.push_str(&pdf.to_string_lossy());
        body.push('\n');
    }
    tokio::fs::write(path, body)
        .await
        .map_err(|e| PipelineError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopProgress;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn shards_are_balanced_and_contiguous() {
        assert_eq!(shard_ranges(10, 3), vec![0..4, 4..7, 7..10]);
        assert_eq!(shard_ranges(2, 5), vec![0..1, 1..2]);
        assert_eq!(shard_ranges(4, 0), vec![0..4]);
        assert!(shard_ranges(0, 3).is_empty());
    }

    /// Replies with a canned stdout per launch and records the manifests.
    struct ScriptedLauncher {
        replies: Mutex<Vec<(String, Option<i32>)>>,
        manifests: Mutex<Vec<(WorkerKind, Vec<ManifestEntry>)>>,
        /// Whether every manifest input existed when the worker started.
        inputs_present: Mutex<Vec<bool>>,
    }

    impl ScriptedLauncher {
        fn new(replies: Vec<(&str, Option<i32>)>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().map(|(s, c)| (s.to_string(), c)).collect()),
                manifests: Mutex::new(Vec::new()),
                inputs_present: Mutex::new(Vec::new()),
            }
        }
    }

    impl WorkerLauncher for ScriptedLauncher {
        fn launch(&self, kind: WorkerKind, manifest: &Path) -> Result<WorkerProcess, PipelineError> {
            let entries: Vec<ManifestEntry> =
                serde_json::from_str(&std::fs::read_to_string(manifest).unwrap()).unwrap();
            self.inputs_present
                .lock()
                .unwrap()
                .push(entries.iter().all(|e| e.input.is_file()));
            self.manifests.lock().unwrap().push((kind, entries));
            let (stdout, code) = self.replies.lock().unwrap().remove(0);
            Ok(WorkerProcess {
                stdout: Box::pin(Cursor::new(stdout.into_bytes())),
                exit: Box::pin(async move { Ok(code) }),
            })
        }
    }

    struct FailingOffice;

    impl OfficeConverter for FailingOffice {
        fn to_docx<'a>(
            &'a self,
            _doc: &'a Path,
            _out_dir: &'a Path,
        ) -> BoxFuture<'a, Result<PathBuf, DocumentError>> {
            Box::pin(async { Err(DocumentError::PreconversionFailed) })
        }
    }

    /// Writes `<stem>.docx` into the scratch dir and tracks how many
    /// conversions overlap.
    #[derive(Default)]
    struct CopyingOffice {
        current: AtomicUsize,
        max: AtomicUsize,
    }

    impl OfficeConverter for CopyingOffice {
        fn to_docx<'a>(
            &'a self,
            doc: &'a Path,
            out_dir: &'a Path,
        ) -> BoxFuture<'a, Result<PathBuf, DocumentError>> {
            Box::pin(async move {
                let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
                self.max.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                let stem = doc.file_stem().unwrap().to_string_lossy().into_owned();
                let docx = out_dir.join(format!("{stem}.docx"));
                std::fs::write(&docx, b"docx").unwrap();
                self.current.fetch_sub(1, Ordering::SeqCst);
                Ok(docx)
            })
        }
    }

    fn fixture() -> (tempfile::TempDir, PipelinePaths) {
        let root = tempfile::tempdir().unwrap();
        let input = root.path().join("in");
        std::fs::create_dir_all(&input).unwrap();
        let paths = PipelinePaths::new(&input, &root.path().join("out")).unwrap();
        std::fs::create_dir_all(&paths.tmp_dir).unwrap();
        (root, paths)
    }

    fn pending(paths: &PipelinePaths, name: &str, kind: DocKind) -> PendingDocument {
        let path = paths.input_dir.join(name);
        PendingDocument {
            output: crate::pipeline::discover::output_path(&path, &paths.input_dir, &paths.raw_md_dir),
            doc: SourceDocument { path, kind, size: 1 },
        }
    }

    #[tokio::test]
    async fn merges_shards_and_fills_unreported() {
        let (_root, paths) = fixture();
        let launcher = ScriptedLauncher::new(vec![
            (
                "{\"type\":\"loading\"}\n{\"type\":\"converted\",\"index\":0,\"file\":\"a.pdf\",\"chars\":10}\n\
                 {\"type\":\"converted\",\"index\":9,\"chars\":1}\n",
                Some(1),
            ),
            ("{\"type\":\"error\",\"index\":0,\"file\":\"c.pdf\",\"error\":\"bad font\"}", Some(0)),
        ]);
        let landed = Mutex::new(Vec::new());
        let hook = |r: &ConversionResult| landed.lock().unwrap().push(r.input.clone());
        let dispatcher = Dispatcher {
            launcher: &launcher,
            office: None,
            paths: &paths,
            pdf_workers: 2,
            progress: &NoopProgress,
            on_landed: &hook,
        };
        let docs = vec![
            pending(&paths, "a.pdf", DocKind::Pdf),
            pending(&paths, "b.pdf", DocKind::Pdf),
            pending(&paths, "c.pdf", DocKind::Pdf),
        ];
        let results = dispatcher.convert_pdfs(docs).await.unwrap();

        assert_eq!(results.len(), 3);
        assert!(results[0].success);
        assert_eq!(results[0].chars, 10);
        assert_eq!(
            results[1].error.as_deref(),
            Some("worker exited (code 1) without reporting a result")
        );
        assert_eq!(results[2].error.as_deref(), Some("bad font"));
        assert_eq!(landed.lock().unwrap().len(), 2);

        let manifests = launcher.manifests.lock().unwrap();
        assert_eq!(manifests[0].1.len(), 2);
        assert_eq!(manifests[1].1.len(), 1);
        assert_eq!(manifests[0].1[1].output, paths.raw_md_dir.join("b.md"));

        let list = std::fs::read_to_string(&paths.native_file_list).unwrap();
        assert_eq!(list.lines().count(), 3);
        // Manifests are cleaned up.
        assert_eq!(std::fs::read_dir(&paths.tmp_dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn doc_failures_use_fixed_messages() {
        let (_root, paths) = fixture();
        let office = FailingOffice;
        let launcher = ScriptedLauncher::new(vec![(
            "{\"type\":\"converted\",\"index\":0,\"chars\":5}\n",
            Some(0),
        )]);
        let hook = |_: &ConversionResult| {};
        let mut dispatcher = Dispatcher {
            launcher: &launcher,
            office: None,
            paths: &paths,
            pdf_workers: 1,
            progress: &NoopProgress,
            on_landed: &hook,
        };
        let docs = vec![
            pending(&paths, "old.doc", DocKind::Doc),
            pending(&paths, "new.docx", DocKind::Docx),
        ];
        let results = dispatcher.convert_office(docs.clone()).await;
        assert_eq!(results[0].error.as_deref(), Some("office converter not available"));
        assert!(results[1].success);
        assert_eq!(launcher.manifests.lock().unwrap()[0].0, WorkerKind::Docx);

        dispatcher.office = Some(&office);
        let results = dispatcher.convert_office(vec![docs[0].clone()]).await;
        assert_eq!(results[0].error.as_deref(), Some("failed to convert .doc to .docx"));
    }

    #[tokio::test]
    async fn doc_is_extracted_from_its_docx_and_reported_as_doc() {
        let (_root, paths) = fixture();
        let office = CopyingOffice::default();
        std::fs::write(paths.input_dir.join("c.docx"), b"docx").unwrap();
        let launcher = ScriptedLauncher::new(vec![(
            "{\"type\":\"converted\",\"index\":0,\"chars\":7}\n\
             {\"type\":\"converted\",\"index\":1,\"chars\":8}\n\
             {\"type\":\"converted\",\"index\":2,\"chars\":9}\n",
            Some(0),
        )]);
        let landed = Mutex::new(Vec::new());
        let hook = |r: &ConversionResult| landed.lock().unwrap().push(r.input.clone());
        let dispatcher = Dispatcher {
            launcher: &launcher,
            office: Some(&office),
            paths: &paths,
            pdf_workers: 4,
            progress: &NoopProgress,
            on_landed: &hook,
        };
        let docs = vec![
            pending(&paths, "a.doc", DocKind::Doc),
            pending(&paths, "b.doc", DocKind::Doc),
            pending(&paths, "c.docx", DocKind::Docx),
        ];
        let results = dispatcher.convert_office(docs).await;

        assert_eq!(office.max.load(Ordering::SeqCst), 1);
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.success));
        assert!(results[0].input.ends_with("a.doc"));
        assert!(results[1].input.ends_with("b.doc"));
        assert_eq!(results[0].output.as_deref(), Some(paths.raw_md_dir.join("a.md").as_path()));
        assert_eq!(landed.lock().unwrap()[0], paths.input_dir.join("a.doc"));

        let manifests = launcher.manifests.lock().unwrap();
        assert_eq!(manifests.len(), 1);
        let (kind, entries) = &manifests[0];
        assert_eq!(*kind, WorkerKind::Docx);
        assert!(entries[0].input.starts_with(&paths.tmp_dir));
        assert!(entries[0].input.ends_with("a.docx"));
        assert_eq!(entries[2].input, paths.input_dir.join("c.docx"));
        assert_eq!(*launcher.inputs_present.lock().unwrap(), vec![true]);
        // Scratch directories are gone once extraction is done.
        assert_eq!(std::fs::read_dir(&paths.tmp_dir).unwrap().count(), 0);
    }
}
