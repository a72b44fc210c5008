//! CLI binary for anymd.
//!
//! A thin shim over the library crate: loads `config.json`, runs preflight,
//! wires the real collaborators, renders progress, and prints the summary.

use anyhow::{Context, Result};
use anymd::{
    preflight, Collaborators, Pipeline, PipelineConfig, PipelinePaths, PipelineProgress,
    PipelineStats, ProgressCallback, RunSnapshot, StageKind,
};
use clap::Parser;
use futures::future::{FutureExt, LocalBoxFuture};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Single-line progress bar shared by every stage.
///
/// In the interactive run conversion, OCR and enhancement report at the same
/// time, so the bar length is the sum of every started stage's total. Stages
/// that start without a known total (enhancement) grow it per item.
struct CliProgress {
    bar: ProgressBar,
    open_ended: Mutex<HashSet<StageKind>>,
    errors: AtomicUsize,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>5}/{len}  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix("Starting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            open_ended: Mutex::new(HashSet::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn is_open_ended(&self, stage: StageKind) -> bool {
        self.open_ended
            .lock()
            .map(|s| s.contains(&stage))
            .unwrap_or(false)
    }

    /// Show the run snapshot in the message slot (interactive mode).
    fn show_snapshot(&self, snap: &RunSnapshot) {
        let mut msg = format!(
            "converted {}  failed {}  enhanced {}",
            snap.converted, snap.failed, snap.enhanced
        );
        if let Some(ocr) = &snap.ocr {
            msg.push_str(&format!(
                "  │ ocr {}/{} ({:.1}%) eta {}",
                ocr.done, ocr.total, ocr.pct, ocr.eta
            ));
        }
        self.bar.set_message(msg);
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
        let errors = self.errors.load(Ordering::SeqCst);
        if errors > 0 {
            eprintln!("{} {} item errors during the run", cyan("⚠"), errors);
        }
    }
}

impl PipelineProgress for CliProgress {
    fn on_stage_start(&self, stage: StageKind, total: usize) {
        if total == 0 {
            if let Ok(mut s) = self.open_ended.lock() {
                s.insert(stage);
            }
        }
        self.bar.inc_length(total as u64);
        self.bar.set_prefix(stage.to_string());
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&if total > 0 {
                format!("{stage}: {total} items")
            } else {
                format!("{stage}: as files land")
            })
        ));
    }

    fn on_item_complete(&self, stage: StageKind, _name: &str, _chars: usize) {
        if self.is_open_ended(stage) {
            self.bar.inc_length(1);
        }
        self.bar.set_prefix(stage.to_string());
        self.bar.inc(1);
    }

    fn on_item_error(&self, stage: StageKind, name: &str, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        if self.is_open_ended(stage) {
            self.bar.inc_length(1);
        }
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(['\u{2026}']).collect()
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} [{stage}] {}  {}", red("✗"), name, red(&msg)));
        self.bar.inc(1);
    }

    fn on_stage_complete(&self, stage: StageKind, succeeded: usize, total: usize) {
        let failed = total.saturating_sub(succeeded);
        let mark = if failed == 0 { green("✔") } else { cyan("⚠") };
        let tail = if failed > 0 {
            format!("  ({} failed)", red(&failed.to_string()))
        } else {
            String::new()
        };
        self.bar.println(format!(
            "{} {}: {}/{}{}",
            mark,
            stage,
            bold(&succeeded.to_string()),
            total,
            tail
        ));
    }
}

// ── CLI ──────────────────────────────────────────────────────────────────────

const AFTER_HELP: &str = r#"EXAMPLES:
  # Full batch run
  anymd --input-dir ./data

  # Resumable run with live OCR status
  anymd --input-dir ./data --output-dir ./out --interactive

  # Custom thresholds / tool paths
  anymd --input-dir ./data --config ./anymd.json

OUTPUT LAYOUT:
  classification.json      native / mixed / scanned triage
  raw-md/  ocr-raw/        extractor output before cleanup
  markdown/                enhanced markdown (one file per document)
  quality-report.json      artifact scan
  dataset/dataset.jsonl    deduplicated corpus
  pipeline-log.txt         info log (appended)
  errors.log               warnings and errors (appended)

REQUIRED TOOLS:
  python3     worker and OCR scripts
  pdftotext   poppler-utils, used for classification

OPTIONAL TOOLS:
  soffice             .doc → .docx pre-conversion
  markdownlint-cli2   markdown auto-fix pass

Re-running with the same arguments resumes: only missing outputs are redone.
"#;

/// Convert PDF/DOC/DOCX collections into a deduplicated Markdown corpus.
#[derive(Parser, Debug)]
#[command(
    name = "anymd",
    version,
    about = "Convert PDF/DOC/DOCX collections into a deduplicated Markdown corpus",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Directory tree of input documents.
    #[arg(long, env = "ANYMD_INPUT_DIR")]
    input_dir: PathBuf,

    /// Directory for every generated artifact.
    #[arg(long, env = "ANYMD_OUTPUT_DIR", default_value = "./output")]
    output_dir: PathBuf,

    /// JSON config file; missing file means defaults.
    #[arg(long, env = "ANYMD_CONFIG", default_value = "./config.json")]
    config: PathBuf,

    /// Overlap conversion, OCR and enhancement, with live status.
    #[arg(long, env = "ANYMD_INTERACTIVE")]
    interactive: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "ANYMD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "ANYMD_QUIET")]
    quiet: bool,

    /// Disable progress bar.
    #[arg(long, env = "ANYMD_NO_PROGRESS")]
    no_progress: bool,
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

/// stderr (filtered by verbosity) plus the two appended log files.
fn init_logging(cli: &Cli, show_progress: bool, paths: &PipelinePaths) -> Result<()> {
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    let stderr_layer = fmt::layer().with_writer(io::stderr).with_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
    );
    let log_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(Mutex::new(open_append(&paths.pipeline_log)?))
        .with_filter(if cli.verbose {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        });
    let error_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(Mutex::new(open_append(&paths.errors_log)?))
        .with_filter(LevelFilter::WARN);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(log_layer)
        .with(error_layer)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let show_progress = !cli.quiet && !cli.no_progress;

    let paths = PipelinePaths::new(&cli.input_dir, &cli.output_dir)
        .context("Cannot use input directory")?;
    std::fs::create_dir_all(&paths.output_dir)
        .with_context(|| format!("Failed to create {}", paths.output_dir.display()))?;
    init_logging(&cli, show_progress, &paths)?;

    let config = PipelineConfig::load(&cli.config)
        .with_context(|| format!("Invalid configuration in {}", cli.config.display()))?;
    let report = preflight::check(&config).context("Preflight failed")?;
    if !cli.quiet {
        for tool in &report.missing_optional {
            eprintln!("{} optional tool '{}' not found", cyan("⚠"), tool);
        }
    }

    let collab = Collaborators::from_config(&config, &report);
    let cli_progress = show_progress.then(CliProgress::new);
    let mut pipeline = Pipeline::new(config, paths, collab);
    if let Some(p) = &cli_progress {
        pipeline = pipeline.with_progress(Arc::clone(p) as ProgressCallback);
    }

    let run: LocalBoxFuture<'_, _> = if cli.interactive {
        pipeline.run_resumable().boxed_local()
    } else {
        pipeline.run_batch().boxed_local()
    };
    let stats = watch_run(&pipeline, run, cli_progress.as_deref(), cli.interactive)
        .await
        .context("Pipeline failed")?;
    if let Some(p) = &cli_progress {
        p.finish();
    }

    if !cli.quiet {
        print_summary(&stats, pipeline.paths());
    }
    Ok(())
}

/// Drive the run; in interactive mode refresh the status line from the
/// live snapshot every few seconds.
async fn watch_run(
    pipeline: &Pipeline,
    mut run: LocalBoxFuture<'_, Result<PipelineStats, anymd::PipelineError>>,
    progress: Option<&CliProgress>,
    interactive: bool,
) -> Result<PipelineStats, anymd::PipelineError> {
    let mut ticker = tokio::time::interval(Duration::from_secs(2));
    loop {
        tokio::select! {
            res = &mut run => return res,
            _ = ticker.tick(), if interactive => {
                let snap = pipeline.snapshot();
                match progress {
                    Some(p) => p.show_snapshot(&snap),
                    None => tracing::debug!(?snap, "status"),
                }
            }
        }
    }
}

fn print_summary(stats: &PipelineStats, paths: &PipelinePaths) {
    let mark = if stats.failed == 0 && stats.errors.is_empty() {
        green("✔")
    } else {
        cyan("⚠")
    };
    eprintln!(
        "{}  {} documents  {} converted  {} resumed  {} failed  {} OCR  {}ms",
        mark,
        stats.discovered,
        stats.converted,
        stats.resumed,
        stats.failed,
        stats.ocr_queued,
        stats.total_duration_ms
    );
    eprintln!(
        "   {} enhanced  {}",
        stats.enhanced,
        dim(&format!("{} → {} chars", stats.raw_chars, stats.enhanced_chars))
    );
    if let Some(q) = &stats.quality {
        eprintln!(
            "   quality: {}  {} checked, {} failed, {} errors / {} warnings",
            if q.pass { green("pass") } else { red("fail") },
            q.files_checked,
            q.files_failed,
            q.total_errors,
            q.total_warnings
        );
    }
    if let Some(d) = &stats.dataset {
        eprintln!(
            "   dataset: {} records, {} duplicates, {} skipped  →  {}",
            d.written,
            d.duplicates,
            d.skipped,
            bold(&d.path.display().to_string())
        );
    }
    for e in stats.errors.iter().take(20) {
        eprintln!("   {} {}", red("✗"), e);
    }
    if stats.errors.len() > 20 {
        eprintln!(
            "   {} more in {}",
            stats.errors.len() - 20,
            paths.errors_log.display()
        );
    }
}
