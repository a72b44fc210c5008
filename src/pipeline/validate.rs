//! Quality gate: scan enhanced markdown for extraction artifacts.
//!
//! Each pattern is a fingerprint of a known way extraction goes wrong: Word
//! field codes leaking into the text, `ð` standing in for `đ` because of a
//! broken font mapping, U+FFFD from a failed decode, and so on. The validator
//! only reports; it never edits files and never stops the run.

use crate::config::ArtifactSettings;
use crate::error::PipelineError;
use crate::output::display_name;
use crate::pipeline::write_json_atomic;
use crate::progress::{PipelineProgress, StageKind};
use futures::stream::{self, StreamExt};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Samples kept per pattern per file.
const MAX_SAMPLES: usize = 3;

/// Characters of context on each side of a sample.
const SAMPLE_CONTEXT: usize = 40;

/// Ordered so that errors sort before warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A named artifact fingerprint.
#[derive(Debug, Clone)]
pub struct ArtifactPattern {
    pub name: String,
    pub severity: Severity,
    pub regex: Regex,
}

impl ArtifactPattern {
    fn builtin(name: &str, severity: Severity, pattern: &str) -> Self {
        Self {
            name: name.to_string(),
            severity,
            regex: Regex::new(pattern).unwrap(),
        }
    }
}

/// The built-in pattern list, in report order.
pub fn default_patterns() -> Vec<ArtifactPattern> {
    use Severity::{Error, Warning};
    vec![
        ArtifactPattern::builtin("hyperlink-field", Error, r#"HYPERLINK\s+"[^"]*""#),
        ArtifactPattern::builtin("wrong-codepoint", Error, r"[ðÐ]"),
        ArtifactPattern::builtin("soft-hyphen", Warning, "\u{00AD}"),
        ArtifactPattern::builtin(
            "field-code",
            Error,
            r"\b(?:MERGEFIELD|PAGEREF|SEQ)\s+\S+|\bREF\s+_Ref\d+|\bTOC\s+\\[a-zA-Z]",
        ),
        ArtifactPattern::builtin("replacement-char", Error, "\u{FFFD}"),
        ArtifactPattern::builtin("bookmark-marker", Warning, r"_(?:Toc|Ref|Hlk)\d+"),
        ArtifactPattern::builtin("zero-width", Warning, "[\u{200B}\u{200C}\u{200D}\u{2060}\u{FEFF}]"),
        ArtifactPattern::builtin("control-char", Error, r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F]"),
    ]
}

/// Built-ins adjusted by `settings`: disabled names dropped, severities
/// overridden, extra patterns appended.
pub fn build_patterns(settings: &ArtifactSettings) -> Result<Vec<ArtifactPattern>, PipelineError> {
    let mut patterns: Vec<ArtifactPattern> = default_patterns()
        .into_iter()
        .filter(|p| !settings.disabled.contains(&p.name))
        .collect();
    for extra in &settings.extra {
        let regex = Regex::new(&extra.pattern).map_err(|e| {
            PipelineError::InvalidConfig(format!("artifact pattern '{}': {e}", extra.name))
        })?;
        patterns.push(ArtifactPattern {
            name: extra.name.clone(),
            severity: extra.severity,
            regex,
        });
    }
    for p in patterns.iter_mut() {
        if let Some(severity) = settings.severity.get(&p.name) {
            p.severity = *severity;
        }
    }
    Ok(patterns)
}

// ── Per-file scan ────────────────────────────────────────────────────────────

/// One pattern's hits in one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMatch {
    pub name: String,
    pub severity: Severity,
    pub count: usize,
    pub samples: Vec<String>,
}

/// Scan result for one file. Only files with at least one match appear in
/// the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileQuality {
    pub file: String,
    pub pass: bool,
    pub matches: Vec<ArtifactMatch>,
}

/// Every pattern that matches `text`, with counts and context samples.
pub fn scan_text(text: &str, patterns: &[ArtifactPattern]) -> Vec<ArtifactMatch> {
    patterns
        .iter()
        .filter_map(|p| {
            let mut count = 0;
            let mut samples = Vec::new();
            for m in p.regex.find_iter(text) {
                count += 1;
                if samples.len() < MAX_SAMPLES {
                    samples.push(sample(text, m.start(), m.end()));
                }
            }
            (count > 0).then(|| ArtifactMatch {
                name: p.name.clone(),
                severity: p.severity,
                count,
                samples,
            })
        })
        .collect()
}

fn sample(text: &str, start: usize, end: usize) -> String {
    let before: Vec<char> = text[..start].chars().rev().take(SAMPLE_CONTEXT).collect();
    let after = text[end..].chars().take(SAMPLE_CONTEXT);
    let raw: String = before
        .into_iter()
        .rev()
        .chain(text[start..end].chars())
        .chain(after)
        .collect();
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Report ───────────────────────────────────────────────────────────────────

/// Totals for one pattern across the corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactSummary {
    pub name: String,
    pub severity: Severity,
    pub total_occurrences: usize,
    pub affected_files: usize,
}

/// Persisted as `quality-report.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityReport {
    pub pass: bool,
    pub files_checked: usize,
    pub files_failed: usize,
    pub total_errors: usize,
    pub total_warnings: usize,
    pub summary: Vec<ArtifactSummary>,
    pub files: Vec<FileQuality>,
}

impl QualityReport {
    /// Aggregate per-file results. `files_checked` counts clean files too.
    pub fn from_files(files_checked: usize, mut files: Vec<FileQuality>) -> Self {
        files.sort_by(|a, b| a.file.cmp(&b.file));

        let mut by_name: BTreeMap<&str, ArtifactSummary> = BTreeMap::new();
        let (mut total_errors, mut total_warnings) = (0, 0);
        for f in &files {
            for m in &f.matches {
                match m.severity {
                    Severity::Error => total_errors += m.count,
                    Severity::Warning => total_warnings += m.count,
                }
                let entry = by_name.entry(m.name.as_str()).or_insert_with(|| ArtifactSummary {
                    name: m.name.clone(),
                    severity: m.severity,
                    total_occurrences: 0,
                    affected_files: 0,
                });
                entry.total_occurrences += m.count;
                entry.affected_files += 1;
            }
        }
        let mut summary: Vec<ArtifactSummary> = by_name.into_values().collect();
        summary.sort_by(|a, b| {
            a.severity
                .cmp(&b.severity)
                .then(b.total_occurrences.cmp(&a.total_occurrences))
                .then(a.name.cmp(&b.name))
        });

        Self {
            pass: total_errors == 0,
            files_checked,
            files_failed: files.iter().filter(|f| !f.pass).count(),
            total_errors,
            total_warnings,
            summary,
            files,
        }
    }
}

/// Scan one file's text.
pub fn check_text(file: &str, text: &str, patterns: &[ArtifactPattern]) -> FileQuality {
    let matches = scan_text(text, patterns);
    FileQuality {
        file: file.to_string(),
        pass: !matches.iter().any(|m| m.severity == Severity::Error),
        matches,
    }
}

/// Scan every `*.md` in `dir` and write the report to `report_path`.
pub async fn validate_dir(
    dir: &Path,
    patterns: &[ArtifactPattern],
    concurrency: usize,
    report_path: &Path,
    progress: &dyn PipelineProgress,
) -> Result<QualityReport, PipelineError> {
    let files = list_markdown(dir).await?;
    progress.on_stage_start(StageKind::Validate, files.len());

    let results: Vec<Option<FileQuality>> = stream::iter(files.iter())
        .map(|path| async move {
            let name = display_name(path);
            match tokio::fs::read_to_string(path).await {
                Ok(text) => {
                    let q = check_text(&name, &text, patterns);
                    if q.pass {
                        progress.on_item_complete(StageKind::Validate, &name, text.len());
                    } else {
                        progress.on_item_error(StageKind::Validate, &name, "artifacts found");
                    }
                    Some(q)
                }
                Err(e) => {
                    warn!("Cannot validate {}: {}", name, e);
                    progress.on_item_error(StageKind::Validate, &name, &e.to_string());
                    None
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let checked = results.iter().filter(|r| r.is_some()).count();
    let with_matches: Vec<FileQuality> = results
        .into_iter()
        .flatten()
        .filter(|q| !q.matches.is_empty())
        .collect();
    let report = QualityReport::from_files(checked, with_matches);
    write_json_atomic(report_path, &report).await?;

    progress.on_stage_complete(
        StageKind::Validate,
        report.files_checked - report.files_failed,
        files.len(),
    );
    info!(
        "Quality: {} files, {} failed, {} errors, {} warnings",
        report.files_checked, report.files_failed, report.total_errors, report.total_warnings
    );
    Ok(report)
}

/// Sorted `*.md` files directly inside `dir`. A missing directory is empty.
pub(crate) async fn list_markdown(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(PipelineError::io(dir, e)),
    };
    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| PipelineError::io(dir, e))?
    {
        let path = entry.path();
        if path.extension().is_some_and(|e| e == "md") && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtraArtifactPattern;
    use crate::progress::NoopProgress;

    #[test]
    fn hyperlink_field_fails_file() {
        let q = check_text("a.md", r#"See HYPERLINK "http://x" for details"#, &default_patterns());
        assert!(!q.pass);
        assert_eq!(q.matches.len(), 1);
        assert_eq!(q.matches[0].name, "hyperlink-field");
        assert_eq!(q.matches[0].severity, Severity::Error);
        assert_eq!(q.matches[0].samples[0], r#"See HYPERLINK "http://x" for details"#);
    }

    #[test]
    fn warnings_alone_pass() {
        let q = check_text("a.md", "co\u{00AD}operate and _Toc123456", &default_patterns());
        assert!(q.pass);
        let names: Vec<_> = q.matches.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["soft-hyphen", "bookmark-marker"]);
    }

    #[test]
    fn clean_vietnamese_text_has_no_matches() {
        let q = check_text("a.md", "# Điều 1\n\nPhạm vi điều chỉnh của Luật này.", &default_patterns());
        assert!(q.pass);
        assert!(q.matches.is_empty());
    }

    #[test]
    fn samples_capped_with_context() {
        let text = format!("{}ð{}", "x".repeat(100), " ð".repeat(10));
        let m = &scan_text(&text, &default_patterns())[0];
        assert_eq!(m.name, "wrong-codepoint");
        assert_eq!(m.count, 11);
        assert_eq!(m.samples.len(), MAX_SAMPLES);
        assert!(m.samples[0].starts_with(&"x".repeat(SAMPLE_CONTEXT)));
    }

    #[test]
    fn field_codes_detected() {
        for text in ["MERGEFIELD Name", "PAGEREF _Toc1 \\h", "REF _Ref12345", "TOC \\o \"1-3\""] {
            let matches = scan_text(text, &default_patterns());
            assert!(
                matches.iter().any(|m| m.name == "field-code"),
                "no field-code match in {text:?}"
            );
        }
    }

    #[test]
    fn settings_adjust_patterns() {
        let mut settings = ArtifactSettings::default();
        settings.disabled.push("zero-width".into());
        settings.severity.insert("soft-hyphen".into(), Severity::Error);
        settings.extra.push(ExtraArtifactPattern {
            name: "lorem".into(),
            pattern: "(?i)lorem ipsum".into(),
            severity: Severity::Warning,
        });
        let patterns = build_patterns(&settings).unwrap();
        assert!(patterns.iter().all(|p| p.name != "zero-width"));
        assert_eq!(patterns.last().unwrap().name, "lorem");

        let q = check_text("a.md", "x\u{00AD}y\u{200B} Lorem Ipsum", &patterns);
        assert!(!q.pass);
        let names: Vec<_> = q.matches.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["soft-hyphen", "lorem"]);
    }

    #[test]
    fn bad_extra_pattern_is_config_error() {
        let mut settings = ArtifactSettings::default();
        settings.extra.push(ExtraArtifactPattern {
            name: "broken".into(),
            pattern: "(".into(),
            severity: Severity::Error,
        });
        assert!(matches!(
            build_patterns(&settings),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn report_orders_errors_first_then_by_count() {
        let patterns = default_patterns();
        let files = vec![
            check_text("a.md", "\u{00AD}\u{00AD}\u{00AD} \u{FFFD}", &patterns),
            check_text("b.md", "ð ð", &patterns),
        ];
        let report = QualityReport::from_files(3, files);
        let order: Vec<_> = report.summary.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(order, vec!["wrong-codepoint", "replacement-char", "soft-hyphen"]);
        assert_eq!(report.total_errors, 3);
        assert_eq!(report.total_warnings, 3);
        assert_eq!(report.files_failed, 2);
        assert!(!report.pass);
    }

    #[tokio::test]
    async fn validate_dir_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("good.md"), "Văn bản sạch").unwrap();
        std::fs::write(dir.path().join("bad.md"), "chữ \u{FFFD} lỗi").unwrap();
        std::fs::write(dir.path().join("skip.txt"), "\u{FFFD}").unwrap();
        let report_path = dir.path().join("quality-report.json");

        let report = validate_dir(dir.path(), &default_patterns(), 4, &report_path, &NoopProgress)
            .await
            .unwrap();
        assert_eq!(report.files_checked, 2);
        assert_eq!(report.files_failed, 1);
        assert_eq!(report.files[0].file, "bad.md");

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
        assert_eq!(raw["pass"], false);
        assert_eq!(raw["summary"][0]["name"], "replacement-char");
        assert_eq!(raw["summary"][0]["severity"], "error");
    }
}
