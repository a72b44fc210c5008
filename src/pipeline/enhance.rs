//! Markdown enhancement: deterministic cleanup of converter and OCR output.
//!
//! ## Why is enhancement necessary?
//!
//! Extraction tools get the text right far more often than the structure.
//! Typical damage in a Vietnamese legal corpus:
//!
//! - HTML fragments (`<table>`, `<b>`) where the converter gave up on markdown
//! - Stray control characters from the PDF text layer
//! - The document's letterhead (issuing agency / national motto) rendered as a
//!   two-column table at the very top of every file
//! - Structural headings (`Chương II`, `Điều 5.`) rendered as bold or plain
//!   paragraphs instead of headings
//! - Decorative rules, empty bold markers, and bare page numbers
//!
//! [`enhance_markdown`] fixes these with cheap regex/string rules. It is pure
//! and total: every input yields an output, and applying it twice gives the
//! same result as applying it once.
//!
//! ## Rule Order
//!
//! HTML must be converted before control characters are stripped (entities
//! can decode to them) and before tables are inspected. Headings are promoted
//! before the blank-line collapse so promoted lines keep their surrounding
//! spacing.

use crate::error::DocumentError;
use crate::output::{display_name, CleanResult};
use crate::pipeline::discover::existing_outputs;
use crate::pipeline::html;
use crate::progress::{PipelineProgress, StageKind};
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Upper bound on fixpoint iterations; real documents settle in two.
const MAX_PASSES: usize = 8;

/// Header tables must start within this many lines of the top.
const HEADER_TABLE_WINDOW: usize = 10;

/// How far below a header-table row the next row may appear.
const HEADER_TABLE_LOOKAHEAD: usize = 6;

/// Apply every enhancement rule until the text stops changing.
pub fn enhance_markdown(input: &str) -> String {
    let mut current = enhance_pass(input);
    for _ in 1..MAX_PASSES {
        let next = enhance_pass(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

/// One pass of the six rules, in order:
///
/// 1. HTML → markdown (only when known tags are present)
/// 2. Strip control characters; trim every line
/// 3. Blank the header table leading the document
/// 4. Promote structural keywords to headings
/// 5. Blank decorative rules, empty bold markers and page numbers
/// 6. Collapse blank lines and runs of spaces; trim the document
fn enhance_pass(input: &str) -> String {
    let s = if html::contains_html(input) {
        html::html_to_markdown(input)
    } else {
        input.to_string()
    };
    let mut lines: Vec<String> = s.split('\n').map(clean_line).collect();
    suppress_header_table(&mut lines);
    for line in lines.iter_mut() {
        if let Some(promoted) = promote_heading(line) {
            *line = promoted;
        } else if is_noise_line(line) {
            line.clear();
        }
    }
    collapse_whitespace(&lines.join("\n"))
}

// ── Rule 2: Control characters and line trimming ────────────────────────────

fn clean_line(line: &str) -> String {
    line.chars()
        .filter(|c| *c == '\t' || !c.is_ascii_control())
        .collect::<String>()
        .trim()
        .to_string()
}

// ── Rule 3: Header-table suppression ────────────────────────────────────────

/// Blank the leading table block(s). A table only counts as a header when
/// nothing but blank lines precedes it, so removing one can never pull a
/// content table into the window on the next pass.
fn suppress_header_table(lines: &mut [String]) {
    let mut i = 0;
    loop {
        while i < lines.len() && lines[i].is_empty() {
            i += 1;
        }
        if i >= lines.len().min(HEADER_TABLE_WINDOW) || !starts_table(lines, i) {
            return;
        }
        while i < lines.len() && (is_table_row(&lines[i]) || is_separator_row(&lines[i])) {
            lines[i].clear();
            i += 1;
        }
    }
}

fn starts_table(lines: &[String], i: usize) -> bool {
    is_table_row(&lines[i])
        && lines
            .iter()
            .skip(i + 1)
            .take(HEADER_TABLE_LOOKAHEAD)
            .any(|l| is_table_row(l) || is_separator_row(l))
}

fn is_table_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|') && trimmed.ends_with('|') && trimmed.len() > 2
}

fn is_separator_row(line: &str) -> bool {
    let trimmed = line.trim();
    if !trimmed.starts_with('|') || !trimmed.contains('-') {
        return false;
    }
    // A separator row contains only |, -, :, and whitespace
    trimmed
        .chars()
        .all(|c| c == '|' || c == '-' || c == ':' || c == ' ')
}

// ── Rule 4: Heading promotion ───────────────────────────────────────────────

/// `(heading level, keyword pattern)`. Diacritic spellings match in any case;
/// the unaccented spellings only in capitals, so ordinary words are not
/// caught. Longer keywords come first.
static HEADING_RULES: Lazy<Vec<(usize, Regex)>> = Lazy::new(|| {
    const NUMBER: &str = r"\s+(?:(?i:thứ)\s+\S+|THU\s+\S+|\d+|[IVXLCDM]+)\b";
    [
        (1, r"(?i:phần)|PHAN"),
        (3, r"(?i:tiểu\s+mục)|TIEU\s+MUC"),
        (2, r"(?i:chương)|CHUONG"),
        (3, r"(?i:mục)|MUC"),
        (4, r"(?i:điều)|DIEU"),
    ]
    .into_iter()
    .map(|(level, keyword)| {
        let re = Regex::new(&format!(r"^(?:{keyword}){NUMBER}")).unwrap();
        (level, re)
    })
    .collect()
});

static RE_BOLD_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\*\*(.+?)\*\*$").unwrap());

/// Returns the promoted line, or `None` when the line is not a structural
/// heading.
fn promote_heading(line: &str) -> Option<String> {
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let text = RE_BOLD_LINE
        .captures(line)
        .map(|c| c[1].trim().to_string())
        .unwrap_or_else(|| line.to_string());
    HEADING_RULES
        .iter()
        .find(|(_, re)| re.is_match(&text))
        .map(|(level, _)| format!("{} {}", "#".repeat(*level), text))
}

// ── Rule 5: Decorative noise ────────────────────────────────────────────────

static RE_RULE_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[-_]{3,}$").unwrap());
static RE_EMPTY_BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:\*\*\s*)+$").unwrap());
static RE_PAGE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,4}$").unwrap());

fn is_noise_line(line: &str) -> bool {
    RE_RULE_LINE.is_match(line) || RE_EMPTY_BOLD.is_match(line) || RE_PAGE_NUMBER.is_match(line)
}

// ── Rule 6: Whitespace collapse ─────────────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());
static RE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}").unwrap());

fn collapse_whitespace(input: &str) -> String {
    let s = RE_BLANK_LINES.replace_all(input, "\n\n");
    let s = RE_SPACES.replace_all(&s, " ");
    s.trim().to_string()
}

// ── Enhance stage ────────────────────────────────────────────────────────────

/// Every `*.md` in `source_dirs` with no counterpart in `out_dir`, sorted by
/// file name. When two source directories hold the same name, the first wins.
pub fn pending_sources(source_dirs: &[&Path], out_dir: &Path) -> Vec<PathBuf> {
    let done = existing_outputs(out_dir);
    let mut seen: HashSet<String> = HashSet::new();
    let mut pending = Vec::new();
    for dir in source_dirs {
        let mut names: Vec<String> = existing_outputs(dir).into_iter().collect();
        names.sort();
        for name in names {
            if done.contains(&name) || !seen.insert(name.clone()) {
                continue;
            }
            pending.push(dir.join(format!("{name}.md")));
        }
    }
    pending.sort_by_key(|p| p.file_name().map(|n| n.to_os_string()));
    pending
}

/// Enhance one file into `out_dir`, writing atomically (temp + rename).
pub async fn enhance_file(input: &Path, out_dir: &Path) -> CleanResult {
    let output = out_dir.join(input.file_name().unwrap_or_default());
    let mut result = CleanResult {
        input: input.to_path_buf(),
        output: output.clone(),
        success: false,
        original_len: 0,
        cleaned_len: 0,
        error: None,
    };

    let raw = match tokio::fs::read_to_string(input).await {
        Ok(raw) => raw,
        Err(e) => {
            result.error = Some(file_error("read failed", input, &e));
            return result;
        }
    };
    let cleaned = enhance_markdown(&raw);
    result.original_len = raw.chars().count();
    result.cleaned_len = cleaned.chars().count();

    let tmp = output.with_extension("md.tmp");
    if let Err(e) = tokio::fs::write(&tmp, &cleaned).await {
        result.error = Some(file_error("write failed", &tmp, &e));
        return result;
    }
    if let Err(e) = tokio::fs::rename(&tmp, &output).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        result.error = Some(file_error("rename failed", &output, &e));
        return result;
    }
    result.success = true;
    result
}

fn file_error(op: &'static str, path: &Path, e: &std::io::Error) -> String {
    DocumentError::File {
        op,
        path: path.to_path_buf(),
        detail: e.to_string(),
    }
    .to_string()
}

/// Enhance `inputs` into `out_dir` with at most `concurrency` files in flight.
pub async fn enhance_files(
    inputs: Vec<PathBuf>,
    out_dir: &Path,
    concurrency: usize,
    progress: &dyn PipelineProgress,
) -> Vec<CleanResult> {
    stream::iter(inputs)
        .map(|input| async move {
            let result = enhance_file(&input, out_dir).await;
            let name = display_name(&input);
            if result.success {
                debug!(
                    "Enhanced {} ({} → {} chars)",
                    name, result.original_len, result.cleaned_len
                );
                progress.on_item_complete(StageKind::Enhance, &name, result.cleaned_len);
            } else {
                let err = result.error.as_deref().unwrap_or("unknown error");
                warn!("Enhancement failed for {}: {}", name, err);
                progress.on_item_error(StageKind::Enhance, &name, err);
            }
            result
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopProgress;

    #[test]
    fn chuong_becomes_h2() {
        assert_eq!(enhance_markdown("Chương 2"), "## Chương 2");
    }

    #[test]
    fn bold_dieu_becomes_h4() {
        assert_eq!(
            enhance_markdown("**Điều 5. Tên điều**"),
            "#### Điều 5. Tên điều"
        );
    }

    #[test]
    fn regular_bold_unchanged() {
        assert_eq!(
            enhance_markdown("**some regular text**"),
            "**some regular text**"
        );
    }

    #[test]
    fn bare_page_number_removed() {
        assert_eq!(enhance_markdown("42"), "");
    }

    #[test]
    fn sentence_with_number_unchanged() {
        assert_eq!(
            enhance_markdown("Page 42 of the book"),
            "Page 42 of the book"
        );
    }

    #[test]
    fn heading_levels_by_keyword() {
        let input = "PHẦN THỨ NHẤT\n\nPHAN II\n\nMục 1\n\nTiểu mục 2\n\nCHUONG IV\n\nĐIỀU 10.";
        let out = enhance_markdown(input);
        let lines: Vec<&str> = out.lines().filter(|l| !l.is_empty()).collect();
        assert_eq!(
            lines,
            vec![
                "# PHẦN THỨ NHẤT",
                "# PHAN II",
                "### Mục 1",
                "### Tiểu mục 2",
                "## CHUONG IV",
                "#### ĐIỀU 10.",
            ]
        );
    }

    #[test]
    fn lowercase_ascii_keyword_not_promoted() {
        assert_eq!(enhance_markdown("muc 3 cua van ban"), "muc 3 cua van ban");
        assert_eq!(enhance_markdown("Chương trình học"), "Chương trình học");
    }

    #[test]
    fn header_table_at_top_removed() {
        let input = "| BỘ TƯ PHÁP | CỘNG HÒA XÃ HỘI CHỦ NGHĨA VIỆT NAM |\n| --- | --- |\n| Số: 12 | Độc lập |\n\nNội dung chính";
        assert_eq!(enhance_markdown(input), "Nội dung chính");
    }

    #[test]
    fn table_after_line_ten_kept() {
        let mut input = String::new();
        for i in 0..12 {
            input.push_str(&format!("Dòng văn bản số {i}\n"));
        }
        input.push_str("| A | B |\n| --- | --- |\n| 1 | 2 |");
        let out = enhance_markdown(&input);
        assert!(out.contains("| A | B |"));
        assert!(out.contains("| 1 | 2 |"));
    }

    #[test]
    fn content_table_below_header_table_survives() {
        let mut input = String::from("| BỘ TƯ PHÁP | CỘNG HÒA |\n| --- | --- |\n");
        for i in 0..9 {
            input.push_str(&format!("Dòng văn bản số {i}\n"));
        }
        input.push_str("| Cột A | Cột B |\n| --- | --- |\n| 1 | 2 |");
        let out = enhance_markdown(&input);
        assert!(!out.contains("BỘ TƯ PHÁP"));
        assert!(out.starts_with("Dòng văn bản số 0"));
        assert!(out.contains("| Cột A | Cột B |\n| --- | --- |\n| 1 | 2 |"), "got: {out}");
        assert_eq!(enhance_markdown(&out), out);
    }

    #[test]
    fn only_leading_tables_are_headers() {
        let input = "| h | h |\n| --- | --- |\n\n| k | k |\n| --- | --- |\nMở đầu\n| x | y |\n| --- | --- |\nGiữa\n| z | w |\n| --- | --- |";
        assert_eq!(
            enhance_markdown(input),
            "Mở đầu\n| x | y |\n| --- | --- |\nGiữa\n| z | w |\n| --- | --- |"
        );
    }

    #[test]
    fn blank_lines_collapse_to_two() {
        assert_eq!(enhance_markdown("a\n\n\n\n\nb"), "a\n\nb");
        assert_eq!(enhance_markdown("a\n\n\n\nb"), "a\n\nb");
    }

    #[test]
    fn noise_lines_and_control_chars() {
        let input = "Text\u{0007} here  with   spaces\n-----\n** **\n____\n\tTabbed\r";
        assert_eq!(enhance_markdown(input), "Text here with spaces\n\nTabbed");
    }

    #[test]
    fn html_input_is_converted() {
        let out = enhance_markdown("<p><b>Điều 3. Phạm vi</b></p><p>Nội&nbsp;dung</p>");
        assert!(out.starts_with("#### Điều 3. Phạm vi"), "got: {out}");
        assert!(out.ends_with("Nội dung"));
    }

    #[test]
    fn enhancement_is_idempotent() {
        let samples = [
            "| a | b |\n| --- | --- |\n\n| c | d |\n| --- | --- |\ntext\n\n\n\n12\n**Chương 1**",
            "<h1>Title</h1><table><tr><td>x</td><td>y</td></tr><tr><td>1</td><td>2</td></tr></table>",
            "  Mục  2  \n\n\n\n---\nĐiều 7 Nghĩa vụ\n\u{0001}",
            "",
        ];
        for s in samples {
            let once = enhance_markdown(s);
            assert_eq!(enhance_markdown(&once), once, "not idempotent for {s:?}");
        }
    }

    #[tokio::test]
    async fn stage_enhances_only_missing_outputs() {
        let raw = tempfile::tempdir().unwrap();
        let ocr = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::write(raw.path().join("a.md"), "Chương 1\n\n\n\nNội dung").unwrap();
        std::fs::write(raw.path().join("b.md"), "old").unwrap();
        std::fs::write(raw.path().join("b.md.tmp"), "partial").unwrap();
        std::fs::write(ocr.path().join("c.md"), "42\nOCR text").unwrap();
        std::fs::write(out.path().join("b.md"), "already enhanced").unwrap();

        let pending = pending_sources(&[raw.path(), ocr.path()], out.path());
        let names: Vec<_> = pending.iter().map(|p| display_name(p)).collect();
        assert_eq!(names, vec!["a.md", "c.md"]);

        let results = enhance_files(pending, out.path(), 4, &NoopProgress).await;
        assert!(results.iter().all(|r| r.success));
        assert_eq!(
            std::fs::read_to_string(out.path().join("a.md")).unwrap(),
            "## Chương 1\n\nNội dung"
        );
        assert_eq!(
            std::fs::read_to_string(out.path().join("c.md")).unwrap(),
            "OCR text"
        );
        assert_eq!(
            std::fs::read_to_string(out.path().join("b.md")).unwrap(),
            "already enhanced"
        );
        assert!(!out.path().join("a.md.tmp").exists());
    }

    #[tokio::test]
    async fn unreadable_input_is_a_failed_result() {
        let out = tempfile::tempdir().unwrap();
        let r = enhance_file(&out.path().join("missing.md"), out.path()).await;
        assert!(!r.success);
        let err = r.error.unwrap();
        assert!(err.starts_with("read failed '"), "got: {err}");
        assert!(err.contains("missing.md"), "got: {err}");
    }
}
