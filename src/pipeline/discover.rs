//! Input discovery, output naming, and the resume index.
//!
//! Output names are a pure function of the input path relative to the input
//! directory, so a restarted run computes the same names and can tell what is
//! already done just by listing the output directory.

use crate::error::PipelineError;
use crate::output::ConversionResult;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Supported input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocKind {
    Pdf,
    Doc,
    Docx,
}

impl DocKind {
    /// Match a file extension, ignoring case.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(DocKind::Pdf),
            "doc" => Some(DocKind::Doc),
            "docx" => Some(DocKind::Docx),
            _ => None,
        }
    }
}

/// One discovered input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub kind: DocKind,
    pub size: u64,
}

/// Recursively list every PDF, DOC and DOCX under `input_dir`, sorted by path.
///
/// Office lock files (`~$name.docx`) are skipped. Unreadable subdirectories
/// are logged and skipped; only an unreadable root is an error.
pub fn discover_documents(input_dir: &Path) -> Result<Vec<SourceDocument>, PipelineError> {
    let mut docs = Vec::new();
    for entry in WalkDir::new(input_dir).follow_links(true) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) if e.depth() == 0 => {
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
                return Err(PipelineError::io(input_dir, source));
            }
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if entry.file_name().to_string_lossy().starts_with("~$") {
            continue;
        }
        let Some(kind) = DocKind::from_path(path) else {
            continue;
        };
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        docs.push(SourceDocument {
            path: path.to_path_buf(),
            kind,
            size,
        });
    }

    // Sort for deterministic ordering
    docs.sort_by(|a, b| a.path.cmp(&b.path));
    debug!("Discovered {} documents under {}", docs.len(), input_dir.display());
    Ok(docs)
}

/// Deterministic output name (without `.md`) for an input file.
///
/// `base/a/b/c.pdf` → `a--b--c`. A path outside `base` falls back to its file
/// stem.
pub fn to_output_name(path: &Path, base: &Path) -> String {
    match path.strip_prefix(base) {
        Ok(rel) if rel.file_name().is_some() => rel
            .with_extension("")
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("--"),
        _ => file_stem(path),
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Output file for an input file inside `out_dir`.
pub fn output_path(path: &Path, base: &Path, out_dir: &Path) -> PathBuf {
    out_dir.join(format!("{}.md", to_output_name(path, base)))
}

/// Names (without `.md`) of every markdown file already in `dir`.
///
/// A missing or unreadable directory means nothing is done yet.
pub fn existing_outputs(dir: &Path) -> HashSet<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return HashSet::new();
    };
    entries
        .filter_map(Result::ok)
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            name.strip_suffix(".md").map(str::to_string)
        })
        .collect()
}

/// A document still waiting for conversion, paired with its target file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDocument {
    pub doc: SourceDocument,
    pub output: PathBuf,
}

/// Split `docs` into already-converted results and pending work.
pub fn partition_pending(
    docs: &[SourceDocument],
    base: &Path,
    out_dir: &Path,
) -> (Vec<ConversionResult>, Vec<PendingDocument>) {
    let existing = existing_outputs(out_dir);
    let mut done = Vec::new();
    let mut pending = Vec::new();
    for doc in docs {
        let name = to_output_name(&doc.path, base);
        let output = out_dir.join(format!("{name}.md"));
        if existing.contains(&name) {
            done.push(ConversionResult::resumed(doc.path.clone(), output));
        } else {
            pending.push(PendingDocument {
                doc: doc.clone(),
                output,
            });
        }
    }
    (done, pending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn nested_path_joins_with_double_dash() {
        let base = Path::new("/data");
        assert_eq!(
            to_output_name(Path::new("/data/luat/2024/nghi-dinh.pdf"), base),
            "luat--2024--nghi-dinh"
        );
    }

    #[test]
    fn top_level_file_is_its_stem() {
        assert_eq!(to_output_name(Path::new("/data/a.b.docx"), Path::new("/data")), "a.b");
    }

    #[test]
    fn outside_base_falls_back_to_stem() {
        assert_eq!(
            to_output_name(Path::new("/elsewhere/x/report.pdf"), Path::new("/data")),
            "report"
        );
    }

    #[test]
    fn extension_match_ignores_case() {
        assert_eq!(DocKind::from_path(Path::new("A.PDF")), Some(DocKind::Pdf));
        assert_eq!(DocKind::from_path(Path::new("b.DocX")), Some(DocKind::Docx));
        assert_eq!(DocKind::from_path(Path::new("c.txt")), None);
        assert_eq!(DocKind::from_path(Path::new("noext")), None);
    }

    #[test]
    fn discovery_is_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/z.pdf"), b"x").unwrap();
        fs::write(dir.path().join("b.DOC"), b"x").unwrap();
        fs::write(dir.path().join("a.docx"), b"x").unwrap();
        fs::write(dir.path().join("~$a.docx"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let docs = discover_documents(dir.path()).unwrap();
        let names: Vec<_> = docs
            .iter()
            .map(|d| to_output_name(&d.path, dir.path()))
            .collect();
        assert_eq!(names, vec!["a", "b", "sub--z"]);
        assert_eq!(docs[1].kind, DocKind::Doc);
    }

    #[test]
    fn missing_output_dir_means_nothing_done() {
        assert!(existing_outputs(Path::new("/no/such/dir")).is_empty());
    }

    #[test]
    fn partition_reports_existing_as_resumed() {
        let input = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        fs::write(out.path().join("done.md"), "x").unwrap();
        fs::write(out.path().join("ignored.txt"), "x").unwrap();
        let docs = vec![
            SourceDocument {
                path: input.path().join("done.pdf"),
                kind: DocKind::Pdf,
                size: 1,
            },
            SourceDocument {
                path: input.path().join("todo.docx"),
                kind: DocKind::Docx,
                size: 1,
            },
        ];
        let (done, pending) = partition_pending(&docs, input.path(), out.path());
        assert_eq!(done.len(), 1);
        assert!(done[0].resumed && done[0].success);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].output, out.path().join("todo.md"));
    }
}
