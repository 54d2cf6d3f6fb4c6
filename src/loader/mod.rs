#[cfg(test)]
mod tests;

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use fancy_regex::Regex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::RagError;

static BLANK_LINES_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*(?:\n[ \t]*)+").expect("valid regex"));
static INLINE_SPACE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]{2,}").expect("valid regex"));

/// Supported source formats, in load order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DocumentKind {
    Pdf,
    Text,
}

impl DocumentKind {
    pub const ALL: [Self; 2] = [Self::Pdf, Self::Text];

    #[inline]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Text => "txt",
        }
    }

    /// Kind of `path` judged by its extension, ignoring case
    #[inline]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        Self::ALL
            .into_iter()
            .find(|kind| ext.eq_ignore_ascii_case(kind.extension()))
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pdf => write!(f, "PDF"),
            Self::Text => write!(f, "TXT"),
        }
    }
}

/// Raw text of one source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub source: PathBuf,
    pub kind: DocumentKind,
    pub text: String,
}

/// A file that could not be read or removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// A whole loader that could not run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindFailure {
    pub kind: DocumentKind,
    pub reason: String,
}

/// Everything `load_documents` found, plus what it could not load
#[derive(Debug, Default)]
pub struct LoadReport {
    pub documents: Vec<Document>,
    pub file_failures: Vec<FileFailure>,
    pub kind_failures: Vec<KindFailure>,
    /// Files read successfully but holding no text
    pub skipped_empty: Vec<PathBuf>,
}

impl LoadReport {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    #[inline]
    pub fn failure_count(&self) -> usize {
        self.file_failures.len() + self.kind_failures.len()
    }
}

/// Outcome of one kind's loader
#[derive(Debug, Default)]
struct KindLoad {
    documents: Vec<Document>,
    file_failures: Vec<FileFailure>,
    skipped_empty: Vec<PathBuf>,
}

/// Load every PDF and TXT file below `dir`.
///
/// A missing directory yields an empty report. Failures are collected, never
/// propagated: one bad file or kind does not prevent the others from loading.
#[inline]
pub fn load_documents(dir: &Path) -> LoadReport {
    let mut report = LoadReport::default();

    if !dir.is_dir() {
        info!("Document directory {} does not exist", dir.display());
        return report;
    }

    for kind in DocumentKind::ALL {
        match load_kind(dir, kind) {
            Ok(loaded) => {
                debug!("Loaded {} {} documents", loaded.documents.len(), kind);
                report.documents.extend(loaded.documents);
                report.file_failures.extend(loaded.file_failures);
                report.skipped_empty.extend(loaded.skipped_empty);
            }
            Err(reason) => {
                warn!("{} loader failed: {}", kind, reason);
                report.kind_failures.push(KindFailure { kind, reason });
            }
        }
    }

    for failure in &report.file_failures {
        warn!("Could not load {}: {}", failure.path.display(), failure.reason);
    }

    info!(
        "Loaded {} documents from {} ({} failures, {} empty)",
        report.documents.len(),
        dir.display(),
        report.failure_count(),
        report.skipped_empty.len()
    );

    report
}

fn load_kind(dir: &Path, kind: DocumentKind) -> Result<KindLoad, String> {
    let (paths, mut file_failures) = discover(dir, Some(kind))?;
    let mut loaded = KindLoad::default();

    for path in paths {
        let text = match kind {
            DocumentKind::Pdf => read_pdf(&path),
            DocumentKind::Text => read_text(&path),
        };

        match text {
            Ok(text) if text.trim().is_empty() => {
                warn!("Skipping {}: no text content", path.display());
                loaded.skipped_empty.push(path);
            }
            Ok(text) => loaded.documents.push(Document {
                source: path,
                kind,
                text,
            }),
            Err(reason) => file_failures.push(FileFailure { path, reason }),
        }
    }

    loaded.file_failures = file_failures;
    Ok(loaded)
}

/// Supported files below `dir`, sorted by path.
///
/// An unreadable root is an error; unreadable entries below it are reported
/// as file failures.
fn discover(
    dir: &Path,
    kind: Option<DocumentKind>,
) -> Result<(Vec<PathBuf>, Vec<FileFailure>), String> {
    let mut paths = Vec::new();
    let mut failures = Vec::new();

    for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
        match entry {
            Ok(entry) => {
                if !entry.file_type().is_file() {
                    continue;
                }
                let Some(found) = DocumentKind::from_path(entry.path()) else {
                    continue;
                };
                if kind.is_none_or(|k| k == found) {
                    paths.push(entry.into_path());
                }
            }
            Err(err) if err.depth() == 0 => {
                return Err(format!("cannot read {}: {err}", dir.display()));
            }
            Err(err) => failures.push(FileFailure {
                path: err.path().map(Path::to_path_buf).unwrap_or_default(),
                reason: err.to_string(),
            }),
        }
    }

    paths.sort();
    Ok((paths, failures))
}

fn read_pdf(path: &Path) -> Result<String, String> {
    debug!("Extracting text from PDF {}", path.display());

    // pdf-extract panics on some malformed files
    let extracted = panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text(path)))
        .map_err(|_| "PDF parser panicked".to_string())?
        .map_err(|e| format!("failed to extract PDF text: {e}"))?;

    Ok(normalize_whitespace(&extracted))
}

fn read_text(path: &Path) -> Result<String, String> {
    debug!("Reading text file {}", path.display());

    let bytes = fs::read(path).map_err(|e| format!("failed to read file: {e}"))?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(err) => {
            warn!(
                "{} is not valid UTF-8; invalid bytes were replaced",
                path.display()
            );
            Ok(String::from_utf8_lossy(err.as_bytes()).into_owned())
        }
    }
}

/// Collapse the whitespace noise PDF extraction leaves behind
pub(crate) fn normalize_whitespace(text: &str) -> String {
    let text = text.replace('\r', "");
    let text = BLANK_LINES_REGEX.replace_all(&text, "\n\n");
    let text = INLINE_SPACE_REGEX.replace_all(&text, " ");
    text.trim().to_string()
}

/// Number of supported files below `dir`
#[inline]
pub fn count_documents(dir: &Path) -> usize {
    if !dir.is_dir() {
        return 0;
    }
    discover(dir, None).map_or(0, |(paths, _)| paths.len())
}

/// Files copied by `add_documents`, and those refused for their extension
#[derive(Debug, Default, PartialEq, Eq)]
pub struct AddReport {
    pub added: Vec<PathBuf>,
    /// Files that already are the document of the same name; left untouched
    pub already_present: Vec<PathBuf>,
    pub rejected: Vec<PathBuf>,
}

/// Copy supported files into `dir`, replacing files of the same name
#[inline]
pub fn add_documents(files: &[PathBuf], dir: &Path) -> crate::Result<AddReport> {
    fs::create_dir_all(dir).map_err(|e| RagError::from_io(e, dir))?;

    let mut report = AddReport::default();
    for file in files {
        let Some(name) = file.file_name() else {
            report.rejected.push(file.clone());
            continue;
        };
        if DocumentKind::from_path(file).is_none() || !file.is_file() {
            warn!("Not adding {}: only PDF and TXT files are supported", file.display());
            report.rejected.push(file.clone());
            continue;
        }

        let target = dir.join(name);
        if is_same_file(file, &target) {
            debug!("{} is already in {}", file.display(), dir.display());
            report.already_present.push(target);
            continue;
        }
        fs::copy(file, &target).map_err(|e| RagError::from_io(e, &target))?;
        info!("Added {} as {}", file.display(), target.display());
        report.added.push(target);
    }

    Ok(report)
}

fn is_same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Entries removed by `clear_documents`
#[derive(Debug, Default)]
pub struct ClearReport {
    pub removed: usize,
    pub failures: Vec<FileFailure>,
}

/// Remove everything inside `dir`, keeping the directory itself
#[inline]
pub fn clear_documents(dir: &Path) -> ClearReport {
    let mut report = ClearReport::default();

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return report,
        Err(err) => {
            report.failures.push(FileFailure {
                path: dir.to_path_buf(),
                reason: err.to_string(),
            });
            return report;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                report.failures.push(FileFailure {
                    path: dir.to_path_buf(),
                    reason: err.to_string(),
                });
                continue;
            }
        };

        let path = entry.path();
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };

        match removed {
            Ok(()) => {
                debug!("Removed {}", path.display());
                report.removed += 1;
            }
            Err(err) => {
                warn!("Failed to remove {}: {}", path.display(), err);
                report.failures.push(FileFailure {
                    path,
                    reason: err.to_string(),
                });
            }
        }
    }

    report
}
