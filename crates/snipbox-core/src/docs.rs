//! Substring search over local documentation.
//!
//! Walks a folder recursively and reports lines of `*.md` / `*.txt` files
//! that contain the query, case-insensitively. Files are visited in sorted
//! order so results are stable.

use std::fmt;
use std::path::{Path, PathBuf};

/// Default cap on returned lines.
pub const DEFAULT_MAX_RESULTS: usize = 5;

const DOC_EXTENSIONS: [&str; 2] = ["md", "txt"];

/// Errors from documentation search.
#[derive(Debug, thiserror::Error)]
pub enum DocSearchError {
    #[error("docs folder not found: {0}")]
    FolderNotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One matching line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocMatch {
    pub file_name: String,
    pub line: String,
}

impl fmt::Display for DocMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.file_name, self.line)
    }
}

/// Search `folder` for `query`, returning at most `max_results` lines.
pub fn search_docs(
    folder: &Path,
    query: &str,
    max_results: usize,
) -> Result<Vec<DocMatch>, DocSearchError> {
    if !folder.is_dir() {
        return Err(DocSearchError::FolderNotFound(folder.display().to_string()));
    }

    let needle = query.to_lowercase();
    let mut results = Vec::new();

    for path in doc_files(folder)? {
        if results.len() >= max_results {
            break;
        }
        let bytes = std::fs::read(&path)?;
        let text = String::from_utf8_lossy(&bytes);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        for line in text.lines() {
            if line.to_lowercase().contains(&needle) {
                results.push(DocMatch {
                    file_name: file_name.clone(),
                    line: line.trim().to_string(),
                });
                if results.len() >= max_results {
                    break;
                }
            }
        }
    }

    Ok(results)
}

/// Recursively collect doc files, sorted by path.
///
/// Symlinked directories are not descended into; symlinked files are kept.
fn doc_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = std::fs::read_dir(dir)?
        .map(|entry| entry.and_then(|e| Ok((e.path(), e.file_type()?))))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut files = Vec::new();
    for (path, file_type) in entries {
        if file_type.is_dir() {
            files.extend(doc_files(&path)?);
        } else if file_type.is_symlink() && path.is_dir() {
            continue;
        } else if is_doc_file(&path) {
            files.push(path);
        }
    }
    Ok(files)
}

fn is_doc_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| DOC_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_finds_lines_case_insensitively() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("guide.md"),
            "# Guide\nUse Pandas for tables\nnothing here\n",
        )
        .unwrap();

        let hits = search_docs(dir.path(), "pandas", DEFAULT_MAX_RESULTS).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].to_string(), "guide.md: Use Pandas for tables");
    }

    #[test]
    fn test_recurses_and_skips_other_extensions() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("api");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("ref.txt"), "  docker exec runs commands  \n").unwrap();
        std::fs::write(dir.path().join("script.py"), "# docker\n").unwrap();

        let hits = search_docs(dir.path(), "DOCKER", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_name, "ref.txt");
        assert_eq!(hits[0].line, "docker exec runs commands");
    }

    #[test]
    fn test_respects_max_results() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "x1\nx2\nx3\n").unwrap();
        std::fs::write(dir.path().join("b.md"), "x4\n").unwrap();

        let hits = search_docs(dir.path(), "x", 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[1].line, "x2");
    }

    #[test]
    fn test_missing_folder() {
        let err = search_docs(Path::new("/no/such/docs"), "x", 5).unwrap_err();
        assert!(matches!(err, DocSearchError::FolderNotFound(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_directory_cycle_is_not_followed() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "needle here\n").unwrap();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("loop")).unwrap();

        let hits = search_docs(dir.path(), "needle", 1000).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_name, "a.md");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_file_is_searched() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("real");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("notes.txt"), "needle\n").unwrap();
        let docs = dir.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        std::os::unix::fs::symlink(target.join("notes.txt"), docs.join("linked.txt")).unwrap();

        let hits = search_docs(&docs, "needle", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_name, "linked.txt");
    }

    #[test]
    fn test_invalid_utf8_is_tolerated() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("bin.txt"), b"ok \xff match\n").unwrap();
        let hits = search_docs(dir.path(), "match", 5).unwrap();
        assert_eq!(hits.len(), 1);
    }
}
