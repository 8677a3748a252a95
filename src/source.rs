//! File discovery and retrieval.
//!
//! The connector only talks to a [`FileSource`]; where the bytes live is up
//! to the implementation. [`LocalFileSource`] covers directories on disk and
//! [`MemoryFileSource`] holds documents in memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::RwLock;
use tracing::debug;

/// A listed file and its modification time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub modified: DateTime<Utc>,
}

#[derive(Debug)]
pub enum SourceError {
    /// Base path does not exist
    NotFound(String),
    /// Glob pattern could not be compiled
    Pattern { pattern: String, message: String },
    Io { path: String, source: std::io::Error },
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::NotFound(path) => write!(f, "Path not found: {}", path),
            SourceError::Pattern { pattern, message } => {
                write!(f, "Invalid file pattern '{}': {}", pattern, message)
            }
            SourceError::Io { path, source } => write!(f, "I/O error on {}: {}", path, source),
        }
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SourceError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Lists and reads source documents.
///
/// Implementations are called from blocking worker threads and must be
/// shareable across them.
pub trait FileSource: Send + Sync {
    /// List files under `base_path` whose names match the glob `pattern`.
    fn list_files(&self, base_path: &str, pattern: &str) -> Result<Vec<FileEntry>, SourceError>;

    /// Read a listed file's bytes.
    fn read_file(&self, path: &str) -> Result<Vec<u8>, SourceError>;
}

/// Files on the local filesystem, matched with `glob`.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSource;

impl LocalFileSource {
    pub fn new() -> Self {
        Self
    }
}

impl FileSource for LocalFileSource {
    fn list_files(&self, base_path: &str, pattern: &str) -> Result<Vec<FileEntry>, SourceError> {
        let base = Path::new(base_path);
        if !base.is_dir() {
            return Err(SourceError::NotFound(base_path.to_string()));
        }

        let full_pattern = format!(
            "{}/{}",
            glob::Pattern::escape(base_path.trim_end_matches('/')),
            pattern
        );
        let paths = glob::glob(&full_pattern).map_err(|e| SourceError::Pattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;

        let mut entries = Vec::new();
        for entry in paths {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    debug!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            let metadata = match path.metadata() {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    debug!(path = %path.display(), "Skipping file without metadata: {}", e);
                    continue;
                }
            };

            let modified = match metadata.modified() {
                Ok(time) => DateTime::<Utc>::from(time),
                Err(e) => {
                    debug!(path = %path.display(), "Skipping file without mtime: {}", e);
                    continue;
                }
            };

            entries.push(FileEntry {
                path: path.to_string_lossy().into_owned(),
                modified,
            });
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>, SourceError> {
        std::fs::read(path).map_err(|source| SourceError::Io {
            path: path.to_string(),
            source,
        })
    }
}

/// In-memory documents keyed by path.
#[derive(Debug, Default)]
pub struct MemoryFileSource {
    files: RwLock<BTreeMap<String, (DateTime<Utc>, Vec<u8>)>>,
}

impl MemoryFileSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a document.
    pub fn insert(&self, path: impl Into<String>, modified: DateTime<Utc>, bytes: impl Into<Vec<u8>>) {
        if let Ok(mut files) = self.files.write() {
            files.insert(path.into(), (modified, bytes.into()));
        }
    }

    pub fn remove(&self, path: &str) {
        if let Ok(mut files) = self.files.write() {
            files.remove(path);
        }
    }
}

impl FileSource for MemoryFileSource {
    fn list_files(&self, base_path: &str, pattern: &str) -> Result<Vec<FileEntry>, SourceError> {
        let matcher = glob::Pattern::new(pattern).map_err(|e| SourceError::Pattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        let prefix = format!("{}/", base_path.trim_end_matches('/'));
        let files = self
            .files
            .read()
            .map_err(|_| SourceError::NotFound(base_path.to_string()))?;

        Ok(files
            .iter()
            .filter_map(|(path, (modified, _))| {
                let name = path.strip_prefix(&prefix)?;
                matcher.matches(name).then(|| FileEntry {
                    path: path.clone(),
                    modified: *modified,
                })
            })
            .collect())
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>, SourceError> {
        let files = self
            .files
            .read()
            .map_err(|_| SourceError::NotFound(path.to_string()))?;
        files
            .get(path)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| SourceError::NotFound(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_local_source_lists_matching_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.xml"), "<session/>").unwrap();
        fs::write(dir.path().join("a.xml"), "<session/>").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();
        fs::create_dir(dir.path().join("nested.xml")).unwrap();

        let source = LocalFileSource::new();
        let base = dir.path().to_str().unwrap();
        let files = source.list_files(base, "*.xml").unwrap();

        let names: Vec<&str> = files
            .iter()
            .map(|f| Path::new(&f.path).file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.xml", "b.xml"]);

        let bytes = source.read_file(&files[0].path).unwrap();
        assert_eq!(bytes, b"<session/>");
    }

    #[test]
    fn test_local_source_missing_directory() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing");

        let err = LocalFileSource::new()
            .list_files(missing.to_str().unwrap(), "*.xml")
            .unwrap_err();
        assert!(matches!(err, SourceError::NotFound(_)));
    }

    #[test]
    fn test_local_source_read_missing_file() {
        let err = LocalFileSource::new().read_file("/nonexistent/file.xml").unwrap_err();
        assert!(matches!(err, SourceError::Io { .. }));
    }

    #[test]
    fn test_memory_source_filters_by_pattern() {
        let source = MemoryFileSource::new();
        let modified = Utc.timestamp_opt(100, 0).unwrap();
        source.insert("/in/a.xml", modified, "<a/>");
        source.insert("/in/b.txt", modified, "b");
        source.insert("/other/c.xml", modified, "<c/>");

        let files = source.list_files("/in", "*.xml").unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "/in/a.xml");
        assert_eq!(source.read_file("/in/a.xml").unwrap(), b"<a/>");

        source.remove("/in/a.xml");
        assert!(matches!(
            source.read_file("/in/a.xml"),
            Err(SourceError::NotFound(_))
        ));
    }
}
