//! Discovery of result files under the data directory.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use walkdir::{DirEntry, WalkDir};

/// Default file name convention: any `.json` file
pub const DEFAULT_FILE_PATTERN: &str = r"(?i)\.json$";

/// Errors that abort a whole scan
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    #[error("Data directory unavailable: {}: {reason}", .path.display())]
    DirectoryUnavailable { path: PathBuf, reason: String },
}

/// Enumerates candidate result files in deterministic order
#[derive(Debug, Clone)]
pub struct Scanner {
    pattern: Regex,
}

impl Default for Scanner {
    fn default() -> Self {
        Self {
            pattern: Regex::new(DEFAULT_FILE_PATTERN).expect("Invalid default file pattern"),
        }
    }
}

impl Scanner {
    pub fn new(pattern: Regex) -> Self {
        Self { pattern }
    }

    /// Build a scanner from a file name regex
    pub fn with_pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::new(Regex::new(pattern)?))
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Recursively list matching files under `root`, sorted by full path.
    ///
    /// Hidden files and directories are skipped. An unreadable subdirectory is
    /// logged and skipped; an unreadable root is a `DirectoryUnavailable` error.
    /// File contents are never opened.
    pub fn scan(&self, root: &Path) -> Result<Vec<PathBuf>, ScanError> {
        let unavailable = |reason: String| ScanError::DirectoryUnavailable {
            path: root.to_path_buf(),
            reason,
        };

        let metadata = fs::metadata(root).map_err(|e| unavailable(e.to_string()))?;
        if !metadata.is_dir() {
            return Err(unavailable("not a directory".to_string()));
        }
        // Probe readability up front; walkdir would only report it as an entry error
        fs::read_dir(root).map_err(|e| unavailable(e.to_string()))?;

        let mut files: Vec<PathBuf> = WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
            .filter_map(|entry| match entry {
                Ok(e) => Some(e),
                Err(e) => {
                    log::warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                e.file_name()
                    .to_str()
                    .map(|name| self.pattern.is_match(name))
                    .unwrap_or(false)
            })
            .map(DirEntry::into_path)
            .collect();

        files.sort_by(|a, b| a.as_os_str().cmp(b.as_os_str()));
        log::debug!("Scan of {} found {} result files", root.display(), files.len());
        Ok(files)
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

/// Scan with the default file pattern
pub fn scan(root: &Path) -> Result<Vec<PathBuf>, ScanError> {
    Scanner::default().scan(root)
}
