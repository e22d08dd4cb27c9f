use std::path::{Path, PathBuf};

use glob::Pattern;

use crate::error::{Result, SopsError};

/// Expand `pattern` relative to `repo_path` into the sorted list of matching files.
///
/// The repository root is escaped so that glob metacharacters in its path are
/// taken literally. Directories are skipped.
pub fn expand_glob(repo_path: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let root = Pattern::escape(&repo_path.to_string_lossy());
    let full = format!(
        "{}/{}",
        root.trim_end_matches('/'),
        pattern.trim_start_matches('/')
    );

    let entries = glob::glob(&full).map_err(|source| SopsError::Glob {
        pattern: pattern.to_string(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| {
            let relative = e.path().strip_prefix(repo_path).unwrap_or(e.path()).to_path_buf();
            SopsError::from(std::io::Error::from(e)).in_file("expand glob", relative)
        })?;
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}
