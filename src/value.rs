//! Sources for the value written by an update.
//!
//! A [`Valuer`] is asked once per update, before any file is read, and the
//! result is reused for every matched file and branch.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, SopsError};

pub trait Valuer {
    fn value(&self, repo_path: &Path) -> Result<String>;
}

impl<F> Valuer for F
where
    F: Fn(&Path) -> Result<String>,
{
    fn value(&self, repo_path: &Path) -> Result<String> {
        self(repo_path)
    }
}

/// A literal value.
#[derive(Debug, Clone)]
pub struct StaticValue(pub String);

impl Valuer for StaticValue {
    fn value(&self, _repo_path: &Path) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Contents of a file, relative to the repository root unless absolute.
/// Trailing whitespace is stripped.
#[derive(Debug, Clone)]
pub struct FileValue(pub PathBuf);

impl Valuer for FileValue {
    fn value(&self, repo_path: &Path) -> Result<String> {
        let path = repo_path.join(&self.0);
        let contents = fs::read_to_string(&path)
            .map_err(|e| SopsError::Value(format!("{}: {e}", path.display())))?;
        Ok(contents.trim_end().to_string())
    }
}

/// Contents of an environment variable.
#[derive(Debug, Clone)]
pub struct EnvValue(pub String);

impl Valuer for EnvValue {
    fn value(&self, _repo_path: &Path) -> Result<String> {
        env::var(&self.0).map_err(|e| SopsError::Value(format!("{}: {e}", self.0)))
    }
}
