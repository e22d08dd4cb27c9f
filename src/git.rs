use crate::error::{Result, SopsError};
use git2::Repository;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct GitRepo {
    repo: Repository,
}

impl GitRepo {
    /// Open the repository containing the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let repo = Repository::discover(path).map_err(|_| SopsError::NotInGitRepo)?;
        Ok(Self { repo })
    }

    /// Get the git directory path
    pub fn git_dir(&self) -> &Path {
        self.repo.path()
    }

    /// Get repository root path
    pub fn workdir(&self) -> Result<&Path> {
        self.repo.workdir().ok_or(SopsError::Config(
            "Repository has no working directory".into(),
        ))
    }
}

/// The directory updates are rooted at: `explicit` if given, otherwise the
/// working directory of the repository enclosing the current directory.
pub fn resolve_repo_root(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    let repo = GitRepo::open(".")?;
    let root = repo.workdir()?.to_path_buf();
    debug!(root = %root.display(), git_dir = %repo.git_dir().display(), "Discovered repository");
    Ok(root)
}
