use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SopsError {
    #[error("missing {0} parameter")]
    MissingParameter(&'static str),

    #[error("failed to get value: {0}")]
    Value(String),

    #[error("failed to expand glob pattern {pattern}: {source}")]
    Glob {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse document: {0}")]
    Parse(String),

    #[error("failed to emit document: {0}")]
    Emit(String),

    #[error("document has no sops metadata")]
    MissingMetadata,

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("failed to get the data key, tried: {}", .attempts.join("; "))]
    NoDataKey { attempts: Vec<String> },

    #[error("MAC mismatch: computed {computed}, stored {stored}")]
    MacMismatch { computed: String, stored: String },

    #[error("age error: {0}")]
    Age(String),

    #[error("Invalid key format")]
    InvalidKeyFormat,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("Not in a git repository")]
    NotInGitRepo,

    #[error("failed to {action} {}: {source}", .path.display())]
    File {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: Box<SopsError>,
    },
}

impl SopsError {
    /// Attach the file being processed and the step that failed.
    pub fn in_file(self, action: &'static str, path: impl Into<PathBuf>) -> Self {
        SopsError::File {
            action,
            path: path.into(),
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, SopsError>;
