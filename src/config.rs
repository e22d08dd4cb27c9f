use std::env;
use std::path::{Path, PathBuf};

use config::{Config, File, FileFormat};
use serde::Deserialize;

use crate::error::{Result, SopsError};

pub const CONFIG_FILE: &str = ".sops-update.toml";
const ENV_PREFIX: &str = "SOPS_UPDATE_";

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Settings {
    #[serde(default)]
    pub age: AgeSettings,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AgeSettings {
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
    #[serde(default)]
    pub ssh_identity_file: Option<PathBuf>,
    /// Environment variable holding identities inline.
    #[serde(default = "default_identity_env")]
    pub identity_env: String,
}

impl Default for AgeSettings {
    fn default() -> Self {
        Self {
            identity_file: None,
            ssh_identity_file: None,
            identity_env: default_identity_env(),
        }
    }
}

fn default_identity_env() -> String {
    "SOPS_AGE_KEY".into()
}

impl Settings {
    /// Load `.sops-update.toml` from the repository root (if present), then
    /// apply `SOPS_UPDATE_*` environment overrides.
    pub fn load(repo_root: &Path) -> Result<Self> {
        let config_path = repo_root.join(CONFIG_FILE);

        let mut settings = if config_path.exists() {
            Config::builder()
                .add_source(File::new(
                    config_path
                        .to_str()
                        .ok_or_else(|| SopsError::Config("Invalid config path".into()))?,
                    FileFormat::Toml,
                ))
                .build()
                .and_then(|cfg| cfg.try_deserialize::<Settings>())
                .map_err(|err| SopsError::Config(format!("Failed to load config file: {err}")))?
        } else {
            Settings::default()
        };

        if let Ok(path) = env::var(format!("{ENV_PREFIX}AGE_IDENTITY_FILE")) {
            settings.age.identity_file = Some(path.into());
        }
        if let Ok(path) = env::var(format!("{ENV_PREFIX}SSH_IDENTITY_FILE")) {
            settings.age.ssh_identity_file = Some(path.into());
        }
        if let Ok(name) = env::var(format!("{ENV_PREFIX}AGE_IDENTITY_ENV")) {
            settings.age.identity_env = name;
        }

        Ok(settings)
    }
}
