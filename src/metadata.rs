//! The `sops` section stored alongside the encrypted content.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SopsError};

/// Key name of the metadata section inside every encrypted document.
pub const METADATA_KEY: &str = "sops";

pub const DEFAULT_UNENCRYPTED_SUFFIX: &str = "_unencrypted";

/// Encryption metadata of a document.
///
/// The data key itself never appears here in clear: every recipient holds
/// its own wrapped copy in [`AgeKey::enc`]. Fields this crate does not act
/// on (other key groups such as `pgp` or `kms`, `shamir_threshold`, ...) are
/// kept in [`Metadata::extra`] and written back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub age: Vec<AgeKey>,

    /// RFC 3339 timestamp of the last encryption, also used as MAC AAD.
    pub lastmodified: String,

    /// Encrypted MAC over all plaintext values.
    pub mac: String,

    /// Values under keys ending with this suffix are stored in clear.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unencrypted_suffix: Option<String>,

    /// Only values under keys ending with this suffix are encrypted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_suffix: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unencrypted_regex: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_regex: Option<String>,

    pub version: String,

    #[serde(flatten)]
    pub extra: serde_yaml::Mapping,
}

/// An age recipient and its wrapped copy of the data key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeKey {
    pub recipient: String,
    /// ASCII-armored age ciphertext of the data key.
    pub enc: String,
}

impl Metadata {
    /// Metadata for a brand new document; MAC and timestamp are filled in on encryption.
    pub fn new(age: Vec<AgeKey>) -> Self {
        Self {
            age,
            lastmodified: String::new(),
            mac: String::new(),
            unencrypted_suffix: Some(DEFAULT_UNENCRYPTED_SUFFIX.into()),
            encrypted_suffix: None,
            unencrypted_regex: None,
            encrypted_regex: None,
            version: env!("CARGO_PKG_VERSION").into(),
            extra: serde_yaml::Mapping::new(),
        }
    }

    /// The rules deciding which values are stored encrypted.
    ///
    /// With no selector set, the default unencrypted suffix applies.
    pub fn encryption_rules(&self) -> Result<EncryptionRules> {
        let set = |field: &Option<String>| field.clone().filter(|s| !s.is_empty());
        let compile = |field: &Option<String>| {
            set(field)
                .map(|pattern| {
                    Regex::new(&pattern)
                        .map_err(|e| SopsError::Parse(format!("invalid regex '{pattern}': {e}")))
                })
                .transpose()
        };

        let mut rules = EncryptionRules {
            unencrypted_suffix: set(&self.unencrypted_suffix),
            encrypted_suffix: set(&self.encrypted_suffix),
            unencrypted_regex: compile(&self.unencrypted_regex)?,
            encrypted_regex: compile(&self.encrypted_regex)?,
        };
        if rules.unencrypted_suffix.is_none()
            && rules.encrypted_suffix.is_none()
            && rules.unencrypted_regex.is_none()
            && rules.encrypted_regex.is_none()
        {
            rules.unencrypted_suffix = Some(DEFAULT_UNENCRYPTED_SUFFIX.into());
        }
        Ok(rules)
    }
}

/// Which values of a document are encrypted, judged by the keys on their path.
///
/// Selectors apply in field order and each later one overrides the verdict
/// of the earlier ones.
#[derive(Debug, Clone)]
pub struct EncryptionRules {
    unencrypted_suffix: Option<String>,
    encrypted_suffix: Option<String>,
    unencrypted_regex: Option<Regex>,
    encrypted_regex: Option<Regex>,
}

impl EncryptionRules {
    pub fn is_encrypted(&self, path: &[String]) -> bool {
        let mut encrypted = true;
        if let Some(suffix) = &self.unencrypted_suffix {
            if path.iter().any(|k| k.ends_with(suffix.as_str())) {
                encrypted = false;
            }
        }
        if let Some(suffix) = &self.encrypted_suffix {
            encrypted = path.iter().any(|k| k.ends_with(suffix.as_str()));
        }
        if let Some(re) = &self.unencrypted_regex {
            if path.iter().any(|k| re.is_match(k)) {
                encrypted = false;
            }
        }
        if let Some(re) = &self.encrypted_regex {
            encrypted = path.iter().any(|k| re.is_match(k));
        }
        encrypted
    }
}
