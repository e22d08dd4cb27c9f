//! # Key Services
//!
//! A document's data key is never stored in clear. The metadata carries one
//! wrapped copy per recipient, and a [`KeyServiceClient`] is anything able to
//! unwrap one of those copies.
//!
//! [`AgeKeyService`] unwraps copies encrypted to age x25519 recipients and,
//! with the `ssh` feature, to SSH recipients. Identities are collected from:
//!
//! 1. The environment variable named by `age.identity_env` (default `SOPS_AGE_KEY`)
//! 2. The file named by `SOPS_AGE_KEY_FILE`
//! 3. `age.identity_file` from the settings
//! 4. `<config dir>/sops/age/keys.txt`
//! 5. `age.ssh_identity_file` or `SOPS_AGE_SSH_PRIVATE_KEY_FILE` (`ssh` feature)

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use age::armor::{ArmoredReader, ArmoredWriter, Format};
use tracing::{debug, trace, warn};

use crate::config::Settings;
use crate::crypto::DataKey;
use crate::error::{Result, SopsError};
use crate::metadata::AgeKey;

/// The data key is 32 bytes; anything much larger is not a data key.
const MAX_UNWRAPPED_KEY_SIZE: usize = 1024;

const AGE_KEY_FILE_ENV: &str = "SOPS_AGE_KEY_FILE";
#[cfg(feature = "ssh")]
const SSH_KEY_FILE_ENV: &str = "SOPS_AGE_SSH_PRIVATE_KEY_FILE";

/// Something that can recover a data key from its wrapped form.
pub trait KeyServiceClient {
    fn name(&self) -> &str;

    fn decrypt_data_key(&self, key: &AgeKey) -> Result<DataKey>;
}

/// Unwraps data keys with locally available age identities.
#[derive(Default)]
pub struct AgeKeyService {
    identities: Vec<Box<dyn age::Identity>>,
}

impl AgeKeyService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(mut self, identity: age::x25519::Identity) -> Self {
        self.identities.push(Box::new(identity));
        self
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Collect every identity reachable from the environment and settings.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let mut service = Self::new();

        if let Ok(contents) = std::env::var(&settings.age.identity_env) {
            debug!(env = %settings.age.identity_env, "Loading age identities from environment");
            service.extend(parse_age_identities(&contents)?);
        }

        let mut files: Vec<PathBuf> = Vec::new();
        if let Ok(path) = std::env::var(AGE_KEY_FILE_ENV) {
            files.push(path.into());
        }
        if let Some(path) = &settings.age.identity_file {
            files.push(path.clone());
        }
        for path in &files {
            service.extend(load_identity_file(path)?);
        }

        if let Some(path) = default_identity_path().filter(|p| p.exists()) {
            service.extend(load_identity_file(&path)?);
        }

        #[cfg(feature = "ssh")]
        {
            let ssh_file = std::env::var(SSH_KEY_FILE_ENV)
                .ok()
                .map(PathBuf::from)
                .or_else(|| settings.age.ssh_identity_file.clone());
            if let Some(path) = ssh_file {
                service.identities.push(ssh::load_identity(&path)?);
            }
        }

        if service.is_empty() {
            warn!("No age identities found; decryption will fail");
        }
        Ok(service)
    }

    fn extend(&mut self, identities: Vec<age::x25519::Identity>) {
        self.identities
            .extend(identities.into_iter().map(|i| Box::new(i) as Box<dyn age::Identity>));
    }
}

impl KeyServiceClient for AgeKeyService {
    fn name(&self) -> &str {
        "age"
    }

    fn decrypt_data_key(&self, key: &AgeKey) -> Result<DataKey> {
        if self.identities.is_empty() {
            return Err(SopsError::Age("no identities available".into()));
        }

        let decryptor = age::Decryptor::new_buffered(ArmoredReader::new(key.enc.as_bytes()))
            .map_err(|e| SopsError::Age(format!("failed to parse age ciphertext: {e}")))?;

        if decryptor.is_scrypt() {
            return Err(SopsError::Age(
                "passphrase-encrypted data keys are not supported".into(),
            ));
        }

        let mut reader = decryptor
            .decrypt(self.identities.iter().map(|i| i.as_ref() as &dyn age::Identity))
            .map_err(|e| SopsError::Age(format!("age decryption failed: {e}")))?;

        let mut plaintext = Vec::new();
        reader
            .by_ref()
            .take(MAX_UNWRAPPED_KEY_SIZE as u64 + 1)
            .read_to_end(&mut plaintext)?;
        if plaintext.len() > MAX_UNWRAPPED_KEY_SIZE {
            return Err(SopsError::Age(format!(
                "unwrapped data exceeds {MAX_UNWRAPPED_KEY_SIZE} bytes"
            )));
        }

        trace!(recipient = %key.recipient, "Unwrapped data key");
        DataKey::from_bytes(&plaintext)
    }
}

/// Wrap `key` for one recipient, producing the metadata entry for it.
pub fn wrap_data_key(key: &DataKey, recipient: &str) -> Result<AgeKey> {
    let recipient = recipient.trim();
    let parsed = parse_recipient(recipient)?;

    let encryptor = age::Encryptor::with_recipients(std::iter::once(parsed.as_ref()))
        .map_err(|e| SopsError::Age(format!("age encryption failed: {e}")))?;

    let mut armored = Vec::new();
    let output = ArmoredWriter::wrap_output(&mut armored, Format::AsciiArmor)?;
    let mut writer = encryptor.wrap_output(output)?;
    writer.write_all(key.as_bytes())?;
    writer.finish()?.finish()?;

    let enc = String::from_utf8(armored)
        .map_err(|e| SopsError::Age(format!("armored output is not UTF-8: {e}")))?;

    Ok(AgeKey {
        recipient: recipient.to_string(),
        enc,
    })
}

fn parse_recipient(recipient: &str) -> Result<Box<dyn age::Recipient>> {
    #[cfg(feature = "ssh")]
    {
        if recipient.starts_with("ssh-") {
            let parsed: age::ssh::Recipient = recipient
                .parse()
                .map_err(|e| SopsError::Age(format!("Invalid SSH recipient: {e:?}")))?;
            return Ok(Box::new(parsed));
        }
    }

    let parsed: age::x25519::Recipient = recipient
        .parse()
        .map_err(|e| SopsError::Age(format!("Invalid age recipient: {e}")))?;
    Ok(Box::new(parsed))
}

/// Parse every `AGE-SECRET-KEY-1` line; `#` comments and blank lines are skipped.
pub fn parse_age_identities(contents: &str) -> Result<Vec<age::x25519::Identity>> {
    let identities = contents
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("AGE-SECRET-KEY-1"))
        .map(|line| {
            line.parse::<age::x25519::Identity>()
                .map_err(|e| SopsError::Age(format!("Invalid age identity: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;

    if identities.is_empty() {
        return Err(SopsError::Age("no AGE-SECRET-KEY-1 found in identity".into()));
    }
    Ok(identities)
}

fn load_identity_file(path: &Path) -> Result<Vec<age::x25519::Identity>> {
    debug!(path = %path.display(), "Loading age identities");
    let contents = std::fs::read_to_string(path)
        .map_err(|e| SopsError::from(e).in_file("read age identity file", path))?;
    parse_age_identities(&contents).map_err(|e| e.in_file("parse age identity file", path))
}

fn default_identity_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("sops").join("age").join("keys.txt"))
}

#[cfg(feature = "ssh")]
mod ssh {
    use std::io::Cursor;
    use std::path::Path;

    use age::secrecy::SecretString;
    use age::Callbacks;
    use rpassword::prompt_password;

    use crate::error::{Result, SopsError};

    pub(super) fn load_identity(path: &Path) -> Result<Box<dyn age::Identity>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SopsError::from(e).in_file("read SSH identity file", path))?;
        let label = path.display().to_string();
        let identity =
            age::ssh::Identity::from_buffer(Cursor::new(contents.into_bytes()), Some(label.clone()))
                .map_err(|e| SopsError::Age(format!("Invalid SSH identity: {e}")))?;
        Ok(Box::new(identity.with_callbacks(PromptCallbacks {
            identity_label: label,
        })))
    }

    /// Prompts on the terminal when an SSH identity is passphrase protected.
    #[derive(Clone)]
    struct PromptCallbacks {
        identity_label: String,
    }

    impl Callbacks for PromptCallbacks {
        fn display_message(&self, message: &str) {
            eprintln!("{message}");
        }

        fn confirm(&self, _: &str, _: &str, _: Option<&str>) -> Option<bool> {
            None
        }

        fn request_public_string(&self, _: &str) -> Option<String> {
            None
        }

        fn request_passphrase(&self, description: &str) -> Option<SecretString> {
            let prompt = if description.is_empty() {
                format!("Passphrase for {}", self.identity_label)
            } else {
                description.to_string()
            };

            match prompt_password(format!("{prompt}: ")) {
                Ok(passphrase) => Some(SecretString::new(passphrase.into())),
                Err(err) => {
                    eprintln!("Failed to read passphrase: {err}");
                    None
                }
            }
        }
    }
}
