use age::secrecy::ExposeSecret;
use assert_cmd::{cargo::cargo_bin_cmd, Command};
use sops_update::{
    decrypt_file, encrypt_document, format_for_path, store_for_format, AesGcmCipher,
    AgeKeyService, KeyServiceClient, Result, SopsError, SopsUpdater, Valuer,
};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary repository root plus an age identity able to read its files.
pub struct Fixture {
    pub temp: TempDir,
    pub identity: String,
    pub recipient: String,
}

impl Fixture {
    pub fn new() -> Self {
        let identity = age::x25519::Identity::generate();
        Self {
            temp: TempDir::new().expect("failed to create temp dir"),
            identity: identity.to_string().expose_secret().to_string(),
            recipient: identity.to_public().to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// Encrypt `plaintext` for the fixture's recipient into `rel`.
    pub fn write_encrypted(&self, rel: &str, plaintext: &str) -> PathBuf {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("failed to create parent dir");
        }
        let store = store_for_format(format_for_path(&path));
        let encrypted = encrypt_document(
            store.as_ref(),
            plaintext.as_bytes(),
            &[self.recipient.clone()],
            &AesGcmCipher::new(),
        )
        .expect("failed to encrypt fixture");
        fs::write(&path, encrypted).expect("failed to write fixture");
        path
    }

    pub fn key_services(&self) -> Vec<Box<dyn KeyServiceClient>> {
        let identity = self.identity.parse().expect("invalid identity");
        vec![Box::new(AgeKeyService::new().with_identity(identity))]
    }

    pub fn decrypt(&self, rel: &str) -> String {
        let path = self.root().join(rel);
        let store = store_for_format(format_for_path(&path));
        let plaintext = decrypt_file(
            store.as_ref(),
            &path,
            &AesGcmCipher::new(),
            &self.key_services(),
        )
        .expect("failed to decrypt");
        String::from_utf8(plaintext).expect("plaintext is not utf-8")
    }

    pub fn updater(&self, file: &str, key: &str, valuer: Box<dyn Valuer>) -> SopsUpdater {
        SopsUpdater::new(
            &params(file, key),
            valuer,
            Box::new(AesGcmCipher::new()),
            self.key_services(),
        )
        .expect("failed to build updater")
    }
}

pub fn params(file: &str, key: &str) -> HashMap<String, String> {
    HashMap::from([
        ("file".to_string(), file.to_string()),
        ("key".to_string(), key.to_string()),
    ])
}

#[allow(dead_code)]
pub fn value(value: &'static str) -> Box<dyn Valuer> {
    Box::new(move |_: &Path| Ok::<_, SopsError>(value.to_string()))
}

#[allow(dead_code)]
pub fn failing_value() -> Box<dyn Valuer> {
    Box::new(|_: &Path| -> Result<String> { Err(SopsError::Value("unavailable".into())) })
}

/// Convenience helper for spawning the sops-update binary via assert_cmd.
#[allow(dead_code)]
pub fn sops_update_cmd() -> Command {
    let mut cmd = cargo_bin_cmd!("sops-update");
    cmd.env_remove("SOPS_AGE_KEY")
        .env_remove("SOPS_AGE_KEY_FILE")
        .env_remove("SOPS_AGE_SSH_PRIVATE_KEY_FILE")
        .env_remove("SOPS_UPDATE_AGE_IDENTITY_FILE")
        .env_remove("SOPS_UPDATE_SSH_IDENTITY_FILE")
        .env_remove("SOPS_UPDATE_AGE_IDENTITY_ENV")
        .env("XDG_CONFIG_HOME", "/nonexistent")
        .env("HOME", "/nonexistent");
    cmd
}
