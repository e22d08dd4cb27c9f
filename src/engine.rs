//! # Tree Encryption Engine
//!
//! Loads encrypted documents into [`Tree`]s, recovers their data key through
//! the configured key services and decrypts or re-encrypts every value.
//!
//! ## Integrity
//!
//! Besides the per-value GCM tags, a document carries a MAC: the SHA-512 of
//! every plaintext scalar in walk order, hex encoded, encrypted with the data
//! key and the `lastmodified` timestamp as additional data. It detects values
//! that were removed, added or reordered, which per-value tags cannot.

use std::fs;
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use sha2::{Digest, Sha512};
use tracing::{debug, trace};

use crate::crypto::{AesGcmCipher, Cipher, DataKey};
use crate::error::{Result, SopsError};
use crate::keyservice::{wrap_data_key, KeyServiceClient};
use crate::metadata::{EncryptionRules, Metadata, METADATA_KEY};
use crate::store::Store;
use crate::tree::{Key, Tree, TreeBranch, Value};

/// Read and parse an encrypted file; values stay encrypted.
pub fn load_encrypted_file(store: &dyn Store, path: &Path) -> Result<Tree> {
    let data = fs::read(path)?;
    store.load_encrypted(&data)
}

/// Decrypt every branch in place and return the data key that was used.
pub fn decrypt_tree(
    tree: &mut Tree,
    cipher: &dyn Cipher,
    key_services: &[Box<dyn KeyServiceClient>],
) -> Result<DataKey> {
    let rules = tree.metadata.encryption_rules()?;
    let data_key = unwrap_data_key(&tree.metadata, key_services)?;

    let mut hasher = Sha512::new();
    let mut decrypt = |value: &mut Value, additional_data: &str, encrypted: bool| -> Result<()> {
        if encrypted {
            let plaintext = match &*value {
                Value::Str(s) if AesGcmCipher::is_encrypted(s) => {
                    cipher.decrypt(s, &data_key, additional_data)?
                }
                _ => {
                    return Err(SopsError::Decryption(format!(
                        "value at '{additional_data}' is not encrypted"
                    )))
                }
            };
            *value = plaintext;
        }
        hasher.update(mac_input(value));
        Ok(())
    };
    for branch in &mut tree.branches {
        walk_branch(branch, &mut Vec::new(), &rules, &mut decrypt)?;
    }

    let computed = hex::encode_upper(hasher.finalize());
    let stored = match cipher.decrypt(&tree.metadata.mac, &data_key, &tree.metadata.lastmodified)? {
        Value::Str(mac) => mac,
        other => {
            return Err(SopsError::Decryption(format!(
                "MAC has unexpected type: {other:?}"
            )))
        }
    };
    if computed != stored {
        return Err(SopsError::MacMismatch { computed, stored });
    }

    Ok(data_key)
}

/// Encrypt every branch in place with `data_key`, refreshing the MAC and timestamp.
pub fn encrypt_tree(tree: &mut Tree, data_key: &DataKey, cipher: &dyn Cipher) -> Result<()> {
    let rules = tree.metadata.encryption_rules()?;

    let mut hasher = Sha512::new();
    let mut encrypt = |value: &mut Value, additional_data: &str, encrypted: bool| -> Result<()> {
        hasher.update(mac_input(value));
        if encrypted {
            *value = Value::Str(cipher.encrypt(value, data_key, additional_data)?);
        }
        Ok(())
    };
    for branch in &mut tree.branches {
        walk_branch(branch, &mut Vec::new(), &rules, &mut encrypt)?;
    }

    tree.metadata.lastmodified = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let mac = hex::encode_upper(hasher.finalize());
    tree.metadata.mac = cipher.encrypt(&Value::Str(mac), data_key, &tree.metadata.lastmodified)?;
    Ok(())
}

/// Encrypt a plaintext document under a fresh data key wrapped for `recipients`.
pub fn encrypt_document(
    store: &dyn Store,
    plaintext: &[u8],
    recipients: &[String],
    cipher: &dyn Cipher,
) -> Result<Vec<u8>> {
    if recipients.is_empty() {
        return Err(SopsError::Encryption("at least one recipient is required".into()));
    }

    let branches = store.load_plain(plaintext)?;
    let metadata_key = Key::from(METADATA_KEY);
    if branches.iter().any(|b| b.get(&metadata_key).is_some()) {
        return Err(SopsError::Encryption("document is already encrypted".into()));
    }

    let data_key = DataKey::generate();
    let age = recipients
        .iter()
        .map(|recipient| wrap_data_key(&data_key, recipient))
        .collect::<Result<Vec<_>>>()?;

    let mut tree = Tree {
        branches,
        metadata: Metadata::new(age),
    };
    encrypt_tree(&mut tree, &data_key, cipher)?;
    store.emit_encrypted(&tree)
}

/// Load, decrypt and emit a file as plaintext.
pub fn decrypt_file(
    store: &dyn Store,
    path: &Path,
    cipher: &dyn Cipher,
    key_services: &[Box<dyn KeyServiceClient>],
) -> Result<Vec<u8>> {
    let mut tree = load_encrypted_file(store, path)?;
    decrypt_tree(&mut tree, cipher, key_services)?;
    store.emit_plain(&tree.branches)
}

fn unwrap_data_key(
    metadata: &Metadata,
    key_services: &[Box<dyn KeyServiceClient>],
) -> Result<DataKey> {
    let mut attempts = Vec::new();
    for key in &metadata.age {
        for service in key_services {
            match service.decrypt_data_key(key) {
                Ok(data_key) => {
                    debug!(recipient = %key.recipient, service = service.name(), "Recovered data key");
                    return Ok(data_key);
                }
                Err(e) => {
                    trace!(recipient = %key.recipient, service = service.name(), error = %e, "Key service failed");
                    attempts.push(format!("{} via {}: {e}", key.recipient, service.name()));
                }
            }
        }
    }

    if metadata.age.is_empty() {
        attempts.push("document lists no recipients".into());
    } else if key_services.is_empty() {
        attempts.push("no key services configured".into());
    }
    Err(SopsError::NoDataKey { attempts })
}

type Visitor<'a> = dyn FnMut(&mut Value, &str, bool) -> Result<()> + 'a;

/// Visit every non-null scalar with its additional data (`a:b:`) and
/// whether `rules` store it encrypted.
fn walk_branch(
    branch: &mut TreeBranch,
    path: &mut Vec<String>,
    rules: &EncryptionRules,
    visit: &mut Visitor<'_>,
) -> Result<()> {
    for item in branch.items_mut() {
        path.push(item.key.to_string());
        walk_value(&mut item.value, path, rules, visit)?;
        path.pop();
    }
    Ok(())
}

fn walk_value(
    value: &mut Value,
    path: &mut Vec<String>,
    rules: &EncryptionRules,
    visit: &mut Visitor<'_>,
) -> Result<()> {
    match value {
        Value::Branch(branch) => walk_branch(branch, path, rules, visit),
        Value::Array(values) => {
            for v in values {
                walk_value(v, path, rules, visit)?;
            }
            Ok(())
        }
        Value::Null => Ok(()),
        scalar => {
            let additional_data: String = path.iter().map(|k| format!("{k}:")).collect();
            visit(scalar, &additional_data, rules.is_encrypted(path))
        }
    }
}

fn mac_input(value: &Value) -> String {
    match value {
        Value::Str(s) => s.clone(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Bool(true) => "True".into(),
        Value::Bool(false) => "False".into(),
        _ => String::new(),
    }
}
