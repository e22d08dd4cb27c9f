//! # Value Encryption
//!
//! Every scalar of a document is encrypted on its own with AES-256-GCM under
//! the document's data key.
//!
//! ## Algorithm
//!
//! - **Cipher**: AES-256-GCM
//! - **Key size**: 256 bits (32 bytes)
//! - **Nonce size**: 96 bits (12 bytes), random for every value
//! - **Authentication**: 16-byte GCM tag, plus additional data binding the
//!   value to its key path (`parent:child:`)
//!
//! ## Encrypted Value Format
//!
//! ```text
//! ENC[AES256_GCM,data:<base64>,iv:<base64>,tag:<base64>,type:<str|int|float|bool>]
//! ```
//!
//! The `type` field restores the scalar type on decryption so that `42`
//! comes back as an integer and not as the string `"42"`.

use crate::error::{Result, SopsError};
use crate::tree::Value;
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;

pub const KEY_SIZE: usize = 32; // 256 bits
pub const NONCE_SIZE: usize = 12; // 96 bits for GCM
pub const TAG_SIZE: usize = 16;

const ENC_PREFIX: &str = "ENC[";
const CIPHER_NAME: &str = "AES256_GCM";

/// Symmetric key protecting one document's values.
#[derive(Clone, PartialEq, Eq)]
pub struct DataKey {
    key: [u8; KEY_SIZE],
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DataKey(..)")
    }
}

impl DataKey {
    /// Generate a new random key
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Create a key from existing bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(SopsError::InvalidKeyFormat);
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self { key })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }
}

/// Encrypts and decrypts single scalar values.
pub trait Cipher {
    fn encrypt(&self, value: &Value, key: &DataKey, additional_data: &str) -> Result<String>;
    fn decrypt(&self, ciphertext: &str, key: &DataKey, additional_data: &str) -> Result<Value>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AesGcmCipher;

impl AesGcmCipher {
    pub fn new() -> Self {
        Self
    }

    /// Check if a string looks like an encrypted value
    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(ENC_PREFIX) && value.ends_with(']')
    }
}

impl Cipher for AesGcmCipher {
    fn encrypt(&self, value: &Value, key: &DataKey, additional_data: &str) -> Result<String> {
        let (plaintext, kind) = match value {
            Value::Str(s) => (s.clone(), "str"),
            Value::Int(i) => (i.to_string(), "int"),
            Value::Float(f) => (f.to_string(), "float"),
            Value::Bool(true) => ("True".to_string(), "bool"),
            Value::Bool(false) => ("False".to_string(), "bool"),
            other => {
                return Err(SopsError::Encryption(format!(
                    "cannot encrypt non-scalar value {other:?}"
                )))
            }
        };

        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| SopsError::Encryption(e.to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut sealed = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: additional_data.as_bytes(),
                },
            )
            .map_err(|e| SopsError::Encryption(e.to_string()))?;

        // aes-gcm appends the tag to the ciphertext
        let tag = sealed.split_off(sealed.len() - TAG_SIZE);

        Ok(format!(
            "{ENC_PREFIX}{CIPHER_NAME},data:{},iv:{},tag:{},type:{kind}]",
            BASE64.encode(&sealed),
            BASE64.encode(nonce_bytes),
            BASE64.encode(&tag),
        ))
    }

    fn decrypt(&self, ciphertext: &str, key: &DataKey, additional_data: &str) -> Result<Value> {
        let parts = EncryptedParts::parse(ciphertext)?;

        if parts.iv.len() != NONCE_SIZE {
            return Err(SopsError::Decryption(format!(
                "invalid IV length: {} (expected {NONCE_SIZE})",
                parts.iv.len()
            )));
        }
        if parts.tag.len() != TAG_SIZE {
            return Err(SopsError::Decryption(format!(
                "invalid tag length: {} (expected {TAG_SIZE})",
                parts.tag.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| SopsError::Decryption(e.to_string()))?;

        let mut sealed = parts.data;
        sealed.extend_from_slice(&parts.tag);

        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&parts.iv),
                Payload {
                    msg: &sealed,
                    aad: additional_data.as_bytes(),
                },
            )
            .map_err(|e| SopsError::Decryption(format!("AES-GCM decryption failed: {e}")))?;

        let plaintext = String::from_utf8(plaintext)
            .map_err(|e| SopsError::Decryption(format!("value is not valid UTF-8: {e}")))?;

        parse_typed(plaintext, &parts.kind)
    }
}

struct EncryptedParts {
    data: Vec<u8>,
    iv: Vec<u8>,
    tag: Vec<u8>,
    kind: String,
}

impl EncryptedParts {
    fn parse(encrypted: &str) -> Result<Self> {
        let inner = encrypted
            .strip_prefix(ENC_PREFIX)
            .and_then(|s| s.strip_suffix(']'))
            .ok_or_else(|| SopsError::Decryption("invalid encrypted value format".into()))?;

        let mut fields = inner.split(',');
        let cipher_name = fields.next().unwrap_or_default();
        if cipher_name != CIPHER_NAME {
            return Err(SopsError::Decryption(format!(
                "unsupported cipher type: {cipher_name}"
            )));
        }

        let (mut data, mut iv, mut tag, mut kind) = (None, None, None, None);
        for field in fields {
            match field.split_once(':') {
                Some(("data", v)) => data = Some(v),
                Some(("iv", v)) => iv = Some(v),
                Some(("tag", v)) => tag = Some(v),
                Some(("type", v)) => kind = Some(v),
                _ => {
                    return Err(SopsError::Decryption(format!(
                        "unexpected field in encrypted value: {field}"
                    )))
                }
            }
        }

        let decode = |name: &str, field: Option<&str>| -> Result<Vec<u8>> {
            let field =
                field.ok_or_else(|| SopsError::Decryption(format!("missing '{name}' field")))?;
            BASE64
                .decode(field)
                .map_err(|e| SopsError::Decryption(format!("invalid base64 in {name}: {e}")))
        };

        Ok(Self {
            data: decode("data", data)?,
            iv: decode("iv", iv)?,
            tag: decode("tag", tag)?,
            kind: kind.unwrap_or("str").to_string(),
        })
    }
}

fn parse_typed(plaintext: String, kind: &str) -> Result<Value> {
    let invalid = |e: &dyn std::fmt::Display| {
        SopsError::Decryption(format!("invalid {kind} value: {e}"))
    };
    match kind {
        "str" => Ok(Value::Str(plaintext)),
        "int" => plaintext.parse().map(Value::Int).map_err(|e| invalid(&e)),
        "float" => plaintext.parse().map(Value::Float).map_err(|e| invalid(&e)),
        "bool" => match plaintext.as_str() {
            "True" | "true" => Ok(Value::Bool(true)),
            "False" | "false" => Ok(Value::Bool(false)),
            other => Err(invalid(&other)),
        },
        other => Err(SopsError::Decryption(format!("unknown value type: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: Value) -> Value {
        let key = DataKey::generate();
        let cipher = AesGcmCipher::new();
        let encrypted = cipher.encrypt(&value, &key, "a:b:").unwrap();
        assert!(AesGcmCipher::is_encrypted(&encrypted));
        cipher.decrypt(&encrypted, &key, "a:b:").unwrap()
    }

    #[test]
    fn test_scalar_types_survive() {
        assert_eq!(roundtrip(Value::from("Hello, World!")), Value::from("Hello, World!"));
        assert_eq!(roundtrip(Value::Int(-42)), Value::Int(-42));
        assert_eq!(roundtrip(Value::Float(1.5)), Value::Float(1.5));
        assert_eq!(roundtrip(Value::Bool(false)), Value::Bool(false));
    }

    #[test]
    fn test_empty_and_unicode_strings() {
        assert_eq!(roundtrip(Value::from("")), Value::from(""));
        assert_eq!(
            roundtrip(Value::from("Hello, 世界! 🔐🦀")),
            Value::from("Hello, 世界! 🔐🦀")
        );
    }

    #[test]
    fn test_encrypted_value_format() {
        let key = DataKey::generate();
        let encrypted = AesGcmCipher::new()
            .encrypt(&Value::Int(7), &key, "")
            .unwrap();

        assert!(encrypted.starts_with("ENC[AES256_GCM,data:"));
        assert!(encrypted.ends_with(",type:int]"));
    }

    #[test]
    fn test_same_key_different_nonces() {
        let key = DataKey::generate();
        let cipher = AesGcmCipher::new();
        let value = Value::from("Same plaintext and key");

        let first = cipher.encrypt(&value, &key, "k:").unwrap();
        let second = cipher.encrypt(&value, &key, "k:").unwrap();

        assert_ne!(first, second);
        assert_eq!(cipher.decrypt(&first, &key, "k:").unwrap(), value);
        assert_eq!(cipher.decrypt(&second, &key, "k:").unwrap(), value);
    }

    #[test]
    fn test_wrong_key_fails_decryption() {
        let cipher = AesGcmCipher::new();
        let encrypted = cipher
            .encrypt(&Value::from("Secret"), &DataKey::generate(), "k:")
            .unwrap();

        assert!(cipher.decrypt(&encrypted, &DataKey::generate(), "k:").is_err());
    }

    #[test]
    fn test_wrong_additional_data_fails() {
        let key = DataKey::generate();
        let cipher = AesGcmCipher::new();
        let encrypted = cipher.encrypt(&Value::from("Secret"), &key, "a:").unwrap();

        // Moving a value to another key must not decrypt
        assert!(cipher.decrypt(&encrypted, &key, "b:").is_err());
    }

    #[test]
    fn test_corrupted_ciphertext_fails() {
        let key = DataKey::generate();
        let cipher = AesGcmCipher::new();
        let encrypted = cipher.encrypt(&Value::from("Secret message"), &key, "").unwrap();

        let data_start = encrypted.find("data:").unwrap() + "data:".len();
        let mut corrupted = encrypted.clone().into_bytes();
        corrupted[data_start] = if corrupted[data_start] == b'A' { b'B' } else { b'A' };
        let corrupted = String::from_utf8(corrupted).unwrap();

        assert!(cipher.decrypt(&corrupted, &key, "").is_err());
    }

    #[test]
    fn test_invalid_format_is_rejected() {
        let key = DataKey::generate();
        let cipher = AesGcmCipher::new();

        assert!(cipher.decrypt("plaintext", &key, "").is_err());
        assert!(cipher.decrypt("ENC[incomplete", &key, "").is_err());
        assert!(cipher
            .decrypt("ENC[PGP,data:AA==,iv:AA==,tag:AA==,type:str]", &key, "")
            .is_err());
    }

    #[test]
    fn test_non_scalar_cannot_be_encrypted() {
        let result = AesGcmCipher::new().encrypt(&Value::Null, &DataKey::generate(), "");
        assert!(matches!(result, Err(SopsError::Encryption(_))));
    }

    #[test]
    fn test_key_from_invalid_length() {
        assert!(DataKey::from_bytes(&[0x42u8; KEY_SIZE - 1]).is_err());
        assert!(DataKey::from_bytes(&[0x42u8; KEY_SIZE + 1]).is_err());

        let key = DataKey::from_bytes(&[0x42u8; KEY_SIZE]).unwrap();
        assert_eq!(key.as_bytes(), &[0x42u8; KEY_SIZE]);
    }
}
