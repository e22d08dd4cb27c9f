//! # sops-update
//!
//! Set a single key inside sops-encrypted YAML and JSON files without ever
//! writing the plaintext to disk.
//!
//! ## Features
//!
//! - **Targeted updates**: One dotted key path, one value, every file matching a glob
//! - **Stable output**: Files whose plaintext does not change are left byte-identical
//! - **Same data key**: Updated files are re-encrypted with the key they already had
//! - **age and SSH recipients**: Data keys are unwrapped with local age or SSH identities
//! - **Multi-document YAML**: Each document in a file is updated independently
//! - **Lossless rewrites**: Comments, key order and foreign `sops` metadata are kept
//!
//! ## Quick Start
//!
//! ```bash
//! # Encrypt a new secrets file for a teammate's age key
//! sops-update encrypt secrets/plain.yaml --age age1... --output secrets/prod.yaml
//!
//! # Bump an image tag in every environment
//! export SOPS_AGE_KEY_FILE=~/.config/sops/age/keys.txt
//! sops-update update --file 'secrets/*.yaml' --key app.image.tag --value v1.4.2
//!
//! # Inspect the result
//! sops-update decrypt secrets/prod.yaml
//! ```
//!
//! ## How It Works
//!
//! ```text
//! file → parse → unwrap data key → decrypt values → set key → emit plaintext
//!                                                       │
//!                       unchanged? ── yes ──→ leave the file alone
//!                           │ no
//!                           └──→ encrypt values → refresh MAC → write back
//! ```
//!
//! Every leaf value is encrypted separately with AES-256-GCM as
//! `ENC[AES256_GCM,data:...,iv:...,tag:...,type:...]`, authenticated with its
//! key path. The document's `sops` section holds the data key wrapped for
//! each age recipient, a MAC over all plaintext values and the time of the
//! last modification.
//!
//! ## Module Overview
//!
//! - [`tree`] - In-memory document model and the set-at-path primitive
//! - [`store`] - YAML and JSON parsing and emission
//! - [`crypto`] - Per-value AES-256-GCM encryption
//! - [`keyservice`] - age/SSH data-key wrapping and unwrapping
//! - [`engine`] - Whole-document decryption, encryption and MAC handling
//! - [`mutate`] - Setting a key in every branch of a document
//! - [`select`] - Glob expansion below the repository root
//! - [`value`] - Where the new value comes from
//! - [`updater`] - The update pipeline
//! - [`config`] - `.sops-update.toml` settings
//! - [`git`] - Repository discovery
//! - [`error`] - Error types and unified error handling
//!
//! ## Configuration
//!
//! An optional `.sops-update.toml` at the repository root:
//!
//! ```toml
//! [age]
//! identity_file = "/home/me/.config/sops/age/keys.txt"
//! ssh_identity_file = "/home/me/.ssh/id_ed25519"
//! identity_env = "SOPS_AGE_KEY"
//! ```
//!
//! Each field can be overridden with `SOPS_UPDATE_AGE_IDENTITY_FILE`,
//! `SOPS_UPDATE_SSH_IDENTITY_FILE` and `SOPS_UPDATE_AGE_IDENTITY_ENV`.
//! Set `RUST_LOG=debug` to see what happens to each file.

pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod git;
pub mod keyservice;
pub mod metadata;
pub mod mutate;
pub mod select;
pub mod store;
pub mod tree;
pub mod updater;
pub mod value;

// Re-export commonly used types
pub use config::Settings;
pub use crypto::{AesGcmCipher, Cipher, DataKey};
pub use engine::{decrypt_file, decrypt_tree, encrypt_document, encrypt_tree, load_encrypted_file};
pub use error::{Result, SopsError};
pub use git::{resolve_repo_root, GitRepo};
pub use keyservice::{AgeKeyService, KeyServiceClient};
pub use metadata::{AgeKey, EncryptionRules, Metadata};
pub use store::{format_for_path, store_for_format, Format, JsonStore, Store, YamlStore};
pub use tree::{Key, PathSegment, Tree, TreeBranch, TreeItem, Value};
pub use updater::{SopsUpdater, Updater};
pub use value::{EnvValue, FileValue, StaticValue, Valuer};
