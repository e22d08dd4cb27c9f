//! # CLI Tests
//!
//! Runs the `sops-update` binary against temporary repositories.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test cli_test
//! ```

mod common;

use common::{sops_update_cmd, Fixture};
use predicates::prelude::*;
use std::fs;

#[test]
fn test_update_prints_commit_message() {
    let f = Fixture::new();
    f.write_encrypted("secrets/prod.yaml", "app:\n  tag: v1\n");

    sops_update_cmd()
        .args(["update", "--file", "secrets/*.yaml", "--key", "app.tag", "--value", "v2"])
        .arg("--repo")
        .arg(f.root())
        .env("SOPS_AGE_KEY", &f.identity)
        .assert()
        .success()
        .stdout(predicate::str::contains("Update secrets/*.yaml app.tag"))
        .stdout(predicate::str::contains(
            "Updating encrypted file `secrets/*.yaml` key `app.tag`",
        ));

    assert!(f.decrypt("secrets/prod.yaml").contains("tag: v2"));
}

#[test]
fn test_update_without_changes_prints_nothing() {
    let f = Fixture::new();
    let path = f.write_encrypted("secrets.yaml", "app:\n  tag: v1\n");
    let before = fs::read(&path).unwrap();

    sops_update_cmd()
        .args(["update", "--file", "secrets.yaml", "--key", "app.tag", "--value", "v1"])
        .arg("--repo")
        .arg(f.root())
        .env("SOPS_AGE_KEY", &f.identity)
        .assert()
        .success()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("no files changed"));

    assert_eq!(fs::read(&path).unwrap(), before);
}

#[test]
fn test_update_value_from_env() {
    let f = Fixture::new();
    f.write_encrypted("secrets.yaml", "db:\n  password: old\n");

    sops_update_cmd()
        .args(["update", "--file", "secrets.yaml", "--key", "db.password"])
        .args(["--value-env", "NEW_DB_PASSWORD"])
        .arg("--repo")
        .arg(f.root())
        .env("SOPS_AGE_KEY", &f.identity)
        .env("NEW_DB_PASSWORD", "rotated")
        .assert()
        .success();

    assert!(f.decrypt("secrets.yaml").contains("password: rotated"));
}

#[test]
fn test_update_requires_a_value_source() {
    let f = Fixture::new();

    sops_update_cmd()
        .args(["update", "--file", "secrets.yaml", "--key", "a"])
        .arg("--repo")
        .arg(f.root())
        .assert()
        .failure();

    sops_update_cmd()
        .args(["update", "--file", "secrets.yaml", "--key", "a"])
        .args(["--value", "x", "--value-env", "X"])
        .arg("--repo")
        .arg(f.root())
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn test_update_empty_key_is_rejected() {
    let f = Fixture::new();

    sops_update_cmd()
        .args(["update", "--file", "secrets.yaml", "--key", "", "--value", "x"])
        .arg("--repo")
        .arg(f.root())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error: missing key parameter"));
}

#[test]
fn test_update_discovers_git_root() {
    let f = Fixture::new();
    git2::Repository::init(f.root()).unwrap();
    f.write_encrypted("deploy/secrets.yaml", "image: v1\n");
    let nested = f.root().join("deploy");

    sops_update_cmd()
        .args(["update", "--file", "deploy/*.yaml", "--key", "image", "--value", "v2"])
        .current_dir(&nested)
        .env("SOPS_AGE_KEY", &f.identity)
        .assert()
        .success()
        .stdout(predicate::str::contains("Update deploy/*.yaml image"));

    assert!(f.decrypt("deploy/secrets.yaml").contains("image: v2"));
}

#[test]
fn test_update_without_identity_fails() {
    let f = Fixture::new();
    let path = f.write_encrypted("secrets.yaml", "a: 1\n");
    let before = fs::read(&path).unwrap();

    sops_update_cmd()
        .args(["update", "--file", "secrets.yaml", "--key", "a", "--value", "2"])
        .arg("--repo")
        .arg(f.root())
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "Error: failed to decrypt tree for secrets.yaml",
        ));

    assert_eq!(fs::read(&path).unwrap(), before);
}

#[test]
fn test_encrypt_then_decrypt() {
    let f = Fixture::new();
    let plain = f.root().join("plain.yaml");
    let encrypted = f.root().join("secrets.yaml");
    fs::write(&plain, "user: admin\npassword: hunter2\n").unwrap();

    sops_update_cmd()
        .arg("encrypt")
        .arg(&plain)
        .args(["--age", &f.recipient])
        .arg("--output")
        .arg(&encrypted)
        .assert()
        .success()
        .stdout(predicate::str::contains("1 recipient(s)"));

    let on_disk = fs::read_to_string(&encrypted).unwrap();
    assert!(!on_disk.contains("hunter2"));
    assert!(on_disk.contains(&f.recipient));

    sops_update_cmd()
        .arg("decrypt")
        .arg(&encrypted)
        .arg("--repo")
        .arg(f.root())
        .env("SOPS_AGE_KEY", &f.identity)
        .assert()
        .success()
        .stdout("user: admin\npassword: hunter2\n");
}

#[test]
fn test_encrypt_requires_recipient() {
    let f = Fixture::new();
    let plain = f.root().join("plain.yaml");
    fs::write(&plain, "a: 1\n").unwrap();

    sops_update_cmd()
        .arg("encrypt")
        .arg(&plain)
        .assert()
        .failure();
}

#[test]
fn test_decrypt_with_configured_identity_file() {
    let f = Fixture::new();
    f.write_encrypted("secrets.json", r#"{"token": "abc"}"#);
    let key_file = f.root().join("keys.txt");
    fs::write(&key_file, format!("# test key\n{}\n", f.identity)).unwrap();
    fs::write(
        f.root().join(".sops-update.toml"),
        format!("[age]\nidentity_file = {:?}\n", key_file.display().to_string()),
    )
    .unwrap();

    sops_update_cmd()
        .arg("decrypt")
        .arg(f.root().join("secrets.json"))
        .arg("--repo")
        .arg(f.root())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"token\": \"abc\""));
}

#[test]
fn test_decrypt_with_wrong_identity_fails() {
    let f = Fixture::new();
    let stranger = Fixture::new();
    f.write_encrypted("secrets.yaml", "a: 1\n");

    sops_update_cmd()
        .arg("decrypt")
        .arg(f.root().join("secrets.yaml"))
        .arg("--repo")
        .arg(f.root())
        .env("SOPS_AGE_KEY", &stranger.identity)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error: failed to get the data key"));
}
