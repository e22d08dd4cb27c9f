//! # Updater
//!
//! Sets one key to one value in every encrypted file matched by a glob.
//!
//! For each file, in order:
//!
//! 1. Load and decrypt it, keeping the recovered data key
//! 2. Emit the plaintext, set the value in every branch, emit again
//! 3. If the two emissions are byte-identical, leave the file alone
//! 4. Otherwise re-encrypt with the same data key and overwrite the file,
//!    restoring its permission mode
//!
//! The first failure aborts the remaining files. Nothing is written for a
//! file until its re-encryption has fully succeeded.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::crypto::Cipher;
use crate::engine::{decrypt_tree, encrypt_tree, load_encrypted_file};
use crate::error::{Result, SopsError};
use crate::keyservice::KeyServiceClient;
use crate::mutate::{convert_key_to_path, set_in_tree};
use crate::select::expand_glob;
use crate::store::{format_for_path, store_for_format};
use crate::tree::{PathSegment, Value};
use crate::value::Valuer;

pub trait Updater: fmt::Display {
    /// Apply the update below `repo_path`; true if any file was rewritten.
    fn update(&self, repo_path: &Path) -> Result<bool>;

    /// Title and body describing the change.
    fn message(&self) -> (String, String);
}

pub struct SopsUpdater {
    file_path: String,
    key: String,
    valuer: Box<dyn Valuer>,
    cipher: Box<dyn Cipher>,
    key_services: Vec<Box<dyn KeyServiceClient>>,
}

impl SopsUpdater {
    /// Build an updater from its `file` (glob) and `key` (dotted path) parameters.
    pub fn new(
        params: &HashMap<String, String>,
        valuer: Box<dyn Valuer>,
        cipher: Box<dyn Cipher>,
        key_services: Vec<Box<dyn KeyServiceClient>>,
    ) -> Result<Self> {
        let file_path = required(params, "file")?;
        let key = required(params, "key")?;
        Ok(Self {
            file_path,
            key,
            valuer,
            cipher,
            key_services,
        })
    }

    fn update_file(
        &self,
        repo_path: &Path,
        file: &Path,
        path: &[PathSegment],
        value: &Value,
    ) -> Result<bool> {
        let relative = file.strip_prefix(repo_path).unwrap_or(file);
        debug!(file = %relative.display(), "Processing");

        let permissions = fs::metadata(file)
            .map_err(|e| SopsError::from(e).in_file("access file", relative))?
            .permissions();

        let store = store_for_format(format_for_path(file));
        let mut tree = load_encrypted_file(store.as_ref(), file)
            .map_err(at("load encrypted file", relative))?;
        let data_key = decrypt_tree(&mut tree, self.cipher.as_ref(), &self.key_services)
            .map_err(at("decrypt tree for", relative))?;

        let original = store
            .emit_plain(&tree.branches)
            .map_err(at("emit original tree for", relative))?;
        set_in_tree(&mut tree, path, value);
        let updated = store
            .emit_plain(&tree.branches)
            .map_err(at("emit updated tree for", relative))?;

        if original == updated {
            debug!(file = %relative.display(), "Unchanged");
            return Ok(false);
        }

        encrypt_tree(&mut tree, &data_key, self.cipher.as_ref())
            .map_err(at("encrypt tree for", relative))?;
        let encrypted = store
            .emit_encrypted(&tree)
            .map_err(at("generate re-encrypted file", relative))?;

        fs::write(file, encrypted)
            .and_then(|()| fs::set_permissions(file, permissions))
            .map_err(|e| SopsError::from(e).in_file("write re-encrypted data to file", relative))?;

        info!(file = %relative.display(), key = %self.key, "Updated");
        Ok(true)
    }
}

impl Updater for SopsUpdater {
    fn update(&self, repo_path: &Path) -> Result<bool> {
        let value = self.valuer.value(repo_path).map_err(|e| match e {
            SopsError::Value(_) => e,
            other => SopsError::Value(other.to_string()),
        })?;

        let files = expand_glob(repo_path, &self.file_path)?;
        if files.is_empty() {
            debug!(pattern = %self.file_path, "No files matched");
            return Ok(false);
        }

        let path = convert_key_to_path(&self.key);
        let value = Value::Str(value);

        let mut changed = false;
        for file in &files {
            if self.update_file(repo_path, file, &path, &value)? {
                changed = true;
            }
        }
        Ok(changed)
    }

    fn message(&self) -> (String, String) {
        (
            format!("Update {} {}", self.file_path, self.key),
            format!(
                "Updating encrypted file `{}` key `{}`",
                self.file_path, self.key
            ),
        )
    }
}

impl fmt::Display for SopsUpdater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sops[key={},file={}]", self.key, self.file_path)
    }
}

fn required(params: &HashMap<String, String>, name: &'static str) -> Result<String> {
    match params.get(name) {
        Some(value) if !value.is_empty() => Ok(value.clone()),
        _ => Err(SopsError::MissingParameter(name)),
    }
}

fn at<'a>(action: &'static str, path: &'a Path) -> impl FnOnce(SopsError) -> SopsError + 'a {
    move |e| e.in_file(action, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::AesGcmCipher;
    use crate::engine::encrypt_document;
    use crate::keyservice::AgeKeyService;
    use crate::store::YamlStore;
    use std::cell::Cell;
    use std::rc::Rc;
    use tempfile::TempDir;

    fn params(file: &str, key: &str) -> HashMap<String, String> {
        HashMap::from([
            ("file".to_string(), file.to_string()),
            ("key".to_string(), key.to_string()),
        ])
    }

    fn updater(params: &HashMap<String, String>, valuer: Box<dyn Valuer>) -> Result<SopsUpdater> {
        SopsUpdater::new(params, valuer, Box::new(AesGcmCipher::new()), Vec::new())
    }

    fn static_value(value: &'static str) -> Box<dyn Valuer> {
        Box::new(move |_: &Path| Ok::<_, SopsError>(value.to_string()))
    }

    #[test]
    fn missing_file_parameter() {
        let mut p = params("", "a.b");
        assert!(matches!(
            updater(&p, static_value("x")),
            Err(SopsError::MissingParameter("file"))
        ));
        p.remove("file");
        assert!(matches!(
            updater(&p, static_value("x")),
            Err(SopsError::MissingParameter("file"))
        ));
    }

    #[test]
    fn missing_key_parameter() {
        let p = HashMap::from([("file".to_string(), "*.yaml".to_string())]);
        let err = updater(&p, static_value("x")).err().unwrap();
        assert!(matches!(err, SopsError::MissingParameter("key")));
        assert_eq!(err.to_string(), "missing key parameter");
    }

    #[test]
    fn reporting_strings() {
        let u = updater(&params("secrets/*.yaml", "app.image.tag"), static_value("x")).unwrap();
        let (title, body) = u.message();
        assert_eq!(title, "Update secrets/*.yaml app.image.tag");
        assert_eq!(
            body,
            "Updating encrypted file `secrets/*.yaml` key `app.image.tag`"
        );
        assert_eq!(u.to_string(), "Sops[key=app.image.tag,file=secrets/*.yaml]");
    }

    #[test]
    fn zero_matches_is_not_a_change() {
        let temp = TempDir::new().unwrap();
        let u = updater(&params("*.yaml", "a"), static_value("x")).unwrap();
        assert!(!u.update(temp.path()).unwrap());
    }

    #[test]
    fn value_failure_aborts_before_any_file() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("broken.yaml"), "not: encrypted\n").unwrap();

        let failing: Box<dyn Valuer> =
            Box::new(|_: &Path| Err::<String, _>(SopsError::Config("no source".into())));
        let u = updater(&params("*.yaml", "a"), failing).unwrap();

        let err = u.update(temp.path()).unwrap_err();
        assert!(matches!(err, SopsError::Value(_)));
        assert!(err.to_string().contains("no source"));
    }

    #[test]
    fn valuer_runs_once_for_many_files() {
        let temp = TempDir::new().unwrap();
        let identity = age::x25519::Identity::generate();
        let recipient = identity.to_public().to_string();
        let store = YamlStore;
        for name in ["a.yaml", "b.yaml", "c.yaml"] {
            let doc = encrypt_document(
                &store,
                b"app:\n  tag: v1\n",
                &[recipient.clone()],
                &AesGcmCipher::new(),
            )
            .unwrap();
            fs::write(temp.path().join(name), doc).unwrap();
        }

        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let valuer: Box<dyn Valuer> = Box::new(move |_: &Path| {
            counter.set(counter.get() + 1);
            Ok::<_, SopsError>("v2".to_string())
        });
        let service = AgeKeyService::new().with_identity(identity);
        let u = SopsUpdater::new(
            &params("*.yaml", "app.tag"),
            valuer,
            Box::new(AesGcmCipher::new()),
            vec![Box::new(service)],
        )
        .unwrap();

        assert!(u.update(temp.path()).unwrap());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn failure_names_the_relative_file() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("secrets")).unwrap();
        fs::write(temp.path().join("secrets/plain.yaml"), "a: 1\n").unwrap();

        let u = updater(&params("secrets/*.yaml", "a"), static_value("x")).unwrap();
        let err = u.update(temp.path()).unwrap_err();

        assert_eq!(
            err.to_string(),
            "failed to load encrypted file secrets/plain.yaml: document has no sops metadata"
        );
    }
}
