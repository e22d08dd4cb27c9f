use std::io::{self, Write};
use std::path::Path;

use sops_update::{
    decrypt_file, format_for_path, resolve_repo_root, store_for_format, AesGcmCipher,
    AgeKeyService, KeyServiceClient, Result, Settings, SopsError,
};

/// Decrypt a document and write the plaintext to stdout.
pub fn decrypt(input: &Path, repo: Option<&Path>) -> Result<()> {
    let settings = match resolve_repo_root(repo) {
        Ok(root) => Settings::load(&root)?,
        Err(SopsError::NotInGitRepo) => Settings::load(Path::new("."))?,
        Err(e) => return Err(e),
    };
    let key_services: Vec<Box<dyn KeyServiceClient>> =
        vec![Box::new(AgeKeyService::from_settings(&settings)?)];

    let store = store_for_format(format_for_path(input));
    let plaintext = decrypt_file(store.as_ref(), input, &AesGcmCipher::new(), &key_services)?;

    io::stdout().write_all(&plaintext)?;
    Ok(())
}
