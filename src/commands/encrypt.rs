use std::fs;
use std::io::{self, Write};
use std::path::Path;

use sops_update::{encrypt_document, format_for_path, store_for_format, AesGcmCipher, Result};

/// Encrypt a plaintext document for the given age recipients.
///
/// The format is taken from `output` when given, otherwise from `input`.
pub fn encrypt(input: &Path, recipients: &[String], output: Option<&Path>) -> Result<()> {
    let plaintext = fs::read(input)?;
    let store = store_for_format(format_for_path(output.unwrap_or(input)));

    let encrypted = encrypt_document(store.as_ref(), &plaintext, recipients, &AesGcmCipher::new())?;

    match output {
        Some(path) => {
            fs::write(path, &encrypted)?;
            println!(
                "Encrypted {} for {} recipient(s) into {}",
                input.display(),
                recipients.len(),
                path.display()
            );
        }
        None => io::stdout().write_all(&encrypted)?,
    }

    Ok(())
}
