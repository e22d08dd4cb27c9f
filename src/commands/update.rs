use std::collections::HashMap;
use std::path::Path;

use sops_update::{
    resolve_repo_root, AesGcmCipher, AgeKeyService, Result, Settings, SopsUpdater, Updater,
    Valuer,
};

/// Set `key` to the value from `valuer` in every file matching `file`.
pub fn update(repo: Option<&Path>, file: &str, key: &str, valuer: Box<dyn Valuer>) -> Result<()> {
    let params = HashMap::from([
        ("file".to_string(), file.to_string()),
        ("key".to_string(), key.to_string()),
    ]);

    let repo_root = resolve_repo_root(repo)?;
    let settings = Settings::load(&repo_root)?;
    let key_service = AgeKeyService::from_settings(&settings)?;

    let updater = SopsUpdater::new(
        &params,
        valuer,
        Box::new(AesGcmCipher::new()),
        vec![Box::new(key_service)],
    )?;

    if updater.update(&repo_root)? {
        let (title, body) = updater.message();
        println!("{title}");
        println!();
        println!("{body}");
    } else {
        eprintln!("{updater}: no files changed");
    }

    Ok(())
}
