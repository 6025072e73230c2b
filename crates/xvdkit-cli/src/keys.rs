//! Key file discovery
//!
//! An explicit `--cik` file wins. Otherwise every `*.cik` under
//! `<keys dir>/Cik` and `./Cik` is loaded and the container's key id picks
//! the entry.

use std::path::PathBuf;
use tracing::{debug, info};
use xvdkit_crypto::{KeyEntry, KeyStore, Uuid};

use crate::config::KeyArgs;
use crate::error::ConfigError;

/// Name of the key subdirectory
pub const CIK_DIR_NAME: &str = "Cik";

/// Directories searched for `.cik` files, in order
pub fn key_directories(args: &KeyArgs) -> Vec<PathBuf> {
    let mut dirs = Vec::with_capacity(2);
    if let Some(root) = &args.keys_dir {
        dirs.push(root.join(CIK_DIR_NAME));
    }
    dirs.push(PathBuf::from(CIK_DIR_NAME));
    dirs
}

/// Load every key file from the search directories
pub fn load_key_store(args: &KeyArgs) -> Result<KeyStore, ConfigError> {
    let mut store = KeyStore::new();
    for dir in key_directories(args) {
        let loaded = store
            .load_cik_dir(&dir)
            .map_err(|source| ConfigError::KeyFile {
                path: dir.clone(),
                source,
            })?;
        if loaded > 0 {
            debug!("Loaded {loaded} keys from {}", dir.display());
        }
    }
    Ok(store)
}

/// Pick the key for a container whose header names `key_id`
///
/// Returns `None` when no key is needed (nil key id and no explicit file)
/// or when no key file matches.
pub fn resolve_key(args: &KeyArgs, key_id: Uuid) -> Result<Option<KeyEntry>, ConfigError> {
    if let Some(path) = &args.cik {
        let key = KeyEntry::from_cik_file(path).map_err(|source| ConfigError::KeyFile {
            path: path.clone(),
            source,
        })?;
        info!("Using key {} from {}", key.id, path.display());
        return Ok(Some(key));
    }

    if key_id.is_nil() {
        return Ok(None);
    }

    let store = load_key_store(args)?;
    let key = store.get(&key_id).cloned();
    match &key {
        Some(_) => info!("Found key {key_id} in key store"),
        None => debug!("No key file for {key_id} among {} keys", store.len()),
    }
    Ok(key)
}

/// Like [`resolve_key`] but a missing key is an error
pub fn require_key(args: &KeyArgs, key_id: Uuid) -> Result<KeyEntry, ConfigError> {
    resolve_key(args, key_id)?.ok_or(ConfigError::KeyNotFound(key_id))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write_key(dir: &std::path::Path, name: &str, key: &KeyEntry) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, key.to_cik_bytes().unwrap()).unwrap();
        path
    }

    fn sample_key(seed: u8) -> KeyEntry {
        KeyEntry::new(Uuid::from_bytes([seed; 16]), [seed ^ 0x11; 16], [seed ^ 0x22; 16])
    }

    #[test]
    fn test_key_directories() {
        let args = KeyArgs {
            cik: None,
            keys_dir: Some(PathBuf::from("/keys")),
        };
        assert_eq!(
            key_directories(&args),
            vec![PathBuf::from("/keys/Cik"), PathBuf::from("Cik")]
        );
        assert_eq!(key_directories(&KeyArgs::default()), vec![PathBuf::from("Cik")]);
    }

    #[test]
    fn test_resolve_from_keys_dir() {
        let root = TempDir::new().unwrap();
        let cik_dir = root.path().join(CIK_DIR_NAME);
        std::fs::create_dir(&cik_dir).unwrap();

        let wanted = sample_key(0x42);
        write_key(&cik_dir, "wanted.cik", &wanted);
        write_key(&cik_dir, "other.cik", &sample_key(0x24));
        std::fs::write(cik_dir.join("short.cik"), [0u8; 12]).unwrap();

        let args = KeyArgs {
            cik: None,
            keys_dir: Some(root.path().to_path_buf()),
        };
        let key = resolve_key(&args, wanted.id).unwrap();
        assert_eq!(key, Some(wanted));

        let missing = Uuid::from_bytes([0x99; 16]);
        assert_eq!(resolve_key(&args, missing).unwrap(), None);
        assert!(matches!(
            require_key(&args, missing),
            Err(ConfigError::KeyNotFound(id)) if id == missing
        ));
    }

    #[test]
    fn test_explicit_cik_overrides_key_id() {
        let root = TempDir::new().unwrap();
        let key = sample_key(0x07);
        let path = write_key(root.path(), "any-name.cik", &key);

        let args = KeyArgs {
            cik: Some(path),
            keys_dir: None,
        };
        let resolved = resolve_key(&args, Uuid::nil()).unwrap();
        assert_eq!(resolved, Some(key));
    }

    #[test]
    fn test_nil_key_id_needs_no_key() {
        assert_eq!(resolve_key(&KeyArgs::default(), Uuid::nil()).unwrap(), None);
    }

    #[test]
    fn test_unreadable_explicit_cik() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("broken.cik");
        std::fs::write(&path, [1u8; 47]).unwrap();

        let args = KeyArgs {
            cik: Some(path),
            keys_dir: None,
        };
        assert!(matches!(
            resolve_key(&args, Uuid::nil()),
            Err(ConfigError::KeyFile { .. })
        ));
    }
}
