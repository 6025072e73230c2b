//! Content-instance key entries
//!
//! A key entry pairs a 16-byte key id with the two AES-128 halves of an
//! XTS key. On disk it is the 48-byte `.cik` blob: id, tweak key, data key.
//! Key ids are GUIDs stored in Microsoft mixed-endian byte order.

use binrw::{BinRead, BinWrite};
use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{CryptoError, Result};

/// Size of a serialized key entry (`.cik` file)
pub const KEY_ENTRY_SIZE: usize = 0x30;

/// An externally supplied (key id, tweak key, data key) triple
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct KeyEntry {
    /// Key identifier
    #[br(map = Uuid::from_bytes_le)]
    #[bw(map = |id: &Uuid| id.to_bytes_le())]
    pub id: Uuid,
    /// Key for the XTS tweak cipher
    pub tweak_key: [u8; 16],
    /// Key for the XTS data cipher
    pub data_key: [u8; 16],
}

impl KeyEntry {
    /// Create a key entry from its parts
    pub const fn new(id: Uuid, tweak_key: [u8; 16], data_key: [u8; 16]) -> Self {
        Self {
            id,
            tweak_key,
            data_key,
        }
    }

    /// Parse a 48-byte `.cik` blob
    pub fn from_cik_bytes(data: &[u8]) -> Result<Self> {
        if data.len() != KEY_ENTRY_SIZE {
            return Err(CryptoError::InvalidKeySize {
                expected: KEY_ENTRY_SIZE,
                actual: data.len(),
            });
        }
        Ok(Self::read(&mut Cursor::new(data))?)
    }

    /// Read a `.cik` file from disk
    pub fn from_cik_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Self::from_cik_bytes(&data)
    }

    /// Serialize back to the 48-byte `.cik` layout
    pub fn to_cik_bytes(&self) -> Result<[u8; KEY_ENTRY_SIZE]> {
        let mut cursor = Cursor::new(Vec::with_capacity(KEY_ENTRY_SIZE));
        self.write(&mut cursor)?;
        let mut out = [0u8; KEY_ENTRY_SIZE];
        out.copy_from_slice(cursor.get_ref());
        Ok(out)
    }

    /// Parse the two key halves from a 64-character hex string (tweak key first)
    pub fn from_hex(id: Uuid, hex: &str) -> Result<Self> {
        let bytes = hex::decode(hex.trim())
            .map_err(|e| CryptoError::InvalidKeyFormat(format!("invalid hex: {e}")))?;

        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeySize {
                expected: 32,
                actual: bytes.len(),
            });
        }

        let mut tweak_key = [0u8; 16];
        let mut data_key = [0u8; 16];
        tweak_key.copy_from_slice(&bytes[..16]);
        data_key.copy_from_slice(&bytes[16..]);
        Ok(Self::new(id, tweak_key, data_key))
    }
}

impl fmt::Display for KeyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}{}",
            self.id,
            hex::encode_upper(self.tweak_key),
            hex::encode_upper(self.data_key)
        )
    }
}

/// In-memory store of key entries by key id
#[derive(Debug, Clone, Default)]
pub struct KeyStore {
    keys: HashMap<Uuid, KeyEntry>,
}

impl KeyStore {
    /// Create an empty key store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key to the store, replacing any entry with the same id
    pub fn add(&mut self, entry: KeyEntry) {
        self.keys.insert(entry.id, entry);
    }

    /// Get a key by id
    pub fn get(&self, id: &Uuid) -> Option<&KeyEntry> {
        self.keys.get(id)
    }

    /// Get a key by id, failing when it is missing
    pub fn require(&self, id: &Uuid) -> Result<&KeyEntry> {
        self.get(id).ok_or(CryptoError::KeyNotFound(*id))
    }

    /// Remove a key from the store
    pub fn remove(&mut self, id: &Uuid) -> Option<KeyEntry> {
        self.keys.remove(id)
    }

    /// Number of keys in the store
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Load every `*.cik` file in `dir` (not recursive)
    ///
    /// Files with the wrong size or a nil key id are skipped with a warning.
    /// A missing directory loads nothing. Returns the number of keys added.
    pub fn load_cik_dir(&mut self, dir: impl AsRef<Path>) -> Result<usize> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            debug!("Key directory {} does not exist", dir.display());
            return Ok(0);
        }

        let mut loaded = 0;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("cik"))
            {
                continue;
            }

            match KeyEntry::from_cik_file(&path) {
                Ok(key) if key.id.is_nil() => {
                    warn!("CIK file {} has a nil key id, skipping", path.display());
                }
                Ok(key) => {
                    debug!("Loaded key {} from {}", key.id, path.display());
                    self.add(key);
                    loaded += 1;
                }
                Err(e) => {
                    warn!("CIK file {} is unusable ({e}), skipping", path.display());
                }
            }
        }

        Ok(loaded)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_cik() -> Vec<u8> {
        let mut data = Vec::with_capacity(KEY_ENTRY_SIZE);
        data.extend_from_slice(&[
            0x33, 0x22, 0x11, 0x00, 0x55, 0x44, 0x77, 0x66, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd,
            0xee, 0xff,
        ]);
        data.extend_from_slice(&[0x11; 16]);
        data.extend_from_slice(&[0x22; 16]);
        data
    }

    #[test]
    fn test_cik_layout() {
        let key = KeyEntry::from_cik_bytes(&sample_cik()).expect("valid cik");
        assert_eq!(
            key.id.to_string(),
            "00112233-4455-6677-8899-aabbccddeeff"
        );
        assert_eq!(key.tweak_key, [0x11; 16]);
        assert_eq!(key.data_key, [0x22; 16]);

        let rebuilt = key.to_cik_bytes().expect("serialize");
        assert_eq!(rebuilt.to_vec(), sample_cik());
    }

    #[test]
    fn test_cik_wrong_size() {
        let err = KeyEntry::from_cik_bytes(&[0u8; 32]).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::InvalidKeySize {
                expected: 48,
                actual: 32
            }
        ));
    }

    #[test]
    fn test_from_hex() {
        let id = Uuid::from_u128(1);
        let hex = format!("{}{}", "11".repeat(16), "22".repeat(16));
        let key = KeyEntry::from_hex(id, &hex).expect("valid hex");
        assert_eq!(key.tweak_key, [0x11; 16]);
        assert_eq!(key.data_key, [0x22; 16]);

        assert!(KeyEntry::from_hex(id, "abcd").is_err());
        assert!(KeyEntry::from_hex(id, "zz").is_err());
    }

    #[test]
    fn test_store_load_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("good.cik"), sample_cik()).expect("write");
        std::fs::write(dir.path().join("short.cik"), [0u8; 10]).expect("write");
        std::fs::write(dir.path().join("nil.cik"), [0u8; KEY_ENTRY_SIZE]).expect("write");
        std::fs::write(dir.path().join("other.bin"), sample_cik()).expect("write");

        let mut store = KeyStore::new();
        let loaded = store.load_cik_dir(dir.path()).expect("load");
        assert_eq!(loaded, 1);
        assert_eq!(store.len(), 1);

        let id = Uuid::parse_str("00112233-4455-6677-8899-aabbccddeeff").expect("uuid");
        assert!(store.get(&id).is_some());
        assert!(store.require(&Uuid::nil()).is_err());
    }

    #[test]
    fn test_store_missing_dir() {
        let mut store = KeyStore::new();
        let loaded = store
            .load_cik_dir("/nonexistent/xvdkit/keys")
            .expect("missing dir is not an error");
        assert_eq!(loaded, 0);
        assert!(store.is_empty());
    }
}
