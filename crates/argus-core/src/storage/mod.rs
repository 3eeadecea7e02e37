pub mod local_backend;

use crate::error::Result;

/// Kinds of objects stored on a backend, each mapped to its own key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// The unencrypted repository configuration, a single object.
    Config,
    /// Index files mapping blob ids to pack locations.
    Index,
    /// Snapshot descriptors.
    Snapshot,
    /// Pack files holding data and tree blobs.
    Data,
}

impl FileKind {
    /// Key-space prefix for listing objects of this kind.
    pub fn prefix(self) -> &'static str {
        match self {
            FileKind::Config => "config",
            FileKind::Index => "indexes/",
            FileKind::Snapshot => "snapshots/",
            FileKind::Data => "packs/",
        }
    }

    /// Full storage key for the object with the given hex id.
    ///
    /// Packs are sharded by their first id byte to keep directory fan-out
    /// manageable on filesystem backends.
    pub fn key(self, id_hex: &str) -> String {
        match self {
            FileKind::Config => "config".to_string(),
            FileKind::Index => format!("indexes/{id_hex}"),
            FileKind::Snapshot => format!("snapshots/{id_hex}"),
            FileKind::Data => {
                let shard = id_hex.get(..2).unwrap_or(id_hex);
                format!("packs/{shard}/{id_hex}")
            }
        }
    }
}

/// Abstract key-value storage for repository objects.
/// Keys are `/`-separated string paths (e.g. "packs/ab/ab01cd02...").
pub trait Backend: Send + Sync {
    /// Read an object by key. Returns `None` if not found.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write an object. Overwrites if it already exists.
    fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Delete an object.
    fn delete(&self, key: &str) -> Result<()>;

    /// Check if an object exists.
    fn exists(&self, key: &str) -> Result<bool>;

    /// List all keys under a prefix. Returns full key paths.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Read a byte range from an object. Returns `None` if not found.
    ///
    /// When the key exists, the returned `Vec<u8>` **must** contain exactly
    /// `length` bytes. A short read is an error, not a silent truncation.
    fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Option<Vec<u8>>>;

    /// List the hex ids of every object of the given kind.
    fn list_kind(&self, kind: FileKind) -> Result<Vec<String>> {
        let keys = self.list(kind.prefix())?;
        Ok(keys
            .into_iter()
            .filter_map(|key| key.rsplit('/').next().map(str::to_string))
            .collect())
    }

    /// Test whether the object of the given kind and hex id exists.
    fn test(&self, kind: FileKind, id_hex: &str) -> Result<bool> {
        self.exists(&kind.key(id_hex))
    }
}
