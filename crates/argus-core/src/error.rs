use thiserror::Error;

use argus_types::id::Id;

pub type Result<T> = std::result::Result<T, ArgusError>;

#[derive(Debug, Error)]
pub enum ArgusError {
    #[error("repository not found: {0}")]
    RepoNotFound(String),

    #[error("repository already exists at '{0}'")]
    RepoAlreadyExists(String),

    #[error("decryption failed: wrong passphrase or corrupted data")]
    DecryptionFailed,

    #[error("key derivation error: {0}")]
    KeyDerivation(String),

    #[error("invalid repository format: {0}")]
    InvalidFormat(String),

    #[error("unknown object type tag: {0}")]
    UnknownObjectType(u8),

    #[error("unsupported repository version: {0}")]
    UnsupportedVersion(u32),

    #[error("index uses the legacy format and must be converted")]
    OldIndexFormat,

    #[error("blob {0} not found in index")]
    BlobNotFound(Id),

    #[error("index not found: {0}")]
    IndexNotFound(Id),

    #[error("snapshot not found: {0}")]
    SnapshotNotFound(Id),

    #[error("invalid object id '{0}': {1}")]
    InvalidId(String, String),

    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
