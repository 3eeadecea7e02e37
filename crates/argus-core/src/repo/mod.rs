pub mod format;
pub mod pack;
pub mod parallel;

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use argus_types::id::Id;

use crate::crypto::chacha20_poly1305::ChaCha20Poly1305Engine;
use crate::crypto::key::{EncryptedKey, MasterKey};
use crate::crypto::{CryptoEngine, PlaintextEngine};
use crate::error::{ArgusError, Result};
use crate::index::{BlobKind, Index};
use crate::snapshot::Snapshot;
use crate::storage::{Backend, FileKind};
use crate::tree::Tree;

use self::format::{pack_object, unpack_object, ObjectType};
use self::pack::{read_blob_from_pack, PackWriter, SealedPack};

/// Storage key for the unencrypted repository configuration.
const CONFIG_KEY: &str = "config";
/// Storage key for the encrypted master key.
const REPOKEY_KEY: &str = "keys/repokey";

/// Persisted (unencrypted) at the `config` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    pub version: u32,
    pub id: Vec<u8>, // 32 bytes
    pub encryption: EncryptionMode,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncryptionMode {
    None,
    Chacha20Poly1305,
}

/// A handle to an opened repository.
///
/// The installed master index sits behind a lock so tree loads can resolve
/// blob locations concurrently from checker worker pools.
pub struct Repository {
    storage: Arc<dyn Backend>,
    crypto: Arc<dyn CryptoEngine>,
    config: RepoConfig,
    index: RwLock<Arc<Index>>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Repository {
    /// Initialize a new repository on the given backend.
    pub fn init(
        storage: Box<dyn Backend>,
        encryption: EncryptionMode,
        passphrase: Option<&str>,
    ) -> Result<Self> {
        let storage: Arc<dyn Backend> = Arc::from(storage);

        if storage.exists(CONFIG_KEY)? {
            return Err(ArgusError::RepoAlreadyExists("repository".into()));
        }

        let mut repo_id = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut repo_id);

        let config = RepoConfig {
            version: 1,
            id: repo_id,
            encryption: encryption.clone(),
            created: Utc::now(),
        };

        let crypto: Arc<dyn CryptoEngine> = match &encryption {
            EncryptionMode::None => Arc::new(PlaintextEngine::new()),
            EncryptionMode::Chacha20Poly1305 => {
                let pass = passphrase.ok_or_else(|| {
                    ArgusError::Other("passphrase required for encrypted repository".into())
                })?;
                let master_key = MasterKey::generate();
                let enc_key = master_key.to_encrypted(pass)?;
                storage.put(REPOKEY_KEY, &rmp_serde::to_vec(&enc_key)?)?;
                Arc::new(ChaCha20Poly1305Engine::new(&master_key.encryption_key))
            }
        };

        storage.put(CONFIG_KEY, &rmp_serde::to_vec(&config)?)?;
        debug!(encryption = ?config.encryption, "initialized repository");

        Ok(Repository {
            storage,
            crypto,
            config,
            index: RwLock::new(Arc::new(Index::new())),
        })
    }

    /// Open an existing repository.
    pub fn open(storage: Box<dyn Backend>, passphrase: Option<&str>) -> Result<Self> {
        let storage: Arc<dyn Backend> = Arc::from(storage);

        let config_data = storage
            .get(CONFIG_KEY)?
            .ok_or_else(|| ArgusError::RepoNotFound("config not found".into()))?;
        let config: RepoConfig = rmp_serde::from_slice(&config_data)?;

        if config.version != 1 {
            return Err(ArgusError::UnsupportedVersion(config.version));
        }

        let crypto: Arc<dyn CryptoEngine> = match &config.encryption {
            EncryptionMode::None => Arc::new(PlaintextEngine::new()),
            EncryptionMode::Chacha20Poly1305 => {
                let key_data = storage
                    .get(REPOKEY_KEY)?
                    .ok_or_else(|| ArgusError::InvalidFormat("missing keys/repokey".into()))?;
                let enc_key: EncryptedKey = rmp_serde::from_slice(&key_data)?;
                let pass = passphrase.ok_or_else(|| {
                    ArgusError::Other("passphrase required for encrypted repository".into())
                })?;
                let master_key = MasterKey::from_encrypted(&enc_key, pass)?;
                Arc::new(ChaCha20Poly1305Engine::new(&master_key.encryption_key))
            }
        };

        Ok(Repository {
            storage,
            crypto,
            config,
            index: RwLock::new(Arc::new(Index::new())),
        })
    }

    pub fn backend(&self) -> &dyn Backend {
        self.storage.as_ref()
    }

    pub fn crypto(&self) -> &dyn CryptoEngine {
        self.crypto.as_ref()
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    /// Install the master index. Subsequent blob and tree loads resolve
    /// locations through it.
    pub fn set_index(&self, index: Arc<Index>) {
        *self.index.write().unwrap() = index;
    }

    /// The currently installed master index.
    pub fn index(&self) -> Arc<Index> {
        Arc::clone(&self.index.read().unwrap())
    }

    /// List the ids of every object of the given kind. Objects with
    /// malformed names are skipped with a warning.
    pub fn list(&self, kind: FileKind) -> Result<Vec<Id>> {
        let mut ids = Vec::new();
        for name in self.storage.list_kind(kind)? {
            match Id::from_hex(&name) {
                Ok(id) => ids.push(id),
                Err(err) => warn!(?kind, %name, %err, "skipping object with malformed name"),
            }
        }
        Ok(ids)
    }

    /// Load and decode a snapshot descriptor.
    pub fn load_snapshot(&self, id: &Id) -> Result<Snapshot> {
        let data = self
            .storage
            .get(&FileKind::Snapshot.key(&id.to_hex()))?
            .ok_or(ArgusError::SnapshotNotFound(*id))?;
        let payload = unpack_object(&data, ObjectType::Snapshot, id.as_bytes(), self.crypto())?;
        if Id::hash(&payload) != *id {
            return Err(ArgusError::InvalidFormat(format!(
                "snapshot {id}: payload does not match its id"
            )));
        }
        Ok(rmp_serde::from_slice(&payload)?)
    }

    /// Persist a snapshot descriptor under its content-addressed id.
    pub fn save_snapshot(&self, snapshot: &Snapshot) -> Result<Id> {
        let payload = rmp_serde::to_vec(snapshot)?;
        let id = Id::hash(&payload);
        let packed = pack_object(ObjectType::Snapshot, id.as_bytes(), &payload, self.crypto())?;
        self.storage
            .put(&FileKind::Snapshot.key(&id.to_hex()), &packed)?;
        debug!(snapshot = %id, "wrote snapshot");
        Ok(id)
    }

    /// Read a blob via the installed master index, verifying its id.
    pub fn load_blob(&self, id: &Id, kind: BlobKind) -> Result<Vec<u8>> {
        let entry = self
            .index()
            .lookup(id)
            .copied()
            .ok_or(ArgusError::BlobNotFound(*id))?;
        if entry.kind != kind {
            return Err(ArgusError::InvalidFormat(format!(
                "blob {id}: indexed as {:?}, requested as {kind:?}",
                entry.kind
            )));
        }
        let data = read_blob_from_pack(self.backend(), &entry.pack_id, entry.offset, entry.length)?;
        let payload = unpack_object(&data, ObjectType::Blob, id.as_bytes(), self.crypto())?;
        if Id::hash(&payload) != *id {
            return Err(ArgusError::InvalidFormat(format!(
                "blob {id}: payload does not match its id"
            )));
        }
        Ok(payload)
    }

    /// Load and decode a tree blob.
    pub fn load_tree(&self, id: &Id) -> Result<Tree> {
        let payload = self.load_blob(id, BlobKind::Tree)?;
        Ok(rmp_serde::from_slice(&payload)?)
    }

    /// Envelope a blob and queue it on a pack writer. Returns the blob id.
    pub fn store_blob(
        &self,
        writer: &mut PackWriter,
        kind: BlobKind,
        payload: &[u8],
    ) -> Result<Id> {
        let id = Id::hash(payload);
        let enveloped = pack_object(ObjectType::Blob, id.as_bytes(), payload, self.crypto())?;
        writer.add_blob(id, kind, enveloped);
        Ok(id)
    }

    /// Encode a tree and queue it on a pack writer. Returns the tree id.
    pub fn store_tree(&self, writer: &mut PackWriter, tree: &Tree) -> Result<Id> {
        let payload = rmp_serde::to_vec(tree)?;
        let id = Id::hash(&payload);
        let enveloped = pack_object(ObjectType::Blob, id.as_bytes(), &payload, self.crypto())?;
        writer.add_blob(id, BlobKind::Tree, enveloped);
        Ok(id)
    }

    /// Seal a pack writer, upload the pack, and fold its blob locations
    /// into `index`. Returns the pack id.
    pub fn flush_pack(&self, writer: PackWriter, index: &mut Index) -> Result<Id> {
        let SealedPack { id, data, entries } = writer.seal();
        self.storage.put(&FileKind::Data.key(&id.to_hex()), &data)?;
        debug!(pack = %id, blobs = entries.len(), bytes = data.len(), "wrote pack");
        for (blob_id, entry) in entries {
            index.insert(blob_id, entry);
        }
        Ok(id)
    }
}
