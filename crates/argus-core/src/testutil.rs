use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;

use argus_types::id::Id;

use crate::cancel;
use crate::checker::{Checker, PackError, StructureError};
use crate::error::{ArgusError, Result};
use crate::index::codec::{encode_legacy_index, save_index, save_index_payload};
use crate::index::{BlobKind, Index};
use crate::repo::pack::PackWriter;
use crate::repo::{EncryptionMode, Repository};
use crate::snapshot::Snapshot;
use crate::storage::Backend;
use crate::tree::Tree;

/// In-memory storage backend for testing. Thread-safe via Mutex.
pub struct MemoryBackend {
    data: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
        }
    }
}

impl Backend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let map = self.data.lock().unwrap();
        Ok(map.get(key).cloned())
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let mut map = self.data.lock().unwrap();
        map.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut map = self.data.lock().unwrap();
        map.remove(key);
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let map = self.data.lock().unwrap();
        Ok(map.contains_key(key))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let map = self.data.lock().unwrap();
        Ok(map
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Option<Vec<u8>>> {
        let map = self.data.lock().unwrap();
        match map.get(key) {
            Some(data) => {
                let start = offset as usize;
                let end = start + length as usize;
                if end > data.len() {
                    return Err(ArgusError::Other(format!(
                        "short read: {key} has {} bytes, requested {start}..{end}",
                        data.len()
                    )));
                }
                Ok(Some(data[start..end].to_vec()))
            }
            None => Ok(None),
        }
    }
}

/// Backend wrapper that delays every operation, for cancellation tests.
pub struct SlowBackend<B> {
    inner: B,
    delay: Duration,
}

impl<B> SlowBackend<B> {
    pub fn new(inner: B, delay: Duration) -> Self {
        Self { inner, delay }
    }

    fn pause(&self) {
        std::thread::sleep(self.delay);
    }
}

impl<B: Backend> Backend for SlowBackend<B> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.pause();
        self.inner.get(key)
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        self.inner.put(key, data)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.pause();
        self.inner.exists(key)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.pause();
        self.inner.list(prefix)
    }

    fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Option<Vec<u8>>> {
        self.pause();
        self.inner.get_range(key, offset, length)
    }
}

/// Builds a complete in-memory repository for checker tests: blobs and
/// trees accumulate in a pack writer, locations in an index, and
/// `finish()` persists both.
pub struct RepoBuilder {
    repo: Repository,
    writer: PackWriter,
    index: Index,
}

impl RepoBuilder {
    pub fn new() -> Self {
        Self::with_backend(Box::new(MemoryBackend::new()))
    }

    pub fn with_backend(backend: Box<dyn Backend>) -> Self {
        let repo = Repository::init(backend, EncryptionMode::None, None)
            .expect("failed to init test repo");
        Self {
            repo,
            writer: PackWriter::new(),
            index: Index::new(),
        }
    }

    pub fn store_data_blob(&mut self, payload: &[u8]) -> Id {
        self.repo
            .store_blob(&mut self.writer, BlobKind::Data, payload)
            .unwrap()
    }

    pub fn store_tree(&mut self, tree: &Tree) -> Id {
        self.repo.store_tree(&mut self.writer, tree).unwrap()
    }

    pub fn snapshot(&mut self, tree: Option<Id>) -> Id {
        let snapshot = Snapshot {
            time: Utc::now(),
            hostname: "testhost".into(),
            username: "tester".into(),
            paths: vec!["/data".into()],
            tree,
        };
        self.repo.save_snapshot(&snapshot).unwrap()
    }

    /// Seal the current pack and fold its blob locations into the index.
    /// Returns the pack id.
    pub fn flush_pack(&mut self) -> Id {
        let writer = std::mem::take(&mut self.writer);
        self.repo.flush_pack(writer, &mut self.index).unwrap()
    }

    /// Flush pending blobs, persist the index, and hand back the repository.
    pub fn finish(mut self) -> Repository {
        if self.writer.has_pending() {
            self.flush_pack();
        }
        save_index(&self.repo, &self.index).unwrap();
        self.repo
    }

    /// Like `finish`, but persists the index in the legacy wire format.
    /// Returns the repository and the legacy index file id.
    pub fn finish_legacy(mut self) -> (Repository, Id) {
        if self.writer.has_pending() {
            self.flush_pack();
        }
        let payload = encode_legacy_index(&self.index).unwrap();
        let id = save_index_payload(&self.repo, &payload).unwrap();
        (self.repo, id)
    }
}

/// Run `Checker::packs` to completion and collect the emitted errors.
pub fn run_packs(checker: &mut Checker<'_>) -> Vec<PackError> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let (_guard, cancel) = cancel::token();
    checker.packs(tx, &cancel);
    rx.iter().collect()
}

/// Run `Checker::structure` to completion and collect the emitted errors.
pub fn run_structure(checker: &Checker<'_>) -> Vec<StructureError> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let (_guard, cancel) = cancel::token();
    checker.structure(tx, &cancel);
    rx.iter().collect()
}
