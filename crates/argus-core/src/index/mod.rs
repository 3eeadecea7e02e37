pub mod codec;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use argus_types::id::Id;

/// Whether a blob holds file content or a serialized directory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlobKind {
    Data,
    Tree,
}

/// Location of a single blob inside a pack file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub pack_id: Id,
    pub kind: BlobKind,
    pub offset: u64,
    pub length: u64,
}

/// In-memory index mapping blob ids to their pack location.
///
/// A single index file never contains duplicate blob ids. Merging indexes
/// that both know a blob keeps the later location; the blob's existence is
/// what downstream consumers rely on.
#[derive(Debug, Clone, Default)]
pub struct Index {
    entries: HashMap<Id, IndexEntry>,
}

impl Index {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
        }
    }

    /// Record a blob's location. Overwrites any previous location.
    pub fn insert(&mut self, blob_id: Id, entry: IndexEntry) {
        self.entries.insert(blob_id, entry);
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.entries.contains_key(id)
    }

    pub fn lookup(&self, id: &Id) -> Option<&IndexEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all entries. The iterator is pull-based; a consumer
    /// that needs to abandon the walk simply stops pulling.
    pub fn iter(&self) -> impl Iterator<Item = (&Id, &IndexEntry)> {
        self.entries.iter()
    }

    /// Merge another index into this one. Last writer wins on duplicates.
    pub fn merge(&mut self, other: &Index) {
        for (id, entry) in other.iter() {
            self.entries.insert(*id, *entry);
        }
    }

    /// Count distinct pack ids across all entries.
    pub fn count_distinct_packs(&self) -> usize {
        let packs: std::collections::HashSet<Id> =
            self.entries.values().map(|e| e.pack_id).collect();
        packs.len()
    }
}
