use argus_types::id::Id;

use crate::error::{ArgusError, Result};
use crate::index::{BlobKind, IndexEntry};
use crate::storage::{Backend, FileKind};

/// Magic bytes at the start of every pack file.
pub const PACK_MAGIC: &[u8; 8] = b"ARGSPACK";
/// Pack format version.
pub const PACK_VERSION: u8 = 1;
/// Size of the pack header (magic + version byte).
pub const PACK_HEADER_SIZE: usize = 9;

/// A blob buffered in memory before the pack is sealed.
struct BufferedBlob {
    id: Id,
    kind: BlobKind,
    enveloped: Vec<u8>,
    offset: u64,
}

/// Accumulates enveloped blobs and seals them into a content-addressed
/// pack file. The blob locations are recorded by the caller in an index;
/// the pack itself carries no trailing directory.
#[derive(Default)]
pub struct PackWriter {
    buffer: Vec<BufferedBlob>,
    current_size: usize,
}

/// Result of sealing a pack: the serialized file plus the index entries
/// describing every blob it contains.
pub struct SealedPack {
    pub id: Id,
    pub data: Vec<u8>,
    pub entries: Vec<(Id, IndexEntry)>,
}

impl PackWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an enveloped blob. Returns the offset within the pack where the
    /// blob data starts (after the 4-byte length prefix).
    pub fn add_blob(&mut self, id: Id, kind: BlobKind, enveloped: Vec<u8>) -> u64 {
        let offset = PACK_HEADER_SIZE as u64 + self.current_size as u64 + 4;
        self.current_size += 4 + enveloped.len();
        self.buffer.push(BufferedBlob {
            id,
            kind,
            enveloped,
            offset,
        });
        offset
    }

    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Serialize the buffered blobs into a pack file and compute its id.
    pub fn seal(self) -> SealedPack {
        let mut data = Vec::with_capacity(PACK_HEADER_SIZE + self.current_size);
        data.extend_from_slice(PACK_MAGIC);
        data.push(PACK_VERSION);
        for blob in &self.buffer {
            data.extend_from_slice(&(blob.enveloped.len() as u32).to_be_bytes());
            data.extend_from_slice(&blob.enveloped);
        }

        let pack_id = Id::hash(&data);
        let entries = self
            .buffer
            .into_iter()
            .map(|blob| {
                (
                    blob.id,
                    IndexEntry {
                        pack_id,
                        kind: blob.kind,
                        offset: blob.offset,
                        length: blob.enveloped.len() as u64,
                    },
                )
            })
            .collect();

        SealedPack {
            id: pack_id,
            data,
            entries,
        }
    }
}

/// Read a single blob's bytes from a pack file via one ranged read.
pub fn read_blob_from_pack(
    backend: &dyn Backend,
    pack_id: &Id,
    offset: u64,
    length: u64,
) -> Result<Vec<u8>> {
    let key = FileKind::Data.key(&pack_id.to_hex());
    backend
        .get_range(&key, offset, length)?
        .ok_or_else(|| ArgusError::Other(format!("pack {pack_id} not found")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_assigns_sequential_offsets() {
        let mut writer = PackWriter::new();
        let off1 = writer.add_blob(Id::hash(b"a"), BlobKind::Data, vec![1, 2, 3]);
        let off2 = writer.add_blob(Id::hash(b"b"), BlobKind::Tree, vec![4, 5]);
        assert_eq!(off1, PACK_HEADER_SIZE as u64 + 4);
        assert_eq!(off2, off1 + 3 + 4);

        let sealed = writer.seal();
        assert_eq!(sealed.entries.len(), 2);
        assert_eq!(sealed.entries[0].1.length, 3);
        assert_eq!(sealed.entries[1].1.offset, off2);
        assert!(sealed.data.starts_with(PACK_MAGIC));
    }

    #[test]
    fn sealed_offsets_address_the_blob_bytes() {
        let mut writer = PackWriter::new();
        writer.add_blob(Id::hash(b"a"), BlobKind::Data, b"first".to_vec());
        writer.add_blob(Id::hash(b"b"), BlobKind::Data, b"second!".to_vec());
        let sealed = writer.seal();
        for (raw, (_, entry)) in [b"first".as_slice(), b"second!".as_slice()]
            .iter()
            .zip(&sealed.entries)
        {
            let start = entry.offset as usize;
            let end = start + entry.length as usize;
            assert_eq!(&sealed.data[start..end], *raw);
        }
    }

    #[test]
    fn pack_id_is_hash_of_file_bytes() {
        let mut writer = PackWriter::new();
        writer.add_blob(Id::hash(b"a"), BlobKind::Data, vec![9; 16]);
        let sealed = writer.seal();
        assert_eq!(sealed.id, Id::hash(&sealed.data));
        assert_eq!(sealed.entries[0].1.pack_id, sealed.id);
    }
}
