use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use argus_types::id::Id;

use crate::error::{ArgusError, Result};
use crate::index::{BlobKind, Index, IndexEntry};
use crate::repo::format::{pack_object, unpack_object, ObjectType};
use crate::repo::Repository;
use crate::storage::FileKind;

/// Current index wire format: version byte 2, blobs grouped by pack.
const INDEX_VERSION_CURRENT: u8 = 2;
/// Legacy index wire format: version byte 1, one flat record per blob.
const INDEX_VERSION_LEGACY: u8 = 1;

/// Decodes the plaintext payload of an index file.
pub type IndexDecoder = fn(&[u8]) -> Result<Index>;

#[derive(Serialize, Deserialize)]
struct IndexFile {
    packs: Vec<PackRecord>,
}

#[derive(Serialize, Deserialize)]
struct PackRecord {
    id: Id,
    blobs: Vec<BlobRecord>,
}

#[derive(Serialize, Deserialize)]
struct BlobRecord {
    id: Id,
    kind: BlobKind,
    offset: u64,
    length: u64,
}

#[derive(Serialize, Deserialize)]
struct LegacyBlobRecord {
    id: Id,
    kind: BlobKind,
    pack_id: Id,
    offset: u64,
    length: u64,
}

/// Decode a current-format index payload.
///
/// A legacy payload is reported as [`ArgusError::OldIndexFormat`]; the
/// caller is expected to run [`convert_index`] once and retry.
pub fn decode_index(payload: &[u8]) -> Result<Index> {
    match payload.first() {
        Some(&INDEX_VERSION_CURRENT) => {}
        Some(&INDEX_VERSION_LEGACY) => return Err(ArgusError::OldIndexFormat),
        Some(&v) => {
            return Err(ArgusError::InvalidFormat(format!(
                "unknown index format version {v}"
            )))
        }
        None => return Err(ArgusError::InvalidFormat("empty index payload".into())),
    }

    let file: IndexFile = rmp_serde::from_slice(&payload[1..])?;
    let mut index = Index::with_capacity(file.packs.iter().map(|p| p.blobs.len()).sum());
    for pack in file.packs {
        for blob in pack.blobs {
            index.insert(
                blob.id,
                IndexEntry {
                    pack_id: pack.id,
                    kind: blob.kind,
                    offset: blob.offset,
                    length: blob.length,
                },
            );
        }
    }
    Ok(index)
}

/// Decode a legacy-format index payload.
pub fn decode_legacy_index(payload: &[u8]) -> Result<Index> {
    match payload.first() {
        Some(&INDEX_VERSION_LEGACY) => {}
        Some(&v) => {
            return Err(ArgusError::InvalidFormat(format!(
                "expected legacy index, found format version {v}"
            )))
        }
        None => return Err(ArgusError::InvalidFormat("empty index payload".into())),
    }

    let records: Vec<LegacyBlobRecord> = rmp_serde::from_slice(&payload[1..])?;
    let mut index = Index::with_capacity(records.len());
    for record in records {
        index.insert(
            record.id,
            IndexEntry {
                pack_id: record.pack_id,
                kind: record.kind,
                offset: record.offset,
                length: record.length,
            },
        );
    }
    Ok(index)
}

/// Encode an index into the current wire format payload.
pub fn encode_index(index: &Index) -> Result<Vec<u8>> {
    let mut by_pack: std::collections::HashMap<Id, Vec<BlobRecord>> =
        std::collections::HashMap::new();
    for (blob_id, entry) in index.iter() {
        by_pack.entry(entry.pack_id).or_default().push(BlobRecord {
            id: *blob_id,
            kind: entry.kind,
            offset: entry.offset,
            length: entry.length,
        });
    }
    let mut packs: Vec<PackRecord> = by_pack
        .into_iter()
        .map(|(id, mut blobs)| {
            blobs.sort_by_key(|b| b.offset);
            PackRecord { id, blobs }
        })
        .collect();
    // Deterministic payload so equal indexes produce equal file ids.
    packs.sort_by_key(|p| p.id);

    let mut payload = vec![INDEX_VERSION_CURRENT];
    payload.extend_from_slice(&rmp_serde::to_vec(&IndexFile { packs })?);
    Ok(payload)
}

/// Encode an index into the legacy wire format payload.
///
/// The write path only produces current-format files; this exists so
/// migration behavior can be exercised against real legacy bytes.
pub fn encode_legacy_index(index: &Index) -> Result<Vec<u8>> {
    let mut records: Vec<LegacyBlobRecord> = index
        .iter()
        .map(|(blob_id, entry)| LegacyBlobRecord {
            id: *blob_id,
            kind: entry.kind,
            pack_id: entry.pack_id,
            offset: entry.offset,
            length: entry.length,
        })
        .collect();
    records.sort_by_key(|r| r.id);

    let mut payload = vec![INDEX_VERSION_LEGACY];
    payload.extend_from_slice(&rmp_serde::to_vec(&records)?);
    Ok(payload)
}

/// Write an index payload to the backend under its content-addressed id.
pub fn save_index_payload(repo: &Repository, payload: &[u8]) -> Result<Id> {
    let id = Id::hash(payload);
    let packed = pack_object(ObjectType::Index, id.as_bytes(), payload, repo.crypto())?;
    repo.backend().put(&FileKind::Index.key(&id.to_hex()), &packed)?;
    debug!(index = %id, bytes = packed.len(), "wrote index file");
    Ok(id)
}

/// Encode and persist an index in the current format. Returns the new file id.
pub fn save_index(repo: &Repository, index: &Index) -> Result<Id> {
    save_index_payload(repo, &encode_index(index)?)
}

/// Load one index file and decode it with the given decoder.
///
/// Verifies that the decrypted payload hashes back to the file id before
/// decoding.
pub fn load_index_with_decoder(
    repo: &Repository,
    id_str: &str,
    decoder: IndexDecoder,
) -> Result<(Id, Index)> {
    let id = Id::from_hex(id_str).map_err(|e| ArgusError::InvalidId(id_str.to_string(), e))?;
    let data = repo
        .backend()
        .get(&FileKind::Index.key(id_str))?
        .ok_or(ArgusError::IndexNotFound(id))?;
    let payload = unpack_object(&data, ObjectType::Index, id.as_bytes(), repo.crypto())?;
    if Id::hash(&payload) != id {
        return Err(ArgusError::InvalidFormat(format!(
            "index {id}: payload does not match its id"
        )));
    }
    let index = decoder(&payload)?;
    Ok((id, index))
}

/// One-shot migration of a legacy index file to the current format.
///
/// Writes the re-encoded index under a new content-addressed id, deletes
/// the legacy file, and returns the new id. This mutates the repository
/// during an otherwise read-only operation.
pub fn convert_index(repo: &Repository, id: &Id) -> Result<Id> {
    warn!(index = %id, "converting legacy index to current format; the repository will be modified");
    let (_, index) = load_index_with_decoder(repo, &id.to_hex(), decode_legacy_index)?;
    let new_id = save_index(repo, &index)?;
    repo.backend().delete(&FileKind::Index.key(&id.to_hex()))?;
    debug!(old = %id, new = %new_id, "index converted");
    Ok(new_id)
}
