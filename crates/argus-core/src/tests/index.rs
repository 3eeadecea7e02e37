use argus_types::id::Id;

use crate::error::ArgusError;
use crate::index::codec::{
    convert_index, decode_index, decode_legacy_index, encode_index, encode_legacy_index,
    load_index_with_decoder, save_index, save_index_payload,
};
use crate::index::{BlobKind, Index, IndexEntry};
use crate::repo::{EncryptionMode, Repository};
use crate::storage::FileKind;
use crate::testutil::MemoryBackend;

fn entry(pack: u8, kind: BlobKind, offset: u64, length: u64) -> IndexEntry {
    IndexEntry {
        pack_id: Id([pack; 32]),
        kind,
        offset,
        length,
    }
}

fn sample_index() -> Index {
    let mut index = Index::new();
    index.insert(Id::hash(b"blob-1"), entry(1, BlobKind::Data, 13, 100));
    index.insert(Id::hash(b"blob-2"), entry(1, BlobKind::Data, 117, 50));
    index.insert(Id::hash(b"tree-1"), entry(2, BlobKind::Tree, 13, 80));
    index
}

fn test_repo() -> Repository {
    Repository::init(Box::new(MemoryBackend::new()), EncryptionMode::None, None).unwrap()
}

#[test]
fn merge_last_writer_wins() {
    let mut a = Index::new();
    a.insert(Id::hash(b"blob"), entry(1, BlobKind::Data, 0, 10));

    let mut b = Index::new();
    b.insert(Id::hash(b"blob"), entry(2, BlobKind::Data, 99, 10));
    b.insert(Id::hash(b"other"), entry(2, BlobKind::Tree, 0, 20));

    a.merge(&b);
    assert_eq!(a.len(), 2);
    assert_eq!(a.lookup(&Id::hash(b"blob")).unwrap().pack_id, Id([2; 32]));
}

#[test]
fn merge_of_disjoint_indexes_keeps_both() {
    let mut a = Index::new();
    a.insert(Id::hash(b"a"), entry(1, BlobKind::Data, 0, 1));
    let mut b = Index::new();
    b.insert(Id::hash(b"b"), entry(2, BlobKind::Data, 0, 1));
    a.merge(&b);
    assert!(a.contains(&Id::hash(b"a")));
    assert!(a.contains(&Id::hash(b"b")));
    assert_eq!(a.count_distinct_packs(), 2);
}

#[test]
fn encode_decode_roundtrip() {
    let index = sample_index();
    let payload = encode_index(&index).unwrap();
    let decoded = decode_index(&payload).unwrap();
    assert_eq!(decoded.len(), index.len());
    for (id, entry) in index.iter() {
        assert_eq!(decoded.lookup(id), Some(entry));
    }
}

#[test]
fn encoding_is_deterministic() {
    let index = sample_index();
    assert_eq!(encode_index(&index).unwrap(), encode_index(&index).unwrap());
}

#[test]
fn decode_reports_legacy_format() {
    let payload = encode_legacy_index(&sample_index()).unwrap();
    let err = decode_index(&payload).unwrap_err();
    assert!(matches!(err, ArgusError::OldIndexFormat));
}

#[test]
fn decode_rejects_unknown_version() {
    let err = decode_index(&[9, 0, 0]).unwrap_err();
    assert!(matches!(err, ArgusError::InvalidFormat(_)));
}

#[test]
fn legacy_roundtrip() {
    let index = sample_index();
    let payload = encode_legacy_index(&index).unwrap();
    let decoded = decode_legacy_index(&payload).unwrap();
    assert_eq!(decoded.len(), index.len());
    for (id, entry) in index.iter() {
        assert_eq!(decoded.lookup(id), Some(entry));
    }
}

#[test]
fn legacy_decoder_rejects_current_format() {
    let payload = encode_index(&sample_index()).unwrap();
    assert!(decode_legacy_index(&payload).is_err());
}

#[test]
fn save_and_load_via_repo() {
    let repo = test_repo();
    let index = sample_index();
    let id = save_index(&repo, &index).unwrap();

    let (loaded_id, loaded) = load_index_with_decoder(&repo, &id.to_hex(), decode_index).unwrap();
    assert_eq!(loaded_id, id);
    assert_eq!(loaded.len(), index.len());
}

#[test]
fn load_rejects_tampered_payload() {
    let repo = test_repo();
    let id = save_index(&repo, &sample_index()).unwrap();

    let key = FileKind::Index.key(&id.to_hex());
    let mut data = repo.backend().get(&key).unwrap().unwrap();
    let last = data.len() - 1;
    data[last] ^= 0xFF;
    repo.backend().put(&key, &data).unwrap();

    let err = load_index_with_decoder(&repo, &id.to_hex(), decode_index).unwrap_err();
    assert!(
        err.to_string().contains("does not match its id"),
        "unexpected error: {err}"
    );
}

#[test]
fn load_missing_index_fails() {
    let repo = test_repo();
    let id = Id::hash(b"nonexistent");
    let err = load_index_with_decoder(&repo, &id.to_hex(), decode_index).unwrap_err();
    assert!(matches!(err, ArgusError::IndexNotFound(_)));
}

#[test]
fn convert_index_migrates_legacy_file() {
    let repo = test_repo();
    let index = sample_index();
    let legacy_payload = encode_legacy_index(&index).unwrap();
    let old_id = save_index_payload(&repo, &legacy_payload).unwrap();

    let new_id = convert_index(&repo, &old_id).unwrap();
    assert_ne!(new_id, old_id);

    // Old file is gone, the new one decodes in the current format.
    assert!(!repo
        .backend()
        .exists(&FileKind::Index.key(&old_id.to_hex()))
        .unwrap());
    let (_, converted) = load_index_with_decoder(&repo, &new_id.to_hex(), decode_index).unwrap();
    assert_eq!(converted.len(), index.len());
    for (id, entry) in index.iter() {
        assert_eq!(converted.lookup(id), Some(entry));
    }
}
