use std::path::Path;

use chrono::Utc;

use argus_core::cancel;
use argus_core::checker::{Checker, PackError, StructureError};
use argus_core::error::ArgusError;
use argus_core::index::codec::save_index;
use argus_core::index::{BlobKind, Index};
use argus_core::repo::pack::PackWriter;
use argus_core::repo::{EncryptionMode, Repository};
use argus_core::snapshot::Snapshot;
use argus_core::storage::local_backend::LocalBackend;
use argus_core::tree::{Node, Tree};
use argus_types::id::Id;

fn local_backend(repo_dir: &Path) -> Box<LocalBackend> {
    Box::new(LocalBackend::new(repo_dir).unwrap())
}

fn snapshot(tree: Option<Id>) -> Snapshot {
    Snapshot {
        time: Utc::now(),
        hostname: "it-host".into(),
        username: "it-user".into(),
        paths: vec!["/srv/data".into()],
        tree,
    }
}

/// Write two snapshots that share a subtree, plus their index.
/// Returns (shared subtree id, pack id).
fn populate_repo(repo: &Repository) -> (Id, Id) {
    let mut writer = PackWriter::new();
    let mut index = Index::new();

    let blob_a = repo
        .store_blob(&mut writer, BlobKind::Data, b"integration payload a")
        .unwrap();
    let blob_b = repo
        .store_blob(&mut writer, BlobKind::Data, b"integration payload b")
        .unwrap();
    let shared = repo
        .store_tree(
            &mut writer,
            &Tree::new(vec![
                Node::file("a.bin", vec![blob_a]),
                Node::file("b.bin", vec![blob_b]),
            ]),
        )
        .unwrap();
    for name in ["first", "second"] {
        let root = repo
            .store_tree(&mut writer, &Tree::new(vec![Node::dir(name, Some(shared))]))
            .unwrap();
        repo.save_snapshot(&snapshot(Some(root))).unwrap();
    }

    let pack = repo.flush_pack(writer, &mut index).unwrap();
    save_index(repo, &index).unwrap();
    (shared, pack)
}

fn collect_structure(checker: &Checker<'_>) -> Vec<StructureError> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let (_guard, signal) = cancel::token();
    checker.structure(tx, &signal);
    rx.iter().collect()
}

fn collect_packs(checker: &mut Checker<'_>) -> Vec<PackError> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let (_guard, signal) = cancel::token();
    checker.packs(tx, &signal);
    rx.iter().collect()
}

#[test]
fn clean_repository_passes_all_checks() {
    let tmp = tempfile::tempdir().unwrap();
    let repo = Repository::init(local_backend(tmp.path()), EncryptionMode::None, None).unwrap();
    populate_repo(&repo);

    // Re-open from disk to exercise the full load path.
    let repo = Repository::open(local_backend(tmp.path()), None).unwrap();
    let mut checker = Checker::new(&repo);
    checker.load_index().unwrap();

    assert!(collect_structure(&checker).is_empty());
    assert!(collect_packs(&mut checker).is_empty());
    assert!(checker.unused_blobs().is_empty());
    assert!(checker.orphaned_packs().is_empty());
}

#[test]
fn missing_pack_file_is_detected() {
    let tmp = tempfile::tempdir().unwrap();
    let repo = Repository::init(local_backend(tmp.path()), EncryptionMode::None, None).unwrap();
    let (_shared, pack) = populate_repo(&repo);

    let pack_path = tmp
        .path()
        .join("packs")
        .join(pack.shard_prefix())
        .join(pack.to_hex());
    assert!(pack_path.exists());
    std::fs::remove_file(pack_path).unwrap();

    let repo = Repository::open(local_backend(tmp.path()), None).unwrap();
    let mut checker = Checker::new(&repo);
    checker.load_index().unwrap();

    let errs = collect_packs(&mut checker);
    assert_eq!(errs.len(), 1);
    assert_eq!(errs[0].id, pack);
    assert!(!errs[0].orphaned);
    assert!(errs[0].to_string().contains("does not exist"));
}

#[test]
fn stray_pack_file_is_detected_as_orphan() {
    let tmp = tempfile::tempdir().unwrap();
    let repo = Repository::init(local_backend(tmp.path()), EncryptionMode::None, None).unwrap();
    populate_repo(&repo);

    let stray = Id::hash(b"stray pack bytes");
    let stray_dir = tmp.path().join("packs").join(stray.shard_prefix());
    std::fs::create_dir_all(&stray_dir).unwrap();
    std::fs::write(stray_dir.join(stray.to_hex()), b"not really a pack").unwrap();

    let repo = Repository::open(local_backend(tmp.path()), None).unwrap();
    let mut checker = Checker::new(&repo);
    checker.load_index().unwrap();

    let errs = collect_packs(&mut checker);
    assert_eq!(errs.len(), 1);
    assert_eq!(errs[0].id, stray);
    assert!(errs[0].orphaned);
    assert_eq!(checker.orphaned_packs(), &[stray]);
}

#[test]
fn shared_subtree_is_not_reported_twice_when_broken() {
    let tmp = tempfile::tempdir().unwrap();
    let repo = Repository::init(local_backend(tmp.path()), EncryptionMode::None, None).unwrap();

    let mut writer = PackWriter::new();
    let mut index = Index::new();
    let missing = Id::hash(b"this blob was never written");
    let broken = repo
        .store_tree(
            &mut writer,
            &Tree::new(vec![Node::file("gone.bin", vec![missing])]),
        )
        .unwrap();
    for name in ["left", "right"] {
        let root = repo
            .store_tree(&mut writer, &Tree::new(vec![Node::dir(name, Some(broken))]))
            .unwrap();
        repo.save_snapshot(&snapshot(Some(root))).unwrap();
    }
    repo.flush_pack(writer, &mut index).unwrap();
    save_index(&repo, &index).unwrap();

    let repo = Repository::open(local_backend(tmp.path()), None).unwrap();
    let mut checker = Checker::new(&repo);
    checker.load_index().unwrap();

    let errs = collect_structure(&checker);
    let tree_errs: Vec<_> = errs
        .iter()
        .filter_map(|e| match e {
            StructureError::Tree(t) => Some(t),
            _ => None,
        })
        .collect();
    assert_eq!(tree_errs.len(), 1, "diamond must be checked once: {errs:?}");
    assert_eq!(tree_errs[0].id, broken);
}

#[test]
fn encrypted_repository_end_to_end() {
    let tmp = tempfile::tempdir().unwrap();
    let repo = Repository::init(
        local_backend(tmp.path()),
        EncryptionMode::Chacha20Poly1305,
        Some("integration passphrase"),
    )
    .unwrap();
    populate_repo(&repo);

    // Wrong passphrase must not open the repository.
    let err =
        Repository::open(local_backend(tmp.path()), Some("wrong passphrase")).unwrap_err();
    assert!(matches!(err, ArgusError::DecryptionFailed));

    // Correct passphrase checks clean.
    let repo =
        Repository::open(local_backend(tmp.path()), Some("integration passphrase")).unwrap();
    let mut checker = Checker::new(&repo);
    checker.load_index().unwrap();
    assert!(collect_structure(&checker).is_empty());
    assert!(collect_packs(&mut checker).is_empty());
    assert!(checker.unused_blobs().is_empty());
}

#[test]
fn tree_loads_require_installed_index() {
    let tmp = tempfile::tempdir().unwrap();
    let repo = Repository::init(local_backend(tmp.path()), EncryptionMode::None, None).unwrap();
    let (shared, _pack) = populate_repo(&repo);

    // A freshly opened repository has an empty master index.
    let repo = Repository::open(local_backend(tmp.path()), None).unwrap();
    assert!(matches!(
        repo.load_tree(&shared).unwrap_err(),
        ArgusError::BlobNotFound(_)
    ));

    let mut checker = Checker::new(&repo);
    checker.load_index().unwrap();
    let tree = repo.load_tree(&shared).unwrap();
    assert_eq!(tree.nodes.len(), 2);
}
