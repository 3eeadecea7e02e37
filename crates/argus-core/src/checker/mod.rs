use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{bounded, select, Receiver, Sender};
use thiserror::Error;
use tracing::{debug, warn};

use argus_types::id::Id;

use crate::cancel::CancelSignal;
use crate::error::{ArgusError, Result};
use crate::index::codec::{convert_index, decode_index, load_index_with_decoder};
use crate::index::Index;
use crate::repo::parallel::{files_in_parallel, DEFAULT_PARALLELISM};
use crate::repo::Repository;
use crate::storage::FileKind;
use crate::tree::{NodeType, Tree};

/// Runs consistency checks on a repository.
///
/// A `Checker` only tests for internal errors within the data structures of
/// the repository (e.g. missing blobs) and needs a valid [`Repository`] to
/// work on. It never reads blob payloads back; content verification is a
/// separate pass.
///
/// Lifecycle: [`Checker::load_index`] populates the pack/blob sets and
/// installs the merged master index on the repository, then
/// [`Checker::packs`] and [`Checker::structure`] stream findings into the
/// caller's sinks, and [`Checker::unused_blobs`] / [`Checker::orphaned_packs`]
/// report the leftovers.
pub struct Checker<'r> {
    packs: HashSet<Id>,
    blobs: HashSet<Id>,
    blob_refs: Mutex<HashMap<Id, u32>>,
    indexes: HashMap<Id, Index>,
    orphaned_packs: Vec<Id>,

    master_index: Arc<Index>,

    repo: &'r Repository,
}

/// An error with a specific pack.
#[derive(Debug, Error)]
#[error("pack {id}: {err}")]
pub struct PackError {
    pub id: Id,
    /// True when the pack exists on the backend but no index references it.
    pub orphaned: bool,
    pub err: ArgusError,
}

/// Aggregated failures for a single tree.
#[derive(Debug, Error)]
#[error("tree {id}: {} errors", .errors.len())]
pub struct TreeError {
    pub id: Id,
    pub errors: Vec<NodeError>,
}

/// A single structural problem found while checking a tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    #[error("tree {tree_id}: node {node} is dir but has no subtree")]
    DirWithoutSubtree { tree_id: Id, node: usize },

    #[error("tree {tree_id}, blob {blob_id}: not found in index")]
    BlobNotInIndex { tree_id: Id, blob_id: Id },

    #[error("tree {tree_id}: {message}")]
    LoadFailed { tree_id: Id, message: String },
}

/// Errors streamed by [`Checker::structure`].
#[derive(Debug, Error)]
pub enum StructureError {
    /// Loading or decoding a snapshot failed.
    #[error("snapshot {name}: {err}")]
    Snapshot { name: String, err: ArgusError },

    /// A snapshot record carries no tree root.
    #[error("snapshot {id} has no tree")]
    SnapshotWithoutTree { id: Id },

    /// Enumerating snapshots on the backend failed.
    #[error("listing snapshots: {0}")]
    SnapshotListing(ArgusError),

    /// Aggregated per-tree failures.
    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// A tree handed from the loader pool to the checker pool. Load failures
/// travel through the pipeline as jobs so they surface on the error sink
/// instead of silently truncating the walk.
struct TreeJob {
    id: Id,
    tree: Result<Tree>,
}

impl<'r> Checker<'r> {
    /// Returns a new checker which runs on `repo`.
    pub fn new(repo: &'r Repository) -> Self {
        Checker {
            packs: HashSet::new(),
            blobs: HashSet::new(),
            blob_refs: Mutex::new(HashMap::new()),
            indexes: HashMap::new(),
            orphaned_packs: Vec::new(),
            master_index: Arc::new(Index::new()),
            repo,
        }
    }

    /// Load all index files, merge them into the master index, and install
    /// it on the repository.
    ///
    /// Indexes load in parallel; a single consumer merges them so the
    /// shared sets never contend on a lock. A failure from any loader is
    /// fatal for the run, though state populated before the failure is
    /// kept for diagnostics.
    pub fn load_index(&mut self) -> Result<()> {
        debug!("loading indexes");
        let repo = self.repo;
        let (idx_tx, idx_rx) = bounded::<(Id, Index)>(0);

        let driver_result = std::thread::scope(|s| {
            let driver = s.spawn(move || {
                files_in_parallel(
                    repo.backend(),
                    FileKind::Index,
                    DEFAULT_PARALLELISM,
                    &CancelSignal::never(),
                    |id_str, _cancel| {
                        let (id, index) = load_or_convert_index(repo, id_str)?;
                        // A failed send means the consumer is gone; stop quietly.
                        let _ = idx_tx.send((id, index));
                        Ok(())
                    },
                )
            });

            let mut master = Index::new();
            for (id, index) in idx_rx.iter() {
                let mut cnt = 0;
                master.merge(&index);
                let mut refs = self.blob_refs.lock().unwrap();
                for (blob_id, entry) in index.iter() {
                    self.packs.insert(entry.pack_id);
                    self.blobs.insert(*blob_id);
                    refs.entry(*blob_id).or_insert(0);
                    cnt += 1;
                }
                drop(refs);
                debug!(index = %id, blobs = cnt, "merged index");
                self.indexes.insert(id, index);
            }

            let res = driver.join().expect("index loader thread panicked");
            (master, res)
        });

        let (master, result) = driver_result;
        self.master_index = Arc::new(master);
        self.repo.set_index(Arc::clone(&self.master_index));
        debug!(
            blobs = self.blobs.len(),
            packs = self.packs.len(),
            "indexes loaded"
        );

        result
    }

    /// Check that all packs referenced by an index are still present and
    /// that no packs exist outside every index. `errs` is closed after all
    /// packs have been examined.
    pub fn packs(&mut self, errs: Sender<PackError>, cancel: &CancelSignal) {
        debug!(count = self.packs.len(), "checking referenced packs");
        let mut seen: HashSet<Id> = HashSet::with_capacity(self.packs.len());
        let (id_tx, id_rx) = bounded::<Id>(0);

        let repo = self.repo;
        std::thread::scope(|s| {
            for _ in 0..DEFAULT_PARALLELISM {
                let id_rx = id_rx.clone();
                let errs = errs.clone();
                let cancel = cancel.clone();
                s.spawn(move || pack_id_tester(repo, id_rx, errs, cancel));
            }
            drop(id_rx);

            for &id in &self.packs {
                seen.insert(id);
                select! {
                    recv(cancel.receiver()) -> _ => break,
                    send(id_tx, id) -> res => {
                        if res.is_err() {
                            break;
                        }
                    }
                }
            }
            drop(id_tx);
        });
        debug!("pack probe workers finished");

        if cancel.is_cancelled() {
            return;
        }

        let listing = match self.repo.list(FileKind::Data) {
            Ok(listing) => listing,
            Err(err) => {
                warn!(%err, "listing backend packs failed; orphan detection skipped");
                return;
            }
        };
        for id in listing {
            if seen.contains(&id) {
                continue;
            }
            debug!(pack = %id, "pack not referenced by any index");
            self.orphaned_packs.push(id);
            let err = PackError {
                id,
                orphaned: true,
                err: ArgusError::Other("not referenced in any index".into()),
            };
            select! {
                recv(cancel.receiver()) -> _ => return,
                send(errs, err) -> res => {
                    if res.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Check that every data blob and subtree referenced from any snapshot
    /// is present in the index. `errs` is closed after all reachable trees
    /// have been traversed.
    ///
    /// Three stages cooperate: a filter task owning the backlog, a pool of
    /// tree loaders, and a pool of tree checkers that deduplicate shared
    /// subtrees through the blob reference counts.
    pub fn structure(&self, errs: Sender<StructureError>, cancel: &CancelSignal) {
        let (roots, snapshot_errs) = load_snapshot_tree_ids(self.repo, cancel);
        debug!(
            trees = roots.len(),
            errors = snapshot_errs.len(),
            "collected snapshot tree roots"
        );

        for err in snapshot_errs {
            select! {
                recv(cancel.receiver()) -> _ => return,
                send(errs, err) -> res => {
                    if res.is_err() {
                        return;
                    }
                }
            }
        }

        let (load_tx, load_rx) = bounded::<Id>(0);
        let (loaded_tx, loaded_rx) = bounded::<TreeJob>(0);
        let (check_tx, check_rx) = bounded::<TreeJob>(0);

        let repo = self.repo;
        std::thread::scope(|s| {
            for _ in 0..DEFAULT_PARALLELISM {
                let load_rx = load_rx.clone();
                let loaded_tx = loaded_tx.clone();
                let worker_cancel = cancel.clone();
                s.spawn(move || load_tree_worker(repo, load_rx, loaded_tx, worker_cancel));

                let check_rx = check_rx.clone();
                let errs = errs.clone();
                let worker_cancel = cancel.clone();
                s.spawn(move || self.check_tree_worker(check_rx, errs, worker_cancel));
            }
            drop(load_rx);
            drop(loaded_tx);
            drop(check_rx);

            filter_trees(roots, load_tx, loaded_rx, check_tx, cancel);
        });
    }

    /// Walk one tree's nodes, counting content blob references and
    /// recording structural problems.
    fn check_tree(&self, id: Id, tree: &Tree) -> Vec<NodeError> {
        debug!(tree = %id, "checking tree");
        let mut errors = Vec::new();
        let mut blobs = Vec::new();

        for (i, node) in tree.nodes.iter().enumerate() {
            match node.kind {
                NodeType::File => blobs.extend_from_slice(&node.content),
                NodeType::Dir => {
                    if node.subtree.is_none() {
                        errors.push(NodeError::DirWithoutSubtree { tree_id: id, node: i });
                    }
                }
                NodeType::Symlink => {}
            }
        }

        for blob_id in blobs {
            {
                let mut refs = self.blob_refs.lock().unwrap();
                let count = refs.entry(blob_id).or_insert(0);
                *count += 1;
                debug!(blob = %blob_id, refcount = *count, "blob referenced");
            }
            if !self.blobs.contains(&blob_id) {
                debug!(tree = %id, blob = %blob_id, "blob not in index");
                errors.push(NodeError::BlobNotInIndex {
                    tree_id: id,
                    blob_id,
                });
            }
        }

        errors
    }

    /// Checker-pool worker: deduplicates trees through the reference counts
    /// and streams per-tree findings to the caller's sink.
    fn check_tree_worker(
        &self,
        jobs: Receiver<TreeJob>,
        errs: Sender<StructureError>,
        cancel: CancelSignal,
    ) {
        for job in jobs.iter() {
            if cancel.is_cancelled() {
                return;
            }

            let already_checked = {
                let mut refs = self.blob_refs.lock().unwrap();
                let count = refs.entry(job.id).or_insert(0);
                let already = *count > 0;
                *count += 1;
                debug!(tree = %job.id, refcount = *count, "tree reference counted");
                already
            };
            if already_checked {
                continue;
            }

            let errors = match &job.tree {
                Ok(tree) => self.check_tree(job.id, tree),
                Err(err) => vec![NodeError::LoadFailed {
                    tree_id: job.id,
                    message: err.to_string(),
                }],
            };
            if errors.is_empty() {
                continue;
            }

            debug!(tree = %job.id, count = errors.len(), "tree has errors");
            let tree_err = StructureError::Tree(TreeError {
                id: job.id,
                errors,
            });
            select! {
                recv(cancel.receiver()) -> _ => return,
                send(errs, tree_err) -> res => {
                    if res.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// All indexed blobs that were never referenced during [`Checker::structure`].
    pub fn unused_blobs(&self) -> Vec<Id> {
        let refs = self.blob_refs.lock().unwrap();
        debug!(count = self.blobs.len(), "checking for unused blobs");
        self.blobs
            .iter()
            .filter(|id| refs.get(id).copied().unwrap_or(0) == 0)
            .copied()
            .collect()
    }

    /// Packs found on the backend without an index reference. Only
    /// populated after [`Checker::packs`] has run.
    pub fn orphaned_packs(&self) -> &[Id] {
        &self.orphaned_packs
    }
}

#[cfg(test)]
impl Checker<'_> {
    pub(crate) fn known_blobs(&self) -> &HashSet<Id> {
        &self.blobs
    }

    pub(crate) fn known_packs(&self) -> &HashSet<Id> {
        &self.packs
    }

    pub(crate) fn blob_ref_count(&self, id: &Id) -> u32 {
        self.blob_refs
            .lock()
            .unwrap()
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn index_count(&self) -> usize {
        self.indexes.len()
    }
}

/// Load one index file, converting it from the legacy format first if
/// needed. A legacy outcome on the converted file is a hard error.
fn load_or_convert_index(repo: &Repository, id_str: &str) -> Result<(Id, Index)> {
    match load_index_with_decoder(repo, id_str, decode_index) {
        Err(ArgusError::OldIndexFormat) => {
            let old_id =
                Id::from_hex(id_str).map_err(|e| ArgusError::InvalidId(id_str.to_string(), e))?;
            let new_id = convert_index(repo, &old_id)?;
            load_index_with_decoder(repo, &new_id.to_hex(), decode_index)
        }
        other => other,
    }
}

/// Pack-pool worker: probes pack existence on the backend and reports
/// missing or unreadable packs.
fn pack_id_tester(
    repo: &Repository,
    ids: Receiver<Id>,
    errs: Sender<PackError>,
    cancel: CancelSignal,
) {
    debug!("pack tester worker start");
    for id in ids.iter() {
        if cancel.is_cancelled() {
            return;
        }
        let err = match repo.backend().test(FileKind::Data, &id.to_hex()) {
            Ok(true) => {
                debug!(pack = %id, "pack exists");
                continue;
            }
            Ok(false) => ArgusError::Other("does not exist".into()),
            Err(e) => e,
        };
        debug!(pack = %id, %err, "error checking pack");
        let pack_err = PackError {
            id,
            orphaned: false,
            err,
        };
        select! {
            recv(cancel.receiver()) -> _ => return,
            send(errs, pack_err) -> res => {
                if res.is_err() {
                    return;
                }
            }
        }
    }
    debug!("pack tester worker done");
}

/// Load the root tree id referenced by one snapshot.
fn load_tree_from_snapshot(
    repo: &Repository,
    id: &Id,
) -> std::result::Result<Id, StructureError> {
    let snapshot = repo.load_snapshot(id).map_err(|err| {
        debug!(snapshot = %id, %err, "error loading snapshot");
        StructureError::Snapshot {
            name: id.to_hex(),
            err,
        }
    })?;
    match snapshot.tree {
        Some(tree) => Ok(tree),
        None => {
            debug!(snapshot = %id, "snapshot has no tree");
            Err(StructureError::SnapshotWithoutTree { id: *id })
        }
    }
}

/// Load every snapshot on the backend and return the tree roots plus any
/// per-snapshot failures. Failures never abort the overall walk.
fn load_snapshot_tree_ids(
    repo: &Repository,
    cancel: &CancelSignal,
) -> (Vec<Id>, Vec<StructureError>) {
    let trees: Mutex<Vec<Id>> = Mutex::new(Vec::new());
    let errs: Mutex<Vec<StructureError>> = Mutex::new(Vec::new());

    let result = files_in_parallel(
        repo.backend(),
        FileKind::Snapshot,
        DEFAULT_PARALLELISM,
        cancel,
        |id_str, _cancel| {
            let id = match Id::from_hex(id_str) {
                Ok(id) => id,
                Err(e) => {
                    errs.lock().unwrap().push(StructureError::Snapshot {
                        name: id_str.to_string(),
                        err: ArgusError::InvalidId(id_str.to_string(), e),
                    });
                    return Ok(());
                }
            };
            debug!(snapshot = %id, "loading snapshot");
            match load_tree_from_snapshot(repo, &id) {
                Ok(tree_id) => {
                    debug!(snapshot = %id, tree = %tree_id, "snapshot has tree");
                    trees.lock().unwrap().push(tree_id);
                }
                Err(err) => errs.lock().unwrap().push(err),
            }
            Ok(())
        },
    );
    if let Err(e) = result {
        errs.lock().unwrap().push(StructureError::SnapshotListing(e));
    }

    (trees.into_inner().unwrap(), errs.into_inner().unwrap())
}

/// Loader-pool worker: loads trees and forwards them as jobs, carrying any
/// load failure along.
fn load_tree_worker(
    repo: &Repository,
    ids: Receiver<Id>,
    out: Sender<TreeJob>,
    cancel: CancelSignal,
) {
    for id in ids.iter() {
        if cancel.is_cancelled() {
            return;
        }
        debug!(tree = %id, "loading tree");
        let tree = repo.load_tree(&id);
        let job = TreeJob { id, tree };
        select! {
            recv(cancel.receiver()) -> _ => return,
            send(out, job) -> res => {
                if res.is_err() {
                    return;
                }
            }
        }
    }
}

/// The filter stage: owns the backlog of tree ids, feeds the loader pool,
/// collects loaded trees, appends their subtrees to the backlog, and
/// forwards each job to the checker pool.
///
/// At most one job is in flight toward the checkers at a time; together
/// with the rendezvous channels this bounds the pipeline's memory to the
/// worker-pool width. Terminates once the backlog is empty with no
/// outstanding loads and no pending outbound job; dropping the stage
/// channels on return shuts the pools down.
fn filter_trees(
    roots: Vec<Id>,
    loader: Sender<Id>,
    loaded: Receiver<TreeJob>,
    out: Sender<TreeJob>,
    cancel: &CancelSignal,
) {
    let mut backlog: VecDeque<Id> = VecDeque::from(roots);
    let mut outstanding: usize = 0;
    let mut pending: Option<TreeJob> = None;

    loop {
        if pending.is_none() && backlog.is_empty() && outstanding == 0 {
            debug!("backlog drained, filter exiting");
            return;
        }

        match (pending.is_some(), backlog.front().copied()) {
            (true, Some(next_id)) => {
                select! {
                    recv(cancel.receiver()) -> _ => return,
                    send(loader, next_id) -> res => {
                        if res.is_err() {
                            return;
                        }
                        backlog.pop_front();
                        outstanding += 1;
                    }
                    send(out, pending.take().expect("pending job present")) -> res => {
                        if res.is_err() {
                            return;
                        }
                    }
                }
            }
            (true, None) => {
                select! {
                    recv(cancel.receiver()) -> _ => return,
                    send(out, pending.take().expect("pending job present")) -> res => {
                        if res.is_err() {
                            return;
                        }
                    }
                }
            }
            (false, Some(next_id)) => {
                select! {
                    recv(cancel.receiver()) -> _ => return,
                    send(loader, next_id) -> res => {
                        if res.is_err() {
                            return;
                        }
                        backlog.pop_front();
                        outstanding += 1;
                    }
                    recv(loaded) -> msg => {
                        match msg {
                            Ok(job) => {
                                outstanding -= 1;
                                if let Ok(tree) = &job.tree {
                                    backlog.extend(tree.subtrees());
                                }
                                pending = Some(job);
                            }
                            Err(_) => return,
                        }
                    }
                }
            }
            (false, None) => {
                select! {
                    recv(cancel.receiver()) -> _ => return,
                    recv(loaded) -> msg => {
                        match msg {
                            Ok(job) => {
                                outstanding -= 1;
                                if let Ok(tree) = &job.tree {
                                    backlog.extend(tree.subtrees());
                                }
                                pending = Some(job);
                            }
                            Err(_) => return,
                        }
                    }
                }
            }
        }
    }
}
