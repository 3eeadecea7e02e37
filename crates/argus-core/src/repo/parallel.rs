use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crossbeam_channel::bounded;
use tracing::debug;

use crate::cancel::CancelSignal;
use crate::error::{ArgusError, Result};
use crate::storage::{Backend, FileKind};

/// Default worker-pool width for backend-bound operations.
pub const DEFAULT_PARALLELISM: usize = 40;

/// List every object of `kind` on the backend and run `worker` over the
/// ids with a pool of `parallelism` threads.
///
/// Worker invocations run concurrently with no ordering guarantee. The
/// first worker failure stops dispatch of new ids, in-flight workers
/// drain, and that failure is returned. Cancellation also stops dispatch
/// but is not an error.
pub fn files_in_parallel<W>(
    backend: &dyn Backend,
    kind: FileKind,
    parallelism: usize,
    cancel: &CancelSignal,
    worker: W,
) -> Result<()>
where
    W: Fn(&str, &CancelSignal) -> Result<()> + Send + Sync,
{
    let ids = backend.list_kind(kind)?;
    debug!(?kind, count = ids.len(), "dispatching backend files");

    let failed = AtomicBool::new(false);
    let first_err: Mutex<Option<ArgusError>> = Mutex::new(None);
    let (id_tx, id_rx) = bounded::<String>(0);

    std::thread::scope(|s| {
        for _ in 0..parallelism {
            let id_rx = id_rx.clone();
            let failed = &failed;
            let first_err = &first_err;
            let worker = &worker;
            let cancel = cancel.clone();
            s.spawn(move || {
                for id in id_rx.iter() {
                    if cancel.is_cancelled() || failed.load(Ordering::Acquire) {
                        return;
                    }
                    if let Err(e) = worker(&id, &cancel) {
                        let mut slot = first_err.lock().unwrap();
                        if slot.is_none() {
                            *slot = Some(e);
                        }
                        failed.store(true, Ordering::Release);
                        return;
                    }
                }
            });
        }
        drop(id_rx);

        for id in ids {
            if cancel.is_cancelled() || failed.load(Ordering::Acquire) {
                break;
            }
            // Send fails once every worker has exited; nothing left to do.
            if id_tx.send(id).is_err() {
                break;
            }
        }
        drop(id_tx);
    });

    match first_err.into_inner().unwrap() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
