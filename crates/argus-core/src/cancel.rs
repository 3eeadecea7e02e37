use crossbeam_channel::{bounded, never, Receiver, Sender, TryRecvError};

/// Cooperative cancellation shared by worker pools and pipeline stages.
///
/// Dropping (or explicitly firing) the guard closes the underlying channel,
/// which makes every clone of the paired [`CancelSignal`] report cancelled.
/// The signal exposes its receiver half so blocked workers can wait on it
/// inside `crossbeam_channel::select!` loops.
pub fn token() -> (CancelGuard, CancelSignal) {
    let (tx, rx) = bounded::<()>(0);
    (CancelGuard { _tx: tx }, CancelSignal { rx })
}

/// Owning half of a cancellation token. Drop it to cancel.
pub struct CancelGuard {
    _tx: Sender<()>,
}

impl CancelGuard {
    /// Cancel by consuming the guard.
    pub fn cancel(self) {}
}

/// Observing half of a cancellation token.
#[derive(Clone)]
pub struct CancelSignal {
    rx: Receiver<()>,
}

impl CancelSignal {
    /// A signal that never fires, for operations run without a caller token.
    pub fn never() -> Self {
        CancelSignal { rx: never() }
    }

    /// Non-blocking check, for polling between blocking operations.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Receiver for use in `select!` arms; becomes ready once cancelled.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_cancelled_while_guard_alive() {
        let (guard, signal) = token();
        assert!(!signal.is_cancelled());
        drop(guard);
        assert!(signal.is_cancelled());
    }

    #[test]
    fn explicit_cancel_fires_all_clones() {
        let (guard, signal) = token();
        let other = signal.clone();
        guard.cancel();
        assert!(signal.is_cancelled());
        assert!(other.is_cancelled());
    }

    #[test]
    fn never_signal_stays_quiet() {
        let signal = CancelSignal::never();
        assert!(!signal.is_cancelled());
    }

    #[test]
    fn receiver_unblocks_select_on_cancel() {
        let (guard, signal) = token();
        let handle = std::thread::spawn(move || {
            crossbeam_channel::select! {
                recv(signal.receiver()) -> _ => true,
            }
        });
        guard.cancel();
        assert!(handle.join().unwrap());
    }
}
