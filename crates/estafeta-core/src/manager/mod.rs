use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ManagerError, Result};
use crate::store::MessageStore;

mod ops;
mod tx;

#[cfg(test)]
mod tests;

use tx::TxRecord;

/// Queue-manager tuning knobs.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Cadence at which the reaper scans for transactions past their
    /// deadline.
    pub reap_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            reap_interval: Duration::from_secs(30),
        }
    }
}

/// Shared mutable manager state, guarded by the manager lock.
///
/// The lock set and the transaction table must move together: a staged
/// delete owns its message lock until the transaction resolves.
struct Inner {
    /// Message ids currently held by some in-flight get. A locked
    /// message is invisible to all other getters.
    locked: HashSet<Uuid>,
    transactions: HashMap<Uuid, TxRecord>,
}

/// The queue manager: concurrency control, transaction lifecycle,
/// in-flight message locking, expiration/redelivery policy, and
/// dead-letter routing, on top of a [`MessageStore`].
///
/// Clients run concurrently; a single coarse manager lock protects the
/// lock set, the transaction table, and indexed reads into the store.
/// Critical sections are short — nothing ever blocks waiting for a
/// message to arrive.
pub struct Manager {
    store: Arc<dyn MessageStore>,
    inner: Mutex<Inner>,
    reaper_stop: Sender<()>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager").finish_non_exhaustive()
    }
}

/// Process-wide active manager slot. At most one manager may be active
/// per process.
static ACTIVE: Mutex<Option<Arc<Manager>>> = Mutex::new(None);

impl Manager {
    /// Activate the store and bring up a manager without registering
    /// it process-wide. Prefer [`Manager::start`] outside of tests and
    /// embedded setups.
    pub fn open(store: Arc<dyn MessageStore>, config: ManagerConfig) -> Result<Arc<Manager>> {
        store.activate()?;

        let (reaper_stop, stop_rx) = crossbeam_channel::bounded(1);
        let manager = Arc::new(Manager {
            store,
            inner: Mutex::new(Inner {
                locked: HashSet::new(),
                transactions: HashMap::new(),
            }),
            reaper_stop,
            reaper: Mutex::new(None),
        });

        let weak = Arc::downgrade(&manager);
        let interval = config.reap_interval;
        let spawned = thread::Builder::new()
            .name("estafeta-reaper".to_string())
            .spawn(move || reaper_loop(weak, stop_rx, interval));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                let _ = manager.store.deactivate();
                return Err(ManagerError::Store(crate::error::StoreError::Unavailable(
                    format!("cannot spawn reaper thread: {err}"),
                )));
            }
        };
        *manager.reaper.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        info!("queue manager started");
        Ok(manager)
    }

    /// Start the process-wide manager. Fails with
    /// [`ManagerError::ManagerAlreadyStarted`] when one is active.
    pub fn start(store: Arc<dyn MessageStore>, config: ManagerConfig) -> Result<Arc<Manager>> {
        let mut slot = ACTIVE.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(ManagerError::ManagerAlreadyStarted);
        }
        let manager = Manager::open(store, config)?;
        *slot = Some(Arc::clone(&manager));
        Ok(manager)
    }

    /// Stop the process-wide manager: abort in-flight transactions,
    /// join the reaper, deactivate the store, clear the slot.
    pub fn stop() -> Result<()> {
        let manager = {
            let mut slot = ACTIVE.lock().unwrap_or_else(PoisonError::into_inner);
            slot.take().ok_or(ManagerError::ManagerNotStarted)?
        };
        manager.shutdown();
        Ok(())
    }

    /// Wind the manager down. Idempotent; also runs from `Drop` as a
    /// backstop when `stop`/`shutdown` were never called.
    pub fn shutdown(&self) {
        let _ = self.reaper_stop.try_send(());
        self.join_reaper();

        let open: Vec<Uuid> = {
            let inner = self.lock_inner();
            inner.transactions.keys().copied().collect()
        };
        for tid in open {
            if let Err(err) = self.abort(tid) {
                warn!(%tid, error = %err, "failed to abort transaction during shutdown");
            }
        }

        if let Err(err) = self.store.deactivate() {
            warn!(error = %err, "failed to deactivate store during shutdown");
        }
        info!("queue manager stopped");
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join the reaper thread unless we *are* the reaper thread — that
    /// happens when it drops the last `Arc<Manager>` after a reap pass.
    fn join_reaper(&self) {
        if let Some(handle) = self
            .reaper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    /// Abort every transaction past its deadline. Errors on individual
    /// transactions are logged and skipped so one bad abort cannot
    /// stall the reaper.
    fn reap_expired(&self) {
        let now = std::time::Instant::now();
        let expired: Vec<Uuid> = {
            let inner = self.lock_inner();
            inner
                .transactions
                .iter()
                .filter(|(_, tx)| tx.deadline <= now)
                .map(|(tid, _)| *tid)
                .collect()
        };
        for tid in expired {
            warn!(%tid, "transaction deadline passed, aborting");
            if let Err(err) = self.abort(tid) {
                warn!(%tid, error = %err, "failed to abort expired transaction");
            }
        }
    }

}

impl Drop for Manager {
    fn drop(&mut self) {
        // If shutdown wasn't called explicitly, stop the reaper so the
        // thread doesn't outlive the manager.
        let _ = self.reaper_stop.try_send(());
        self.join_reaper();
    }
}

fn reaper_loop(manager: Weak<Manager>, stop: Receiver<()>, interval: Duration) {
    loop {
        match stop.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.reap_expired();
            }
        }
    }
}
