use std::time::{Duration, Instant};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ManagerError, Result};
use crate::store::{Batch, Delete, Destination, Insert};

use super::{Inner, Manager};

/// An open client transaction: staged puts and consumes plus the
/// deadline after which the reaper aborts it.
pub(super) struct TxRecord {
    pub(super) inserts: Vec<Insert>,
    pub(super) deletes: Vec<Delete>,
    pub(super) deadline: Instant,
}

impl Manager {
    /// Open a transaction. It must resolve (commit or abort) within
    /// `timeout` or the reaper aborts it.
    pub fn begin(&self, timeout: Duration) -> Result<Uuid> {
        if timeout.is_zero() {
            return Err(ManagerError::InvalidArgument(
                "transaction timeout must be positive".to_string(),
            ));
        }
        let tid = Uuid::now_v7();
        let mut inner = self.lock_inner();
        inner.transactions.insert(
            tid,
            TxRecord {
                inserts: Vec::new(),
                deletes: Vec::new(),
                deadline: Instant::now() + timeout,
            },
        );
        debug!(%tid, ?timeout, "transaction started");
        Ok(tid)
    }

    /// Apply the transaction's staged inserts and deletes through a
    /// single store transaction, then release the locks held by its
    /// deletes. A store failure forces an abort and surfaces as
    /// [`ManagerError::TransactionAborted`].
    pub fn commit(&self, tid: Uuid) -> Result<()> {
        let mut inner = self.lock_inner();
        let tx = inner
            .transactions
            .remove(&tid)
            .ok_or(ManagerError::NoSuchTransaction(tid))?;

        let batch = Batch {
            inserts: tx.inserts,
            deletes: tx.deletes.clone(),
            dead_letters: Vec::new(),
        };
        match self.store.transaction(batch) {
            Ok(()) => {
                for delete in &tx.deletes {
                    inner.locked.remove(&delete.id);
                }
                debug!(%tid, "transaction committed");
                Ok(())
            }
            Err(err) => {
                self.rollback_deletes(&mut inner, &tx.deletes);
                warn!(%tid, error = %err, "store failure during commit, transaction aborted");
                Err(ManagerError::TransactionAborted(err))
            }
        }
    }

    /// Discard the transaction. Staged inserts are never persisted;
    /// staged deletes release their locks and the deleted messages'
    /// redelivery counters are bumped so later consumers observe the
    /// retry count.
    pub fn abort(&self, tid: Uuid) -> Result<()> {
        let mut inner = self.lock_inner();
        let tx = inner
            .transactions
            .remove(&tid)
            .ok_or(ManagerError::NoSuchTransaction(tid))?;
        self.rollback_deletes(&mut inner, &tx.deletes);
        debug!(%tid, "transaction aborted");
        Ok(())
    }

    fn rollback_deletes(&self, inner: &mut Inner, deletes: &[Delete]) {
        for delete in deletes {
            inner.locked.remove(&delete.id);
            if let Destination::Queue(ref queue) = delete.destination {
                match self.store.increment_redelivery(queue, delete.id) {
                    Ok(Some(count)) => {
                        debug!(%queue, id = %delete.id, redelivery = count, "message returned to queue");
                    }
                    Ok(None) => {
                        warn!(%queue, id = %delete.id, "aborted delete refers to a message no longer queued");
                    }
                    Err(err) => {
                        warn!(%queue, id = %delete.id, error = %err, "failed to record redelivery");
                    }
                }
            }
        }
    }
}
