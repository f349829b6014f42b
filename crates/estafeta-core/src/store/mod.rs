use uuid::Uuid;

use crate::error::StoreResult;
use crate::message::{Headers, Message};
use crate::selector::Selector;

mod disk;

pub use disk::DiskStore;

/// Where a message lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Queue(String),
    Topic(String),
}

impl Destination {
    pub fn name(&self) -> &str {
        match self {
            Destination::Queue(name) | Destination::Topic(name) => name,
        }
    }
}

/// A pending put or publish.
#[derive(Debug, Clone)]
pub struct Insert {
    pub id: Uuid,
    pub destination: Destination,
    pub headers: Headers,
    pub body: Vec<u8>,
}

/// A pending consume (queue) or replacement/expiry removal (topic).
#[derive(Debug, Clone)]
pub struct Delete {
    pub id: Uuid,
    pub destination: Destination,
}

/// A move from an origin queue to the dead-letter queue, keeping the
/// message body in place.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub id: Uuid,
    pub queue: String,
}

/// One atomic unit of store work. All three lists apply together or
/// not at all, across crashes included.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub inserts: Vec<Insert>,
    pub deletes: Vec<Delete>,
    pub dead_letters: Vec<DeadLetter>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.deletes.is_empty() && self.dead_letters.is_empty()
    }
}

/// Contract every persistence backend must satisfy. Implementations
/// must be thread-safe; they own durability and atomicity only —
/// locking, DLQ routing, and expiration are the manager's concern.
///
/// All methods return `StoreResult` — only infrastructure errors are
/// possible here, never domain errors.
pub trait MessageStore: Send + Sync {
    /// Idempotently create on-disk/database resources. Returns `true`
    /// when the resources were created, `false` when they already
    /// existed.
    fn setup(&self) -> StoreResult<bool>;

    /// Acquire exclusive ownership of the backing resources and load
    /// the index.
    fn activate(&self) -> StoreResult<()>;

    /// Release ownership. Safe to call on an inactive store.
    fn deactivate(&self) -> StoreResult<()>;

    /// Atomically apply a batch. On failure the in-memory caches are
    /// reloaded from durable storage before the error propagates;
    /// partially applied batches are never observable, even after a
    /// crash.
    fn transaction(&self, batch: Batch) -> StoreResult<()>;

    /// Current header list of a queue, priority order. Unknown queues
    /// are empty.
    fn get_headers(&self, queue: &str) -> StoreResult<Vec<Headers>>;

    /// First header in `queue` satisfying `selector`, with the body
    /// materialized.
    fn get_message(&self, queue: &str, selector: &Selector) -> StoreResult<Option<Message>>;

    /// The topic's current message, iff its id differs from `seen` and
    /// it satisfies `selector` (when given).
    fn get_last(
        &self,
        topic: &str,
        seen: Option<Uuid>,
        selector: Option<&Selector>,
    ) -> StoreResult<Option<Message>>;

    /// Bump the `redelivery` counter on a queued message's header so
    /// subsequent consumers observe the retry count. Returns the new
    /// count, or `None` when the message is no longer in the queue.
    /// The bump need not be durable until the next transaction.
    fn increment_redelivery(&self, queue: &str, id: Uuid) -> StoreResult<Option<u32>>;
}
