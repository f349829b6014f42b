use uuid::Uuid;

/// Low-level storage errors (filesystem, serialization).
/// This is the error type for the `MessageStore` trait — store operations
/// can only fail with infrastructure errors, never domain errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be activated or is not currently active:
    /// path is not a directory, the master index cannot be written, or
    /// another process owns the store.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The master index or a message body cannot be deserialized.
    #[error("store corrupt: {0}")]
    Corrupt(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Application-level errors for the queue manager and its operations.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// Missing/empty destination name, invalid header name or value,
    /// non-integer timeout/expires, bad selector form.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The referenced transaction is closed or never existed.
    #[error("no such transaction: {0}")]
    NoSuchTransaction(Uuid),

    #[error("queue manager already started")]
    ManagerAlreadyStarted,

    #[error("queue manager not started")]
    ManagerNotStarted,

    /// A store failure during commit forced the transaction to abort.
    /// Staged inserts were discarded; staged deletes were returned to
    /// their queues with the redelivery counter bumped.
    #[error("transaction aborted: {0}")]
    TransactionAborted(#[source] StoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type Result<T> = std::result::Result<T, ManagerError>;
