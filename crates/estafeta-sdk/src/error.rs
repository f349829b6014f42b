use tonic::Code;

/// Common gRPC status errors shared across all operations.
#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("internal broker error: {0}")]
    Internal(String),

    #[error("unexpected gRPC error ({code:?}): {message}")]
    Rpc { code: Code, message: String },
}

// --- Per-operation error types ---

/// The broker endpoint could not be reached within `connect_count`
/// attempts.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("connection failed: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PutError {
    #[error("no such transaction: {0}")]
    NoSuchTransaction(String),

    #[error(transparent)]
    Status(#[from] StatusError),
}

#[derive(Debug, thiserror::Error)]
pub enum GetError {
    #[error("no such transaction: {0}")]
    NoSuchTransaction(String),

    #[error("malformed broker response: {0}")]
    BadResponse(String),

    #[error(transparent)]
    Status(#[from] StatusError),
}

#[derive(Debug, thiserror::Error)]
pub enum TxError {
    #[error("no such transaction: {0}")]
    NoSuchTransaction(String),

    /// The broker forced an abort (reaper deadline or store failure).
    #[error("transaction aborted: {0}")]
    Aborted(String),

    #[error(transparent)]
    Status(#[from] StatusError),
}

// --- Mapping helpers ---

pub(crate) fn status_error(status: tonic::Status) -> StatusError {
    let message = status.message().to_string();
    match status.code() {
        Code::InvalidArgument => StatusError::InvalidArgument(message),
        Code::Unavailable => StatusError::Unavailable(message),
        Code::PermissionDenied => StatusError::PermissionDenied(message),
        Code::Internal => StatusError::Internal(message),
        code => StatusError::Rpc { code, message },
    }
}

pub(crate) fn put_status_error(status: tonic::Status) -> PutError {
    let message = status.message().to_string();
    match status.code() {
        Code::NotFound => PutError::NoSuchTransaction(message),
        _ => PutError::Status(status_error(status)),
    }
}

pub(crate) fn get_status_error(status: tonic::Status) -> GetError {
    let message = status.message().to_string();
    match status.code() {
        Code::NotFound => GetError::NoSuchTransaction(message),
        _ => GetError::Status(status_error(status)),
    }
}

pub(crate) fn tx_status_error(status: tonic::Status) -> TxError {
    let message = status.message().to_string();
    match status.code() {
        Code::NotFound => TxError::NoSuchTransaction(message),
        Code::Aborted => TxError::Aborted(message),
        _ => TxError::Status(status_error(status)),
    }
}
