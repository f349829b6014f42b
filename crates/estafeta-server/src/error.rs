use estafeta_core::{ManagerError, StoreError};
use estafeta_proto::convert::ConvertError;
use tonic::Status;

pub trait IntoStatus {
    fn into_status(self) -> Status;
}

impl IntoStatus for ManagerError {
    fn into_status(self) -> Status {
        match self {
            ManagerError::InvalidArgument(msg) => Status::invalid_argument(msg),
            ManagerError::NoSuchTransaction(tid) => {
                Status::not_found(format!("no such transaction: {tid}"))
            }
            ManagerError::ManagerAlreadyStarted | ManagerError::ManagerNotStarted => {
                Status::failed_precondition(self.to_string())
            }
            ManagerError::TransactionAborted(err) => {
                Status::aborted(format!("transaction aborted: {err}"))
            }
            ManagerError::Store(StoreError::Unavailable(msg)) => Status::unavailable(msg),
            ManagerError::Store(err) => Status::internal(err.to_string()),
        }
    }
}

impl IntoStatus for ConvertError {
    fn into_status(self) -> Status {
        Status::invalid_argument(self.to_string())
    }
}
