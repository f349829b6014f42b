pub mod config;
pub mod error;
pub mod manager;
pub mod message;
pub mod selector;
pub mod store;
pub mod telemetry;

pub use config::{BrokerConfig, RpcConfig, StoreConfig};
pub use error::{ManagerError, Result, StoreError, StoreResult};
pub use manager::{Manager, ManagerConfig};
pub use message::{Delivery, HeaderValue, Headers, Message, DLQ};
pub use selector::Selector;
pub use store::{Batch, DiskStore, MessageStore};
