//! Client library for the estafeta message broker.
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::time::Duration;
//!
//! use estafeta_sdk::Client;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::connect("http://localhost:6438").await?;
//! let orders = client.queue("orders");
//!
//! orders.put(b"invoice #1".to_vec(), HashMap::new(), None).await?;
//!
//! let tx = client.begin(Duration::from_secs(30)).await?;
//! if let Some(message) = orders.get(None, Some(&tx)).await? {
//!     // process message.body ...
//!     let _ = message;
//! }
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod error;

pub use client::{Client, ConnectOptions, QueueHandle, TopicHandle, Tx};
pub use error::{ConnectError, GetError, PutError, StatusError, TxError};

// Domain types cross the SDK boundary unchanged.
pub use estafeta_core::message::{Delivery, HeaderValue, Headers, Message};
pub use estafeta_core::selector::Selector;
