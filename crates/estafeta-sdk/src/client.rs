use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use estafeta_core::message::{HeaderValue, Headers, Message};
use estafeta_core::selector::Selector;
use estafeta_proto::broker_client::BrokerClient;
use estafeta_proto::convert;
use estafeta_proto::{
    AbortRequest, BeginRequest, CommitRequest, GetRequest, ListRequest, PublishRequest,
    PutRequest, RetrieveRequest,
};
use tonic::transport::Channel;

use crate::error::{
    get_status_error, put_status_error, status_error, tx_status_error, ConnectError, GetError,
    PutError, TxError,
};

/// Options for connecting to a broker.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub addr: String,
    /// Connection attempts before giving up.
    pub connect_count: usize,
    /// Pause between attempts.
    pub retry_delay: Duration,
    /// Per-request timeout, unlimited when unset.
    pub timeout: Option<Duration>,
}

impl ConnectOptions {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_count: 5,
            retry_delay: Duration::from_secs(1),
            timeout: None,
        }
    }

    pub fn with_connect_count(mut self, connect_count: usize) -> Self {
        self.connect_count = connect_count.max(1);
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Client façade for the broker.
///
/// The client is `Clone`, `Send`, and `Sync` — it can be shared across
/// tasks. Destination handles come from [`Client::queue`] and
/// [`Client::topic`]; transactions from [`Client::begin`].
#[derive(Debug, Clone)]
pub struct Client {
    inner: BrokerClient<Channel>,
}

impl Client {
    /// Connect to a broker, e.g. `http://localhost:6438`, retrying
    /// connection errors up to the default `connect_count`.
    pub async fn connect(addr: impl Into<String>) -> Result<Client, ConnectError> {
        Client::connect_with_options(ConnectOptions::new(addr)).await
    }

    /// Connect with custom options.
    pub async fn connect_with_options(options: ConnectOptions) -> Result<Client, ConnectError> {
        let mut endpoint = Channel::from_shared(options.addr.clone())
            .map_err(|e| ConnectError::InvalidEndpoint(e.to_string()))?;
        if let Some(timeout) = options.timeout {
            endpoint = endpoint.timeout(timeout);
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match endpoint.connect().await {
                Ok(channel) => return Ok(Client {
                    inner: BrokerClient::new(channel),
                }),
                Err(_) if attempt < options.connect_count => {
                    tokio::time::sleep(options.retry_delay).await;
                }
                Err(err) => return Err(ConnectError::Transport(err)),
            }
        }
    }

    /// Handle on a named queue.
    pub fn queue(&self, name: impl Into<String>) -> QueueHandle {
        QueueHandle {
            name: name.into(),
            inner: self.inner.clone(),
        }
    }

    /// Handle on a named topic. The handle remembers the last retrieved
    /// id, so repeated retrieves only yield new values.
    pub fn topic(&self, name: impl Into<String>) -> TopicHandle {
        TopicHandle {
            name: name.into(),
            inner: self.inner.clone(),
            seen: Mutex::new(None),
        }
    }

    /// Open a transaction. It must resolve within `timeout` or the
    /// broker's reaper aborts it.
    pub async fn begin(&self, timeout: Duration) -> Result<Tx, TxError> {
        let response = self
            .inner
            .clone()
            .begin(BeginRequest {
                timeout_secs: timeout.as_secs(),
            })
            .await
            .map_err(tx_status_error)?;
        Ok(Tx {
            tid: response.into_inner().tid,
            inner: self.inner.clone(),
            resolved: false,
        })
    }
}

/// An open transaction context. Pass it by reference to `put`/`get`/
/// `publish` to stage operations, then [`Tx::commit`] or [`Tx::abort`].
/// Dropping an unresolved transaction aborts it on a best-effort
/// basis; the broker's reaper is the backstop.
#[derive(Debug)]
pub struct Tx {
    tid: String,
    inner: BrokerClient<Channel>,
    resolved: bool,
}

impl Tx {
    pub fn id(&self) -> &str {
        &self.tid
    }

    /// Apply every staged operation atomically.
    pub async fn commit(mut self) -> Result<(), TxError> {
        self.resolved = true;
        self.inner
            .clone()
            .commit(CommitRequest {
                tid: self.tid.clone(),
            })
            .await
            .map_err(tx_status_error)?;
        Ok(())
    }

    /// Discard every staged operation. Consumed messages return to
    /// their queues with the redelivery counter bumped.
    pub async fn abort(mut self) -> Result<(), TxError> {
        self.resolved = true;
        self.inner
            .clone()
            .abort(AbortRequest {
                tid: self.tid.clone(),
            })
            .await
            .map_err(tx_status_error)?;
        Ok(())
    }
}

impl Drop for Tx {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let mut inner = self.inner.clone();
            let tid = self.tid.clone();
            handle.spawn(async move {
                let _ = inner.abort(AbortRequest { tid }).await;
            });
        }
    }
}

/// Per-queue handle.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    name: String,
    inner: BrokerClient<Channel>,
}

impl QueueHandle {
    /// Put a message onto the queue. Body bytes are opaque; marshal on
    /// the caller's side. Returns the broker-assigned id.
    pub async fn put(
        &self,
        body: impl Into<Vec<u8>>,
        headers: HashMap<String, HeaderValue>,
        tx: Option<&Tx>,
    ) -> Result<String, PutError> {
        let wire_headers = Headers::from_map(headers);
        let response = self
            .inner
            .clone()
            .put(PutRequest {
                queue: self.name.clone(),
                headers: Some(convert::headers_to_proto(&wire_headers)),
                body: body.into(),
                tid: tx.map(|t| t.tid.clone()),
            })
            .await
            .map_err(put_status_error)?;
        Ok(response.into_inner().id)
    }

    /// Dequeue the first visible message matching `selector` (or the
    /// front of the queue when none is given). Returns `None`
    /// immediately when nothing matches.
    pub async fn get(
        &self,
        selector: Option<&Selector>,
        tx: Option<&Tx>,
    ) -> Result<Option<Message>, GetError> {
        let response = self
            .inner
            .clone()
            .get(GetRequest {
                queue: self.name.clone(),
                selector: selector.map(convert::selector_to_proto),
                tid: tx.map(|t| t.tid.clone()),
            })
            .await
            .map_err(get_status_error)?;
        response
            .into_inner()
            .message
            .map(convert::message_from_proto)
            .transpose()
            .map_err(|e| GetError::BadResponse(e.to_string()))
    }

    /// Dequeue with a client-side predicate.
    ///
    /// The predicate sees each message's headers and the current epoch
    /// seconds; it must be pure. The header list is pulled, the first
    /// matching id is picked locally, and an id-literal get is issued —
    /// the broker never evaluates the expression. Another consumer may
    /// win the race for the chosen message, in which case this returns
    /// `None`.
    pub async fn get_where<F>(
        &self,
        predicate: F,
        tx: Option<&Tx>,
    ) -> Result<Option<Message>, GetError>
    where
        F: Fn(&Headers, u64) -> bool,
    {
        let listed = self.list().await?;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let Some(id) = listed
            .iter()
            .find(|headers| predicate(headers, now))
            .and_then(Headers::id)
        else {
            return Ok(None);
        };
        self.get(Some(&Selector::Id(id)), tx).await
    }

    /// Clone of the queue's current header list, priority order.
    pub async fn list(&self) -> Result<Vec<Headers>, GetError> {
        let response = self
            .inner
            .clone()
            .list(ListRequest {
                queue: self.name.clone(),
            })
            .await
            .map_err(|status| GetError::Status(status_error(status)))?;
        response
            .into_inner()
            .headers
            .into_iter()
            .map(|map| convert::headers_from_proto(Some(map)))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| GetError::BadResponse(e.to_string()))
    }
}

/// Per-topic handle with last-value tracking.
#[derive(Debug)]
pub struct TopicHandle {
    name: String,
    inner: BrokerClient<Channel>,
    seen: Mutex<Option<String>>,
}

impl TopicHandle {
    /// Publish onto the topic, replacing any prior value.
    pub async fn publish(
        &self,
        body: impl Into<Vec<u8>>,
        headers: HashMap<String, HeaderValue>,
        tx: Option<&Tx>,
    ) -> Result<String, PutError> {
        let wire_headers = Headers::from_map(headers);
        let response = self
            .inner
            .clone()
            .publish(PublishRequest {
                topic: self.name.clone(),
                headers: Some(convert::headers_to_proto(&wire_headers)),
                body: body.into(),
                tid: tx.map(|t| t.tid.clone()),
            })
            .await
            .map_err(put_status_error)?;
        Ok(response.into_inner().id)
    }

    /// Retrieve the topic's current value if it is new to this handle
    /// and matches `selector`.
    pub async fn retrieve(
        &self,
        selector: Option<&Selector>,
        tx: Option<&Tx>,
    ) -> Result<Option<Message>, GetError> {
        let seen_id = self
            .seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        let response = self
            .inner
            .clone()
            .retrieve(RetrieveRequest {
                topic: self.name.clone(),
                seen_id,
                selector: selector.map(convert::selector_to_proto),
                tid: tx.map(|t| t.tid.clone()),
            })
            .await
            .map_err(get_status_error)?;
        let message = response
            .into_inner()
            .message
            .map(convert::message_from_proto)
            .transpose()
            .map_err(|e| GetError::BadResponse(e.to_string()))?;
        if let Some(ref message) = message {
            *self
                .seen
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner) =
                Some(message.id.to_string());
        }
        Ok(message)
    }

    /// Forget the last seen id, so the next retrieve returns the
    /// current value even if this handle has already seen it.
    pub fn reset_seen(&self) {
        *self
            .seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
    }
}
