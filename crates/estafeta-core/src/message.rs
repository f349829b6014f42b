use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reserved queue name for undeliverable messages. Serves all
/// destinations; messages parked here are exempt from expiration and
/// redelivery checks.
pub const DLQ: &str = "$dlq";

/// Default number of delivery attempts before a message is considered
/// exhausted.
pub const DEFAULT_MAX_DELIVERIES: u32 = 5;

/// Reserved header names. These are manager-controlled and always
/// present after a successful put (except `expires_at`, which is only
/// set when the producer asked for expiration, and `redelivery`, which
/// appears after the first aborted consume).
pub mod reserved {
    pub const ID: &str = "id";
    pub const CREATED: &str = "created";
    pub const DELIVERY: &str = "delivery";
    pub const MAX_DELIVERIES: &str = "max_deliveries";
    pub const PRIORITY: &str = "priority";
    pub const EXPIRES: &str = "expires";
    pub const EXPIRES_AT: &str = "expires_at";
    pub const REDELIVERY: &str = "redelivery";
}

/// A single header value. Restricted to scalars — structured values are
/// rejected at the API boundary. Values are immutable once a message is
/// accepted (the manager only ever adds `redelivery`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum HeaderValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Symbol(String),
    Null,
}

impl HeaderValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            HeaderValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Symbolic value, also accepting plain strings: clients on loosely
    /// typed transports routinely send `delivery` as a string.
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            HeaderValue::Symbol(s) | HeaderValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(s: &str) -> Self {
        HeaderValue::Str(s.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(s: String) -> Self {
        HeaderValue::Str(s)
    }
}

impl From<i64> for HeaderValue {
    fn from(i: i64) -> Self {
        HeaderValue::Int(i)
    }
}

impl From<bool> for HeaderValue {
    fn from(b: bool) -> Self {
        HeaderValue::Bool(b)
    }
}

impl From<f64> for HeaderValue {
    fn from(f: f64) -> Self {
        HeaderValue::Float(f)
    }
}

/// Delivery guarantee requested by the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    /// Deliver if possible, drop when expired or exhausted.
    #[default]
    BestEffort,
    /// At-least-once: undeliverable messages are parked in the DLQ.
    Repeated,
    /// Exactly-once: consumed under a transaction, the message moves to
    /// the DLQ before the transaction completes so an abort can never
    /// redeliver it on the origin queue.
    Once,
}

impl Delivery {
    pub fn as_symbol(&self) -> &'static str {
        match self {
            Delivery::BestEffort => "best_effort",
            Delivery::Repeated => "repeated",
            Delivery::Once => "once",
        }
    }

    pub fn from_symbol(s: &str) -> Option<Delivery> {
        match s {
            "best_effort" => Some(Delivery::BestEffort),
            "repeated" => Some(Delivery::Repeated),
            "once" => Some(Delivery::Once),
            _ => None,
        }
    }
}

/// Header map with typed accessors for the reserved names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers {
    entries: HashMap<String, HeaderValue>,
}

impl Headers {
    pub fn new() -> Headers {
        Headers::default()
    }

    pub fn from_map(entries: HashMap<String, HeaderValue>) -> Headers {
        Headers { entries }
    }

    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.entries.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: HeaderValue) {
        self.entries.insert(name.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &HeaderValue)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // --- Reserved-header accessors ---

    pub fn id(&self) -> Option<Uuid> {
        self.get(reserved::ID)
            .and_then(HeaderValue::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
    }

    pub fn created(&self) -> Option<u64> {
        self.get(reserved::CREATED)
            .and_then(HeaderValue::as_int)
            .map(|i| i.max(0) as u64)
    }

    pub fn delivery(&self) -> Delivery {
        self.get(reserved::DELIVERY)
            .and_then(HeaderValue::as_symbol)
            .and_then(Delivery::from_symbol)
            .unwrap_or_default()
    }

    pub fn priority(&self) -> i64 {
        self.get(reserved::PRIORITY)
            .and_then(HeaderValue::as_int)
            .unwrap_or(0)
    }

    pub fn max_deliveries(&self) -> u32 {
        self.get(reserved::MAX_DELIVERIES)
            .and_then(HeaderValue::as_int)
            .map(|i| i.max(1) as u32)
            .unwrap_or(DEFAULT_MAX_DELIVERIES)
    }

    pub fn redelivery(&self) -> u32 {
        self.get(reserved::REDELIVERY)
            .and_then(HeaderValue::as_int)
            .map(|i| i.max(0) as u32)
            .unwrap_or(0)
    }

    pub fn expires_at(&self) -> Option<u64> {
        self.get(reserved::EXPIRES_AT)
            .and_then(HeaderValue::as_int)
            .map(|i| i.max(0) as u64)
    }

    /// A message past its `expires_at` is never handed to a non-DLQ
    /// consumer.
    pub fn is_expired(&self, now: u64) -> bool {
        matches!(self.expires_at(), Some(at) if at < now)
    }

    /// A message whose retry count reached `max_deliveries` is never
    /// handed to a non-DLQ consumer.
    pub fn is_exhausted(&self) -> bool {
        self.redelivery() >= self.max_deliveries()
    }
}

/// Header names are symbolic: a letter or underscore followed by
/// letters, digits, and underscores.
pub fn valid_header_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A materialized message: id, headers, and the opaque body. The
/// manager never inspects the body.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub headers: Headers,
    pub body: Vec<u8>,
}
