use std::collections::HashMap;

use uuid::Uuid;

use crate::message::{HeaderValue, Headers};

/// Consumer-chosen predicate for picking a message out of a queue or
/// off a topic.
///
/// Only these two forms are evaluated broker-side. General boolean
/// expressions run in the client: the consumer pulls the header list,
/// evaluates its own predicate, and resubmits the chosen id as an
/// [`Selector::Id`].
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    /// Matches only the message with this id.
    Id(Uuid),
    /// Matches when every listed header equals the given value.
    Headers(HashMap<String, HeaderValue>),
}

impl Selector {
    pub fn matches(&self, headers: &Headers) -> bool {
        match self {
            Selector::Id(id) => headers.id() == Some(*id),
            Selector::Headers(want) => want
                .iter()
                .all(|(name, value)| headers.get(name) == Some(value)),
        }
    }
}
