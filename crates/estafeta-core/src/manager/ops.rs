use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;
use uuid::Uuid;

use crate::error::{ManagerError, Result};
use crate::message::{
    reserved, valid_header_name, Delivery, HeaderValue, Headers, Message, DEFAULT_MAX_DELIVERIES,
    DLQ,
};
use crate::selector::Selector;
use crate::store::{Batch, DeadLetter, Delete, Destination, Insert};

use super::Manager;

pub(crate) fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Destination names are lowercased before use; empty names are
/// rejected.
fn destination_name(name: &str, kind: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ManagerError::InvalidArgument(format!(
            "{kind} name must not be empty"
        )));
    }
    Ok(trimmed.to_ascii_lowercase())
}

fn invalid_header(name: &str, expected: &str) -> ManagerError {
    ManagerError::InvalidArgument(format!("header {name:?} must be {expected}"))
}

/// Validate user headers and fill the reserved set for a queued
/// message. Returns the fresh id together with the sealed header map.
fn seal_queue_headers(user: HashMap<String, HeaderValue>) -> Result<(Uuid, Headers)> {
    let now = now_epoch();
    let mut headers = Headers::new();
    let mut delivery = Delivery::default();
    let mut priority: i64 = 0;
    let mut max_deliveries = i64::from(DEFAULT_MAX_DELIVERIES);
    let mut expires_abs: Option<i64> = None;
    let mut expires_rel: Option<i64> = None;

    for (name, value) in user {
        if !valid_header_name(&name) {
            return Err(ManagerError::InvalidArgument(format!(
                "invalid header name: {name:?}"
            )));
        }
        match name.as_str() {
            // Manager-controlled; any caller-supplied value is dropped.
            reserved::ID | reserved::CREATED | reserved::REDELIVERY => {}
            reserved::DELIVERY => {
                delivery = value
                    .as_symbol()
                    .and_then(Delivery::from_symbol)
                    .ok_or_else(|| {
                        invalid_header(&name, "one of best_effort, repeated, once")
                    })?;
            }
            reserved::PRIORITY => {
                priority = value
                    .as_int()
                    .ok_or_else(|| invalid_header(&name, "an integer"))?
                    .max(0);
            }
            reserved::MAX_DELIVERIES => {
                max_deliveries = value
                    .as_int()
                    .ok_or_else(|| invalid_header(&name, "an integer"))?
                    .max(1);
            }
            reserved::EXPIRES => {
                expires_rel = Some(
                    value
                        .as_int()
                        .ok_or_else(|| invalid_header(&name, "an integer number of seconds"))?,
                );
            }
            reserved::EXPIRES_AT => {
                expires_abs = Some(
                    value
                        .as_int()
                        .ok_or_else(|| invalid_header(&name, "an integer epoch time"))?,
                );
            }
            _ => headers.insert(name, value),
        }
    }

    // An absolute expiry wins over a relative one.
    let expires_at = expires_abs.or(expires_rel
        .filter(|offset| *offset > 0)
        .map(|offset| now as i64 + offset));

    let id = Uuid::now_v7();
    headers.insert(reserved::ID, HeaderValue::Str(id.to_string()));
    headers.insert(reserved::CREATED, HeaderValue::Int(now as i64));
    headers.insert(
        reserved::DELIVERY,
        HeaderValue::Symbol(delivery.as_symbol().to_string()),
    );
    headers.insert(reserved::PRIORITY, HeaderValue::Int(priority));
    headers.insert(reserved::MAX_DELIVERIES, HeaderValue::Int(max_deliveries));
    if let Some(at) = expires_at {
        headers.insert(reserved::EXPIRES_AT, HeaderValue::Int(at));
    }
    Ok((id, headers))
}

/// Like [`seal_queue_headers`] for topics: delivery, priority, and
/// max_deliveries have no meaning on a single-slot destination and are
/// not filled in.
fn seal_topic_headers(user: HashMap<String, HeaderValue>) -> Result<(Uuid, Headers)> {
    let now = now_epoch();
    let mut headers = Headers::new();
    let mut expires_abs: Option<i64> = None;
    let mut expires_rel: Option<i64> = None;

    for (name, value) in user {
        if !valid_header_name(&name) {
            return Err(ManagerError::InvalidArgument(format!(
                "invalid header name: {name:?}"
            )));
        }
        match name.as_str() {
            // Manager-controlled, plus the queue-only policy names:
            // a single-slot destination has no delivery/retry cycle,
            // so stray values under these names are dropped rather
            // than stored unchecked.
            reserved::ID
            | reserved::CREATED
            | reserved::REDELIVERY
            | reserved::DELIVERY
            | reserved::PRIORITY
            | reserved::MAX_DELIVERIES => {}
            reserved::EXPIRES => {
                expires_rel = Some(
                    value
                        .as_int()
                        .ok_or_else(|| invalid_header(&name, "an integer number of seconds"))?,
                );
            }
            reserved::EXPIRES_AT => {
                expires_abs = Some(
                    value
                        .as_int()
                        .ok_or_else(|| invalid_header(&name, "an integer epoch time"))?,
                );
            }
            _ => headers.insert(name, value),
        }
    }

    let expires_at = expires_abs.or(expires_rel
        .filter(|offset| *offset > 0)
        .map(|offset| now as i64 + offset));

    let id = Uuid::now_v7();
    headers.insert(reserved::ID, HeaderValue::Str(id.to_string()));
    headers.insert(reserved::CREATED, HeaderValue::Int(now as i64));
    if let Some(at) = expires_at {
        headers.insert(reserved::EXPIRES_AT, HeaderValue::Int(at));
    }
    Ok((id, headers))
}

/// Undeliverable messages are routed by their delivery mode: repeated
/// and once park in the DLQ, best-effort is dropped outright.
fn route_undeliverable(batch: &mut Batch, queue: &str, id: Uuid, delivery: Delivery) {
    match delivery {
        Delivery::BestEffort => batch.deletes.push(Delete {
            id,
            destination: Destination::Queue(queue.to_string()),
        }),
        Delivery::Repeated | Delivery::Once => batch.dead_letters.push(DeadLetter {
            id,
            queue: queue.to_string(),
        }),
    }
}

impl Manager {
    /// Accept a message onto a queue. Returns the assigned id.
    pub fn put(
        &self,
        queue: &str,
        body: Vec<u8>,
        headers: HashMap<String, HeaderValue>,
        tid: Option<Uuid>,
    ) -> Result<Uuid> {
        let queue = destination_name(queue, "queue")?;
        if queue == DLQ {
            return Err(ManagerError::InvalidArgument(
                "cannot put directly onto the dead-letter queue".to_string(),
            ));
        }
        let (id, headers) = seal_queue_headers(headers)?;
        self.stage_or_apply_insert(
            Insert {
                id,
                destination: Destination::Queue(queue.clone()),
                headers,
                body,
            },
            tid,
        )?;
        debug!(%queue, %id, "message accepted");
        Ok(id)
    }

    /// Publish onto a topic, replacing any prior value.
    pub fn publish(
        &self,
        topic: &str,
        body: Vec<u8>,
        headers: HashMap<String, HeaderValue>,
        tid: Option<Uuid>,
    ) -> Result<Uuid> {
        let topic = destination_name(topic, "topic")?;
        let (id, headers) = seal_topic_headers(headers)?;
        self.stage_or_apply_insert(
            Insert {
                id,
                destination: Destination::Topic(topic.clone()),
                headers,
                body,
            },
            tid,
        )?;
        debug!(%topic, %id, "message published");
        Ok(id)
    }

    fn stage_or_apply_insert(&self, insert: Insert, tid: Option<Uuid>) -> Result<()> {
        match tid {
            Some(tid) => {
                let mut inner = self.lock_inner();
                let tx = inner
                    .transactions
                    .get_mut(&tid)
                    .ok_or(ManagerError::NoSuchTransaction(tid))?;
                tx.inserts.push(insert);
                Ok(())
            }
            None => {
                let _inner = self.lock_inner();
                self.store.transaction(Batch {
                    inserts: vec![insert],
                    ..Default::default()
                })?;
                Ok(())
            }
        }
    }

    /// Clone the headers currently in `queue`. Expired and exhausted
    /// messages encountered along the way are routed to the DLQ (or
    /// dropped) as a side effect, exactly as `get` would route them.
    pub fn list(&self, queue: &str) -> Result<Vec<Headers>> {
        let queue = destination_name(queue, "queue")?;
        let now = now_epoch();

        let inner = self.lock_inner();
        let headers = self.store.get_headers(&queue)?;
        let mut visible = Vec::with_capacity(headers.len());
        let mut routing = Batch::default();
        for h in headers {
            let Some(id) = h.id() else { continue };
            // In-flight messages belong to their transaction; the DLQ
            // is never re-checked.
            if queue != DLQ
                && !inner.locked.contains(&id)
                && (h.is_expired(now) || h.is_exhausted())
            {
                route_undeliverable(&mut routing, &queue, id, h.delivery());
                continue;
            }
            visible.push(h);
        }
        if !routing.is_empty() {
            self.store.transaction(routing)?;
        }
        Ok(visible)
    }

    /// Dequeue the first visible message matching `selector`.
    ///
    /// With a transaction the delete is staged and the message stays
    /// locked until commit/abort; without one the delete applies
    /// immediately. An empty queue returns `None` without blocking.
    pub fn get(
        &self,
        queue: &str,
        selector: Option<&Selector>,
        tid: Option<Uuid>,
    ) -> Result<Option<Message>> {
        let queue = destination_name(queue, "queue")?;
        loop {
            let now = now_epoch();

            // Choose and lock a candidate under the manager lock.
            let (id, headers) = {
                let mut inner = self.lock_inner();
                if let Some(tid) = tid {
                    if !inner.transactions.contains_key(&tid) {
                        return Err(ManagerError::NoSuchTransaction(tid));
                    }
                }
                let mut candidate = None;
                for h in self.store.get_headers(&queue)? {
                    let Some(id) = h.id() else { continue };
                    if inner.locked.contains(&id) {
                        continue;
                    }
                    if let Some(selector) = selector {
                        if !selector.matches(&h) {
                            continue;
                        }
                    }
                    inner.locked.insert(id);
                    candidate = Some((id, h));
                    break;
                }
                match candidate {
                    Some(found) => found,
                    None => return Ok(None),
                }
            };

            // Undeliverable: route it per its delivery mode and look
            // for the next match.
            if queue != DLQ && (headers.is_expired(now) || headers.is_exhausted()) {
                let mut routing = Batch::default();
                route_undeliverable(&mut routing, &queue, id, headers.delivery());
                let routed = self.store.transaction(routing);
                self.unlock(id);
                routed?;
                debug!(%queue, %id, "undeliverable message routed");
                continue;
            }

            let message = match self.store.get_message(&queue, &Selector::Id(id)) {
                Ok(Some(message)) => message,
                Ok(None) => {
                    // Raced with a concurrent delete between the index
                    // read and the body fetch.
                    self.unlock(id);
                    continue;
                }
                Err(err) => {
                    self.unlock(id);
                    return Err(err.into());
                }
            };

            match tid {
                Some(tid) => {
                    if headers.delivery() == Delivery::Once && queue != DLQ {
                        // Move to the DLQ now so an abort can never
                        // redeliver on the origin queue; stage the DLQ
                        // deletion so commit removes it entirely.
                        let moved = self.store.transaction(Batch {
                            dead_letters: vec![DeadLetter {
                                id,
                                queue: queue.clone(),
                            }],
                            ..Default::default()
                        });
                        if let Err(err) = moved {
                            self.unlock(id);
                            return Err(err.into());
                        }
                        self.stage_delete(
                            tid,
                            Delete {
                                id,
                                destination: Destination::Queue(DLQ.to_string()),
                            },
                        )?;
                    } else {
                        self.stage_delete(
                            tid,
                            Delete {
                                id,
                                destination: Destination::Queue(queue.clone()),
                            },
                        )?;
                    }
                }
                None => {
                    let applied = self.store.transaction(Batch {
                        deletes: vec![Delete {
                            id,
                            destination: Destination::Queue(queue.clone()),
                        }],
                        ..Default::default()
                    });
                    self.unlock(id);
                    applied?;
                }
            }

            debug!(%queue, %id, "message dequeued");
            return Ok(Some(message));
        }
    }

    /// Read a topic's current message. `seen` suppresses a value the
    /// caller already holds; an expired value is deleted and reported
    /// as absent.
    pub fn retrieve(
        &self,
        topic: &str,
        seen: Option<Uuid>,
        selector: Option<&Selector>,
        tid: Option<Uuid>,
    ) -> Result<Option<Message>> {
        let topic = destination_name(topic, "topic")?;
        let now = now_epoch();

        let inner = self.lock_inner();
        if let Some(tid) = tid {
            if !inner.transactions.contains_key(&tid) {
                return Err(ManagerError::NoSuchTransaction(tid));
            }
        }
        let Some(message) = self.store.get_last(&topic, seen, None)? else {
            return Ok(None);
        };
        if message.headers.is_expired(now) {
            self.store.transaction(Batch {
                deletes: vec![Delete {
                    id: message.id,
                    destination: Destination::Topic(topic.clone()),
                }],
                ..Default::default()
            })?;
            debug!(%topic, id = %message.id, "expired topic value deleted");
            return Ok(None);
        }
        if let Some(selector) = selector {
            if !selector.matches(&message.headers) {
                return Ok(None);
            }
        }
        Ok(Some(message))
    }

    /// Stage a delete into an open transaction. When the transaction
    /// has gone away, the message lock taken by `get` is released so
    /// the message becomes visible again.
    fn stage_delete(&self, tid: Uuid, delete: Delete) -> Result<()> {
        let mut inner = self.lock_inner();
        match inner.transactions.get_mut(&tid) {
            Some(tx) => {
                tx.deletes.push(delete);
                Ok(())
            }
            None => {
                inner.locked.remove(&delete.id);
                Err(ManagerError::NoSuchTransaction(tid))
            }
        }
    }

    fn unlock(&self, id: Uuid) {
        self.lock_inner().locked.remove(&id);
    }
}
