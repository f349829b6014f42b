//! Mapping between wire types and `estafeta_core` domain types.
//!
//! Both the server and the SDK cross this boundary; keeping the
//! conversions in one place means the wire mapping cannot drift
//! between the two.

use std::collections::HashMap;

use estafeta_core::message::{HeaderValue, Headers, Message};
use estafeta_core::selector::Selector;
use uuid::Uuid;

use crate::{header_value, selector, Delivered, HeaderMap, HeaderValue as WireValue};

/// A wire payload that cannot be mapped onto the domain model.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("header {0:?} carries no value")]
    MissingKind(String),

    #[error("selector carries no predicate")]
    EmptySelector,

    #[error("malformed message id: {0}")]
    BadId(String),
}

pub fn value_to_proto(value: &HeaderValue) -> WireValue {
    let kind = match value {
        HeaderValue::Str(s) => header_value::Kind::Str(s.clone()),
        HeaderValue::Int(i) => header_value::Kind::Int(*i),
        HeaderValue::Float(f) => header_value::Kind::Real(*f),
        HeaderValue::Bool(b) => header_value::Kind::Flag(*b),
        HeaderValue::Symbol(s) => header_value::Kind::Symbol(s.clone()),
        HeaderValue::Null => header_value::Kind::Null(true),
    };
    WireValue { kind: Some(kind) }
}

pub fn value_from_proto(name: &str, value: WireValue) -> Result<HeaderValue, ConvertError> {
    match value.kind {
        Some(header_value::Kind::Str(s)) => Ok(HeaderValue::Str(s)),
        Some(header_value::Kind::Int(i)) => Ok(HeaderValue::Int(i)),
        Some(header_value::Kind::Real(f)) => Ok(HeaderValue::Float(f)),
        Some(header_value::Kind::Flag(b)) => Ok(HeaderValue::Bool(b)),
        Some(header_value::Kind::Symbol(s)) => Ok(HeaderValue::Symbol(s)),
        Some(header_value::Kind::Null(_)) => Ok(HeaderValue::Null),
        None => Err(ConvertError::MissingKind(name.to_string())),
    }
}

pub fn headers_to_proto(headers: &Headers) -> HeaderMap {
    HeaderMap {
        entries: headers
            .iter()
            .map(|(name, value)| (name.clone(), value_to_proto(value)))
            .collect(),
    }
}

pub fn header_map_from_proto(
    map: Option<HeaderMap>,
) -> Result<HashMap<String, HeaderValue>, ConvertError> {
    let mut out = HashMap::new();
    for (name, value) in map.map(|m| m.entries).unwrap_or_default() {
        let value = value_from_proto(&name, value)?;
        out.insert(name, value);
    }
    Ok(out)
}

pub fn headers_from_proto(map: Option<HeaderMap>) -> Result<Headers, ConvertError> {
    Ok(Headers::from_map(header_map_from_proto(map)?))
}

pub fn selector_to_proto(sel: &Selector) -> crate::Selector {
    let kind = match sel {
        Selector::Id(id) => selector::Kind::Id(id.to_string()),
        Selector::Headers(map) => selector::Kind::Equals(HeaderMap {
            entries: map
                .iter()
                .map(|(name, value)| (name.clone(), value_to_proto(value)))
                .collect(),
        }),
    };
    crate::Selector { kind: Some(kind) }
}

pub fn selector_from_proto(sel: crate::Selector) -> Result<Selector, ConvertError> {
    match sel.kind {
        Some(selector::Kind::Id(id)) => {
            let id = Uuid::parse_str(&id).map_err(|_| ConvertError::BadId(id))?;
            Ok(Selector::Id(id))
        }
        Some(selector::Kind::Equals(map)) => {
            Ok(Selector::Headers(header_map_from_proto(Some(map))?))
        }
        None => Err(ConvertError::EmptySelector),
    }
}

pub fn message_to_proto(message: &Message) -> Delivered {
    Delivered {
        id: message.id.to_string(),
        headers: Some(headers_to_proto(&message.headers)),
        body: message.body.clone(),
    }
}

pub fn message_from_proto(delivered: Delivered) -> Result<Message, ConvertError> {
    let id = Uuid::parse_str(&delivered.id).map_err(|_| ConvertError::BadId(delivered.id.clone()))?;
    Ok(Message {
        id,
        headers: headers_from_proto(delivered.headers)?,
        body: delivered.body,
    })
}
