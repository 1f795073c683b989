//! Event Envelope
//!
//! Wire representation of a domain event. An envelope carries the event type,
//! the id of the subject entity, a flat set of attributes and the time the
//! producer emitted it.
//!
//! ## Wire format
//!
//! UTF-8 JSON object with the reserved keys `type`, `taskId` and `timestamp`
//! plus one key per attribute:
//!
//! ```text
//! { "type": "task.created", "taskId": "t1", "title": "Buy milk",
//!   "userId": "u1", "timestamp": "2024-01-01T00:00:00Z" }
//! ```
//!
//! Encoding is deterministic: `type`, `taskId`, then attributes in key order,
//! then `timestamp`.

use crate::constants::{
    RESERVED_WIRE_KEYS, WIRE_CORRELATION_KEY, WIRE_TIMESTAMP_KEY, WIRE_TYPE_KEY,
};
use crate::error::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single flat attribute value
///
/// Strings are kept byte-for-byte as they appear on the wire. Timestamps are
/// carried as RFC 3339 text and parsed on demand by
/// [`as_timestamp`](AttributeValue::as_timestamp).
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// Text, including RFC 3339 timestamps
    Text(String),
    /// JSON number (integer or float)
    Number(serde_json::Number),
}

impl AttributeValue {
    /// Build a text value
    pub fn text<S: Into<String>>(value: S) -> Self {
        Self::Text(value.into())
    }

    /// Borrow the text, if this is a text value
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Number(_) => None,
        }
    }

    /// Parse the text as an RFC 3339 timestamp
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        self.as_text()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }

    /// Borrow the number, if this is a numeric value
    pub fn as_number(&self) -> Option<&serde_json::Number> {
        match self {
            Self::Number(n) => Some(n),
            Self::Text(_) => None,
        }
    }

    fn from_json(key: &str, value: serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::String(s) => Ok(Self::Text(s)),
            serde_json::Value::Number(n) => Ok(Self::Number(n)),
            other => Err(Error::decode(format!(
                "attribute '{key}' must be a string or number, got {}",
                json_kind(&other)
            ))),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::text(value)
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::text(value)
    }
}

impl From<DateTime<Utc>> for AttributeValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Text(value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<u64> for AttributeValue {
    fn from(value: u64) -> Self {
        Self::Number(value.into())
    }
}

impl Serialize for AttributeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Text(s) => serializer.serialize_str(s),
            Self::Number(n) => n.serialize(serializer),
        }
    }
}

/// Immutable wire representation of a domain event
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    event_type: String,
    correlation_id: String,
    attributes: BTreeMap<String, AttributeValue>,
    emitted_at: DateTime<Utc>,
}

impl EventEnvelope {
    /// Start building an envelope for `event_type` about `correlation_id`
    pub fn builder<T: Into<String>, C: Into<String>>(
        event_type: T,
        correlation_id: C,
    ) -> EventEnvelopeBuilder {
        EventEnvelopeBuilder {
            event_type: event_type.into(),
            correlation_id: correlation_id.into(),
            attributes: BTreeMap::new(),
            emitted_at: None,
        }
    }

    /// Semantic event tag, also used as routing key
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Id of the subject entity
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// All attributes in key order
    pub fn attributes(&self) -> &BTreeMap<String, AttributeValue> {
        &self.attributes
    }

    /// Look up one attribute
    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    /// Look up a text attribute
    pub fn text_attribute(&self, key: &str) -> Option<&str> {
        self.attribute(key).and_then(AttributeValue::as_text)
    }

    /// Time the producer built the envelope
    pub fn emitted_at(&self) -> DateTime<Utc> {
        self.emitted_at
    }

    /// Encode to the UTF-8 JSON wire format
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from the wire format
    ///
    /// Any failure is reported as [`Error::Decode`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::decode_with_source("invalid event envelope", e))
    }

    /// Read only the `type` field of a wire message
    ///
    /// Succeeds for any JSON object carrying a non-empty string `type`,
    /// whatever its other fields are.
    pub fn peek_event_type(bytes: &[u8]) -> Result<String> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| Error::decode_with_source("message is not JSON", e))?;
        match value.get(WIRE_TYPE_KEY) {
            Some(serde_json::Value::String(event_type)) if !event_type.trim().is_empty() => {
                Ok(event_type.clone())
            }
            Some(serde_json::Value::String(_)) => Err(Error::decode("event type must not be empty")),
            Some(other) => Err(Error::decode(format!(
                "'{WIRE_TYPE_KEY}' must be a string, got {}",
                json_kind(other)
            ))),
            None => Err(Error::decode(format!("missing required field '{WIRE_TYPE_KEY}'"))),
        }
    }

    fn from_wire(mut fields: serde_json::Map<String, serde_json::Value>) -> Result<Self> {
        let event_type = take_string(&mut fields, WIRE_TYPE_KEY)?;
        let correlation_id = take_string(&mut fields, WIRE_CORRELATION_KEY)?;
        let timestamp = take_string(&mut fields, WIRE_TIMESTAMP_KEY)?;
        let emitted_at = DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| Error::decode_with_source(format!("invalid timestamp '{timestamp}'"), e))?
            .with_timezone(&Utc);

        let mut builder = Self::builder(event_type, correlation_id).emitted_at(emitted_at);
        for (key, value) in fields {
            let value = AttributeValue::from_json(&key, value)?;
            builder = builder.attribute(key, value);
        }
        builder
            .build()
            .map_err(|e| Error::decode(format!("invalid event envelope: {e}")))
    }
}

impl Serialize for EventEnvelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.attributes.len() + 3))?;
        map.serialize_entry(WIRE_TYPE_KEY, &self.event_type)?;
        map.serialize_entry(WIRE_CORRELATION_KEY, &self.correlation_id)?;
        for (key, value) in &self.attributes {
            map.serialize_entry(key, value)?;
        }
        map.serialize_entry(WIRE_TIMESTAMP_KEY, &self.emitted_at)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for EventEnvelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct EnvelopeVisitor;

        impl<'de> Visitor<'de> for EnvelopeVisitor {
            type Value = EventEnvelope;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an event envelope object")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut fields = serde_json::Map::new();
                while let Some((key, value)) = access.next_entry::<String, serde_json::Value>()? {
                    if fields.insert(key.clone(), value).is_some() {
                        return Err(de::Error::custom(format!("duplicate key '{key}'")));
                    }
                }
                EventEnvelope::from_wire(fields).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_map(EnvelopeVisitor)
    }
}

/// Validating builder for [`EventEnvelope`]
#[derive(Debug, Clone)]
pub struct EventEnvelopeBuilder {
    event_type: String,
    correlation_id: String,
    attributes: BTreeMap<String, AttributeValue>,
    emitted_at: Option<DateTime<Utc>>,
}

impl EventEnvelopeBuilder {
    /// Add or replace an attribute
    #[must_use]
    pub fn attribute<K: Into<String>, V: Into<AttributeValue>>(mut self, key: K, value: V) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Override the emission time (defaults to now)
    #[must_use]
    pub fn emitted_at(mut self, emitted_at: DateTime<Utc>) -> Self {
        self.emitted_at = Some(emitted_at);
        self
    }

    /// Validate and build the envelope
    pub fn build(self) -> Result<EventEnvelope> {
        if self.event_type.trim().is_empty() {
            return Err(Error::invalid_argument("event type must not be empty"));
        }
        if self.correlation_id.is_empty() {
            return Err(Error::invalid_argument("correlation id must not be empty"));
        }
        if let Some(key) = self
            .attributes
            .keys()
            .find(|key| RESERVED_WIRE_KEYS.contains(&key.as_str()))
        {
            return Err(Error::invalid_argument(format!(
                "attribute key '{key}' is reserved"
            )));
        }
        Ok(EventEnvelope {
            event_type: self.event_type,
            correlation_id: self.correlation_id,
            attributes: self.attributes,
            emitted_at: self.emitted_at.unwrap_or_else(Utc::now),
        })
    }
}

fn take_string(fields: &mut serde_json::Map<String, serde_json::Value>, key: &str) -> Result<String> {
    match fields.remove(key) {
        Some(serde_json::Value::String(s)) => Ok(s),
        Some(other) => Err(Error::decode(format!(
            "'{key}' must be a string, got {}",
            json_kind(&other)
        ))),
        None => Err(Error::decode(format!("missing required field '{key}'"))),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
