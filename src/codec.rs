//! Payload codec boundary.
//!
//! The only place where payload values cross between their in-memory form
//! ([`Value`]) and a portable JSON representation. Rich kinds are wrapped as
//! `{"_kind_": tag, "_value_": encoded}`; identifiers and timestamps are
//! built in, everything else needs a registered [`Transcoder`].

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, SecondsFormat};
use uuid::Uuid;

use crate::payload::{Payload, Value};

/// Wrapper key carrying the kind tag.
pub const KIND_KEY: &str = "_kind_";
/// Wrapper key carrying the encoded value.
pub const VALUE_KEY: &str = "_value_";

/// Kind tag for identifier values.
pub const ID_KIND: &str = "__uuid__";
/// Kind tag for timestamp values.
pub const TIMESTAMP_KIND: &str = "__timestamp__";

/// Errors raised while encoding or decoding payload values.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("no transcoder registered for kind {0:?}")]
    UnknownKind(String),

    #[error("malformed {kind} value: {detail}")]
    Malformed { kind: String, detail: String },

    #[error("value is not representable: {0}")]
    Unrepresentable(String),
}

/// Encodes and decodes one application-defined value kind.
///
/// `encode` receives the raw data a [`Value::Other`] carries and returns the
/// form persisted inside the wrapper; `decode` is the inverse. Both sides may
/// validate and reject.
pub trait Transcoder: Send + Sync {
    /// Kind tag this transcoder claims, used for dispatch in both directions.
    fn kind(&self) -> &str;

    fn encode(&self, data: &serde_json::Value) -> Result<serde_json::Value, CodecError>;

    fn decode(&self, data: &serde_json::Value) -> Result<serde_json::Value, CodecError>;
}

/// Registry of transcoders keyed by kind tag.
///
/// Identifier and timestamp values are handled natively and need no
/// registration. Encoding a [`Value::Other`] whose kind has no registered
/// transcoder fails; so does decoding a wrapped kind nobody claims.
#[derive(Default)]
pub struct TranscoderRegistry {
    transcoders: HashMap<String, Box<dyn Transcoder>>,
}

fn wrap(kind: &str, value: serde_json::Value) -> serde_json::Value {
    serde_json::json!({ KIND_KEY: kind, VALUE_KEY: value })
}

/// Recognize the `{_kind_, _value_}` wrapper shape.
fn unwrap(value: &serde_json::Value) -> Option<(&str, &serde_json::Value)> {
    let object = value.as_object()?;
    if object.len() != 2 {
        return None;
    }
    let kind = object.get(KIND_KEY)?.as_str()?;
    let inner = object.get(VALUE_KEY)?;
    Some((kind, inner))
}

impl TranscoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transcoder under its kind tag, replacing any previous one.
    pub fn add(&mut self, transcoder: Box<dyn Transcoder>) {
        self.transcoders
            .insert(transcoder.kind().to_owned(), transcoder);
    }

    pub fn encode_value(&self, value: &Value) -> Result<serde_json::Value, CodecError> {
        match value {
            Value::Null => Ok(serde_json::Value::Null),
            Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
            Value::Int(i) => Ok(serde_json::Value::from(*i)),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .ok_or_else(|| CodecError::Unrepresentable(format!("non-finite float {f}"))),
            Value::Text(s) => Ok(serde_json::Value::String(s.clone())),
            Value::Id(id) => Ok(wrap(ID_KIND, serde_json::Value::String(id.to_string()))),
            Value::Timestamp(ts) => Ok(wrap(
                TIMESTAMP_KIND,
                serde_json::Value::String(ts.to_rfc3339_opts(SecondsFormat::Micros, true)),
            )),
            Value::List(items) => {
                let encoded: Result<Vec<_>, _> =
                    items.iter().map(|v| self.encode_value(v)).collect();
                Ok(serde_json::Value::Array(encoded?))
            }
            Value::Map(entries) => {
                let mut object = serde_json::Map::with_capacity(entries.len());
                for (key, item) in entries {
                    object.insert(key.clone(), self.encode_value(item)?);
                }
                Ok(serde_json::Value::Object(object))
            }
            Value::Other { kind, data } => {
                let transcoder = self
                    .transcoders
                    .get(kind)
                    .ok_or_else(|| CodecError::UnknownKind(kind.clone()))?;
                Ok(wrap(kind, transcoder.encode(data)?))
            }
        }
    }

    pub fn decode_value(&self, value: &serde_json::Value) -> Result<Value, CodecError> {
        if let Some((kind, inner)) = unwrap(value) {
            return self.decode_wrapped(kind, inner);
        }
        match value {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Float(f))
                } else {
                    Err(CodecError::Unrepresentable(n.to_string()))
                }
            }
            serde_json::Value::String(s) => Ok(Value::Text(s.clone())),
            serde_json::Value::Array(items) => {
                let decoded: Result<Vec<_>, _> =
                    items.iter().map(|v| self.decode_value(v)).collect();
                Ok(Value::List(decoded?))
            }
            serde_json::Value::Object(object) => {
                let mut entries = BTreeMap::new();
                for (key, item) in object {
                    entries.insert(key.clone(), self.decode_value(item)?);
                }
                Ok(Value::Map(entries))
            }
        }
    }

    fn decode_wrapped(&self, kind: &str, inner: &serde_json::Value) -> Result<Value, CodecError> {
        match kind {
            ID_KIND => {
                let text = inner.as_str().ok_or_else(|| CodecError::Malformed {
                    kind: ID_KIND.to_owned(),
                    detail: "expected string".to_owned(),
                })?;
                let id = Uuid::parse_str(text).map_err(|e| CodecError::Malformed {
                    kind: ID_KIND.to_owned(),
                    detail: e.to_string(),
                })?;
                Ok(Value::Id(id))
            }
            TIMESTAMP_KIND => {
                let text = inner.as_str().ok_or_else(|| CodecError::Malformed {
                    kind: TIMESTAMP_KIND.to_owned(),
                    detail: "expected string".to_owned(),
                })?;
                let ts = DateTime::parse_from_rfc3339(text).map_err(|e| CodecError::Malformed {
                    kind: TIMESTAMP_KIND.to_owned(),
                    detail: e.to_string(),
                })?;
                Ok(Value::Timestamp(ts.to_utc()))
            }
            other => {
                let transcoder = self
                    .transcoders
                    .get(other)
                    .ok_or_else(|| CodecError::UnknownKind(other.to_owned()))?;
                Ok(Value::Other {
                    kind: other.to_owned(),
                    data: transcoder.decode(inner)?,
                })
            }
        }
    }

    /// Encode a whole payload into a JSON object.
    pub fn encode_payload(&self, payload: &Payload) -> Result<serde_json::Value, CodecError> {
        let mut object = serde_json::Map::with_capacity(payload.len());
        for (key, value) in payload.iter() {
            object.insert(key.clone(), self.encode_value(value)?);
        }
        Ok(serde_json::Value::Object(object))
    }

    /// Decode a JSON object back into a payload.
    pub fn decode_payload(&self, value: &serde_json::Value) -> Result<Payload, CodecError> {
        let object = value.as_object().ok_or_else(|| CodecError::Malformed {
            kind: "payload".to_owned(),
            detail: "expected object".to_owned(),
        })?;
        object
            .iter()
            .map(|(key, item)| Ok((key.clone(), self.decode_value(item)?)))
            .collect()
    }
}
