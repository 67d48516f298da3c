//! Request body validation: structured JSON object with an admissible `type`.
//!
//! Nothing beyond the discriminant is checked; sub-fields are read leniently by
//! [`Event::from_fields`].

use serde_json::Value;

use crate::ingest::service::IngestError;
use crate::model::event::{Event, EventKind};

/// A payload that passed validation: its typed view plus the verbatim JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedEvent {
    pub event: Event,
    pub raw: Value,
}

/// Parse and validate a raw request body.
pub fn validate_body(body: &[u8]) -> Result<ValidatedEvent, IngestError> {
    let raw: Value = serde_json::from_slice(body).map_err(|e| IngestError::MalformedBody {
        details: e.to_string(),
    })?;
    validate_value(raw)
}

/// Validate an already-parsed payload.
pub fn validate_value(raw: Value) -> Result<ValidatedEvent, IngestError> {
    let Some(fields) = raw.as_object() else {
        return Err(IngestError::MalformedBody {
            details: format!("expected a JSON object, got {}", json_kind(&raw)),
        });
    };

    let kind = match fields.get("type") {
        Some(Value::String(tag)) => {
            EventKind::parse(tag).ok_or_else(|| IngestError::InvalidType { found: tag.clone() })?
        }
        Some(other) => {
            return Err(IngestError::InvalidType {
                found: other.to_string(),
            });
        }
        None => {
            return Err(IngestError::InvalidType {
                found: "<missing>".to_string(),
            });
        }
    };

    let event = Event::from_fields(kind, fields);
    Ok(ValidatedEvent { event, raw })
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
