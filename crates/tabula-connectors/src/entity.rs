//! Decoding of table entities from the store's JSON format.
//!
//! Entities arrive as flat JSON objects. Identity lives in `PartitionKey`,
//! `RowKey`, `Timestamp` and the `odata.etag` annotation; property types that
//! JSON cannot express are announced through `<name>@odata.type` annotations.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tabula_core::{FieldValue, QueryDescriptor, RawRecord};
use uuid::Uuid;

use crate::error::ConnectorError;

const PARTITION_KEY: &str = "PartitionKey";
const ROW_KEY: &str = "RowKey";
const TIMESTAMP: &str = "Timestamp";
const TYPE_SUFFIX: &str = "@odata.type";

/// Decode one entity object into a [`RawRecord`].
pub fn decode_entity(entity: Map<String, Value>) -> Result<RawRecord, ConnectorError> {
    let partition_key = required_string(&entity, PARTITION_KEY)?;
    let row_key = required_string(&entity, ROW_KEY)?;

    // Absent when a projection leaves it out.
    let timestamp = match entity.get(TIMESTAMP) {
        Some(Value::String(s)) => parse_datetime(s)?,
        Some(other) => {
            return Err(ConnectorError::DecodeFailed(format!(
                "Timestamp is not a string: {}",
                other
            )))
        }
        None => DateTime::<Utc>::default(),
    };

    let etag = ["odata.etag", "@odata.etag"]
        .iter()
        .find_map(|key| entity.get(*key).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string();

    let mut record = RawRecord::new(partition_key, row_key)
        .with_timestamp(timestamp)
        .with_etag(etag);

    for (name, value) in &entity {
        if is_reserved(name) {
            continue;
        }
        let annotation = entity
            .get(&format!("{}{}", name, TYPE_SUFFIX))
            .and_then(Value::as_str);
        let field = decode_value(name, value, annotation)?;
        record.fields.insert(name.clone(), field);
    }

    Ok(record)
}

/// Keep only the projected fields. Identity fields live outside the property
/// bag and are unaffected. An empty projection keeps everything.
pub fn apply_projection(mut record: RawRecord, query: &QueryDescriptor) -> RawRecord {
    if let Some(projection) = query.selected() {
        record.fields.retain(|name, _| projection.contains(name));
    }
    record
}

fn is_reserved(name: &str) -> bool {
    name == PARTITION_KEY
        || name == ROW_KEY
        || name == TIMESTAMP
        || name.starts_with("odata.")
        || name.starts_with("@odata.")
        || name.contains("@odata.")
}

fn required_string(entity: &Map<String, Value>, key: &str) -> Result<String, ConnectorError> {
    entity
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ConnectorError::DecodeFailed(format!("entity has no string {}", key)))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, ConnectorError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ConnectorError::DecodeFailed(format!("invalid datetime '{}': {}", s, e)))
}

fn decode_value(
    name: &str,
    value: &Value,
    annotation: Option<&str>,
) -> Result<FieldValue, ConnectorError> {
    let mismatch = || {
        ConnectorError::DecodeFailed(format!(
            "property '{}' does not match its type {}",
            name,
            annotation.unwrap_or("(inferred)")
        ))
    };

    if value.is_null() {
        return Ok(FieldValue::Null);
    }

    match annotation {
        Some("Edm.Int64") => match value {
            Value::String(s) => s.parse().map(FieldValue::Int64).map_err(|_| mismatch()),
            Value::Number(n) => n.as_i64().map(FieldValue::Int64).ok_or_else(mismatch),
            _ => Err(mismatch()),
        },
        Some("Edm.Int32") => value
            .as_i64()
            .and_then(|n| i32::try_from(n).ok())
            .map(FieldValue::Int32)
            .ok_or_else(mismatch),
        Some("Edm.Double") => match value {
            Value::Number(n) => n.as_f64().map(FieldValue::Double).ok_or_else(mismatch),
            // NaN and the infinities are sent as strings.
            Value::String(s) => s.parse().map(FieldValue::Double).map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        Some("Edm.DateTime") => value
            .as_str()
            .ok_or_else(mismatch)
            .and_then(parse_datetime)
            .map(FieldValue::DateTime),
        Some("Edm.Guid") => value
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .map(FieldValue::Guid)
            .ok_or_else(mismatch),
        Some("Edm.Binary") => value
            .as_str()
            .map(|s| FieldValue::Binary(s.to_string()))
            .ok_or_else(mismatch),
        Some("Edm.Boolean") => value.as_bool().map(FieldValue::Bool).ok_or_else(mismatch),
        Some("Edm.String") => value
            .as_str()
            .map(|s| FieldValue::String(s.to_string()))
            .ok_or_else(mismatch),
        Some(other) => Err(ConnectorError::DecodeFailed(format!(
            "property '{}' has unsupported type {}",
            name, other
        ))),
        None => infer_value(name, value),
    }
}

fn infer_value(name: &str, value: &Value) -> Result<FieldValue, ConnectorError> {
    match value {
        Value::Null => Ok(FieldValue::Null),
        Value::Bool(b) => Ok(FieldValue::Bool(*b)),
        Value::String(s) => Ok(FieldValue::String(s.clone())),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(match i32::try_from(i) {
                    Ok(small) => FieldValue::Int32(small),
                    Err(_) => FieldValue::Int64(i),
                })
            } else {
                n.as_f64().map(FieldValue::Double).ok_or_else(|| {
                    ConnectorError::DecodeFailed(format!("property '{}' is not a number", name))
                })
            }
        }
        Value::Array(_) | Value::Object(_) => Err(ConnectorError::DecodeFailed(format!(
            "property '{}' is not a scalar",
            name
        ))),
    }
}
