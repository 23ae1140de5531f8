//! Value types shared by the cursor, the enricher and every segment source.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{Serialize, Serializer};
use uuid::Uuid;

/// Filter and projection for one read. Built once per cursor and never mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryDescriptor {
    pub filter: String,
    /// `None` (or an empty set) selects every property.
    pub projection: Option<BTreeSet<String>>,
}

impl QueryDescriptor {
    pub fn new(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            projection: None,
        }
    }

    pub fn with_projection<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: BTreeSet<String> = fields.into_iter().map(Into::into).collect();
        self.projection = (!fields.is_empty()).then_some(fields);
        self
    }

    /// The projected property names, if the query narrows the property set.
    pub fn selected(&self) -> Option<&BTreeSet<String>> {
        self.projection.as_ref().filter(|fields| !fields.is_empty())
    }
}

/// Server-issued resume point for the next page.
///
/// The cursor never looks inside a token; only the source that produced it
/// knows how to interpret the string.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ContinuationToken(String);

impl ContinuationToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Tokens can embed key material from the store; keep them out of logs.
impl fmt::Debug for ContinuationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContinuationToken(len={})", self.0.len())
    }
}

/// A typed property value as the table store models it.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
    String(String),
    DateTime(DateTime<Utc>),
    Guid(Uuid),
    /// Base64 text exactly as the store returned it.
    Binary(String),
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Null => serializer.serialize_none(),
            FieldValue::Bool(v) => serializer.serialize_bool(*v),
            FieldValue::Int32(v) => serializer.serialize_i32(*v),
            // 64-bit integers travel as strings, same as the store's own JSON.
            FieldValue::Int64(v) => serializer.collect_str(v),
            FieldValue::Double(v) => serializer.serialize_f64(*v),
            FieldValue::String(v) | FieldValue::Binary(v) => serializer.serialize_str(v),
            FieldValue::DateTime(v) => {
                serializer.serialize_str(&v.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            FieldValue::Guid(v) => serializer.collect_str(v),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int32(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int64(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Double(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

/// One entity as fetched from the store, identity fields kept apart from the
/// user-defined property bag.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub partition_key: String,
    pub row_key: String,
    /// Last-modified marker assigned by the store.
    pub timestamp: DateTime<Utc>,
    /// Opaque optimistic-concurrency token.
    pub etag: String,
    pub fields: BTreeMap<String, FieldValue>,
}

impl RawRecord {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            timestamp: DateTime::<Utc>::default(),
            etag: String::new(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = etag.into();
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

/// One page returned by a single fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Segment {
    pub records: Vec<RawRecord>,
    /// Where the next fetch resumes; `None` means this is the last page.
    pub continuation: Option<ContinuationToken>,
}

impl Segment {
    pub fn new(records: Vec<RawRecord>, continuation: Option<ContinuationToken>) -> Self {
        Self {
            records,
            continuation,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_last(&self) -> bool {
        self.continuation.is_none()
    }
}

/// The unit handed to callers: an owned field map plus the external item id.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct EnrichedItem {
    pub id: String,
    pub fields: BTreeMap<String, FieldValue>,
}
