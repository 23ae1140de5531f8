//! Turns fetched records into caller-facing items.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::{EnrichedItem, FieldValue, RawRecord};

pub const PARTITION_KEY_FIELD: &str = "PartitionKey";
pub const ROW_KEY_FIELD: &str = "RowKey";
pub const TIMESTAMP_FIELD: &str = "Timestamp";
pub const ETAG_FIELD: &str = "ETag";

/// Which store-assigned identity fields to copy into each item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentPolicy {
    /// Leave the property bag as fetched.
    #[default]
    None,
    /// Add `RowKey`.
    RowKeyOnly,
    /// Add `PartitionKey`, `RowKey`, `Timestamp` and `ETag`.
    All,
}

impl fmt::Display for EnrichmentPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnrichmentPolicy::None => "none",
            EnrichmentPolicy::RowKeyOnly => "row_key_only",
            EnrichmentPolicy::All => "all",
        };
        f.write_str(s)
    }
}

impl FromStr for EnrichmentPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "none" => Ok(EnrichmentPolicy::None),
            "rowkey" | "row_key" | "rowkeyonly" | "row_key_only" => Ok(EnrichmentPolicy::RowKeyOnly),
            "all" => Ok(EnrichmentPolicy::All),
            other => Err(format!(
                "unknown enrichment policy '{}', expected none, row_key_only or all",
                other
            )),
        }
    }
}

/// Build the item for `record`. The item id is always the row key; injected
/// fields replace user properties of the same name.
pub fn enrich(record: RawRecord, policy: EnrichmentPolicy) -> EnrichedItem {
    let RawRecord {
        partition_key,
        row_key,
        timestamp,
        etag,
        mut fields,
    } = record;

    match policy {
        EnrichmentPolicy::None => {}
        EnrichmentPolicy::RowKeyOnly => {
            fields.insert(ROW_KEY_FIELD.to_string(), FieldValue::String(row_key.clone()));
        }
        EnrichmentPolicy::All => {
            fields.insert(
                PARTITION_KEY_FIELD.to_string(),
                FieldValue::String(partition_key),
            );
            fields.insert(ROW_KEY_FIELD.to_string(), FieldValue::String(row_key.clone()));
            fields.insert(TIMESTAMP_FIELD.to_string(), FieldValue::DateTime(timestamp));
            fields.insert(ETAG_FIELD.to_string(), FieldValue::String(etag));
        }
    }

    EnrichedItem {
        id: row_key,
        fields,
    }
}
