//! Reader configuration from environment variables.

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::enrich::EnrichmentPolicy;
use crate::model::QueryDescriptor;

/// Which replica of the store a source should query, and in what order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationMode {
    #[default]
    PrimaryOnly,
    PrimaryThenSecondary,
    SecondaryOnly,
    SecondaryThenPrimary,
}

impl fmt::Display for LocationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LocationMode::PrimaryOnly => "primary_only",
            LocationMode::PrimaryThenSecondary => "primary_then_secondary",
            LocationMode::SecondaryOnly => "secondary_only",
            LocationMode::SecondaryThenPrimary => "secondary_then_primary",
        };
        f.write_str(s)
    }
}

impl FromStr for LocationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "primary" | "primary_only" | "primaryonly" => Ok(LocationMode::PrimaryOnly),
            "primary_then_secondary" | "primarythensecondary" => {
                Ok(LocationMode::PrimaryThenSecondary)
            }
            "secondary" | "secondary_only" | "secondaryonly" => Ok(LocationMode::SecondaryOnly),
            "secondary_then_primary" | "secondarythenprimary" => {
                Ok(LocationMode::SecondaryThenPrimary)
            }
            other => Err(format!("unknown location mode '{}'", other)),
        }
    }
}

/// Everything a reader needs besides the source itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderConfig {
    pub table_name: String,
    /// Empty string reads the whole table.
    #[serde(default)]
    pub filter: String,
    #[serde(default)]
    pub projection: Option<Vec<String>>,
    #[serde(default)]
    pub location_mode: LocationMode,
    #[serde(default)]
    pub enrichment: EnrichmentPolicy,
}

impl ReaderConfig {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            filter: String::new(),
            projection: None,
            location_mode: LocationMode::default(),
            enrichment: EnrichmentPolicy::default(),
        }
    }

    /// Build from `TABULA_TABLE` (required), `TABULA_FILTER`,
    /// `TABULA_SELECT` (comma separated), `TABULA_LOCATION_MODE` and
    /// `TABULA_ENRICHMENT`.
    pub fn from_env() -> Result<Self> {
        let table_name = std::env::var("TABULA_TABLE").context("TABULA_TABLE not set")?;
        anyhow::ensure!(!table_name.trim().is_empty(), "TABULA_TABLE is empty");

        Ok(Self {
            table_name,
            filter: std::env::var("TABULA_FILTER").unwrap_or_default(),
            projection: std::env::var("TABULA_SELECT")
                .ok()
                .and_then(|s| parse_projection(&s)),
            location_mode: std::env::var("TABULA_LOCATION_MODE")
                .unwrap_or_else(|_| "primary_only".to_string())
                .parse()
                .map_err(anyhow::Error::msg)
                .context("Invalid TABULA_LOCATION_MODE")?,
            enrichment: std::env::var("TABULA_ENRICHMENT")
                .unwrap_or_else(|_| "none".to_string())
                .parse()
                .map_err(anyhow::Error::msg)
                .context("Invalid TABULA_ENRICHMENT")?,
        })
    }

    /// The immutable query descriptor the cursor is built with.
    pub fn query(&self) -> QueryDescriptor {
        let query = QueryDescriptor::new(self.filter.clone());
        match &self.projection {
            Some(fields) => query.with_projection(fields.iter().cloned()),
            None => query,
        }
    }
}

/// Split a comma separated field list; blank input means "all fields".
pub fn parse_projection(raw: &str) -> Option<Vec<String>> {
    let fields: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect();
    if fields.is_empty() {
        None
    } else {
        Some(fields)
    }
}
