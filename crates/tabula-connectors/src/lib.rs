//! Tabula Connectors - segment sources
//!
//! This crate provides `SegmentSource` implementations for:
//! - the table service REST API, with primary/secondary location modes
//! - local JSON-lines snapshots
//! - in-memory pages (demos and tests)

pub mod config;
pub mod entity;
pub mod error;
pub mod factory;
pub mod json_lines;
pub mod memory;
pub mod table_service;

pub use config::SourceConfig;
pub use error::ConnectorError;
pub use factory::{default_registry, SourceFactory, SourceRegistry};
pub use json_lines::JsonLinesSource;
pub use memory::MemorySource;
pub use table_service::{TableContinuation, TableServiceSource};
