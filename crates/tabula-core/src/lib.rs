//! Tabula Core - paged table reading with read-ahead
//!
//! This crate provides the pieces that turn a paged table query into a
//! stream of items:
//! - `SegmentSource`: the contract a store connector implements
//! - `SegmentCursor`: one buffered page, one outstanding fetch, read-ahead
//! - `enrich`: injects store identity fields into fetched records
//! - `TableReader`: the per-item pull contract

pub mod config;
pub mod cursor;
pub mod enrich;
pub mod error;
pub mod metrics;
pub mod model;
pub mod reader;
pub mod source;

pub use config::{LocationMode, ReaderConfig};
pub use cursor::{CursorState, CursorStats, SegmentCursor};
pub use enrich::{enrich, EnrichmentPolicy};
pub use error::{FetchError, ReadError};
pub use metrics::ReaderMetrics;
pub use model::{ContinuationToken, EnrichedItem, FieldValue, QueryDescriptor, RawRecord, Segment};
pub use reader::{ReadOutcome, TableReader};
pub use source::SegmentSource;

// Re-export for callers wiring cancellation into `TableReader::next`.
pub use tokio_util::sync::CancellationToken;
