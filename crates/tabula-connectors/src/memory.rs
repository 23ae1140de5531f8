//! In-memory pages, for demos and tests.

use std::time::Duration;

use async_trait::async_trait;
use tabula_core::{
    ContinuationToken, FetchError, FieldValue, QueryDescriptor, RawRecord, Segment, SegmentSource,
};
use tracing::debug;

use crate::entity::apply_projection;

const TOKEN_PREFIX: &str = "mem:";

/// Serves pre-built pages. Page `i` carries the token `mem:{i+1}` unless it is
/// the last one.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    pages: Vec<Vec<RawRecord>>,
    latency: Option<Duration>,
}

impl MemorySource {
    pub fn new(pages: Vec<Vec<RawRecord>>) -> Self {
        Self {
            pages,
            latency: None,
        }
    }

    /// Chunk `records` into pages of `page_size`. An empty input yields one
    /// empty terminal page.
    pub fn from_records(records: Vec<RawRecord>, page_size: usize) -> Self {
        let page_size = page_size.max(1);
        let mut pages = Vec::new();
        let mut current = Vec::with_capacity(page_size);
        for record in records {
            current.push(record);
            if current.len() == page_size {
                pages.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() || pages.is_empty() {
            pages.push(current);
        }
        Self::new(pages)
    }

    /// `rows` synthetic records spread over four partitions.
    pub fn demo(rows: usize, page_size: usize) -> Self {
        let records = (0..rows)
            .map(|i| {
                RawRecord::new(format!("p{}", i % 4), format!("{:06}", i))
                    .with_field("Seq", FieldValue::Int64(i as i64))
                    .with_field("Label", format!("row {}", i))
            })
            .collect();
        Self::from_records(records, page_size)
    }

    /// Sleep for `latency` before answering each fetch.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

#[async_trait]
impl SegmentSource for MemorySource {
    async fn fetch_segment(
        &self,
        query: &QueryDescriptor,
        continuation: Option<&ContinuationToken>,
    ) -> Result<Segment, FetchError> {
        if !query.filter.trim().is_empty() {
            return Err(FetchError::Permanent(
                "memory sources do not evaluate filters".to_string(),
            ));
        }
        let index = match continuation {
            None => 0,
            Some(token) => token
                .as_str()
                .strip_prefix(TOKEN_PREFIX)
                .and_then(|n| n.parse::<usize>().ok())
                .filter(|i| *i < self.pages.len())
                .ok_or_else(|| {
                    FetchError::Permanent("continuation token is not from this source".into())
                })?,
        };

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let records = self
            .pages
            .get(index)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|record| apply_projection(record, query))
            .collect();
        let continuation = (index + 1 < self.pages.len())
            .then(|| ContinuationToken::new(format!("{}{}", TOKEN_PREFIX, index + 1)));
        debug!("Serving memory page {} of {}", index + 1, self.pages.len());
        Ok(Segment::new(records, continuation))
    }
}
