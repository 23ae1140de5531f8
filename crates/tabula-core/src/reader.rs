//! Pull-based item reader: the contract downstream pipeline stages consume.

use std::sync::Arc;

use futures::stream::{self, Stream};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ReaderConfig;
use crate::cursor::{CursorState, CursorStats, SegmentCursor};
use crate::enrich::{enrich, EnrichmentPolicy};
use crate::error::ReadError;
use crate::metrics::ReaderMetrics;
use crate::model::EnrichedItem;
use crate::source::SegmentSource;

/// Result of one pull.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    Item(EnrichedItem),
    EndOfStream,
}

impl ReadOutcome {
    pub fn into_item(self) -> Option<EnrichedItem> {
        match self {
            ReadOutcome::Item(item) => Some(item),
            ReadOutcome::EndOfStream => None,
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, ReadOutcome::EndOfStream)
    }
}

/// Reads a table one enriched item at a time.
#[derive(Debug)]
pub struct TableReader {
    cursor: SegmentCursor,
    policy: EnrichmentPolicy,
    finished: bool,
}

impl TableReader {
    pub fn new(cursor: SegmentCursor, policy: EnrichmentPolicy) -> Self {
        Self {
            cursor,
            policy,
            finished: false,
        }
    }

    /// Build a reader for `config` on top of `source`.
    pub fn open(config: &ReaderConfig, source: Arc<dyn SegmentSource>) -> Self {
        debug!(
            "Opening reader for table '{}' (enrichment={}, location={})",
            config.table_name, config.enrichment, config.location_mode
        );
        Self::new(SegmentCursor::new(source, config.query()), config.enrichment)
    }

    /// Like [`open`](Self::open), reporting into `metrics`.
    pub fn open_with_metrics(
        config: &ReaderConfig,
        source: Arc<dyn SegmentSource>,
        metrics: ReaderMetrics,
    ) -> Self {
        let cursor = SegmentCursor::new(source, config.query()).with_metrics(metrics);
        Self::new(cursor, config.enrichment)
    }

    /// Pull the next item. After the first `EndOfStream`, every further call
    /// returns `EndOfStream` without touching the source.
    pub async fn next(&mut self, cancel: &CancellationToken) -> Result<ReadOutcome, ReadError> {
        if self.finished {
            return Ok(ReadOutcome::EndOfStream);
        }
        match self.cursor.try_take_next(cancel).await? {
            Some(record) => Ok(ReadOutcome::Item(enrich(record, self.policy))),
            None => {
                self.finished = true;
                self.cursor.dispose();
                Ok(ReadOutcome::EndOfStream)
            }
        }
    }

    /// Adapt the reader into a stream that ends at end-of-stream or right
    /// after yielding the first error.
    pub fn into_stream(
        self,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<EnrichedItem, ReadError>> {
        stream::unfold(Some(self), move |reader| {
            let cancel = cancel.clone();
            async move {
                let mut reader = reader?;
                match reader.next(&cancel).await {
                    Ok(ReadOutcome::Item(item)) => Some((Ok(item), Some(reader))),
                    Ok(ReadOutcome::EndOfStream) => None,
                    Err(e) => Some((Err(e), None)),
                }
            }
        })
    }

    pub fn policy(&self) -> EnrichmentPolicy {
        self.policy
    }

    pub fn state(&self) -> CursorState {
        self.cursor.state()
    }

    pub fn stats(&self) -> CursorStats {
        self.cursor.stats()
    }

    /// Release the outstanding fetch, if any.
    pub fn dispose(&mut self) {
        self.cursor.dispose();
    }
}
