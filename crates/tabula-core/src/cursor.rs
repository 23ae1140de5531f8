//! Segment cursor: one buffered page, one outstanding fetch, read-ahead.
//!
//! The cursor walks a paged table query record by record. It keeps the
//! current [`Segment`] and a read index into it, and owns at most one fetch
//! task at a time. When the caller takes the last record of a page that has a
//! continuation token, the fetch for the following page is spawned right away
//! so the download overlaps with whatever the caller does with that record.
//!
//! Fetches run on the ambient tokio runtime via `tokio::spawn`.

use std::sync::Arc;
use std::time::Instant;

use prometheus_client::metrics::gauge::Gauge;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{FetchError, ReadError};
use crate::metrics::ReaderMetrics;
use crate::model::{ContinuationToken, QueryDescriptor, RawRecord, Segment};
use crate::source::SegmentSource;

/// Observable cursor state, derived from the current page, the read index
/// and the outstanding fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// No fetch issued yet.
    Empty,
    /// First fetch in flight, nothing to read yet.
    Loading,
    /// A page is current and either has unread records or a continuation.
    Ready,
    /// A fetch for the next page is in flight while the current page is read.
    Draining,
    /// Last page fully consumed.
    Exhausted,
    /// A fetch failed permanently.
    Failed,
}

/// Counters kept by every cursor, with or without a metrics registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CursorStats {
    pub fetches_issued: u64,
    /// Fetches whose task finished, successfully or not.
    pub fetches_completed: u64,
    /// Fetches abandoned through cancellation or `dispose`.
    pub fetches_abandoned: u64,
    pub segments_installed: u64,
    pub empty_segments: u64,
    pub records_yielded: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Active,
    Exhausted,
    Failed,
}

/// A spawned fetch. Dropping it aborts the task, so a pending fetch can never
/// outlive the slot that tracks it.
struct PendingFetch {
    handle: JoinHandle<Result<Segment, FetchError>>,
    issued_at: Instant,
    in_flight_gauge: Option<Gauge>,
}

impl Drop for PendingFetch {
    fn drop(&mut self) {
        self.handle.abort();
        if let Some(gauge) = &self.in_flight_gauge {
            gauge.dec();
        }
    }
}

/// Single-consumer cursor over a paged table query.
///
/// All reading methods take `&mut self`; share a cursor across tasks only
/// behind your own lock.
pub struct SegmentCursor {
    source: Arc<dyn SegmentSource>,
    query: Arc<QueryDescriptor>,
    current: Option<Segment>,
    index: usize,
    in_flight: Option<PendingFetch>,
    phase: Phase,
    stats: CursorStats,
    metrics: Option<ReaderMetrics>,
}

impl std::fmt::Debug for SegmentCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentCursor")
            .field("state", &self.state())
            .field("index", &self.index)
            .field("current_len", &self.current.as_ref().map(Segment::len))
            .field("stats", &self.stats)
            .finish()
    }
}

impl SegmentCursor {
    pub fn new(source: Arc<dyn SegmentSource>, query: QueryDescriptor) -> Self {
        Self {
            source,
            query: Arc::new(query),
            current: None,
            index: 0,
            in_flight: None,
            phase: Phase::Active,
            stats: CursorStats::default(),
            metrics: None,
        }
    }

    /// Report fetch and record activity into `metrics` as well.
    pub fn with_metrics(mut self, metrics: ReaderMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn query(&self) -> &QueryDescriptor {
        &self.query
    }

    pub fn stats(&self) -> CursorStats {
        self.stats
    }

    pub fn state(&self) -> CursorState {
        match self.phase {
            Phase::Exhausted => CursorState::Exhausted,
            Phase::Failed => CursorState::Failed,
            Phase::Active => match (&self.current, &self.in_flight) {
                (None, None) => CursorState::Empty,
                (None, Some(_)) => CursorState::Loading,
                (Some(_), Some(_)) => CursorState::Draining,
                (Some(segment), None) if self.index >= segment.len() && segment.is_last() => {
                    CursorState::Exhausted
                }
                (Some(_), None) => CursorState::Ready,
            },
        }
    }

    /// Make sure a first page is installed, fetching it if nothing was issued yet.
    pub async fn ensure_loaded(&mut self, cancel: &CancellationToken) -> Result<(), ReadError> {
        match self.phase {
            Phase::Failed => return Err(ReadError::CursorFailed),
            Phase::Exhausted => return Ok(()),
            Phase::Active => {}
        }
        if self.current.is_some() {
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(ReadError::Cancelled);
        }

        let pending = match self.in_flight.take() {
            Some(pending) => pending,
            None => self.start_fetch(None),
        };
        let segment = self.await_fetch(pending, cancel).await?;
        self.install(segment);
        Ok(())
    }

    /// Take the next record, fetching pages as needed.
    ///
    /// Returns `Ok(None)` once the last page is consumed, and on every call
    /// after that. On cancellation or a transient failure the current page
    /// and read index are left exactly as they were.
    pub async fn try_take_next(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<RawRecord>, ReadError> {
        match self.phase {
            Phase::Exhausted => return Ok(None),
            Phase::Failed => return Err(ReadError::CursorFailed),
            Phase::Active => {}
        }
        if cancel.is_cancelled() {
            return Err(ReadError::Cancelled);
        }

        loop {
            if let Some(segment) = &self.current {
                if let Some(record) = segment.records.get(self.index) {
                    let record = record.clone();
                    self.index += 1;
                    self.stats.records_yielded += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.records_yielded.inc();
                    }
                    self.read_ahead();
                    return Ok(Some(record));
                }
            }

            // The current page is used up (or there is none yet).
            let continuation = match &self.current {
                None => None,
                Some(segment) => match &segment.continuation {
                    Some(token) => Some(token.clone()),
                    None => {
                        self.finish();
                        return Ok(None);
                    }
                },
            };

            let pending = match self.in_flight.take() {
                Some(pending) => pending,
                None => self.start_fetch(continuation),
            };
            let segment = self.await_fetch(pending, cancel).await?;
            self.install(segment);
        }
    }

    /// Abort any outstanding fetch. Safe to call repeatedly; a later read
    /// simply reissues the fetch it needs.
    pub fn dispose(&mut self) {
        if let Some(pending) = self.in_flight.take() {
            debug!(
                "Disposing cursor with a fetch in flight for {:?}",
                pending.issued_at.elapsed()
            );
            self.stats.fetches_abandoned += 1;
        }
    }

    fn read_ahead(&mut self) {
        if self.in_flight.is_some() {
            return;
        }
        let Some(segment) = &self.current else {
            return;
        };
        if self.index < segment.len() {
            return;
        }
        if let Some(token) = &segment.continuation {
            let token = token.clone();
            debug!("Last record of segment taken, reading ahead");
            let pending = self.start_fetch(Some(token));
            self.in_flight = Some(pending);
        }
    }

    fn start_fetch(&mut self, continuation: Option<ContinuationToken>) -> PendingFetch {
        debug_assert!(self.in_flight.is_none(), "second fetch issued while one is pending");

        let source = Arc::clone(&self.source);
        let query = Arc::clone(&self.query);
        debug!(
            "Issuing segment fetch #{} (continuation: {})",
            self.stats.fetches_issued + 1,
            continuation.is_some()
        );
        let handle =
            tokio::spawn(async move { source.fetch_segment(&query, continuation.as_ref()).await });

        self.stats.fetches_issued += 1;
        let in_flight_gauge = self.metrics.as_ref().map(|metrics| {
            metrics.fetches_issued.inc();
            metrics.fetches_in_flight.inc();
            metrics.fetches_in_flight.clone()
        });

        PendingFetch {
            handle,
            issued_at: Instant::now(),
            in_flight_gauge,
        }
    }

    async fn await_fetch(
        &mut self,
        mut pending: PendingFetch,
        cancel: &CancellationToken,
    ) -> Result<Segment, ReadError> {
        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            joined = &mut pending.handle => Some(joined),
        };
        let waited = pending.issued_at.elapsed();
        drop(pending);

        let Some(joined) = joined else {
            self.stats.fetches_abandoned += 1;
            if let Some(metrics) = &self.metrics {
                metrics.record_failure("cancelled");
            }
            debug!("Segment fetch cancelled after {:?}; position unchanged", waited);
            return Err(ReadError::Cancelled);
        };

        self.stats.fetches_completed += 1;
        match joined {
            Ok(Ok(segment)) => {
                debug!(
                    "Segment fetched in {:?}: {} records, last={}",
                    waited,
                    segment.len(),
                    segment.is_last()
                );
                Ok(segment)
            }
            Ok(Err(e)) if e.is_transient() => {
                warn!("Segment fetch failed transiently: {}", e);
                if let Some(metrics) = &self.metrics {
                    metrics.record_failure("transient");
                }
                Err(e.into())
            }
            Ok(Err(e)) => {
                warn!("Segment fetch failed permanently: {}", e);
                if let Some(metrics) = &self.metrics {
                    metrics.record_failure("permanent");
                }
                self.fail();
                Err(e.into())
            }
            Err(join_error) => {
                warn!("Segment fetch task ended abnormally: {}", join_error);
                if let Some(metrics) = &self.metrics {
                    metrics.record_failure("permanent");
                }
                self.fail();
                Err(ReadError::PermanentFetch(format!(
                    "fetch task ended abnormally: {}",
                    join_error
                )))
            }
        }
    }

    fn install(&mut self, segment: Segment) {
        self.stats.segments_installed += 1;
        if let Some(metrics) = &self.metrics {
            metrics.segments_installed.inc();
        }
        if segment.is_empty() && !segment.is_last() {
            self.stats.empty_segments += 1;
            if let Some(metrics) = &self.metrics {
                metrics.empty_segments.inc();
            }
            debug!("Empty segment with continuation, fetching forward");
        }
        self.current = Some(segment);
        self.index = 0;
    }

    fn finish(&mut self) {
        self.phase = Phase::Exhausted;
        self.current = None;
        self.dispose();
        info!(
            "Table read exhausted: {} records from {} segments",
            self.stats.records_yielded, self.stats.segments_installed
        );
    }

    fn fail(&mut self) {
        self.phase = Phase::Failed;
        self.current = None;
        self.dispose();
    }
}

impl Drop for SegmentCursor {
    fn drop(&mut self) {
        self.dispose();
    }
}
