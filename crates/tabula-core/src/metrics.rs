//! Prometheus metrics for segment reads.

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::Arc;

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct FailureKindLabel(pub &'static str);

impl prometheus_client::encoding::EncodeLabelSet for FailureKindLabel {
    fn encode(
        &self,
        mut encoder: prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("kind", self.0).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared counters; clones update the same underlying metrics.
#[derive(Clone)]
pub struct ReaderMetrics {
    pub fetches_issued: Counter,
    pub fetch_failures: Family<FailureKindLabel, Counter>,
    pub segments_installed: Counter,
    pub empty_segments: Counter,
    pub records_yielded: Counter,
    pub fetches_in_flight: Gauge,
    pub registry: Arc<Registry>,
}

impl ReaderMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let fetches_issued = Counter::default();
        registry.register(
            "tabula_fetches_issued",
            "Segment fetches started",
            fetches_issued.clone(),
        );

        let fetch_failures = Family::<FailureKindLabel, Counter>::default();
        registry.register(
            "tabula_fetch_failures",
            "Segment fetches that failed or were cancelled, by kind",
            fetch_failures.clone(),
        );

        let segments_installed = Counter::default();
        registry.register(
            "tabula_segments_installed",
            "Segments that became the current page",
            segments_installed.clone(),
        );

        let empty_segments = Counter::default();
        registry.register(
            "tabula_empty_segments",
            "Segments with no records but a continuation token",
            empty_segments.clone(),
        );

        let records_yielded = Counter::default();
        registry.register(
            "tabula_records_yielded",
            "Records handed to the caller",
            records_yielded.clone(),
        );

        let fetches_in_flight = Gauge::default();
        registry.register(
            "tabula_fetches_in_flight",
            "Segment fetches currently outstanding",
            fetches_in_flight.clone(),
        );

        Self {
            fetches_issued,
            fetch_failures,
            segments_installed,
            empty_segments,
            records_yielded,
            fetches_in_flight,
            registry: Arc::new(registry),
        }
    }

    pub(crate) fn record_failure(&self, kind: &'static str) {
        self.fetch_failures
            .get_or_create(&FailureKindLabel(kind))
            .inc();
    }

    /// Encode all metrics as Prometheus text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buf = String::new();
        encode(&mut buf, &self.registry)?;
        Ok(buf)
    }
}

impl Default for ReaderMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReaderMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderMetrics")
            .field("fetches_issued", &self.fetches_issued.get())
            .field("records_yielded", &self.records_yielded.get())
            .field("fetches_in_flight", &self.fetches_in_flight.get())
            .finish()
    }
}
