//! Source factory: pick a segment source by URI scheme.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tabula_core::{ReaderConfig, SegmentSource};
use tracing::info;

use crate::config::SourceConfig;
use crate::json_lines::JsonLinesSource;
use crate::memory::MemorySource;
use crate::table_service::TableServiceSource;

/// Builds a [`SegmentSource`] for URIs it recognises.
pub trait SourceFactory: Send + Sync {
    /// Returns `true` if this factory can handle the given URI.
    fn can_handle(&self, uri: &str) -> bool;

    fn build(&self, source: &SourceConfig, reader: &ReaderConfig) -> Result<Arc<dyn SegmentSource>>;
}

/// Registry of source factories. Iterates factories in order and delegates
/// to the first one that can handle a URI.
pub struct SourceRegistry {
    factories: Vec<Arc<dyn SourceFactory>>,
}

impl SourceRegistry {
    pub fn new(factories: Vec<Arc<dyn SourceFactory>>) -> Self {
        Self { factories }
    }

    pub fn build_source(
        &self,
        source: &SourceConfig,
        reader: &ReaderConfig,
    ) -> Result<Arc<dyn SegmentSource>> {
        for factory in &self.factories {
            if factory.can_handle(&source.uri) {
                return factory.build(source, reader);
            }
        }
        anyhow::bail!("Unsupported source URI format: {}", source.uri);
    }
}

/// Registry with every built-in factory.
pub fn default_registry() -> SourceRegistry {
    SourceRegistry::new(vec![
        Arc::new(MemoryFactory),
        Arc::new(JsonLinesFactory),
        Arc::new(TableServiceFactory),
    ])
}

/// Factory for the table service REST API.
pub struct TableServiceFactory;

impl SourceFactory for TableServiceFactory {
    fn can_handle(&self, uri: &str) -> bool {
        uri.starts_with("https://") || uri.starts_with("http://")
    }

    fn build(&self, source: &SourceConfig, reader: &ReaderConfig) -> Result<Arc<dyn SegmentSource>> {
        let table = TableServiceSource::from_config(source, reader)
            .with_context(|| format!("Failed to configure table service source for '{}'", reader.table_name))?;
        info!(
            "Reading table '{}' from {} location(s) ({})",
            reader.table_name,
            table.endpoints().len(),
            reader.location_mode
        );
        Ok(Arc::new(table))
    }
}

/// Factory for local JSON-lines snapshots.
pub struct JsonLinesFactory;

impl SourceFactory for JsonLinesFactory {
    fn can_handle(&self, uri: &str) -> bool {
        uri.starts_with("file://") || uri.ends_with(".jsonl")
    }

    fn build(&self, source: &SourceConfig, _reader: &ReaderConfig) -> Result<Arc<dyn SegmentSource>> {
        let path = if source.uri.starts_with("file://") {
            url::Url::parse(&source.uri)?
                .to_file_path()
                .map_err(|_| anyhow::anyhow!("Not a local file URI: {}", source.uri))?
        } else {
            std::path::PathBuf::from(&source.uri)
        };
        info!("Reading JSON lines from '{}'", path.display());
        Ok(Arc::new(JsonLinesSource::new(path, source.page_size)))
    }
}

/// Factory for `memory://demo?rows=N&page_size=M&latency_ms=L`.
pub struct MemoryFactory;

impl SourceFactory for MemoryFactory {
    fn can_handle(&self, uri: &str) -> bool {
        uri.starts_with("memory://")
    }

    fn build(&self, source: &SourceConfig, _reader: &ReaderConfig) -> Result<Arc<dyn SegmentSource>> {
        let parsed = url::Url::parse(&source.uri)?;
        let param = |name: &str| {
            parsed
                .query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.to_string())
        };

        let rows: usize = param("rows")
            .unwrap_or_else(|| "100".to_string())
            .parse()
            .context("Invalid 'rows' query parameter")?;
        let page_size: usize = match param("page_size") {
            Some(v) => v.parse().context("Invalid 'page_size' query parameter")?,
            None => source.page_size,
        };
        let mut memory = MemorySource::demo(rows, page_size);
        if let Some(ms) = param("latency_ms") {
            let ms: u64 = ms.parse().context("Invalid 'latency_ms' query parameter")?;
            memory = memory.with_latency(Duration::from_millis(ms));
        }
        info!(
            "Serving {} demo rows in {} page(s)",
            rows,
            memory.page_count()
        );
        Ok(Arc::new(memory))
    }
}
