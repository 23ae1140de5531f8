//! Tabula CLI - read a table as JSON lines

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tabula_connectors::{default_registry, SourceConfig, TableServiceSource};
use tabula_core::config::parse_projection;
use tabula_core::{
    CancellationToken, EnrichmentPolicy, LocationMode, ReadError, ReaderConfig, ReaderMetrics,
    TableReader,
};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "tabula")]
#[command(about = "Stream table entities page by page with read-ahead")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read every matching entity and print one JSON object per line
    Read(ReadArgs),

    /// Show the endpoints a location mode resolves to
    Endpoints {
        /// Primary table service endpoint
        #[arg(short, long, env = "TABULA_SOURCE_URI")]
        source: String,

        #[arg(short, long, env = "TABULA_TABLE")]
        table: String,

        #[arg(long, env = "TABULA_LOCATION_MODE", default_value = "primary_only")]
        location_mode: LocationMode,
    },
}

#[derive(Args)]
struct ReadArgs {
    /// Source URI: table service endpoint, JSON-lines file or memory://demo
    #[arg(short, long, env = "TABULA_SOURCE_URI")]
    source: String,

    /// Table name
    #[arg(short, long, env = "TABULA_TABLE", default_value = "demo")]
    table: String,

    /// Server-side filter expression
    #[arg(short, long, env = "TABULA_FILTER", default_value = "")]
    filter: String,

    /// Comma-separated property names to select
    #[arg(long, env = "TABULA_SELECT")]
    select: Option<String>,

    /// Which identity fields to add to each item: none, row_key_only, all
    #[arg(short, long, env = "TABULA_ENRICHMENT", default_value = "none")]
    enrich: EnrichmentPolicy,

    #[arg(long, env = "TABULA_LOCATION_MODE", default_value = "primary_only")]
    location_mode: LocationMode,

    #[arg(long, env = "TABULA_SAS_TOKEN", hide_env_values = true)]
    sas_token: Option<String>,

    /// Entities per page for local sources
    #[arg(long, env = "TABULA_PAGE_SIZE", default_value_t = 1000)]
    page_size: usize,

    /// Per-request timeout for table service calls
    #[arg(long, env = "TABULA_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    request_timeout_secs: u64,

    /// Stop after this many items
    #[arg(short, long)]
    limit: Option<usize>,

    /// Cancel the read after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Print reader metrics to stderr when done
    #[arg(long)]
    metrics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries data only.
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Read(args) => read_table(args).await?,
        Commands::Endpoints {
            source,
            table,
            location_mode,
        } => show_endpoints(&source, &table, location_mode)?,
    }

    Ok(())
}

impl ReadArgs {
    fn reader_config(&self) -> ReaderConfig {
        ReaderConfig {
            table_name: self.table.clone(),
            filter: self.filter.clone(),
            projection: self.select.as_deref().and_then(parse_projection),
            location_mode: self.location_mode,
            enrichment: self.enrich,
        }
    }

    fn source_config(&self) -> Result<SourceConfig> {
        anyhow::ensure!(self.page_size > 0, "--page-size must be positive");
        let mut config = SourceConfig::new(self.source.clone());
        config.sas_token = self.sas_token.clone().filter(|s| !s.is_empty());
        config.page_size = self.page_size;
        config.request_timeout_secs = self.request_timeout_secs;
        Ok(config)
    }
}

async fn read_table(args: ReadArgs) -> Result<()> {
    let reader_config = args.reader_config();
    let source_config = args.source_config()?;

    let source = default_registry()
        .build_source(&source_config, &reader_config)
        .context("Failed to build segment source")?;

    let metrics = ReaderMetrics::new();
    let mut reader = TableReader::open_with_metrics(&reader_config, source, metrics.clone());

    let cancel = CancellationToken::new();
    if let Some(secs) = args.timeout_secs {
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            token.cancel();
        });
    }

    let stdout = std::io::stdout();
    let mut out = std::io::BufWriter::new(stdout.lock());
    let mut written = 0usize;

    let result = loop {
        if args.limit.is_some_and(|limit| written >= limit) {
            break Ok(());
        }
        match reader.next(&cancel).await {
            Ok(outcome) => match outcome.into_item() {
                Some(item) => {
                    serde_json::to_writer(&mut out, &item)?;
                    out.write_all(b"\n")?;
                    written += 1;
                }
                None => break Ok(()),
            },
            Err(ReadError::Cancelled) => {
                warn!("Read cancelled after {} item(s)", written);
                break Err(ReadError::Cancelled);
            }
            Err(e) => break Err(e),
        }
    };
    out.flush()?;
    reader.dispose();

    let stats = reader.stats();
    info!(
        "Wrote {} item(s) from '{}' ({} fetch(es), {} empty page(s))",
        written, reader_config.table_name, stats.fetches_issued, stats.empty_segments
    );

    if args.metrics {
        let encoded = metrics.encode().context("Failed to encode metrics")?;
        eprint!("{}", encoded);
    }

    result.with_context(|| format!("Reading table '{}' failed", reader_config.table_name))
}

fn show_endpoints(source: &str, table: &str, mode: LocationMode) -> Result<()> {
    let table_source =
        TableServiceSource::new(source, table, mode, None, Duration::from_secs(30))?;
    for (i, endpoint) in table_source.endpoints().iter().enumerate() {
        println!("{}\t{}", i + 1, endpoint);
    }
    Ok(())
}
