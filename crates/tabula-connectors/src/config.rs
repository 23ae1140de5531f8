//! Source configuration from environment variables.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Where to read from and how to talk to it.
#[derive(Clone, Deserialize)]
pub struct SourceConfig {
    /// `https://account.table.core.windows.net`, `file:///data/orders.jsonl`,
    /// `memory://demo?rows=100` and so on.
    pub uri: String,
    /// Shared-access query string appended to table service requests.
    #[serde(default)]
    pub sas_token: Option<String>,
    /// Entities per page for local sources.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_page_size() -> usize {
    1000
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConfig")
            .field("uri", &self.uri)
            .field("sas_token", &self.sas_token.as_ref().map(|_| "***"))
            .field("page_size", &self.page_size)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl SourceConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            sas_token: None,
            page_size: default_page_size(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }

    pub fn from_env() -> Result<Self> {
        let uri = std::env::var("TABULA_SOURCE_URI").context("TABULA_SOURCE_URI not set")?;
        let page_size: usize = std::env::var("TABULA_PAGE_SIZE")
            .unwrap_or_else(|_| default_page_size().to_string())
            .parse()
            .context("Invalid TABULA_PAGE_SIZE")?;
        anyhow::ensure!(page_size > 0, "TABULA_PAGE_SIZE must be positive");

        Ok(Self {
            uri,
            sas_token: std::env::var("TABULA_SAS_TOKEN")
                .ok()
                .filter(|s| !s.is_empty()),
            page_size,
            request_timeout_secs: std::env::var("TABULA_REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| default_request_timeout_secs().to_string())
                .parse()
                .context("Invalid TABULA_REQUEST_TIMEOUT_SECS")?,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
