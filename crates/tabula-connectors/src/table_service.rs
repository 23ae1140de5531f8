//! Table service connector over the store's REST query API.
//!
//! Each fetch is one `GET {endpoint}/{table}()` request. The store returns at
//! most one page of entities per response and announces the next page through
//! the `x-ms-continuation-NextPartitionKey` / `NextRowKey` headers, which are
//! packed into an opaque [`ContinuationToken`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tabula_core::{
    ContinuationToken, FetchError, LocationMode, QueryDescriptor, ReaderConfig, Segment,
    SegmentSource,
};
use tracing::{debug, warn};
use url::Url;

use crate::config::SourceConfig;
use crate::entity::decode_entity;
use crate::error::ConnectorError;

pub const API_VERSION: &str = "2019-02-02";
const ACCEPT_MINIMAL_METADATA: &str = "application/json;odata=minimalmetadata";
const NEXT_PARTITION_KEY: &str = "x-ms-continuation-nextpartitionkey";
const NEXT_ROW_KEY: &str = "x-ms-continuation-nextrowkey";
const SECONDARY_SUFFIX: &str = "-secondary";

/// Identity fields always requested alongside a projection.
const IDENTITY_FIELDS: [&str; 3] = ["PartitionKey", "RowKey", "Timestamp"];

/// The two continuation headers, as carried inside an opaque token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableContinuation {
    pub next_partition_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_row_key: Option<String>,
}

impl TableContinuation {
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        Some(Self {
            next_partition_key: header(NEXT_PARTITION_KEY)?,
            next_row_key: header(NEXT_ROW_KEY),
        })
    }

    pub fn encode(&self) -> Result<ContinuationToken, ConnectorError> {
        Ok(ContinuationToken::new(serde_json::to_string(self)?))
    }

    pub fn decode(token: &ContinuationToken) -> Result<Self, ConnectorError> {
        Ok(serde_json::from_str(token.as_str())?)
    }
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    value: Vec<Map<String, Value>>,
}

/// Rewrite a primary endpoint into its read-only secondary.
///
/// Host-style endpoints (`acct.table.example.net`) get the suffix on the first
/// host label. Path-style endpoints used by local emulators
/// (`127.0.0.1:10002/acct`) get it on the first path segment.
pub fn secondary_endpoint(primary: &Url) -> Result<Url, ConnectorError> {
    let host = primary
        .host_str()
        .ok_or_else(|| ConnectorError::InvalidUri(format!("no host in {}", primary)))?;
    let path_style = host == "localhost" || host.parse::<std::net::IpAddr>().is_ok()
        || host.starts_with('[');

    let mut secondary = primary.clone();
    if path_style {
        let account = primary
            .path_segments()
            .and_then(|mut segments| segments.next())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ConnectorError::InvalidUri(format!("no account segment in {}", primary))
            })?;
        let rest: Vec<&str> = primary
            .path_segments()
            .map(|segments| segments.skip(1).collect())
            .unwrap_or_default();
        let mut path = format!("/{}{}", account, SECONDARY_SUFFIX);
        for segment in rest {
            path.push('/');
            path.push_str(segment);
        }
        secondary.set_path(&path);
    } else {
        let (account, domain) = host.split_once('.').ok_or_else(|| {
            ConnectorError::InvalidUri(format!("cannot derive secondary host from {}", host))
        })?;
        let rewritten = format!("{}{}.{}", account, SECONDARY_SUFFIX, domain);
        secondary.set_host(Some(&rewritten))?;
    }
    Ok(secondary)
}

/// Endpoints to try, in order, for `mode`.
pub fn endpoints_for(primary: &Url, mode: LocationMode) -> Result<Vec<Url>, ConnectorError> {
    Ok(match mode {
        LocationMode::PrimaryOnly => vec![primary.clone()],
        LocationMode::SecondaryOnly => vec![secondary_endpoint(primary)?],
        LocationMode::PrimaryThenSecondary => {
            vec![primary.clone(), secondary_endpoint(primary)?]
        }
        LocationMode::SecondaryThenPrimary => {
            vec![secondary_endpoint(primary)?, primary.clone()]
        }
    })
}

/// Map a non-success HTTP status onto the fetch error taxonomy.
pub fn classify_status(status: StatusCode, body: &str) -> FetchError {
    let message = if body.is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("HTTP {}: {}", status, body.chars().take(512).collect::<String>())
    };
    match status {
        StatusCode::REQUEST_TIMEOUT
        | StatusCode::TOO_MANY_REQUESTS
        | StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => FetchError::Transient(message),
        _ => FetchError::Permanent(message),
    }
}

fn classify_transport(e: &reqwest::Error) -> FetchError {
    if e.is_builder() || e.is_decode() || e.is_redirect() {
        FetchError::Permanent(e.to_string())
    } else {
        // Timeouts, refused connections and bodies cut off mid-stream.
        FetchError::Transient(e.to_string())
    }
}

/// Reads one table through the REST API.
pub struct TableServiceSource {
    client: reqwest::Client,
    endpoints: Vec<Url>,
    table: String,
    sas_token: Option<String>,
    request_timeout: Duration,
}

impl std::fmt::Debug for TableServiceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableServiceSource")
            .field("endpoints", &self.endpoints)
            .field("table", &self.table)
            .field("sas_token", &self.sas_token.as_ref().map(|_| "***"))
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl TableServiceSource {
    pub fn new(
        endpoint: &str,
        table: &str,
        mode: LocationMode,
        sas_token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, ConnectorError> {
        let primary = Url::parse(endpoint)?;
        if !matches!(primary.scheme(), "http" | "https") {
            return Err(ConnectorError::UnsupportedUri(endpoint.to_string()));
        }
        if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConnectorError::ConfigError(format!(
                "table name '{}' must be non-empty and alphanumeric",
                table
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ConnectorError::ConfigError(e.to_string()))?;

        Ok(Self {
            client,
            endpoints: endpoints_for(&primary, mode)?,
            table: table.to_string(),
            sas_token: sas_token
                .map(|s| s.trim_start_matches('?').to_string())
                .filter(|s| !s.is_empty()),
            request_timeout,
        })
    }

    /// Build from the source and reader settings.
    pub fn from_config(source: &SourceConfig, reader: &ReaderConfig) -> Result<Self, ConnectorError> {
        Self::new(
            &source.uri,
            &reader.table_name,
            reader.location_mode,
            source.sas_token.clone(),
            source.request_timeout(),
        )
    }

    pub fn endpoints(&self) -> &[Url] {
        &self.endpoints
    }

    /// Per-request timeout applied by the HTTP client.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Build the query URL for one page against `endpoint`.
    pub fn query_url(
        &self,
        endpoint: &Url,
        query: &QueryDescriptor,
        continuation: Option<&TableContinuation>,
    ) -> Result<Url, ConnectorError> {
        let mut url = endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| ConnectorError::InvalidUri(format!("{} cannot be a base", endpoint)))?
            .pop_if_empty()
            .push(&format!("{}()", self.table));

        let mut pairs: Vec<(&str, String)> = Vec::new();
        if !query.filter.is_empty() {
            pairs.push(("$filter", query.filter.clone()));
        }
        if let Some(projection) = query.selected() {
            let mut fields: Vec<&str> = IDENTITY_FIELDS.to_vec();
            fields.extend(
                projection
                    .iter()
                    .map(String::as_str)
                    .filter(|f| !IDENTITY_FIELDS.contains(f)),
            );
            pairs.push(("$select", fields.join(",")));
        }
        if let Some(next) = continuation {
            pairs.push(("NextPartitionKey", next.next_partition_key.clone()));
            if let Some(row_key) = &next.next_row_key {
                pairs.push(("NextRowKey", row_key.clone()));
            }
        }

        // form_urlencoded turns spaces into '+', which the service does not
        // read back as a space. A literal '+' is already escaped as %2B.
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs.iter().map(|(k, v)| (*k, v.as_str())))
            .finish()
            .replace('+', "%20");

        let full = match (&self.sas_token, encoded.is_empty()) {
            (Some(sas), true) => sas.clone(),
            (Some(sas), false) => format!("{}&{}", sas, encoded),
            (None, _) => encoded,
        };
        url.set_query(if full.is_empty() { None } else { Some(&full) });
        Ok(url)
    }

    async fn fetch_from(
        &self,
        endpoint: &Url,
        query: &QueryDescriptor,
        continuation: Option<&TableContinuation>,
    ) -> Result<Segment, FetchError> {
        let url = self.query_url(endpoint, query, continuation)?;
        debug!("Querying '{}' at {}", self.table, endpoint);

        let response = self
            .client
            .get(url)
            .header(ACCEPT, ACCEPT_MINIMAL_METADATA)
            .header("x-ms-version", API_VERSION)
            .header("maxdataserviceversion", "3.0;NetFx")
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let next = TableContinuation::from_headers(response.headers());
        let body = response.bytes().await.map_err(|e| classify_transport(&e))?;
        decode_page(&body, next)
    }
}

/// Decode a response body plus its continuation into a segment.
pub fn decode_page(body: &[u8], next: Option<TableContinuation>) -> Result<Segment, FetchError> {
    let page: QueryResponse = serde_json::from_slice(body).map_err(ConnectorError::from)?;
    let records = page
        .value
        .into_iter()
        .map(decode_entity)
        .collect::<Result<Vec<_>, _>>()?;
    let continuation = next.map(|n| n.encode()).transpose()?;
    Ok(Segment::new(records, continuation))
}

#[async_trait]
impl SegmentSource for TableServiceSource {
    async fn fetch_segment(
        &self,
        query: &QueryDescriptor,
        continuation: Option<&ContinuationToken>,
    ) -> Result<Segment, FetchError> {
        let continuation = continuation.map(TableContinuation::decode).transpose()?;

        let mut last_error = None;
        for (attempt, endpoint) in self.endpoints.iter().enumerate() {
            match self.fetch_from(endpoint, query, continuation.as_ref()).await {
                Ok(segment) => return Ok(segment),
                Err(e) if e.is_transient() && attempt + 1 < self.endpoints.len() => {
                    warn!("Location {} failed ({}), trying next location", endpoint, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error
            .unwrap_or_else(|| FetchError::Permanent("no endpoints configured".to_string())))
    }
}
