//! Local JSON-lines table snapshots.
//!
//! Each non-blank line is one entity in the same JSON shape the table service
//! returns. Pages are `page_size` entities long; the continuation token holds
//! the byte offset of the next unread line, so each page seeks straight to it.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tabula_core::{ContinuationToken, FetchError, QueryDescriptor, Segment, SegmentSource};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tracing::debug;

use crate::entity::{apply_projection, decode_entity};

const TOKEN_PREFIX: &str = "jsonl:";

/// Serves a JSON-lines file page by page.
#[derive(Debug, Clone)]
pub struct JsonLinesSource {
    path: PathBuf,
    page_size: usize,
}

impl JsonLinesSource {
    pub fn new(path: impl AsRef<Path>, page_size: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            page_size: page_size.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn offset_of(token: Option<&ContinuationToken>) -> Result<u64, FetchError> {
        match token {
            None => Ok(0),
            Some(token) => token
                .as_str()
                .strip_prefix(TOKEN_PREFIX)
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| {
                    FetchError::Permanent("continuation token is not from a JSON-lines source".into())
                }),
        }
    }

    fn decode_error(&self, at: u64, e: impl std::fmt::Display) -> FetchError {
        FetchError::Permanent(format!("{} entity at byte {}: {}", self.path.display(), at, e))
    }
}

fn io_error(path: &Path, e: std::io::Error) -> FetchError {
    let message = format!("{}: {}", path.display(), e);
    match e.kind() {
        std::io::ErrorKind::Interrupted | std::io::ErrorKind::TimedOut => {
            FetchError::Transient(message)
        }
        _ => FetchError::Permanent(message),
    }
}

#[async_trait]
impl SegmentSource for JsonLinesSource {
    async fn fetch_segment(
        &self,
        query: &QueryDescriptor,
        continuation: Option<&ContinuationToken>,
    ) -> Result<Segment, FetchError> {
        if !query.filter.trim().is_empty() {
            return Err(FetchError::Permanent(
                "JSON-lines sources do not evaluate filters".to_string(),
            ));
        }
        let offset = Self::offset_of(continuation)?;

        let mut file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| io_error(&self.path, e))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| io_error(&self.path, e))?;
        let mut reader = BufReader::new(file);

        let mut records = Vec::with_capacity(self.page_size);
        let mut position = offset;
        let mut next = None;
        let mut line = String::new();

        loop {
            line.clear();
            let read = reader
                .read_line(&mut line)
                .await
                .map_err(|e| io_error(&self.path, e))?;
            if read == 0 {
                break;
            }
            let line_start = position;
            position += read as u64;
            if line.trim().is_empty() {
                continue;
            }
            if records.len() == self.page_size {
                next = Some(line_start);
                break;
            }
            let entity: Map<String, Value> =
                serde_json::from_str(&line).map_err(|e| self.decode_error(line_start, e))?;
            let record = decode_entity(entity).map_err(|e| self.decode_error(line_start, e))?;
            records.push(apply_projection(record, query));
        }

        debug!(
            "Read {} entities from {} at byte {}",
            records.len(),
            self.path.display(),
            offset
        );
        let continuation =
            next.map(|at| ContinuationToken::new(format!("{}{}", TOKEN_PREFIX, at)));
        Ok(Segment::new(records, continuation))
    }
}
