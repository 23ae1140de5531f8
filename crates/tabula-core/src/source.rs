//! The contract between the cursor and whatever actually talks to the store.

use async_trait::async_trait;

use crate::error::FetchError;
use crate::model::{ContinuationToken, QueryDescriptor, Segment};

/// Fetches one page of a table query.
///
/// Implementations own connection setup, endpoint selection, credentials and
/// any retry policy. The cursor calls `fetch_segment` at most once at a time
/// per read and never retries on its own.
#[async_trait]
pub trait SegmentSource: Send + Sync {
    /// Fetch the page that starts at `continuation`, or the first page when
    /// `continuation` is `None`.
    async fn fetch_segment(
        &self,
        query: &QueryDescriptor,
        continuation: Option<&ContinuationToken>,
    ) -> Result<Segment, FetchError>;
}
