//! Cursor behaviour against an instrumented source: ordering, read-ahead,
//! the single in-flight fetch, empty pages, failures and cancellation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::ScriptedSource;
use tabula_core::{
    CancellationToken, ContinuationToken, CursorState, FetchError, QueryDescriptor, ReadError,
    ReaderMetrics, Segment, SegmentCursor, SegmentSource,
};
use tokio::time::Instant;

fn cursor_over(source: &Arc<ScriptedSource>) -> SegmentCursor {
    SegmentCursor::new(source.clone(), QueryDescriptor::new("Status eq 'open'"))
}

async fn drain(cursor: &mut SegmentCursor, cancel: &CancellationToken) -> Vec<String> {
    let mut rows = Vec::new();
    while let Some(record) = cursor.try_take_next(cancel).await.unwrap() {
        rows.push(record.row_key);
    }
    rows
}

#[tokio::test]
async fn yields_every_record_in_order_for_any_partitioning() {
    let partitionings: Vec<Vec<Vec<&str>>> = vec![
        vec![vec!["a", "b", "c", "d", "e"]],
        vec![vec!["a"], vec!["b"], vec!["c"], vec!["d"], vec!["e"]],
        vec![vec!["a", "b"], vec![], vec!["c", "d", "e"]],
        vec![vec![], vec![], vec!["a"], vec![], vec!["b", "c", "d", "e"], vec![]],
        vec![vec!["a", "b", "c"], vec!["d", "e"], vec![], vec![]],
    ];

    for pages in partitionings {
        let page_count = pages.len();
        let source = Arc::new(ScriptedSource::new(pages));
        let mut cursor = cursor_over(&source);
        let cancel = CancellationToken::new();

        assert_eq!(drain(&mut cursor, &cancel).await, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(cursor.state(), CursorState::Exhausted);
        for _ in 0..3 {
            assert!(cursor.try_take_next(&cancel).await.unwrap().is_none());
        }

        assert_eq!(source.requested_pages(), (0..page_count).collect::<Vec<_>>());
        assert_eq!(source.max_active(), 1);
        assert_eq!(source.started(), source.completed());
        assert_eq!(cursor.stats().records_yielded, 5);
    }
}

#[tokio::test]
async fn empty_pages_with_continuation_are_skipped() {
    let source = Arc::new(ScriptedSource::new(vec![vec![], vec![], vec![], vec!["only"]]));
    let mut cursor = cursor_over(&source);
    let cancel = CancellationToken::new();

    let record = cursor.try_take_next(&cancel).await.unwrap().unwrap();
    assert_eq!(record.row_key, "only");
    assert_eq!(cursor.stats().empty_segments, 3);
    assert_eq!(cursor.stats().records_yielded, 1);
    assert!(cursor.try_take_next(&cancel).await.unwrap().is_none());
}

#[tokio::test]
async fn empty_table_ends_immediately() {
    let source = Arc::new(ScriptedSource::new(vec![vec![]]));
    let mut cursor = cursor_over(&source);
    let cancel = CancellationToken::new();

    assert!(cursor.try_take_next(&cancel).await.unwrap().is_none());
    assert_eq!(cursor.state(), CursorState::Exhausted);
    assert_eq!(source.started(), 1);
}

#[tokio::test]
async fn query_descriptor_reaches_every_fetch() {
    let source = Arc::new(ScriptedSource::new(vec![vec!["a"], vec!["b"]]));
    let mut cursor = cursor_over(&source);
    let cancel = CancellationToken::new();
    drain(&mut cursor, &cancel).await;

    assert_eq!(
        source.filters(),
        vec!["Status eq 'open'".to_string(), "Status eq 'open'".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn read_ahead_starts_when_last_record_is_taken() {
    let source = Arc::new(
        ScriptedSource::new(vec![vec!["a", "b"], vec!["c"]])
            .with_delay(Duration::from_millis(100)),
    );
    let mut cursor = cursor_over(&source);
    let cancel = CancellationToken::new();

    cursor.try_take_next(&cancel).await.unwrap().unwrap();
    assert_eq!(cursor.stats().fetches_issued, 1);
    assert_eq!(cursor.state(), CursorState::Ready);

    let b = cursor.try_take_next(&cancel).await.unwrap().unwrap();
    let yielded_b = Instant::now();
    assert_eq!(b.row_key, "b");
    // Issued before control came back to us, not on the next call.
    assert_eq!(cursor.stats().fetches_issued, 2);
    assert_eq!(cursor.state(), CursorState::Draining);

    // Caller "processes" b while the next page downloads.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let started = source.started_at(1).expect("page 1 fetch started");
    assert!(started <= yielded_b);

    let c = cursor.try_take_next(&cancel).await.unwrap().unwrap();
    assert_eq!(c.row_key, "c");
}

#[tokio::test(start_paused = true)]
async fn read_ahead_overlaps_latency_with_processing() {
    let latency = Duration::from_millis(100);
    let processing = Duration::from_millis(100);
    let source = Arc::new(
        ScriptedSource::new(vec![vec!["a", "b"], vec!["c"]])
            .with_delay(latency),
    );
    let mut cursor = cursor_over(&source);
    let cancel = CancellationToken::new();

    let begin = Instant::now();
    cursor.try_take_next(&cancel).await.unwrap().unwrap();
    tokio::time::sleep(processing).await;
    cursor.try_take_next(&cancel).await.unwrap().unwrap();
    tokio::time::sleep(processing).await;
    cursor.try_take_next(&cancel).await.unwrap().unwrap();
    let elapsed = begin.elapsed();

    // Sequential fetching would need 2 * latency + 2 * processing.
    assert!(elapsed >= Duration::from_millis(300), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(400), "elapsed {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn never_more_than_one_fetch_in_flight() {
    let source = Arc::new(
        ScriptedSource::new(vec![vec!["a"], vec![], vec!["b"], vec!["c", "d"], vec![], vec!["e"]])
            .with_delay(Duration::from_millis(10)),
    );
    let mut cursor = cursor_over(&source);
    let cancel = CancellationToken::new();

    loop {
        let stats = cursor.stats();
        let outstanding = stats.fetches_issued - stats.fetches_completed - stats.fetches_abandoned;
        assert!(outstanding <= 1, "outstanding fetches: {}", outstanding);
        match cursor.try_take_next(&cancel).await.unwrap() {
            Some(_) => tokio::time::sleep(Duration::from_millis(3)).await,
            None => break,
        }
    }
    assert_eq!(source.max_active(), 1);
    assert_eq!(source.started(), 6);
}

#[tokio::test(start_paused = true)]
async fn cancellation_leaves_position_unchanged() {
    let source = Arc::new(
        ScriptedSource::new(vec![vec!["a"], vec!["b"]])
            .with_delay(Duration::from_secs(1)),
    );
    let mut cursor = cursor_over(&source);

    let a = cursor
        .try_take_next(&CancellationToken::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(a.row_key, "a");
    assert_eq!(cursor.state(), CursorState::Draining);
    let before = cursor.stats();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });
    assert_eq!(cursor.try_take_next(&cancel).await, Err(ReadError::Cancelled));

    // Read-ahead was dropped, nothing else moved.
    assert_eq!(cursor.state(), CursorState::Ready);
    let after = cursor.stats();
    assert_eq!(after.records_yielded, before.records_yielded);
    assert_eq!(after.segments_installed, before.segments_installed);
    assert_eq!(after.fetches_abandoned, 1);

    // The same cancelled token keeps failing fast.
    assert_eq!(cursor.try_take_next(&cancel).await, Err(ReadError::Cancelled));

    let b = cursor
        .try_take_next(&CancellationToken::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(b.row_key, "b");
    // Page 1 was requested again with the same token.
    assert_eq!(source.requested_pages(), vec![0, 1, 1]);
    assert!(cursor
        .try_take_next(&CancellationToken::new())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test(start_paused = true)]
async fn cancelling_the_first_fetch_returns_to_empty() {
    let source = Arc::new(
        ScriptedSource::new(vec![vec!["a"]])
            .with_delay(Duration::from_secs(5)),
    );
    let mut cursor = cursor_over(&source);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });
    assert_eq!(cursor.ensure_loaded(&cancel).await, Err(ReadError::Cancelled));
    assert_eq!(cursor.state(), CursorState::Empty);

    let a = cursor
        .try_take_next(&CancellationToken::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(a.row_key, "a");
}

#[tokio::test]
async fn transient_failure_keeps_cursor_usable() {
    let source = Arc::new(
        ScriptedSource::new(vec![vec!["a", "b"], vec!["c"]])
            .fail_page(1, FetchError::Transient("503 server busy".into())),
    );
    let mut cursor = cursor_over(&source);
    let cancel = CancellationToken::new();

    assert_eq!(cursor.try_take_next(&cancel).await.unwrap().unwrap().row_key, "a");
    assert_eq!(cursor.try_take_next(&cancel).await.unwrap().unwrap().row_key, "b");
    assert_eq!(
        cursor.try_take_next(&cancel).await,
        Err(ReadError::TransientFetch("503 server busy".into()))
    );
    assert_eq!(cursor.state(), CursorState::Ready);

    assert_eq!(cursor.try_take_next(&cancel).await.unwrap().unwrap().row_key, "c");
    assert!(cursor.try_take_next(&cancel).await.unwrap().is_none());
    assert_eq!(source.requested_pages(), vec![0, 1, 1]);
}

#[tokio::test]
async fn permanent_failure_is_terminal() {
    let source = Arc::new(
        ScriptedSource::new(vec![vec!["a"], vec!["b"]])
            .fail_page(1, FetchError::Permanent("403 forbidden".into())),
    );
    let mut cursor = cursor_over(&source);
    let cancel = CancellationToken::new();

    assert_eq!(cursor.try_take_next(&cancel).await.unwrap().unwrap().row_key, "a");
    assert_eq!(
        cursor.try_take_next(&cancel).await,
        Err(ReadError::PermanentFetch("403 forbidden".into()))
    );
    assert_eq!(cursor.state(), CursorState::Failed);
    assert_eq!(cursor.try_take_next(&cancel).await, Err(ReadError::CursorFailed));
    assert_eq!(cursor.ensure_loaded(&cancel).await, Err(ReadError::CursorFailed));
    assert_eq!(source.started(), 2);
}

struct PanickingSource;

#[async_trait]
impl SegmentSource for PanickingSource {
    async fn fetch_segment(
        &self,
        _query: &QueryDescriptor,
        _continuation: Option<&ContinuationToken>,
    ) -> Result<Segment, FetchError> {
        panic!("connector bug");
    }
}

#[tokio::test]
async fn panicking_fetch_is_a_permanent_failure() {
    let mut cursor = SegmentCursor::new(Arc::new(PanickingSource), QueryDescriptor::default());
    let cancel = CancellationToken::new();

    let err = cursor.try_take_next(&cancel).await.unwrap_err();
    assert!(matches!(err, ReadError::PermanentFetch(_)));
    assert_eq!(cursor.state(), CursorState::Failed);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_cursor_aborts_the_read_ahead() {
    let source = Arc::new(
        ScriptedSource::new(vec![vec!["a"], vec!["b"]]).with_delay(Duration::from_millis(100)),
    );
    let metrics = ReaderMetrics::new();
    let mut cursor = cursor_over(&source).with_metrics(metrics.clone());
    let cancel = CancellationToken::new();

    assert_eq!(cursor.try_take_next(&cancel).await.unwrap().unwrap().row_key, "a");
    assert_eq!(cursor.state(), CursorState::Draining);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(source.started(), 2);
    assert_eq!(metrics.fetches_in_flight.get(), 1);

    drop(cursor);
    assert_eq!(metrics.fetches_in_flight.get(), 0);

    tokio::time::sleep(Duration::from_millis(500)).await;
    // Only the first page ever completed.
    assert_eq!(source.completed(), 1);
}
