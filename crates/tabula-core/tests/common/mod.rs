//! Instrumented in-memory source shared by the cursor and reader tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tabula_core::{ContinuationToken, FetchError, QueryDescriptor, RawRecord, Segment, SegmentSource};
use tokio::time::Instant;

/// Serves a fixed list of pages. Page `i` carries token `page-{i+1}` unless it
/// is the last one. Records every fetch so tests can check ordering and
/// concurrency.
pub struct ScriptedSource {
    pages: Vec<Segment>,
    delay: Duration,
    failures: Mutex<HashMap<usize, VecDeque<FetchError>>>,
    started: AtomicUsize,
    completed: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    log: Mutex<Vec<(usize, Instant)>>,
    filters: Mutex<Vec<String>>,
}

impl ScriptedSource {
    pub fn new(pages: Vec<Vec<&str>>) -> Self {
        let count = pages.len();
        let pages = pages
            .into_iter()
            .enumerate()
            .map(|(i, rows)| {
                let records = rows
                    .into_iter()
                    .map(|row| RawRecord::new("pk", row).with_field("Value", row))
                    .collect();
                let next = (i + 1 < count).then(|| token(i + 1));
                Segment::new(records, next)
            })
            .collect();
        Self {
            pages,
            delay: Duration::ZERO,
            failures: Mutex::new(HashMap::new()),
            started: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
            filters: Mutex::new(Vec::new()),
        }
    }

    /// Every fetch sleeps for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The next fetch of `page` fails with `error` (queued per page).
    pub fn fail_page(self, page: usize, error: FetchError) -> Self {
        self.failures
            .lock()
            .unwrap()
            .entry(page)
            .or_default()
            .push_back(error);
        self
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Page indices in the order they were requested.
    pub fn requested_pages(&self) -> Vec<usize> {
        self.log.lock().unwrap().iter().map(|(page, _)| *page).collect()
    }

    /// When the fetch for `page` most recently started.
    pub fn started_at(&self, page: usize) -> Option<Instant> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(p, _)| *p == page)
            .map(|(_, at)| *at)
    }

    pub fn filters(&self) -> Vec<String> {
        self.filters.lock().unwrap().clone()
    }
}

pub fn token(page: usize) -> ContinuationToken {
    ContinuationToken::new(format!("page-{}", page))
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl<'a> ActiveGuard<'a> {
    fn enter(active: &'a AtomicUsize, max_active: &AtomicUsize) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        max_active.fetch_max(now, Ordering::SeqCst);
        Self(active)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SegmentSource for ScriptedSource {
    async fn fetch_segment(
        &self,
        query: &QueryDescriptor,
        continuation: Option<&ContinuationToken>,
    ) -> Result<Segment, FetchError> {
        let page = match continuation {
            None => 0,
            Some(t) => t
                .as_str()
                .strip_prefix("page-")
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| FetchError::Permanent("unknown continuation token".into()))?,
        };
        self.started.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push((page, Instant::now()));
        self.filters.lock().unwrap().push(query.filter.clone());
        let _active = ActiveGuard::enter(&self.active, &self.max_active);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let failure = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&page)
            .and_then(VecDeque::pop_front);
        self.completed.fetch_add(1, Ordering::SeqCst);
        match failure {
            Some(err) => Err(err),
            None => self
                .pages
                .get(page)
                .cloned()
                .ok_or_else(|| FetchError::Permanent(format!("no page {}", page))),
        }
    }
}
