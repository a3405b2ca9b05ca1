use std::sync::Arc;

use futures::Stream;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{HistoryError, HistoryPage, HistoryStore, ReplayOptions};
use crate::{ExecutionId, HistoryEvent};

type PageFetch = JoinHandle<Result<HistoryPage, HistoryError>>;

/// Forward reader over a paged history.
///
/// The first page is read when the pager opens. Whenever a page is received
/// and it has a successor, the successor is fetched on the tokio runtime while
/// the current page is consumed, so at most one page is in flight.
pub struct HistoryPager {
    store: Arc<dyn HistoryStore>,
    execution: ExecutionId,
    page_size: usize,
    current: std::vec::IntoIter<HistoryEvent>,
    in_flight: Option<PageFetch>,
    pages_read: usize,
    failed: bool,
}

impl HistoryPager {
    /// Read the first page and start prefetching the second.
    pub async fn open(
        store: Arc<dyn HistoryStore>,
        execution: ExecutionId,
        options: &ReplayOptions,
    ) -> Result<Self, HistoryError> {
        let page_size = options.page_size.max(1);
        let first = store.read_page(&execution, None, page_size).await?;
        let mut pager = Self {
            store,
            execution,
            page_size,
            current: Vec::new().into_iter(),
            in_flight: None,
            pages_read: 0,
            failed: false,
        };
        pager.receive(first);
        Ok(pager)
    }

    /// Number of pages received so far.
    pub fn pages_read(&self) -> usize {
        self.pages_read
    }

    /// Next event, or `None` once the history is exhausted. After an error
    /// the pager yields nothing further.
    pub async fn next_event(&mut self) -> Option<Result<HistoryEvent, HistoryError>> {
        loop {
            if self.failed {
                return None;
            }
            if let Some(ev) = self.current.next() {
                return Some(Ok(ev));
            }
            let fetch = self.in_flight.take()?;
            match fetch.await {
                Ok(Ok(page)) => self.receive(page),
                Ok(Err(e)) => {
                    self.failed = true;
                    return Some(Err(e));
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(HistoryError::Fetch(e)));
                }
            }
        }
    }

    /// Adapt into a `Stream` of events.
    pub fn into_stream(self) -> impl Stream<Item = Result<HistoryEvent, HistoryError>> {
        futures::stream::unfold(self, |mut pager| async move {
            let item = pager.next_event().await?;
            Some((item, pager))
        })
    }

    fn receive(&mut self, page: HistoryPage) {
        self.pages_read += 1;
        debug!(
            "history page {} of {}: {} events, more={}",
            self.pages_read,
            self.execution,
            page.events.len(),
            page.next_page_token.is_some()
        );
        self.current = page.events.into_iter();
        if let Some(token) = page.next_page_token {
            let store = self.store.clone();
            let execution = self.execution.clone();
            let page_size = self.page_size;
            self.in_flight = Some(tokio::spawn(async move {
                store.read_page(&execution, Some(&token), page_size).await
            }));
        }
    }
}

impl Drop for HistoryPager {
    fn drop(&mut self) {
        if let Some(fetch) = self.in_flight.take() {
            fetch.abort();
        }
    }
}
