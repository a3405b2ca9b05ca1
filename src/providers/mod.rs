use std::path::PathBuf;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tracing::info;

use crate::state::replay::StateBuilder;
use crate::{ExecutionId, ExecutionState, HistoryEvent, StateError};

pub mod fs;
pub mod in_memory;
pub mod pager;

pub use pager::HistoryPager;

/// Default number of events per history page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// One forward page of an execution's history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryPage {
    pub events: Vec<HistoryEvent>,
    /// Token for the following page; `None` on the last page.
    pub next_page_token: Option<String>,
}

/// Failure of a history source.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("execution not found: {0}")]
    NotFound(ExecutionId),
    #[error("execution already exists: {0}")]
    AlreadyExists(ExecutionId),
    #[error("execution id cannot name a history file: {0}")]
    InvalidExecutionId(ExecutionId),
    #[error("invalid page token: {0:?}")]
    InvalidPageToken(String),
    #[error("event {id} does not follow event {last}")]
    OutOfOrder { last: u64, id: u64 },
    #[error("{}:{line}: {source}", path.display())]
    Decode {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("encode event: {0}")]
    Encode(#[source] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("page fetch aborted: {0}")]
    Fetch(#[from] tokio::task::JoinError),
}

/// Error returned by `replay_history` / `replay_stream`.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("history unavailable: {0}")]
    History(#[from] HistoryError),
    #[error("inconsistent history: {0}")]
    State(#[from] StateError),
}

/// Provider of execution histories, served in forward pages.
///
/// Page tokens are opaque to callers; pass back exactly what the previous
/// page returned.
#[async_trait::async_trait]
pub trait HistoryStore: Send + Sync {
    /// Read one page of at most `page_size` events, starting at `page_token`
    /// (`None` for the first page).
    async fn read_page(
        &self,
        execution: &ExecutionId,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<HistoryPage, HistoryError>;

    /// Register a new, empty execution history.
    async fn create_execution(&self, execution: &ExecutionId) -> Result<(), HistoryError>;

    /// Append events; ids must continue the existing history in ascending order.
    async fn append(&self, execution: &ExecutionId, events: Vec<HistoryEvent>) -> Result<(), HistoryError>;

    /// All executions known to the store, sorted.
    async fn list_executions(&self) -> Vec<ExecutionId>;

    /// Read the whole history by walking every page.
    async fn read(&self, execution: &ExecutionId) -> Result<Vec<HistoryEvent>, HistoryError> {
        let mut out = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self.read_page(execution, token.as_deref(), DEFAULT_PAGE_SIZE).await?;
            out.extend(page.events);
            match page.next_page_token {
                Some(next) => token = Some(next),
                None => return Ok(out),
            }
        }
    }
}

/// Ensure `events` continue a history whose last id is `last`.
pub(crate) fn check_ascending(last: Option<u64>, events: &[HistoryEvent]) -> Result<(), HistoryError> {
    let mut last = last.unwrap_or(0);
    for ev in events {
        if ev.id <= last {
            return Err(HistoryError::OutOfOrder { last, id: ev.id });
        }
        last = ev.id;
    }
    Ok(())
}

/// Tunables for reading a history out of a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayOptions {
    pub page_size: usize,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ReplayOptions {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

/// Replay a stream of already-ordered events.
pub async fn replay_stream<S>(events: S) -> Result<ExecutionState, ReplayError>
where
    S: Stream<Item = Result<HistoryEvent, HistoryError>>,
{
    let mut events = std::pin::pin!(events);
    let mut builder = StateBuilder::new();
    while let Some(event) = events.next().await {
        builder.apply(event?)?;
    }
    Ok(builder.finish()?)
}

/// Page through an execution's history in `store` and replay it.
pub async fn replay_history(
    store: Arc<dyn HistoryStore>,
    execution: &ExecutionId,
    options: &ReplayOptions,
) -> Result<ExecutionState, ReplayError> {
    let pager = HistoryPager::open(store, execution.clone(), options).await?;
    let state = replay_stream(pager.into_stream()).await?;
    info!(
        "replayed {execution}: status={} tasks={} children={} timers={} signals={}",
        state.status,
        state.tasks.len(),
        state.child_executions.len(),
        state.timers.len(),
        state.signals.len()
    );
    Ok(state)
}
