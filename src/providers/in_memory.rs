use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::{HistoryError, HistoryPage, HistoryStore, check_ascending};
use crate::{ExecutionId, HistoryEvent};

/// History store kept in process memory. Page tokens are event offsets.
#[derive(Clone, Default)]
pub struct InMemoryHistoryStore {
    inner: Arc<Mutex<HashMap<ExecutionId, Vec<HistoryEvent>>>>,
}

impl InMemoryHistoryStore {
    /// Store seeded with a single, already recorded history.
    pub fn with_history(execution: ExecutionId, events: Vec<HistoryEvent>) -> Result<Self, HistoryError> {
        check_ascending(None, &events)?;
        let map = HashMap::from([(execution, events)]);
        Ok(Self {
            inner: Arc::new(Mutex::new(map)),
        })
    }
}

fn parse_offset(token: Option<&str>) -> Result<usize, HistoryError> {
    match token {
        None => Ok(0),
        Some(t) => t
            .parse::<usize>()
            .map_err(|_| HistoryError::InvalidPageToken(t.to_string())),
    }
}

/// Slice one page out of a full history.
fn page_of(events: &[HistoryEvent], offset: usize, page_size: usize) -> Result<HistoryPage, HistoryError> {
    if offset > events.len() {
        return Err(HistoryError::InvalidPageToken(offset.to_string()));
    }
    let end = offset.saturating_add(page_size.max(1)).min(events.len());
    Ok(HistoryPage {
        events: events[offset..end].to_vec(),
        next_page_token: (end < events.len()).then(|| end.to_string()),
    })
}

#[async_trait::async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn read_page(
        &self,
        execution: &ExecutionId,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<HistoryPage, HistoryError> {
        let offset = parse_offset(page_token)?;
        let g = self.inner.lock().await;
        let events = g
            .get(execution)
            .ok_or_else(|| HistoryError::NotFound(execution.clone()))?;
        page_of(events, offset, page_size)
    }

    async fn create_execution(&self, execution: &ExecutionId) -> Result<(), HistoryError> {
        let mut g = self.inner.lock().await;
        if g.contains_key(execution) {
            return Err(HistoryError::AlreadyExists(execution.clone()));
        }
        g.insert(execution.clone(), Vec::new());
        Ok(())
    }

    async fn append(&self, execution: &ExecutionId, events: Vec<HistoryEvent>) -> Result<(), HistoryError> {
        let mut g = self.inner.lock().await;
        let history = g
            .get_mut(execution)
            .ok_or_else(|| HistoryError::NotFound(execution.clone()))?;
        check_ascending(history.last().map(|e| e.id), &events)?;
        history.extend(events);
        Ok(())
    }

    async fn list_executions(&self) -> Vec<ExecutionId> {
        let mut out: Vec<ExecutionId> = self.inner.lock().await.keys().cloned().collect();
        out.sort();
        out
    }
}
