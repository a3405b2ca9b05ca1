use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::{fs, sync::Mutex};
use tracing::debug;

use super::{HistoryError, HistoryPage, HistoryStore, check_ascending};
use crate::{ExecutionId, HistoryEvent};

/// Filesystem-backed history store writing one JSONL file per execution, at
/// `<root>/<workflow id>/<run id>.jsonl`.
///
/// Appends are serialized across a store and its clones. Separate store
/// instances over the same root do not coordinate.
///
/// Page tokens are `<byte offset>:<line number>` cursors into the file, so a
/// page read decodes only its own lines.
#[derive(Clone, Debug)]
pub struct FsHistoryStore {
    root: PathBuf,
    append_lock: Arc<Mutex<()>>,
}

/// Position in a history file just after the last line of a page.
#[derive(Debug, Clone, Copy, Default)]
struct Cursor {
    offset: u64,
    line: usize,
}

impl Cursor {
    fn parse(token: Option<&str>) -> Result<Self, HistoryError> {
        let Some(token) = token else {
            return Ok(Self::default());
        };
        let invalid = || HistoryError::InvalidPageToken(token.to_string());
        let (offset, line) = token.split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            offset: offset.parse().map_err(|_| invalid())?,
            line: line.parse().map_err(|_| invalid())?,
        })
    }

    fn token(&self) -> String {
        format!("{}:{}", self.offset, self.line)
    }
}

/// An id may only name a single path component below the root.
fn is_safe_component(id: &str) -> bool {
    !id.is_empty() && id != "." && id != ".." && !id.contains(['/', '\\', '\0'])
}

impl FsHistoryStore {
    /// Create a store rooted at the given directory path.
    /// If `reset_on_create` is true, delete any existing data under the root first.
    pub fn new(root: impl AsRef<Path>, reset_on_create: bool) -> Self {
        let path = root.as_ref().to_path_buf();
        if reset_on_create {
            let _ = std::fs::remove_dir_all(&path);
        }
        Self {
            root: path,
            append_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn workflow_root(&self, workflow_id: &str) -> PathBuf {
        self.root.join(workflow_id)
    }

    fn exec_path(&self, execution: &ExecutionId) -> Result<PathBuf, HistoryError> {
        if !is_safe_component(&execution.workflow_id) || !is_safe_component(&execution.run_id) {
            return Err(HistoryError::InvalidExecutionId(execution.clone()));
        }
        Ok(self
            .workflow_root(&execution.workflow_id)
            .join(format!("{}.jsonl", execution.run_id)))
    }

    async fn open_history(&self, execution: &ExecutionId) -> Result<(PathBuf, fs::File), HistoryError> {
        let path = self.exec_path(execution)?;
        match fs::File::open(&path).await {
            Ok(file) => Ok((path, file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(HistoryError::NotFound(execution.clone())),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the root directory and all contents.
    pub async fn reset(&self) {
        let _ = fs::remove_dir_all(&self.root).await;
    }

    /// Decode up to `limit` events starting at `cursor`. Blank lines are
    /// skipped; any other undecodable line is an error.
    async fn read_from(
        &self,
        execution: &ExecutionId,
        mut cursor: Cursor,
        limit: usize,
    ) -> Result<(Vec<HistoryEvent>, Cursor, u64), HistoryError> {
        let (path, mut file) = self.open_history(execution).await?;
        let len = file.metadata().await?.len();
        if cursor.offset > len {
            return Err(HistoryError::InvalidPageToken(cursor.token()));
        }
        file.seek(SeekFrom::Start(cursor.offset)).await?;
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut line = String::new();
        while events.len() < limit {
            line.clear();
            let n = reader.read_line(&mut line).await?;
            if n == 0 {
                break;
            }
            cursor.offset += n as u64;
            cursor.line += 1;
            if line.trim().is_empty() {
                continue;
            }
            let ev = serde_json::from_str::<HistoryEvent>(&line).map_err(|source| HistoryError::Decode {
                path: path.clone(),
                line: cursor.line,
                source,
            })?;
            events.push(ev);
        }
        Ok((events, cursor, len))
    }

    /// Id of the last event in the file, if any.
    async fn last_event_id(&self, execution: &ExecutionId) -> Result<Option<u64>, HistoryError> {
        let (events, _, _) = self.read_from(execution, Cursor::default(), usize::MAX).await?;
        Ok(events.last().map(|e| e.id))
    }
}

#[async_trait::async_trait]
impl HistoryStore for FsHistoryStore {
    async fn read_page(
        &self,
        execution: &ExecutionId,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<HistoryPage, HistoryError> {
        let cursor = Cursor::parse(page_token)?;
        let (events, next, len) = self.read_from(execution, cursor, page_size.max(1)).await?;
        Ok(HistoryPage {
            events,
            next_page_token: (next.offset < len).then(|| next.token()),
        })
    }

    async fn create_execution(&self, execution: &ExecutionId) -> Result<(), HistoryError> {
        let path = self.exec_path(execution)?;
        fs::create_dir_all(self.workflow_root(&execution.workflow_id)).await?;
        match fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(HistoryError::AlreadyExists(execution.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Append events as JSON lines after checking they continue the history.
    async fn append(&self, execution: &ExecutionId, new_events: Vec<HistoryEvent>) -> Result<(), HistoryError> {
        let _guard = self.append_lock.lock().await;
        check_ascending(self.last_event_id(execution).await?, &new_events)?;
        let mut buf = Vec::new();
        for ev in &new_events {
            serde_json::to_writer(&mut buf, ev).map_err(HistoryError::Encode)?;
            buf.push(b'\n');
        }
        let path = self.exec_path(execution)?;
        let mut file = fs::OpenOptions::new().append(true).open(&path).await?;
        file.write_all(&buf).await?;
        file.flush().await?;
        debug!("appended {} events to {}", new_events.len(), path.display());
        Ok(())
    }

    /// List executions by scanning `<root>/<workflow id>/` directories.
    async fn list_executions(&self) -> Vec<ExecutionId> {
        let mut out = Vec::new();
        let Ok(mut workflows) = fs::read_dir(&self.root).await else {
            return out;
        };
        while let Ok(Some(wf)) = workflows.next_entry().await {
            let Some(workflow_id) = wf.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !wf.path().is_dir() {
                continue;
            }
            if let Ok(mut runs) = fs::read_dir(wf.path()).await {
                while let Ok(Some(run)) = runs.next_entry().await {
                    if let Some(name) = run.file_name().to_str()
                        && let Some(run_id) = name.strip_suffix(".jsonl")
                    {
                        out.push(ExecutionId::new(workflow_id.clone(), run_id));
                    }
                }
            }
        }
        out.sort();
        out
    }
}
