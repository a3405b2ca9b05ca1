//! Execution snapshot produced by replaying a history.
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{ActivityId, ExecutionConfiguration, ExecutionId, TaskConfiguration, TimeoutType, WorkflowId};

pub mod replay;

pub use replay::build_state;

/// Status of a workflow execution (the replayed one, or a child).
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Started,
    Completed,
    Failed,
    Cancelled,
    Terminated,
    ContinuedAsNew,
    TimedOut,
}

impl ExecutionStatus {
    /// Status as reported by the orchestration service; an open execution is `OPEN`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Started => "OPEN",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Cancelled => "CANCELED",
            ExecutionStatus::Terminated => "TERMINATED",
            ExecutionStatus::ContinuedAsNew => "CONTINUED_AS_NEW",
            ExecutionStatus::TimedOut => "TIMED_OUT",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, ExecutionStatus::Started)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Scheduled,
    Started,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Scheduled => "scheduled",
            TaskStatus::Started => "started",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimerStatus {
    Started,
    Fired,
    Cancelled,
}

/// One activity task of the execution, from its scheduled event onwards.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TaskState {
    /// Caller-assigned task id, unique within the execution.
    pub id: String,
    pub status: TaskStatus,
    pub activity: ActivityId,
    pub configuration: TaskConfiguration,
    pub scheduled: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
    pub input: Option<String>,
    /// Identity of the worker that picked the task up.
    pub worker_identity: Option<String>,
    /// Cancellation was requested; does not change `status` by itself.
    pub cancel_requested: bool,
    pub result: Option<String>,
    pub timeout_type: Option<TimeoutType>,
    pub failure_reason: Option<String>,
    pub stop_details: Option<String>,
    pub decider_control: Option<String>,
}

impl TaskState {
    pub fn has_ended(&self) -> bool {
        !matches!(self.status, TaskStatus::Scheduled | TaskStatus::Started)
    }
}

/// A child workflow execution that has been confirmed as started.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChildExecutionState {
    pub execution: ExecutionId,
    pub workflow: WorkflowId,
    pub status: ExecutionStatus,
    pub configuration: ExecutionConfiguration,
    pub started: DateTime<Utc>,
    pub ended: Option<DateTime<Utc>>,
    pub input: Option<String>,
    pub result: Option<String>,
    pub timeout_type: Option<TimeoutType>,
    pub failure_reason: Option<String>,
    pub stop_details: Option<String>,
    pub decider_control: Option<String>,
}

impl ChildExecutionState {
    pub fn has_ended(&self) -> bool {
        !self.status.is_open()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TimerState {
    pub id: String,
    pub status: TimerStatus,
    #[serde(with = "crate::_wire::seconds")]
    pub duration: Duration,
    pub started: DateTime<Utc>,
    pub ended: Option<DateTime<Utc>>,
    pub decider_control: Option<String>,
}

impl TimerState {
    pub fn has_ended(&self) -> bool {
        self.status != TimerStatus::Started
    }
}

/// A received signal.
///
/// Signals are batched per decision round: a signal is new only while the
/// decision round it arrived in is still the latest one. `decision_boundary`
/// is the id of the last `DecisionTaskCompleted` event folded before the
/// signal (`None` if the signal arrived before the first decision completed).
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SignalState {
    pub name: String,
    pub input: Option<String>,
    pub received: DateTime<Utc>,
    pub decision_boundary: Option<u64>,
}

impl SignalState {
    /// Whether this signal is still new given the latest completed decision.
    pub fn is_new(&self, latest_decision_event_id: Option<u64>) -> bool {
        self.decision_boundary == latest_decision_event_id
    }
}

/// Snapshot of one workflow execution, as derived from its history.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ExecutionState {
    pub status: ExecutionStatus,
    pub workflow: WorkflowId,
    pub configuration: ExecutionConfiguration,
    pub started: DateTime<Utc>,
    pub ended: Option<DateTime<Utc>>,
    pub input: Option<String>,
    /// Monotonic: never reset once a cancel request was folded.
    pub cancel_requested: bool,
    /// Only meaningful when `status` is `Completed`.
    pub result: Option<String>,
    /// Set for `Failed` and `Terminated`.
    pub failure_reason: Option<String>,
    pub stop_details: Option<String>,
    pub continued_as_new_run_id: Option<String>,
    pub parent: Option<ExecutionId>,
    pub tags: Vec<String>,
    pub tasks: Vec<TaskState>,
    pub child_executions: Vec<ChildExecutionState>,
    pub timers: Vec<TimerState>,
    pub signals: Vec<SignalState>,
    /// Id of the last `DecisionTaskCompleted` event in the history.
    pub latest_decision_event_id: Option<u64>,
}

impl ExecutionState {
    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    pub fn is_signal_new(&self, signal: &SignalState) -> bool {
        signal.is_new(self.latest_decision_event_id)
    }

    /// Signals delivered since the latest completed decision.
    pub fn new_signals(&self) -> impl Iterator<Item = &SignalState> {
        self.signals.iter().filter(|s| self.is_signal_new(s))
    }

    /// Look up a task by its caller-assigned id.
    pub fn task(&self, id: &str) -> Option<&TaskState> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn open_tasks(&self) -> impl Iterator<Item = &TaskState> {
        self.tasks.iter().filter(|t| !t.has_ended())
    }
}

/// Replay failure. Every variant means the history is not a complete,
/// in-order, uncorrupted log of one execution; no partial state is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("event {event_id} ({kind}) references unknown event {reference}")]
    UnknownEvent {
        event_id: u64,
        kind: &'static str,
        reference: u64,
    },
    #[error("event {event_id} references unknown task {task_id:?}")]
    UnknownTask { event_id: u64, task_id: String },
    #[error("event {event_id} references task {task_id:?} which matches {matches} tasks")]
    AmbiguousTask {
        event_id: u64,
        task_id: String,
        matches: usize,
    },
    #[error("event {event_id} ({kind}) precedes the execution start")]
    NotStarted { event_id: u64, kind: &'static str },
    #[error("event {event_id} starts an execution that already started")]
    AlreadyStarted { event_id: u64 },
    #[error("event {event_id} ({kind}) closes an execution already closed as {status}")]
    AlreadyClosed {
        event_id: u64,
        kind: &'static str,
        status: ExecutionStatus,
    },
    #[error("event {event_id} ({kind}) follows task {task_id:?} already ended as {status}")]
    TaskAlreadyEnded {
        event_id: u64,
        kind: &'static str,
        task_id: String,
        status: TaskStatus,
    },
    #[error("event {event_id} ({kind}) follows child {execution} already ended as {status}")]
    ChildAlreadyEnded {
        event_id: u64,
        kind: &'static str,
        execution: ExecutionId,
        status: ExecutionStatus,
    },
    #[error("event {event_id} ({kind}) follows timer {timer_id:?} already ended as {status:?}")]
    TimerAlreadyEnded {
        event_id: u64,
        kind: &'static str,
        timer_id: String,
        status: TimerStatus,
    },
    #[error("history contains no execution start")]
    EmptyHistory,
}
