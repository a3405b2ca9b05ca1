//! Workflow execution state rebuilt from an append-only event history.
//!
//! An orchestrated workflow execution is never stored as a mutable document;
//! only its history of `HistoryEvent`s is. This crate folds that history
//! forward into an `ExecutionState` snapshot. It provides:
//!
//! - Public event model: `HistoryEvent`, `EventAttributes` and the identifier
//!   and configuration types they carry
//! - The replay fold: `build_state`
//! - History sources: the `HistoryStore` trait with in-memory and filesystem
//!   stores, a prefetching `HistoryPager`, and `replay_history` to drive a
//!   store's pages through the fold
//!
//! Events reference each other by the numeric id of an earlier event (a
//! started task points back at its scheduled event). A reference that cannot
//! be resolved is a `StateError` and aborts the replay.
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod logging;
pub mod providers;
pub mod state;

pub use providers::{
    HistoryError, HistoryPage, HistoryPager, HistoryStore, ReplayError, ReplayOptions, replay_history, replay_stream,
};
pub use state::{
    ChildExecutionState, ExecutionState, ExecutionStatus, SignalState, StateError, TaskState, TaskStatus, TimerState,
    TimerStatus, build_state,
};

// Wire helpers for SWF-style duration strings (kept private to the model types)
pub(crate) mod _wire {
    /// Optional timeouts: `"NONE"` means unlimited, otherwise whole seconds.
    pub mod timeout {
        use serde::{Deserialize, Deserializer, Serializer, de::Error};
        use std::time::Duration;

        pub fn serialize<S: Serializer>(v: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
            s.serialize_str(&crate::format_timeout(*v))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
            let raw = String::deserialize(d)?;
            crate::parse_timeout(&raw).map_err(|e| D::Error::custom(format!("invalid timeout {raw:?}: {e}")))
        }
    }

    /// Mandatory durations as whole seconds.
    pub mod seconds {
        use serde::{Deserialize, Deserializer, Serializer, de::Error};
        use std::time::Duration;

        pub fn serialize<S: Serializer>(v: &Duration, s: S) -> Result<S::Ok, S::Error> {
            s.serialize_str(&v.as_secs().to_string())
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
            let raw = String::deserialize(d)?;
            raw.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| D::Error::custom(format!("invalid duration {raw:?}: {e}")))
        }
    }
}

/// Parse an SWF timeout string. `"NONE"` is an unlimited timeout.
pub fn parse_timeout(raw: &str) -> Result<Option<Duration>, std::num::ParseIntError> {
    if raw == "NONE" {
        return Ok(None);
    }
    raw.parse::<u64>().map(|secs| Some(Duration::from_secs(secs)))
}

/// Inverse of `parse_timeout`.
pub fn format_timeout(timeout: Option<Duration>) -> String {
    match timeout {
        Some(d) => d.as_secs().to_string(),
        None => "NONE".to_string(),
    }
}

/// Activity (task) type reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ActivityId {
    pub name: String,
    pub version: String,
}

impl ActivityId {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Workflow type reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct WorkflowId {
    pub name: String,
    pub version: String,
}

impl WorkflowId {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Identifies one run of a workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutionId {
    pub workflow_id: String,
    pub run_id: String,
}

impl ExecutionId {
    pub fn new(workflow_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
        }
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.workflow_id, self.run_id)
    }
}

/// What happens to open child executions when the parent is terminated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChildPolicy {
    Terminate,
    RequestCancel,
    Abandon,
}

/// Execution configuration, captured when an execution (or child) starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionConfiguration {
    #[serde(default, with = "_wire::timeout")]
    pub timeout: Option<Duration>,
    #[serde(default, with = "_wire::timeout")]
    pub decision_task_timeout: Option<Duration>,
    pub decision_task_list: String,
    #[serde(default)]
    pub decision_task_priority: i32,
    pub child_policy: ChildPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lambda_role: Option<String>,
}

/// Effective task configuration as recorded on the scheduled event, i.e.
/// with the scheduling decision's overrides already merged over the
/// activity type's defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskConfiguration {
    pub task_list: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, with = "_wire::timeout")]
    pub schedule_to_close_timeout: Option<Duration>,
    #[serde(default, with = "_wire::timeout")]
    pub schedule_to_start_timeout: Option<Duration>,
    #[serde(default, with = "_wire::timeout")]
    pub start_to_close_timeout: Option<Duration>,
    #[serde(default, with = "_wire::timeout")]
    pub heartbeat_timeout: Option<Duration>,
}

/// Which timeout expired for a timed-out task or execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeoutType {
    StartToClose,
    ScheduleToStart,
    ScheduleToClose,
    Heartbeat,
}

/// One entry of an execution's history. Ids are assigned by the orchestration
/// service, start at 1 and strictly increase within one execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEvent {
    pub id: u64,
    pub occurred: DateTime<Utc>,
    #[serde(flatten)]
    pub attributes: EventAttributes,
}

impl HistoryEvent {
    pub fn new(id: u64, occurred: DateTime<Utc>, attributes: EventAttributes) -> Self {
        Self {
            id,
            occurred,
            attributes,
        }
    }

    /// Event type name, as it appears in the `type` tag.
    pub fn kind(&self) -> &'static str {
        self.attributes.kind()
    }
}

/// Variant-specific payload of a `HistoryEvent`. Follow-up events carry the id
/// of the event that introduced the entity they act on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum EventAttributes {
    // Execution lifecycle
    WorkflowExecutionStarted {
        workflow: WorkflowId,
        configuration: ExecutionConfiguration,
        input: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tags: Vec<String>,
        parent: Option<ExecutionId>,
    },
    WorkflowExecutionCompleted {
        result: Option<String>,
        decision_task_completed_event_id: Option<u64>,
    },
    WorkflowExecutionFailed {
        reason: Option<String>,
        details: Option<String>,
        decision_task_completed_event_id: Option<u64>,
    },
    WorkflowExecutionCancelled {
        details: Option<String>,
        decision_task_completed_event_id: Option<u64>,
    },
    WorkflowExecutionTerminated {
        reason: Option<String>,
        details: Option<String>,
        child_policy: Option<ChildPolicy>,
    },
    WorkflowExecutionTimedOut {
        child_policy: Option<ChildPolicy>,
    },
    WorkflowExecutionContinuedAsNew {
        new_run_id: String,
        input: Option<String>,
        decision_task_completed_event_id: Option<u64>,
    },
    WorkflowExecutionCancelRequested {
        cause: Option<String>,
        external_initiated_event_id: Option<u64>,
    },

    // Decision rounds
    DecisionTaskScheduled {
        task_list: String,
    },
    DecisionTaskStarted {
        scheduled_event_id: u64,
        identity: Option<String>,
    },
    DecisionTaskCompleted {
        scheduled_event_id: u64,
        started_event_id: u64,
        execution_context: Option<String>,
    },
    DecisionTaskTimedOut {
        scheduled_event_id: u64,
        started_event_id: u64,
        timeout_type: TimeoutType,
    },

    // Activity tasks
    ActivityTaskScheduled {
        task_id: String,
        activity: ActivityId,
        configuration: TaskConfiguration,
        input: Option<String>,
        control: Option<String>,
        decision_task_completed_event_id: Option<u64>,
    },
    ActivityTaskStarted {
        scheduled_event_id: u64,
        identity: Option<String>,
    },
    ActivityTaskCompleted {
        scheduled_event_id: u64,
        started_event_id: Option<u64>,
        result: Option<String>,
    },
    ActivityTaskFailed {
        scheduled_event_id: u64,
        started_event_id: Option<u64>,
        reason: Option<String>,
        details: Option<String>,
    },
    ActivityTaskCancelled {
        scheduled_event_id: u64,
        started_event_id: Option<u64>,
        details: Option<String>,
    },
    ActivityTaskTimedOut {
        scheduled_event_id: u64,
        started_event_id: Option<u64>,
        timeout_type: TimeoutType,
        details: Option<String>,
    },
    /// Carries the caller-assigned task id, not a back-reference.
    ActivityTaskCancelRequested {
        task_id: String,
        decision_task_completed_event_id: Option<u64>,
    },

    // Child workflow executions
    StartChildWorkflowExecutionInitiated {
        workflow_id: String,
        workflow: WorkflowId,
        configuration: ExecutionConfiguration,
        input: Option<String>,
        control: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tags: Vec<String>,
        decision_task_completed_event_id: Option<u64>,
    },
    ChildWorkflowExecutionStarted {
        initiated_event_id: u64,
        execution: ExecutionId,
        workflow: WorkflowId,
    },
    ChildWorkflowExecutionCompleted {
        initiated_event_id: u64,
        started_event_id: Option<u64>,
        result: Option<String>,
    },
    ChildWorkflowExecutionFailed {
        initiated_event_id: u64,
        started_event_id: Option<u64>,
        reason: Option<String>,
        details: Option<String>,
    },
    ChildWorkflowExecutionCancelled {
        initiated_event_id: u64,
        started_event_id: Option<u64>,
        details: Option<String>,
    },
    ChildWorkflowExecutionTerminated {
        initiated_event_id: u64,
        started_event_id: Option<u64>,
    },
    ChildWorkflowExecutionTimedOut {
        initiated_event_id: u64,
        started_event_id: Option<u64>,
        timeout_type: Option<TimeoutType>,
    },

    // Timers
    TimerStarted {
        timer_id: String,
        #[serde(with = "_wire::seconds")]
        duration: Duration,
        control: Option<String>,
        decision_task_completed_event_id: Option<u64>,
    },
    TimerFired {
        started_event_id: u64,
    },
    TimerCancelled {
        started_event_id: u64,
        decision_task_completed_event_id: Option<u64>,
    },

    // Signals and markers
    WorkflowExecutionSignaled {
        signal_name: String,
        input: Option<String>,
        external_initiated_event_id: Option<u64>,
    },
    MarkerRecorded {
        marker_name: String,
        details: Option<String>,
        decision_task_completed_event_id: Option<u64>,
    },
}

impl EventAttributes {
    pub fn kind(&self) -> &'static str {
        match self {
            EventAttributes::WorkflowExecutionStarted { .. } => "WorkflowExecutionStarted",
            EventAttributes::WorkflowExecutionCompleted { .. } => "WorkflowExecutionCompleted",
            EventAttributes::WorkflowExecutionFailed { .. } => "WorkflowExecutionFailed",
            EventAttributes::WorkflowExecutionCancelled { .. } => "WorkflowExecutionCancelled",
            EventAttributes::WorkflowExecutionTerminated { .. } => "WorkflowExecutionTerminated",
            EventAttributes::WorkflowExecutionTimedOut { .. } => "WorkflowExecutionTimedOut",
            EventAttributes::WorkflowExecutionContinuedAsNew { .. } => "WorkflowExecutionContinuedAsNew",
            EventAttributes::WorkflowExecutionCancelRequested { .. } => "WorkflowExecutionCancelRequested",
            EventAttributes::DecisionTaskScheduled { .. } => "DecisionTaskScheduled",
            EventAttributes::DecisionTaskStarted { .. } => "DecisionTaskStarted",
            EventAttributes::DecisionTaskCompleted { .. } => "DecisionTaskCompleted",
            EventAttributes::DecisionTaskTimedOut { .. } => "DecisionTaskTimedOut",
            EventAttributes::ActivityTaskScheduled { .. } => "ActivityTaskScheduled",
            EventAttributes::ActivityTaskStarted { .. } => "ActivityTaskStarted",
            EventAttributes::ActivityTaskCompleted { .. } => "ActivityTaskCompleted",
            EventAttributes::ActivityTaskFailed { .. } => "ActivityTaskFailed",
            EventAttributes::ActivityTaskCancelled { .. } => "ActivityTaskCancelled",
            EventAttributes::ActivityTaskTimedOut { .. } => "ActivityTaskTimedOut",
            EventAttributes::ActivityTaskCancelRequested { .. } => "ActivityTaskCancelRequested",
            EventAttributes::StartChildWorkflowExecutionInitiated { .. } => "StartChildWorkflowExecutionInitiated",
            EventAttributes::ChildWorkflowExecutionStarted { .. } => "ChildWorkflowExecutionStarted",
            EventAttributes::ChildWorkflowExecutionCompleted { .. } => "ChildWorkflowExecutionCompleted",
            EventAttributes::ChildWorkflowExecutionFailed { .. } => "ChildWorkflowExecutionFailed",
            EventAttributes::ChildWorkflowExecutionCancelled { .. } => "ChildWorkflowExecutionCancelled",
            EventAttributes::ChildWorkflowExecutionTerminated { .. } => "ChildWorkflowExecutionTerminated",
            EventAttributes::ChildWorkflowExecutionTimedOut { .. } => "ChildWorkflowExecutionTimedOut",
            EventAttributes::TimerStarted { .. } => "TimerStarted",
            EventAttributes::TimerFired { .. } => "TimerFired",
            EventAttributes::TimerCancelled { .. } => "TimerCancelled",
            EventAttributes::WorkflowExecutionSignaled { .. } => "WorkflowExecutionSignaled",
            EventAttributes::MarkerRecorded { .. } => "MarkerRecorded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_parse_none_and_seconds() {
        assert_eq!(parse_timeout("NONE").unwrap(), None);
        assert_eq!(parse_timeout("0").unwrap(), Some(Duration::from_secs(0)));
        assert_eq!(parse_timeout("42").unwrap(), Some(Duration::from_secs(42)));
        assert!(parse_timeout("forever").is_err());
        assert_eq!(format_timeout(None), "NONE");
        assert_eq!(format_timeout(Some(Duration::from_secs(300))), "300");
    }

    #[test]
    fn decodes_tagged_event_json() {
        let line = r#"{
            "id": 7,
            "occurred": "2024-03-01T10:00:00Z",
            "type": "ActivityTaskScheduled",
            "task_id": "t1",
            "activity": {"name": "resize", "version": "2"},
            "configuration": {
                "task_list": "images",
                "priority": 3,
                "start_to_close_timeout": "60",
                "heartbeat_timeout": "NONE"
            },
            "input": "{\"w\":64}"
        }"#;
        let ev: HistoryEvent = serde_json::from_str(line).unwrap();
        assert_eq!(ev.id, 7);
        assert_eq!(ev.kind(), "ActivityTaskScheduled");
        match ev.attributes {
            EventAttributes::ActivityTaskScheduled {
                task_id,
                activity,
                configuration,
                control,
                ..
            } => {
                assert_eq!(task_id, "t1");
                assert_eq!(activity, ActivityId::new("resize", "2"));
                assert_eq!(configuration.priority, 3);
                assert_eq!(configuration.start_to_close_timeout, Some(Duration::from_secs(60)));
                assert_eq!(configuration.heartbeat_timeout, None);
                assert_eq!(configuration.schedule_to_close_timeout, None);
                assert!(control.is_none());
            }
            other => panic!("unexpected attributes: {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_timeout() {
        let line = r#"{"id":1,"occurred":"2024-03-01T10:00:00Z","type":"TimerStarted","timer_id":"t","duration":"soon"}"#;
        let err = serde_json::from_str::<HistoryEvent>(line).unwrap_err();
        assert!(err.to_string().contains("invalid duration"), "{err}");
    }
}
