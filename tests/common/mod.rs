#![allow(dead_code)]

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rust_swf_state::{
    ActivityId, ChildPolicy, EventAttributes, ExecutionConfiguration, ExecutionId, HistoryEvent, TaskConfiguration,
    TimeoutType, WorkflowId,
};

/// Timestamp of event `id`: one second per event from a fixed origin.
pub fn at(id: u64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(id as i64)
}

pub fn ev(id: u64, attributes: EventAttributes) -> HistoryEvent {
    HistoryEvent::new(id, at(id), attributes)
}

pub fn execution_config() -> ExecutionConfiguration {
    ExecutionConfiguration {
        timeout: Some(Duration::from_secs(3600)),
        decision_task_timeout: Some(Duration::from_secs(30)),
        decision_task_list: "decisions".into(),
        decision_task_priority: 0,
        child_policy: ChildPolicy::Terminate,
        lambda_role: None,
    }
}

pub fn task_config() -> TaskConfiguration {
    TaskConfiguration {
        task_list: "work".into(),
        priority: 1,
        schedule_to_close_timeout: None,
        schedule_to_start_timeout: Some(Duration::from_secs(60)),
        start_to_close_timeout: Some(Duration::from_secs(300)),
        heartbeat_timeout: None,
    }
}

pub fn started(id: u64, input: &str) -> HistoryEvent {
    ev(
        id,
        EventAttributes::WorkflowExecutionStarted {
            workflow: WorkflowId::new("order", "1.0"),
            configuration: execution_config(),
            input: Some(input.into()),
            tags: vec![],
            parent: None,
        },
    )
}

pub fn completed(id: u64, result: &str) -> HistoryEvent {
    ev(
        id,
        EventAttributes::WorkflowExecutionCompleted {
            result: Some(result.into()),
            decision_task_completed_event_id: None,
        },
    )
}

pub fn decision_completed(id: u64) -> HistoryEvent {
    ev(
        id,
        EventAttributes::DecisionTaskCompleted {
            scheduled_event_id: id.saturating_sub(2),
            started_event_id: id.saturating_sub(1),
            execution_context: None,
        },
    )
}

pub fn scheduled(id: u64, task_id: &str) -> HistoryEvent {
    ev(
        id,
        EventAttributes::ActivityTaskScheduled {
            task_id: task_id.into(),
            activity: ActivityId::new("charge", "2"),
            configuration: task_config(),
            input: Some(format!("in-{task_id}")),
            control: None,
            decision_task_completed_event_id: None,
        },
    )
}

pub fn task_started(id: u64, scheduled_event_id: u64, worker: &str) -> HistoryEvent {
    ev(
        id,
        EventAttributes::ActivityTaskStarted {
            scheduled_event_id,
            identity: Some(worker.into()),
        },
    )
}

pub fn task_completed(id: u64, scheduled_event_id: u64, result: &str) -> HistoryEvent {
    ev(
        id,
        EventAttributes::ActivityTaskCompleted {
            scheduled_event_id,
            started_event_id: None,
            result: Some(result.into()),
        },
    )
}

pub fn task_failed(id: u64, scheduled_event_id: u64, reason: &str) -> HistoryEvent {
    ev(
        id,
        EventAttributes::ActivityTaskFailed {
            scheduled_event_id,
            started_event_id: None,
            reason: Some(reason.into()),
            details: Some(format!("{reason} details")),
        },
    )
}

pub fn task_timed_out(id: u64, scheduled_event_id: u64) -> HistoryEvent {
    ev(
        id,
        EventAttributes::ActivityTaskTimedOut {
            scheduled_event_id,
            started_event_id: None,
            timeout_type: TimeoutType::Heartbeat,
            details: None,
        },
    )
}

pub fn task_cancel_requested(id: u64, task_id: &str) -> HistoryEvent {
    ev(
        id,
        EventAttributes::ActivityTaskCancelRequested {
            task_id: task_id.into(),
            decision_task_completed_event_id: None,
        },
    )
}

pub fn child_initiated(id: u64, workflow_id: &str) -> HistoryEvent {
    let mut configuration = execution_config();
    configuration.decision_task_list = "child-decisions".into();
    configuration.child_policy = ChildPolicy::Abandon;
    ev(
        id,
        EventAttributes::StartChildWorkflowExecutionInitiated {
            workflow_id: workflow_id.into(),
            workflow: WorkflowId::new("shipment", "7"),
            configuration,
            input: Some("child-input".into()),
            control: Some("ctl".into()),
            tags: vec![],
            decision_task_completed_event_id: None,
        },
    )
}

pub fn child_started(id: u64, initiated_event_id: u64, workflow_id: &str, run_id: &str) -> HistoryEvent {
    ev(
        id,
        EventAttributes::ChildWorkflowExecutionStarted {
            initiated_event_id,
            execution: ExecutionId::new(workflow_id, run_id),
            workflow: WorkflowId::new("shipment", "7"),
        },
    )
}

pub fn timer_started(id: u64, timer_id: &str, secs: u64) -> HistoryEvent {
    ev(
        id,
        EventAttributes::TimerStarted {
            timer_id: timer_id.into(),
            duration: Duration::from_secs(secs),
            control: None,
            decision_task_completed_event_id: None,
        },
    )
}

pub fn signaled(id: u64, name: &str) -> HistoryEvent {
    ev(
        id,
        EventAttributes::WorkflowExecutionSignaled {
            signal_name: name.into(),
            input: Some(format!("{name}-data")),
            external_initiated_event_id: None,
        },
    )
}

/// Started, one task scheduled/started/completed, completed.
pub fn simple_history() -> Vec<HistoryEvent> {
    vec![
        started(1, "x"),
        scheduled(2, "t1"),
        task_started(3, 2, "w1"),
        task_completed(4, 2, "ok"),
        completed(5, "done"),
    ]
}
