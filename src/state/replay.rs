use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use super::{
    ChildExecutionState, ExecutionState, ExecutionStatus, SignalState, StateError, TaskState, TaskStatus, TimerState,
    TimerStatus,
};
use crate::{EventAttributes, ExecutionConfiguration, HistoryEvent, WorkflowId};

/// Intent recorded by a child initiation, held until the child is confirmed started.
#[derive(Debug)]
struct PendingChild {
    workflow: WorkflowId,
    configuration: ExecutionConfiguration,
    input: Option<String>,
    control: Option<String>,
}

/// Left fold over one execution's history.
///
/// Correlation tables map the id of the event that introduced an entity to
/// that entity's index in the snapshot's ordered collections. They live only
/// as long as the builder.
#[derive(Debug, Default)]
pub(crate) struct StateBuilder {
    execution: Option<ExecutionState>,
    tasks: HashMap<u64, usize>,
    pending_children: HashMap<u64, PendingChild>,
    children: HashMap<u64, usize>,
    timers: HashMap<u64, usize>,
    latest_decision_event_id: Option<u64>,
    applied: u64,
}

impl StateBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn applied(&self) -> u64 {
        self.applied
    }

    /// Fold one event. Events must arrive in ascending id order; this is not checked.
    pub(crate) fn apply(&mut self, event: HistoryEvent) -> Result<(), StateError> {
        let HistoryEvent {
            id,
            occurred,
            attributes,
        } = event;
        let kind = attributes.kind();
        trace!(event_id = id, kind, "apply");
        let res = self.dispatch(id, occurred, kind, attributes);
        if let Err(e) = &res {
            warn!("replay aborted at event {id}: {e}");
        } else {
            self.applied += 1;
        }
        res
    }

    fn dispatch(
        &mut self,
        id: u64,
        occurred: DateTime<Utc>,
        kind: &'static str,
        attributes: EventAttributes,
    ) -> Result<(), StateError> {
        match attributes {
            // Decisions
            EventAttributes::DecisionTaskCompleted { .. } => {
                self.latest_decision_event_id = Some(id);
            }
            EventAttributes::DecisionTaskScheduled { .. }
            | EventAttributes::DecisionTaskStarted { .. }
            | EventAttributes::DecisionTaskTimedOut { .. }
            | EventAttributes::MarkerRecorded { .. } => {
                trace!("event {id} ({kind}) has no effect on execution state");
            }

            // Execution
            EventAttributes::WorkflowExecutionStarted {
                workflow,
                configuration,
                input,
                tags,
                parent,
            } => {
                if self.execution.is_some() {
                    return Err(StateError::AlreadyStarted { event_id: id });
                }
                debug!("execution of {}@{} started at {occurred}", workflow.name, workflow.version);
                self.execution = Some(ExecutionState {
                    status: ExecutionStatus::Started,
                    workflow,
                    configuration,
                    started: occurred,
                    ended: None,
                    input,
                    cancel_requested: false,
                    result: None,
                    failure_reason: None,
                    stop_details: None,
                    continued_as_new_run_id: None,
                    parent,
                    tags,
                    tasks: Vec::new(),
                    child_executions: Vec::new(),
                    timers: Vec::new(),
                    signals: Vec::new(),
                    latest_decision_event_id: None,
                });
            }
            EventAttributes::WorkflowExecutionCompleted { result, .. } => {
                let execution = self.close(id, kind, ExecutionStatus::Completed, occurred)?;
                execution.result = result;
            }
            EventAttributes::WorkflowExecutionFailed { reason, details, .. } => {
                let execution = self.close(id, kind, ExecutionStatus::Failed, occurred)?;
                execution.failure_reason = reason;
                execution.stop_details = details;
            }
            EventAttributes::WorkflowExecutionCancelled { details, .. } => {
                let execution = self.close(id, kind, ExecutionStatus::Cancelled, occurred)?;
                execution.stop_details = details;
            }
            EventAttributes::WorkflowExecutionTerminated { reason, details, .. } => {
                let execution = self.close(id, kind, ExecutionStatus::Terminated, occurred)?;
                execution.failure_reason = reason;
                execution.stop_details = details;
            }
            EventAttributes::WorkflowExecutionTimedOut { .. } => {
                self.close(id, kind, ExecutionStatus::TimedOut, occurred)?;
            }
            EventAttributes::WorkflowExecutionContinuedAsNew { new_run_id, .. } => {
                let execution = self.close(id, kind, ExecutionStatus::ContinuedAsNew, occurred)?;
                execution.continued_as_new_run_id = Some(new_run_id);
            }
            EventAttributes::WorkflowExecutionCancelRequested { .. } => {
                self.execution_mut(id, kind)?.cancel_requested = true;
            }

            // Tasks
            EventAttributes::ActivityTaskScheduled {
                task_id,
                activity,
                configuration,
                input,
                control,
                ..
            } => {
                let execution = self.execution_mut(id, kind)?;
                debug!("task {task_id:?} ({}) scheduled by event {id}", activity.name);
                execution.tasks.push(TaskState {
                    id: task_id,
                    status: TaskStatus::Scheduled,
                    activity,
                    configuration,
                    scheduled: occurred,
                    started: None,
                    ended: None,
                    input,
                    worker_identity: None,
                    cancel_requested: false,
                    result: None,
                    timeout_type: None,
                    failure_reason: None,
                    stop_details: None,
                    decider_control: control,
                });
                let idx = execution.tasks.len() - 1;
                self.tasks.insert(id, idx);
            }
            EventAttributes::ActivityTaskStarted {
                scheduled_event_id,
                identity,
            } => {
                let task = self.task_mut(id, kind, scheduled_event_id)?;
                task.status = TaskStatus::Started;
                task.started = Some(occurred);
                task.worker_identity = identity;
            }
            EventAttributes::ActivityTaskCompleted {
                scheduled_event_id,
                result,
                ..
            } => {
                let task = self.task_mut(id, kind, scheduled_event_id)?;
                task.status = TaskStatus::Completed;
                task.ended = Some(occurred);
                task.result = result;
            }
            EventAttributes::ActivityTaskFailed {
                scheduled_event_id,
                reason,
                details,
                ..
            } => {
                let task = self.task_mut(id, kind, scheduled_event_id)?;
                task.status = TaskStatus::Failed;
                task.ended = Some(occurred);
                task.failure_reason = reason;
                task.stop_details = details;
            }
            EventAttributes::ActivityTaskCancelled {
                scheduled_event_id,
                details,
                ..
            } => {
                let task = self.task_mut(id, kind, scheduled_event_id)?;
                task.status = TaskStatus::Cancelled;
                task.ended = Some(occurred);
                task.stop_details = details;
            }
            EventAttributes::ActivityTaskTimedOut {
                scheduled_event_id,
                timeout_type,
                details,
                ..
            } => {
                let task = self.task_mut(id, kind, scheduled_event_id)?;
                task.status = TaskStatus::TimedOut;
                task.ended = Some(occurred);
                task.timeout_type = Some(timeout_type);
                task.stop_details = details;
            }
            EventAttributes::ActivityTaskCancelRequested { task_id, .. } => {
                // No back-reference on this event: match on the caller-assigned id
                let execution = self.execution_mut(id, kind)?;
                let matching: Vec<usize> = execution
                    .tasks
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.id == task_id)
                    .map(|(idx, _)| idx)
                    .collect();
                match matching.as_slice() {
                    [idx] => execution.tasks[*idx].cancel_requested = true,
                    [] => return Err(StateError::UnknownTask { event_id: id, task_id }),
                    many => {
                        return Err(StateError::AmbiguousTask {
                            event_id: id,
                            task_id,
                            matches: many.len(),
                        });
                    }
                }
            }

            // Child executions
            EventAttributes::StartChildWorkflowExecutionInitiated {
                workflow_id,
                workflow,
                configuration,
                input,
                control,
                ..
            } => {
                self.execution_mut(id, kind)?;
                debug!("child {workflow_id:?} ({}) initiated by event {id}", workflow.name);
                self.pending_children.insert(
                    id,
                    PendingChild {
                        workflow,
                        configuration,
                        input,
                        control,
                    },
                );
            }
            EventAttributes::ChildWorkflowExecutionStarted {
                initiated_event_id,
                execution: child,
                ..
            } => {
                let pending = self
                    .pending_children
                    .remove(&initiated_event_id)
                    .ok_or(StateError::UnknownEvent {
                        event_id: id,
                        kind,
                        reference: initiated_event_id,
                    })?;
                let execution = self.execution_mut(id, kind)?;
                debug!("child {child} started, initiated by event {initiated_event_id}");
                execution.child_executions.push(ChildExecutionState {
                    execution: child,
                    workflow: pending.workflow,
                    status: ExecutionStatus::Started,
                    configuration: pending.configuration,
                    started: occurred,
                    ended: None,
                    input: pending.input,
                    result: None,
                    timeout_type: None,
                    failure_reason: None,
                    stop_details: None,
                    decider_control: pending.control,
                });
                let idx = execution.child_executions.len() - 1;
                self.children.insert(initiated_event_id, idx);
            }
            EventAttributes::ChildWorkflowExecutionCompleted {
                initiated_event_id,
                result,
                ..
            } => {
                let child = self.child_mut(id, kind, initiated_event_id)?;
                child.status = ExecutionStatus::Completed;
                child.ended = Some(occurred);
                child.result = result;
            }
            EventAttributes::ChildWorkflowExecutionFailed {
                initiated_event_id,
                reason,
                details,
                ..
            } => {
                let child = self.child_mut(id, kind, initiated_event_id)?;
                child.status = ExecutionStatus::Failed;
                child.ended = Some(occurred);
                child.failure_reason = reason;
                child.stop_details = details;
            }
            EventAttributes::ChildWorkflowExecutionCancelled {
                initiated_event_id,
                details,
                ..
            } => {
                let child = self.child_mut(id, kind, initiated_event_id)?;
                child.status = ExecutionStatus::Cancelled;
                child.ended = Some(occurred);
                child.stop_details = details;
            }
            EventAttributes::ChildWorkflowExecutionTerminated { initiated_event_id, .. } => {
                let child = self.child_mut(id, kind, initiated_event_id)?;
                child.status = ExecutionStatus::Terminated;
                child.ended = Some(occurred);
            }
            EventAttributes::ChildWorkflowExecutionTimedOut {
                initiated_event_id,
                timeout_type,
                ..
            } => {
                let child = self.child_mut(id, kind, initiated_event_id)?;
                child.status = ExecutionStatus::TimedOut;
                child.ended = Some(occurred);
                child.timeout_type = timeout_type;
            }

            // Timers
            EventAttributes::TimerStarted {
                timer_id,
                duration,
                control,
                ..
            } => {
                let execution = self.execution_mut(id, kind)?;
                execution.timers.push(TimerState {
                    id: timer_id,
                    status: TimerStatus::Started,
                    duration,
                    started: occurred,
                    ended: None,
                    decider_control: control,
                });
                let idx = execution.timers.len() - 1;
                self.timers.insert(id, idx);
            }
            EventAttributes::TimerFired { started_event_id } => {
                let timer = self.timer_mut(id, kind, started_event_id)?;
                timer.status = TimerStatus::Fired;
                timer.ended = Some(occurred);
            }
            EventAttributes::TimerCancelled { started_event_id, .. } => {
                let timer = self.timer_mut(id, kind, started_event_id)?;
                timer.status = TimerStatus::Cancelled;
                timer.ended = Some(occurred);
            }

            // Signals
            EventAttributes::WorkflowExecutionSignaled { signal_name, input, .. } => {
                let boundary = self.latest_decision_event_id;
                self.execution_mut(id, kind)?.signals.push(SignalState {
                    name: signal_name,
                    input,
                    received: occurred,
                    decision_boundary: boundary,
                });
            }
        }
        Ok(())
    }

    /// Consume the builder, returning the snapshot.
    pub(crate) fn finish(self) -> Result<ExecutionState, StateError> {
        let mut execution = self.execution.ok_or(StateError::EmptyHistory)?;
        execution.latest_decision_event_id = self.latest_decision_event_id;
        if !self.pending_children.is_empty() {
            debug!("{} child initiations never confirmed started", self.pending_children.len());
        }
        Ok(execution)
    }

    fn execution_mut(&mut self, event_id: u64, kind: &'static str) -> Result<&mut ExecutionState, StateError> {
        self.execution
            .as_mut()
            .ok_or(StateError::NotStarted { event_id, kind })
    }

    fn close(
        &mut self,
        event_id: u64,
        kind: &'static str,
        status: ExecutionStatus,
        occurred: DateTime<Utc>,
    ) -> Result<&mut ExecutionState, StateError> {
        let execution = self.execution_mut(event_id, kind)?;
        if !execution.status.is_open() {
            return Err(StateError::AlreadyClosed {
                event_id,
                kind,
                status: execution.status,
            });
        }
        debug!("execution closed as {status} by event {event_id}");
        execution.status = status;
        execution.ended = Some(occurred);
        Ok(execution)
    }

    /// Resolve a follow-up event's task. Only a scheduled or started task
    /// accepts further events.
    fn task_mut(&mut self, event_id: u64, kind: &'static str, reference: u64) -> Result<&mut TaskState, StateError> {
        let idx = *self.tasks.get(&reference).ok_or(StateError::UnknownEvent {
            event_id,
            kind,
            reference,
        })?;
        let task = &mut self.execution_mut(event_id, kind)?.tasks[idx];
        if task.has_ended() {
            return Err(StateError::TaskAlreadyEnded {
                event_id,
                kind,
                task_id: task.id.clone(),
                status: task.status,
            });
        }
        Ok(task)
    }

    fn child_mut(
        &mut self,
        event_id: u64,
        kind: &'static str,
        reference: u64,
    ) -> Result<&mut ChildExecutionState, StateError> {
        let idx = *self.children.get(&reference).ok_or(StateError::UnknownEvent {
            event_id,
            kind,
            reference,
        })?;
        let child = &mut self.execution_mut(event_id, kind)?.child_executions[idx];
        if child.has_ended() {
            return Err(StateError::ChildAlreadyEnded {
                event_id,
                kind,
                execution: child.execution.clone(),
                status: child.status,
            });
        }
        Ok(child)
    }

    fn timer_mut(&mut self, event_id: u64, kind: &'static str, reference: u64) -> Result<&mut TimerState, StateError> {
        let idx = *self.timers.get(&reference).ok_or(StateError::UnknownEvent {
            event_id,
            kind,
            reference,
        })?;
        let timer = &mut self.execution_mut(event_id, kind)?.timers[idx];
        if timer.has_ended() {
            return Err(StateError::TimerAlreadyEnded {
                event_id,
                kind,
                timer_id: timer.id.clone(),
                status: timer.status,
            });
        }
        Ok(timer)
    }
}

/// Build the state of an execution from its forward-ordered history.
///
/// The history is consumed lazily, one event at a time, and the first event
/// that cannot be correlated aborts the replay.
pub fn build_state<I>(history: I) -> Result<ExecutionState, StateError>
where
    I: IntoIterator<Item = HistoryEvent>,
{
    let mut builder = StateBuilder::new();
    for event in history {
        builder.apply(event)?;
    }
    debug!("replayed {} events", builder.applied());
    builder.finish()
}
