//! Print the replayed state of one execution stored in a filesystem history store.
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::error;

use rust_swf_state::providers::fs::FsHistoryStore;
use rust_swf_state::providers::{DEFAULT_PAGE_SIZE, HistoryStore};
use rust_swf_state::{ExecutionId, ExecutionState, ExecutionStatus, ReplayOptions, logging, replay_history};

#[derive(Parser, Debug)]
#[command(name = "get-execution-state", about = "Build execution state from its recorded history")]
struct Args {
    /// History store root directory
    #[arg(short = 'd', long, env = "SWF_STATE_ROOT")]
    root: PathBuf,
    /// Execution workflow id
    #[arg(short, long)]
    workflow: String,
    /// Execution run id
    #[arg(short, long)]
    run: String,
    /// Events per history page
    #[arg(long, env = "SWF_STATE_PAGE_SIZE", default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: usize,
    /// Print the full state as JSON instead of the summary
    #[arg(long)]
    json: bool,
}

fn render_report(state: &ExecutionState) -> String {
    let mut out = String::new();
    let result = if state.status == ExecutionStatus::Completed {
        state.result.clone().unwrap_or_default()
    } else {
        format!(
            "[{}] {}",
            state.failure_reason.as_deref().unwrap_or(""),
            state.stop_details.as_deref().unwrap_or("")
        )
    };
    out.push_str(&format!("status: {}\n", state.status));
    out.push_str(&format!("workflow: {} @ {}\n", state.workflow.name, state.workflow.version));
    out.push_str(&format!("result: {result}\n"));
    out.push_str("\ntasks:\n");
    for task in &state.tasks {
        match &task.failure_reason {
            Some(reason) => out.push_str(&format!("{}, {}, {reason}\n", task.id, task.status)),
            None => out.push_str(&format!("{}, {}\n", task.id, task.status)),
        }
    }
    out
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    logging::init("info");

    let store = Arc::new(FsHistoryStore::new(&args.root, false)) as Arc<dyn HistoryStore>;
    let execution = ExecutionId::new(args.workflow, args.run);
    let options = ReplayOptions::default().with_page_size(args.page_size);

    let state = match replay_history(store, &execution, &options).await {
        Ok(state) => state,
        Err(e) => {
            error!("cannot build state of {execution}: {e}");
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if args.json {
        match serde_json::to_string_pretty(&state) {
            Ok(s) => println!("{s}"),
            Err(e) => {
                eprintln!("error: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        print!("{}", render_report(&state));
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_swf_state::{
        ActivityId, ChildPolicy, EventAttributes, ExecutionConfiguration, HistoryEvent, TaskConfiguration, WorkflowId,
        build_state,
    };

    fn ev(id: u64, attributes: EventAttributes) -> HistoryEvent {
        HistoryEvent::new(id, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, id as u32).unwrap(), attributes)
    }

    fn scheduled(id: u64, task_id: &str) -> HistoryEvent {
        ev(
            id,
            EventAttributes::ActivityTaskScheduled {
                task_id: task_id.into(),
                activity: ActivityId::new("work", "1"),
                configuration: TaskConfiguration {
                    task_list: "default".into(),
                    priority: 0,
                    schedule_to_close_timeout: None,
                    schedule_to_start_timeout: None,
                    start_to_close_timeout: None,
                    heartbeat_timeout: None,
                },
                input: None,
                control: None,
                decision_task_completed_event_id: None,
            },
        )
    }

    #[test]
    fn report_lists_status_result_and_tasks() {
        let state = build_state(vec![
            ev(
                1,
                EventAttributes::WorkflowExecutionStarted {
                    workflow: WorkflowId::new("pipeline", "3"),
                    configuration: ExecutionConfiguration {
                        timeout: None,
                        decision_task_timeout: None,
                        decision_task_list: "decisions".into(),
                        decision_task_priority: 0,
                        child_policy: ChildPolicy::Terminate,
                        lambda_role: None,
                    },
                    input: None,
                    tags: vec![],
                    parent: None,
                },
            ),
            scheduled(2, "a"),
            scheduled(3, "b"),
            ev(
                4,
                EventAttributes::ActivityTaskFailed {
                    scheduled_event_id: 3,
                    started_event_id: None,
                    reason: Some("boom".into()),
                    details: None,
                },
            ),
            ev(
                5,
                EventAttributes::WorkflowExecutionFailed {
                    reason: Some("task-failed".into()),
                    details: Some("b failed".into()),
                    decision_task_completed_event_id: None,
                },
            ),
        ])
        .unwrap();

        let report = render_report(&state);
        assert_eq!(
            report,
            "status: FAILED\nworkflow: pipeline @ 3\nresult: [task-failed] b failed\n\ntasks:\na, scheduled\nb, failed, boom\n"
        );
    }
}
