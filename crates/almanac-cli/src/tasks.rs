//! Turns `[[tasks]]` entries into scheduled rules and wires up log output
//! for everything the scheduler reports.

use almanac_core::{CalendarTime, TaskConfig};
use almanac_events::{EventKind, Notification};
use almanac_scheduler::{Scheduler, TaskRule};
use serde_json::json;
use tracing::{info, warn};

/// Build a rule whose job logs the task's message and returns it as JSON.
pub fn rule_from_config(config: &TaskConfig) -> anyhow::Result<TaskRule> {
    let id = config.id.clone();
    let message = config.message.clone().unwrap_or_else(|| id.clone());

    let rule = TaskRule::from_config(config)?.with_job(move |at: CalendarTime| {
        let id = id.clone();
        let message = message.clone();
        async move {
            info!(task_id = %id, at = %at, "{message}");
            anyhow::Ok(json!({ "task": id, "message": message, "at": at.to_string() }))
        }
    });
    Ok(rule)
}

/// Schedule every configured task. Fails on the first invalid definition.
pub fn schedule_all(scheduler: &Scheduler, tasks: &[TaskConfig]) -> anyhow::Result<usize> {
    for config in tasks {
        let rule = rule_from_config(config)?;
        scheduler.on(EventKind::task(config.id.clone()), log_completion);
        scheduler.schedule_task(rule);
    }
    Ok(tasks.len())
}

/// Log queue pressure and duplicate warnings.
pub fn log_warnings(scheduler: &Scheduler) {
    for kind in [
        EventKind::QueueDepth,
        EventKind::QueueLimit,
        EventKind::DuplicateTask,
    ] {
        scheduler.on(kind, log_warning);
    }
}

fn log_completion(notification: &Notification) {
    if let Notification::TaskCompleted(report) = notification {
        if report.succeeded() {
            info!(
                task_id = %report.task_id,
                runs = report.run_count,
                "task completed"
            );
        } else {
            warn!(
                task_id = %report.task_id,
                failed = report.failed_runs,
                "task failed: {}",
                report.outcome
            );
        }
    }
}

fn log_warning(notification: &Notification) {
    match notification {
        Notification::QueueDepth { ratio } => warn!(ratio, "dispatch queue depth"),
        Notification::QueueLimit { .. } => warn!("dispatch queue at its limit"),
        Notification::DuplicateTask {
            duplicate_id,
            running_id,
        } => warn!(
            task_id = %duplicate_id,
            running_id = ?running_id,
            "duplicate task skipped"
        ),
        _ => {}
    }
}
