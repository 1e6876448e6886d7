use serde::{Deserialize, Serialize};
use std::fmt;

/// Milliseconds since the Unix epoch. Logical time in both clock modes.
pub type Timestamp = i64;

pub const SECOND: i64 = 1_000;
pub const MINUTE: i64 = SECOND * 60;
pub const HOUR: i64 = MINUTE * 60;
pub const DAY: i64 = HOUR * 24;

/// What a job body produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "value")]
pub enum JobOutcome {
    /// The body resolved; carries its result value.
    Succeeded(serde_json::Value),
    /// The body returned an error or panicked; carries the rendered error.
    Failed(String),
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded(_))
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Succeeded(value) => write!(f, "succeeded: {value}"),
            JobOutcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Completion payload delivered to subscribers of a task's id.
///
/// Counters are read after the run has been accounted for, so a first
/// successful run reports `run_count == 1` and `successful_runs == 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub task_id: String,
    pub outcome: JobOutcome,
    /// Dispatch start of the run being reported.
    pub last_run_time: Timestamp,
    pub next_runnable_time: Option<Timestamp>,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub run_count: u64,
}

impl TaskReport {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_compose() {
        assert_eq!(DAY, 86_400_000);
        assert_eq!(HOUR * 24, DAY);
        assert_eq!(MINUTE * 5, 300_000);
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let ok = JobOutcome::Succeeded(serde_json::json!({"rows": 3}));
        let json = serde_json::to_string(&ok).unwrap();
        assert!(json.contains(r#""status":"succeeded""#));
        assert!(json.contains(r#""rows":3"#));

        let failed = JobOutcome::Failed("boom".to_string());
        assert!(!failed.is_success());
        assert_eq!(failed.to_string(), "failed: boom");
    }
}
