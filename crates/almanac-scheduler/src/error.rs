use almanac_core::AlmanacError;
use thiserror::Error;

/// Errors returned by scheduler configuration and control calls.
///
/// Job failures never surface here; they are reported through
/// `Notification::TaskCompleted`.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Timezone or timestamp rejected by the calendar layer.
    #[error(transparent)]
    Calendar(#[from] AlmanacError),

    /// A task definition could not be turned into a rule.
    #[error("Invalid task {id}: {reason}")]
    InvalidTask { id: String, reason: String },

    /// Simulation parameters that would never terminate or cannot be read.
    #[error("Invalid simulation: {0}")]
    InvalidSimulation(String),

    /// `start_*` was called while a clock driver is still active.
    #[error("Scheduler clock is already running")]
    AlreadyRunning,

    /// The clock driver needs a Tokio runtime to spawn onto.
    #[error("No Tokio runtime available: {0}")]
    NoRuntime(String),

    /// The clock driver ended without reporting how it stopped.
    #[error("Clock driver failed: {0}")]
    ClockFailed(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
