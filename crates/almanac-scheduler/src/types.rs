use std::time::Duration;

use almanac_core::{Timestamp, MINUTE};
use serde::{Deserialize, Serialize};

/// Where logical time comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockMode {
    /// Logical time is the wall clock.
    RealTime,
    /// Logical time is a counter advanced by a fixed increment per tick.
    Simulated,
}

impl std::fmt::Display for ClockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ClockMode::RealTime => "realtime",
            ClockMode::Simulated => "simulation",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ClockMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "realtime" => Ok(ClockMode::RealTime),
            "simulation" => Ok(ClockMode::Simulated),
            other => Err(format!("unknown clock mode: {other}")),
        }
    }
}

/// Dispatch queue admission settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// When false, a task already queued or running is not enqueued again.
    pub accept_duplicates: bool,
    /// Queue length at which new entries are refused. Never zero.
    pub acceptable_depth: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            accept_duplicates: false,
            acceptable_depth: almanac_core::config::DEFAULT_QUEUE_DEPTH,
        }
    }
}

/// A simulated run from `start` until logical time reaches `end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationParams {
    pub start: Timestamp,
    pub end: Timestamp,
    /// Logical milliseconds added per tick.
    pub increment_ms: i64,
    /// Real time between ticks. `None` yields to the runtime between ticks
    /// and otherwise runs as fast as possible.
    pub tick_interval: Option<Duration>,
}

impl SimulationParams {
    /// One-minute increments, no wall-clock pacing.
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self {
            start,
            end,
            increment_ms: MINUTE,
            tick_interval: None,
        }
    }

    pub fn with_increment(mut self, increment_ms: i64) -> Self {
        self.increment_ms = increment_ms;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = Some(interval).filter(|d| !d.is_zero());
        self
    }
}

/// How `start_simulated` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationOutcome {
    /// Logical time reached the end of the window.
    Finished,
    /// `stop` was called before the end.
    Stopped,
}

/// Read-only view of a registered task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub repeat: bool,
    pub repeat_interval_ms: i64,
    pub fire_on_start: bool,
    pub has_job: bool,
    pub last_run_time: Option<Timestamp>,
    pub next_runnable_time: Option<Timestamp>,
    pub run_count: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_mode_round_trips_through_str() {
        for mode in [ClockMode::RealTime, ClockMode::Simulated] {
            assert_eq!(mode.to_string().parse::<ClockMode>().unwrap(), mode);
        }
        assert!("sundial".parse::<ClockMode>().is_err());
    }

    #[test]
    fn zero_tick_interval_means_unpaced() {
        let params = SimulationParams::new(0, 10).with_tick_interval(Duration::ZERO);
        assert!(params.tick_interval.is_none());
        assert_eq!(params.increment_ms, MINUTE);
    }
}
