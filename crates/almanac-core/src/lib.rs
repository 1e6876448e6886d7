//! `almanac-core` — shared vocabulary for the almanac scheduler crates.
//!
//! Holds the millisecond [`types::Timestamp`] and time constants, the
//! timezone-aware [`time::CalendarTime`] view, completion reports handed to
//! subscribers, and the figment-backed [`config::AlmanacConfig`].

pub mod config;
pub mod error;
pub mod time;
pub mod types;

pub use config::{AlmanacConfig, SchedulerConfig, SimulationConfig, TaskConfig};
pub use error::{AlmanacError, Result};
pub use time::CalendarTime;
pub use types::{JobOutcome, TaskReport, Timestamp, DAY, HOUR, MINUTE, SECOND};
