//! `almanac-scheduler` — calendar-driven task scheduler on Tokio.
//!
//! # Overview
//!
//! A [`Scheduler`] owns a registry of [`TaskRule`]s, a single-flight
//! dispatch queue and an [`almanac_events::EventBus`]. A clock driver calls
//! the scheduler once per tick; each tick:
//!
//! 1. starts the queue head if no job is running,
//! 2. fires elapsed interval buckets and crossed calendar boundaries,
//! 3. enqueues every task whose rule matches the current calendar time,
//! 4. in simulation, advances logical time and finishes at the end.
//!
//! # Clock modes
//!
//! | Mode        | Logical time                        | Pacing                          |
//! |-------------|-------------------------------------|---------------------------------|
//! | `RealTime`  | wall clock                          | `realtime_tick_ms` (250 ms)     |
//! | `Simulated` | `start`, plus `increment` per tick  | optional `tick_interval`, else as fast as possible |
//!
//! # Task constraints
//!
//! | Constraint       | Matches when                                  |
//! |------------------|-----------------------------------------------|
//! | `months_of_year` | month (1-12) is listed                        |
//! | `weeks_of_month` | `ceil(day / 7)` (1-5) is listed               |
//! | `days_of_week`   | ISO weekday (Monday = 1) is listed            |
//! | `days_of_month`  | day (1-31) is listed                          |
//! | `time_of_day`    | hour and minute are each at or past the target |

mod clock;
pub mod engine;
pub mod error;
pub mod intervals;
pub mod queue;
pub mod schedule;
pub mod task;
pub mod types;

pub use engine::Scheduler;
pub use error::{Result, SchedulerError};
pub use schedule::{Constraint, Eligibility};
pub use task::{CalendarConstraints, Job, JobFuture, TaskRule, TimeOfDay};
pub use types::{ClockMode, QueueConfig, SimulationOutcome, SimulationParams, TaskSnapshot};
