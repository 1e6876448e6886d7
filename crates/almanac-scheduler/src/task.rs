use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use almanac_core::{CalendarTime, TaskConfig, Timestamp, DAY, HOUR, MINUTE, SECOND};
use chrono::Weekday;
use futures_util::future::{BoxFuture, FutureExt};

use crate::error::{Result, SchedulerError};
use crate::types::TaskSnapshot;

/// Boxed future returned by a job body.
pub type JobFuture = BoxFuture<'static, anyhow::Result<serde_json::Value>>;

/// A job body: receives the calendar time of its dispatch.
pub type Job = Arc<dyn Fn(CalendarTime) -> JobFuture + Send + Sync>;

/// Lower bound on the time of day at which a task becomes eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
}

/// Optional calendar filters; each present filter narrows eligibility.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalendarConstraints {
    pub time_of_day: Option<TimeOfDay>,
    /// Indexed by ISO day of week minus one (Monday = 0).
    pub days_of_week: Option<[bool; 7]>,
    /// Indexed by week of month minus one (days 1-7 = 0).
    pub weeks_of_month: Option<[bool; 5]>,
    pub days_of_month: Option<BTreeSet<u32>>,
    pub months_of_year: Option<BTreeSet<u32>>,
}

/// A recurrence rule plus its run state.
///
/// Built with the chainable `with_*` setters and handed to
/// `Scheduler::schedule_task`, which owns it from then on.
#[derive(Clone)]
pub struct TaskRule {
    pub(crate) id: String,
    pub(crate) repeat_interval: i64,
    pub(crate) repeat: bool,
    pub(crate) last_run_time: Option<Timestamp>,
    pub(crate) next_runnable_time: Option<Timestamp>,
    pub(crate) run_count: u64,
    pub(crate) successful_runs: u64,
    pub(crate) failed_runs: u64,
    pub(crate) constraints: CalendarConstraints,
    pub(crate) fire_on_start: bool,
    pub(crate) job: Option<Job>,
}

impl TaskRule {
    /// Repeats daily, no constraints, no job.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            repeat_interval: DAY,
            repeat: true,
            last_run_time: None,
            next_runnable_time: None,
            run_count: 0,
            successful_runs: 0,
            failed_runs: 0,
            constraints: CalendarConstraints::default(),
            fire_on_start: false,
            job: None,
        }
    }

    /// Build a rule from a config-file task definition. The job is left unset.
    pub fn from_config(config: &TaskConfig) -> Result<Self> {
        let invalid = |reason: String| SchedulerError::InvalidTask {
            id: config.id.clone(),
            reason,
        };

        let mut rule = TaskRule::new(config.id.clone()).with_fire_on_start(config.fire_on_start);
        if let Some(secs) = config.repeat_every_secs {
            rule = rule.with_repeat_interval(Duration::from_secs(secs));
        }
        // After the interval: setting an interval forces repeat on.
        rule = rule.with_repeat(config.repeat);

        if let Some(raw) = &config.time_of_day {
            let (hour, minute) = parse_time_of_day(raw).ok_or_else(|| {
                invalid(format!("time_of_day must be HH:MM, got {raw:?}"))
            })?;
            rule = rule.with_time_of_day(hour, minute);
        }

        if let Some(days) = &config.days_of_week {
            let weekdays = days
                .iter()
                .map(|d| {
                    d.parse::<Weekday>()
                        .map_err(|_| invalid(format!("unknown weekday {d:?}")))
                })
                .collect::<Result<Vec<_>>>()?;
            rule = rule.with_days_of_week(weekdays);
        }

        if let Some(weeks) = &config.weeks_of_month {
            check_range(weeks, 1..=5).map_err(|w| invalid(format!("week of month {w} not in 1..=5")))?;
            rule = rule.with_weeks_of_month(weeks.iter().copied());
        }

        if let Some(days) = &config.days_of_month {
            check_range(days, 1..=31).map_err(|d| invalid(format!("day of month {d} not in 1..=31")))?;
            rule = rule.with_days_of_month(days.iter().copied());
        }

        if let Some(months) = &config.months_of_year {
            check_range(months, 1..=12).map_err(|m| invalid(format!("month {m} not in 1..=12")))?;
            rule = rule.with_months_of_year(months.iter().copied());
        }

        Ok(rule)
    }

    // --- chainable setters ----------------------------------------------------

    pub fn with_repeat(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    /// Spacing between runs. Also turns `repeat` on.
    pub fn with_repeat_every(self, hours: u64, minutes: u64, seconds: u64) -> Self {
        let part = |n: u64, unit: i64| i64::try_from(n).unwrap_or(i64::MAX).saturating_mul(unit);
        let ms = part(hours, HOUR)
            .saturating_add(part(minutes, MINUTE))
            .saturating_add(part(seconds, SECOND));
        self.with_repeat_interval_ms(ms)
    }

    /// Spacing between runs. Also turns `repeat` on.
    pub fn with_repeat_interval(self, interval: Duration) -> Self {
        let ms = i64::try_from(interval.as_millis()).unwrap_or(i64::MAX);
        self.with_repeat_interval_ms(ms)
    }

    fn with_repeat_interval_ms(mut self, ms: i64) -> Self {
        self.repeat = true;
        self.repeat_interval = ms.max(0);
        self
    }

    pub fn with_fire_on_start(mut self, fire_on_start: bool) -> Self {
        self.fire_on_start = fire_on_start;
        self
    }

    pub fn with_time_of_day(mut self, hour: u32, minute: u32) -> Self {
        self.constraints.time_of_day = Some(TimeOfDay { hour, minute });
        self
    }

    pub fn with_days_of_week(mut self, days: impl IntoIterator<Item = Weekday>) -> Self {
        let mut set = [false; 7];
        for day in days {
            set[day.num_days_from_monday() as usize] = true;
        }
        self.constraints.days_of_week = Some(set);
        self
    }

    /// Weeks are 1..=5 (`ceil(day_of_month / 7)`); other values are ignored.
    pub fn with_weeks_of_month(mut self, weeks: impl IntoIterator<Item = u32>) -> Self {
        let mut set = [false; 5];
        for week in weeks.into_iter().filter(|w| (1..=5).contains(w)) {
            set[week as usize - 1] = true;
        }
        self.constraints.weeks_of_month = Some(set);
        self
    }

    pub fn with_days_of_month(mut self, days: impl IntoIterator<Item = u32>) -> Self {
        self.constraints.days_of_month = Some(days.into_iter().collect());
        self
    }

    pub fn with_months_of_year(mut self, months: impl IntoIterator<Item = u32>) -> Self {
        self.constraints.months_of_year = Some(months.into_iter().collect());
        self
    }

    /// Seed the last dispatch time, e.g. from persisted history.
    pub fn with_last_run_time(mut self, last_run_time: Timestamp) -> Self {
        self.last_run_time = Some(last_run_time);
        self
    }

    /// Seed both the last dispatch and the earliest next enqueue.
    pub fn with_run_history(mut self, last_run_time: Timestamp, next_runnable_time: Timestamp) -> Self {
        self.last_run_time = Some(last_run_time);
        self.next_runnable_time = Some(next_runnable_time);
        self
    }

    /// Attach the job body.
    pub fn with_job<F, Fut>(mut self, job: F) -> Self
    where
        F: Fn(CalendarTime) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
    {
        self.job = Some(Arc::new(move |at: CalendarTime| -> JobFuture { job(at).boxed() }));
        self
    }

    // --- accessors ------------------------------------------------------------

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Milliseconds between runs.
    pub fn repeat_interval(&self) -> i64 {
        self.repeat_interval
    }

    pub fn repeat(&self) -> bool {
        self.repeat
    }

    pub fn fire_on_start(&self) -> bool {
        self.fire_on_start
    }

    pub fn has_job(&self) -> bool {
        self.job.is_some()
    }

    pub fn last_run_time(&self) -> Option<Timestamp> {
        self.last_run_time
    }

    pub fn next_runnable_time(&self) -> Option<Timestamp> {
        self.next_runnable_time
    }

    pub fn run_count(&self) -> u64 {
        self.run_count
    }

    pub fn successful_runs(&self) -> u64 {
        self.successful_runs
    }

    pub fn failed_runs(&self) -> u64 {
        self.failed_runs
    }

    pub fn constraints(&self) -> &CalendarConstraints {
        &self.constraints
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id.clone(),
            repeat: self.repeat,
            repeat_interval_ms: self.repeat_interval,
            fire_on_start: self.fire_on_start,
            has_job: self.has_job(),
            last_run_time: self.last_run_time,
            next_runnable_time: self.next_runnable_time,
            run_count: self.run_count,
            successful_runs: self.successful_runs,
            failed_runs: self.failed_runs,
        }
    }

    // --- run-state transitions (scheduler only) ---------------------------------

    /// Push the earliest next enqueue to `now + repeat_interval`.
    pub(crate) fn advance_next_runnable(&mut self, now: Timestamp) {
        self.next_runnable_time = Some(now.saturating_add(self.repeat_interval));
    }

    /// Record a dispatch start and hand back the job to run.
    pub(crate) fn begin_run(&mut self, now: Timestamp) -> Option<Job> {
        let job = self.job.clone()?;
        self.last_run_time = Some(now);
        self.run_count += 1;
        Some(job)
    }

    pub(crate) fn record_outcome(&mut self, succeeded: bool) {
        if succeeded {
            self.successful_runs += 1;
        } else {
            self.failed_runs += 1;
        }
    }
}

impl fmt::Debug for TaskRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRule")
            .field("id", &self.id)
            .field("repeat_interval", &self.repeat_interval)
            .field("repeat", &self.repeat)
            .field("last_run_time", &self.last_run_time)
            .field("next_runnable_time", &self.next_runnable_time)
            .field("run_count", &self.run_count)
            .field("constraints", &self.constraints)
            .field("fire_on_start", &self.fire_on_start)
            .field("has_job", &self.has_job())
            .finish()
    }
}

fn parse_time_of_day(raw: &str) -> Option<(u32, u32)> {
    let (hour, minute) = raw.trim().split_once(':')?;
    let hour: u32 = hour.parse().ok()?;
    let minute: u32 = minute.parse().ok()?;
    (hour < 24 && minute < 60).then_some((hour, minute))
}

fn check_range(values: &[u32], range: std::ops::RangeInclusive<u32>) -> std::result::Result<(), u32> {
    match values.iter().find(|v| !range.contains(v)) {
        Some(bad) => Err(*bad),
        None => Ok(()),
    }
}
