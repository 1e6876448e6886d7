use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use almanac_core::config::{DEFAULT_REALTIME_TICK_MS, DEFAULT_TIMEZONE};
use almanac_core::time::{parse_timezone, wall_clock_now};
use almanac_core::{CalendarTime, JobOutcome, SchedulerConfig, TaskReport, Timestamp, MINUTE};
use almanac_events::{EventBus, EventHandler, EventKind, Notification, SubscriptionId};
use chrono_tz::Tz;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    clock::{self, Cadence, DriverExit},
    error::{Result, SchedulerError},
    intervals::IntervalTracker,
    queue::{Admission, DispatchQueue, QueuedTask, TaskKey},
    schedule::{self, Eligibility},
    task::{Job, TaskRule},
    types::{ClockMode, QueueConfig, SimulationOutcome, SimulationParams, TaskSnapshot},
};

/// What a single tick left for the driver to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    Continue,
    /// Simulated time reached the end of its window.
    Finished,
}

/// Calendar-driven task scheduler.
///
/// Cheap to clone; every clone drives the same registry, queue and event
/// bus. Ticks run on a Tokio task spawned by [`Scheduler::start_realtime`] or
/// [`Scheduler::start_simulated`]; job bodies run on their own Tokio tasks,
/// one at a time.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<SchedulerState>,
    bus: EventBus,
    clock: Mutex<Option<ClockHandle>>,
    clock_generation: AtomicU64,
    realtime_tick: Duration,
}

/// Slot for the active driver. The driver clears its own slot before it
/// reports an exit, so a finished run never reads as running.
struct ClockHandle {
    generation: u64,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct RegisteredTask {
    key: TaskKey,
    rule: TaskRule,
}

/// A job pulled off the queue, ready to be spawned once the lock is released.
struct Dispatch {
    key: TaskKey,
    task_id: String,
    job: Job,
    at: CalendarTime,
}

struct SchedulerState {
    mode: ClockMode,
    simulated_now: Timestamp,
    simulation_end: Timestamp,
    simulation_increment: i64,
    timezone: Tz,
    registry: Vec<RegisteredTask>,
    next_key: u64,
    queue: DispatchQueue,
    intervals: IntervalTracker,
    rng: StdRng,
}

impl SchedulerState {
    fn now(&self) -> Timestamp {
        match self.mode {
            ClockMode::Simulated => self.simulated_now,
            ClockMode::RealTime => wall_clock_now(),
        }
    }

    /// Pop the queue head if nothing is running. Entries whose task left the
    /// registry are dropped on the way.
    fn begin_dispatch(&mut self, now: Timestamp, at: CalendarTime) -> Option<Dispatch> {
        while let Some(QueuedTask { key, id }) = self.queue.start_next() {
            let job = self
                .registry
                .iter_mut()
                .find(|entry| entry.key == key)
                .and_then(|entry| entry.rule.begin_run(now));
            match job {
                Some(job) => {
                    debug!(task_id = %id, now, "dispatching task");
                    return Some(Dispatch {
                        key,
                        task_id: id,
                        job,
                        at,
                    });
                }
                None => {
                    debug!(task_id = %id, "queued task no longer registered, discarded");
                    self.queue.finish(key);
                }
            }
        }
        None
    }

    /// Run every registered task through duplicate suppression, the calendar
    /// matcher and queue admission, in registry order.
    fn enqueue_eligible(&mut self, now: Timestamp, at: &CalendarTime, out: &mut Vec<Notification>) {
        let accept_duplicates = self.queue.config().accept_duplicates;

        for entry in self.registry.iter_mut() {
            let rule = &mut entry.rule;
            if !rule.has_job() {
                continue;
            }

            if !accept_duplicates && self.queue.is_duplicate(&rule.id) {
                let running_id = self.queue.running_id();
                warn!(task_id = %rule.id, running_id = ?running_id, "duplicate task skipped");
                out.push(Notification::DuplicateTask {
                    duplicate_id: rule.id.clone(),
                    running_id,
                });
                continue;
            }

            match schedule::evaluate(rule, now, at) {
                Eligibility::FireOnStart => {}
                Eligibility::Due => match self.queue.admit(now) {
                    Admission::Full { warn } => {
                        if warn {
                            warn!(
                                task_id = %rule.id,
                                depth = self.queue.len(),
                                "dispatch queue full, task dropped for this tick"
                            );
                            out.push(Notification::QueueLimit { ratio: 1.0 });
                        }
                        continue;
                    }
                    Admission::Accepted { depth_ratio } => {
                        if let Some(ratio) = depth_ratio {
                            warn!(task_id = %rule.id, ratio, "dispatch queue filling up");
                            out.push(Notification::QueueDepth { ratio });
                        }
                    }
                },
                Eligibility::NotDue | Eligibility::Mismatch(_) => continue,
            }

            rule.advance_next_runnable(now);
            self.queue.push(QueuedTask {
                key: entry.key,
                id: rule.id.clone(),
            });
            debug!(task_id = %rule.id, depth = self.queue.len(), "task enqueued");
        }
    }

    /// Account for a finished run. One-shot tasks leave the registry here.
    fn record_completion(&mut self, key: TaskKey, outcome: JobOutcome) -> Option<TaskReport> {
        self.queue.finish(key);

        let position = self.registry.iter().position(|entry| entry.key == key)?;
        let rule = &mut self.registry[position].rule;
        rule.record_outcome(outcome.is_success());
        let report = TaskReport {
            task_id: rule.id.clone(),
            outcome,
            last_run_time: rule.last_run_time.unwrap_or_default(),
            next_runnable_time: rule.next_runnable_time,
            successful_runs: rule.successful_runs,
            failed_runs: rule.failed_runs,
            run_count: rule.run_count,
        };

        if !rule.repeat {
            self.registry.remove(position);
            debug!(task_id = %report.task_id, "one-shot task removed");
        }
        Some(report)
    }
}

impl Scheduler {
    /// Real-time mode, default timezone and queue settings, entropy-seeded jitter.
    pub fn new() -> Self {
        Self::build(
            parse_timezone(DEFAULT_TIMEZONE).unwrap_or(chrono_tz::America::Vancouver),
            QueueConfig::default(),
            Duration::from_millis(DEFAULT_REALTIME_TICK_MS),
            MINUTE,
            StdRng::from_entropy(),
        )
    }

    pub fn from_config(config: &SchedulerConfig) -> Result<Self> {
        let timezone = parse_timezone(&config.timezone)?;
        let mut queue = QueueConfig {
            accept_duplicates: config.accept_duplicate_tasks,
            ..QueueConfig::default()
        };
        if config.acceptable_queue_depth > 0 {
            queue.acceptable_depth = config.acceptable_queue_depth;
        }
        let rng = match config.jitter_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let debounce = i64::try_from(config.queue_warning_debounce_ms).unwrap_or(i64::MAX);

        Ok(Self::build(
            timezone,
            queue,
            Duration::from_millis(config.realtime_tick_ms.max(1)),
            debounce,
            rng,
        ))
    }

    fn build(
        timezone: Tz,
        queue: QueueConfig,
        realtime_tick: Duration,
        warning_debounce_ms: i64,
        rng: StdRng,
    ) -> Self {
        let state = SchedulerState {
            mode: ClockMode::RealTime,
            simulated_now: 0,
            simulation_end: 0,
            simulation_increment: MINUTE,
            timezone,
            registry: Vec::new(),
            next_key: 0,
            queue: DispatchQueue::new(queue, warning_debounce_ms),
            intervals: IntervalTracker::new(),
            rng,
        };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                bus: EventBus::new(),
                clock: Mutex::new(None),
                clock_generation: AtomicU64::new(0),
                realtime_tick,
            }),
        }
    }

    /// Fix the interval-bucket jitter so runs are reproducible.
    pub fn with_jitter_seed(self, seed: u64) -> Self {
        self.lock_state().rng = StdRng::seed_from_u64(seed);
        self
    }

    // --- tasks --------------------------------------------------------------

    /// A fresh rule with defaults; configure it and pass it to [`Self::schedule_task`].
    pub fn new_task(&self, id: impl Into<String>) -> TaskRule {
        TaskRule::new(id)
    }

    /// A fresh rule seeded with a previous run, e.g. from persisted history.
    pub fn new_task_with_history(&self, id: impl Into<String>, last_run_time: Timestamp) -> TaskRule {
        TaskRule::new(id).with_last_run_time(last_run_time)
    }

    /// Register `rule`. A rule without a next runnable time gets
    /// `now + repeat_interval`.
    pub fn schedule_task(&self, mut rule: TaskRule) {
        let mut state = self.lock_state();
        if rule.next_runnable_time.is_none() {
            let now = state.now();
            rule.advance_next_runnable(now);
        }
        let key = TaskKey(state.next_key);
        state.next_key += 1;
        info!(
            task_id = %rule.id,
            repeat = rule.repeat,
            interval_ms = rule.repeat_interval,
            "task scheduled"
        );
        state.registry.push(RegisteredTask { key, rule });
    }

    pub fn tasks(&self) -> Vec<TaskSnapshot> {
        self.lock_state()
            .registry
            .iter()
            .map(|entry| entry.rule.snapshot())
            .collect()
    }

    /// First registered task with this id.
    pub fn task(&self, id: &str) -> Option<TaskSnapshot> {
        self.lock_state()
            .registry
            .iter()
            .find(|entry| entry.rule.id == id)
            .map(|entry| entry.rule.snapshot())
    }

    pub fn queue_len(&self) -> usize {
        self.lock_state().queue.len()
    }

    pub fn running_task_id(&self) -> Option<String> {
        self.lock_state().queue.running_id()
    }

    // --- clock --------------------------------------------------------------

    /// Tick against the wall clock until [`Self::stop`] is called.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_realtime(&self) -> Result<()> {
        let handle = Handle::try_current().map_err(|e| SchedulerError::NoRuntime(e.to_string()))?;
        self.spawn_clock(&handle, Cadence::Every(self.shared.realtime_tick), |state| {
            state.mode = ClockMode::RealTime;
            Ok(())
        })?;
        Ok(())
    }

    /// Run a simulated window and wait for it to end or be stopped.
    pub async fn start_simulated(&self, params: SimulationParams) -> Result<SimulationOutcome> {
        if params.increment_ms <= 0 {
            return Err(SchedulerError::InvalidSimulation(format!(
                "increment must be positive, got {} ms",
                params.increment_ms
            )));
        }

        let handle = Handle::try_current().map_err(|e| SchedulerError::NoRuntime(e.to_string()))?;
        let cadence = params.tick_interval.map_or(Cadence::Immediate, Cadence::Every);
        let exit = self.spawn_clock(&handle, cadence, |state| {
            state.mode = ClockMode::Simulated;
            state.simulated_now = params.start;
            state.simulation_end = params.end;
            state.simulation_increment = params.increment_ms;
            Ok(())
        })?;
        info!(
            start = params.start,
            end = params.end,
            increment_ms = params.increment_ms,
            "simulation started"
        );

        match exit.await {
            Ok(DriverExit::Finished) => Ok(SimulationOutcome::Finished),
            Ok(DriverExit::Stopped) => Ok(SimulationOutcome::Stopped),
            Ok(DriverExit::Failed(reason)) => Err(SchedulerError::ClockFailed(reason)),
            Err(_) => Err(SchedulerError::ClockFailed(
                "driver exited without reporting".to_string(),
            )),
        }
    }

    /// Signal the clock driver to stop. Safe to call repeatedly or from a
    /// notification handler; in-flight jobs still finish and report.
    pub fn stop(&self) {
        let handle = self
            .shared
            .clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.shutdown.send(true);
            debug!("scheduler clock stop requested");
        }
    }

    /// True while a clock driver is ticking.
    pub fn is_running(&self) -> bool {
        self.shared
            .clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.task.is_finished())
    }

    /// Prepare state with `init`, re-arm the interval tracker at the new
    /// logical time and spawn the driver loop.
    fn spawn_clock<F>(
        &self,
        runtime: &Handle,
        cadence: Cadence,
        init: F,
    ) -> Result<oneshot::Receiver<DriverExit>>
    where
        F: FnOnce(&mut SchedulerState) -> Result<()>,
    {
        let mut clock = self
            .shared
            .clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if clock.as_ref().is_some_and(|handle| !handle.task.is_finished()) {
            return Err(SchedulerError::AlreadyRunning);
        }

        {
            let mut state = self.lock_state();
            init(&mut state)?;
            let start = CalendarTime::at(state.now(), state.timezone)?;
            let SchedulerState { intervals, rng, .. } = &mut *state;
            intervals.reset(&start, rng);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (exit_tx, exit_rx) = oneshot::channel();
        let generation = self.shared.clock_generation.fetch_add(1, Ordering::Relaxed);
        let scheduler = self.clone();
        let task = runtime.spawn(async move {
            let exit = clock::drive(scheduler.clone(), cadence, shutdown_rx).await;
            scheduler.release_clock(generation);
            let _ = exit_tx.send(exit);
        });
        *clock = Some(ClockHandle {
            generation,
            shutdown: shutdown_tx,
            task,
        });
        Ok(exit_rx)
    }

    /// Empty the clock slot if it still belongs to the driver `generation`.
    fn release_clock(&self, generation: u64) {
        let mut clock = self
            .shared
            .clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if clock.as_ref().is_some_and(|handle| handle.generation == generation) {
            *clock = None;
        }
    }

    /// One clock step: dispatch, interval and boundary events, task
    /// evaluation, then the simulated clock advance. Notifications are
    /// delivered after the state lock is released.
    pub(crate) fn tick(&self) -> Result<TickOutcome> {
        let mut notifications = Vec::new();

        let (dispatch, outcome) = {
            let mut state = self.lock_state();
            let now = state.now();
            let at = CalendarTime::at(now, state.timezone)?;

            let dispatch = state.begin_dispatch(now, at);

            for bucket in state.intervals.elapsed(now) {
                notifications.push(Notification::Interval { bucket, at });
            }
            for boundary in state.intervals.crossed(&at) {
                notifications.push(Notification::Boundary { boundary, at });
            }

            state.enqueue_eligible(now, &at, &mut notifications);

            let mut outcome = TickOutcome::Continue;
            if state.mode == ClockMode::Simulated {
                state.simulated_now = state.simulated_now.saturating_add(state.simulation_increment);
                if state.simulated_now >= state.simulation_end {
                    let end = CalendarTime::at(state.simulated_now, state.timezone)?;
                    notifications.push(Notification::SimulationFinished { at: end });
                    outcome = TickOutcome::Finished;
                }
            }
            (dispatch, outcome)
        };

        if let Some(dispatch) = dispatch {
            self.spawn_job(dispatch);
        }
        self.deliver(&notifications);
        Ok(outcome)
    }

    /// Run a job body on its own task so panics surface as a `JoinError`,
    /// then do the completion bookkeeping and report.
    fn spawn_job(&self, dispatch: Dispatch) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let Dispatch {
                key,
                task_id,
                job,
                at,
            } = dispatch;

            let outcome = match tokio::spawn(async move { job(at).await }).await {
                Ok(Ok(value)) => JobOutcome::Succeeded(value),
                Ok(Err(e)) => {
                    warn!(task_id = %task_id, "job failed: {e:#}");
                    JobOutcome::Failed(format!("{e:#}"))
                }
                Err(e) => {
                    warn!(task_id = %task_id, "job panicked: {e}");
                    JobOutcome::Failed(format!("job panicked: {e}"))
                }
            };

            let report = scheduler.lock_state().record_completion(key, outcome);
            match report {
                Some(report) => {
                    debug!(
                        task_id = %report.task_id,
                        success = report.succeeded(),
                        runs = report.run_count,
                        "task completed"
                    );
                    scheduler.deliver(&[Notification::TaskCompleted(report)]);
                }
                None => warn!(task_id = %task_id, "completed task is no longer registered"),
            }
        });
    }

    fn deliver(&self, notifications: &[Notification]) {
        for notification in notifications {
            if let Err(e) = self.shared.bus.emit(notification) {
                warn!("notification delivery failed: {e}");
            }
        }
    }

    // --- time and configuration ----------------------------------------------

    /// Logical time: the wall clock in real-time mode, the simulated counter
    /// otherwise.
    pub fn now(&self) -> Timestamp {
        self.lock_state().now()
    }

    /// Format the current logical time with a strftime pattern, in `tz` or the
    /// scheduler timezone.
    pub fn format_now(&self, pattern: &str, tz: Option<&str>) -> Result<String> {
        let (now, default_tz) = {
            let state = self.lock_state();
            (state.now(), state.timezone)
        };
        let tz = match tz {
            Some(name) => parse_timezone(name)?,
            None => default_tz,
        };
        Ok(CalendarTime::at(now, tz)?.format(pattern)?)
    }

    pub fn timezone(&self) -> Tz {
        self.lock_state().timezone
    }

    /// Invalid names are rejected and the current timezone kept.
    pub fn set_timezone(&self, name: &str) -> Result<()> {
        let tz = parse_timezone(name)?;
        self.lock_state().timezone = tz;
        info!(timezone = %name, "scheduler timezone changed");
        Ok(())
    }

    pub fn mode(&self) -> ClockMode {
        self.lock_state().mode
    }

    pub fn queue_config(&self) -> QueueConfig {
        self.lock_state().queue.config()
    }

    /// A zero depth is ignored and the previous depth kept.
    pub fn set_queue_config(&self, accept_duplicates: bool, acceptable_depth: usize) {
        self.lock_state()
            .queue
            .set_config(accept_duplicates, acceptable_depth);
    }

    /// Timestamp of a wall-clock time in the scheduler timezone.
    pub fn target_timestamp(
        &self,
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
        second: u32,
    ) -> Result<Timestamp> {
        let tz = self.timezone();
        Ok(CalendarTime::from_local(tz, year, month, day, hour, minute, second)?.timestamp())
    }

    /// View `timestamp` in the scheduler timezone.
    pub fn calendar_time(&self, timestamp: Timestamp) -> Result<CalendarTime> {
        Ok(CalendarTime::at(timestamp, self.timezone())?)
    }

    // --- events ---------------------------------------------------------------

    pub fn events(&self) -> &EventBus {
        &self.shared.bus
    }

    /// Subscribe `handler` to notifications of `kind`.
    pub fn on<H>(&self, kind: EventKind, handler: H) -> SubscriptionId
    where
        H: EventHandler + 'static,
    {
        self.shared.bus.on(kind, handler)
    }

    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
