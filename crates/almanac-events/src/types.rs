use almanac_core::{CalendarTime, TaskReport, DAY, HOUR, MINUTE, SECOND};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Fixed-duration buckets tracked by the clock driver.
///
/// Declared longest first: [`IntervalBucket::ALL`] is the evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalBucket {
    Days7,
    Days6,
    Days5,
    Days4,
    Days3,
    Days2,
    Days1,
    Hours12,
    Hours6,
    Hours5,
    Hours3,
    Hours1,
    Minutes30,
    Minutes5,
    Minutes4,
    Minutes1,
    Seconds30,
    Seconds5,
    Seconds1,
}

impl IntervalBucket {
    pub const ALL: [IntervalBucket; 19] = [
        IntervalBucket::Days7,
        IntervalBucket::Days6,
        IntervalBucket::Days5,
        IntervalBucket::Days4,
        IntervalBucket::Days3,
        IntervalBucket::Days2,
        IntervalBucket::Days1,
        IntervalBucket::Hours12,
        IntervalBucket::Hours6,
        IntervalBucket::Hours5,
        IntervalBucket::Hours3,
        IntervalBucket::Hours1,
        IntervalBucket::Minutes30,
        IntervalBucket::Minutes5,
        IntervalBucket::Minutes4,
        IntervalBucket::Minutes1,
        IntervalBucket::Seconds30,
        IntervalBucket::Seconds5,
        IntervalBucket::Seconds1,
    ];

    pub fn duration_ms(self) -> i64 {
        match self {
            IntervalBucket::Days7 => DAY * 7,
            IntervalBucket::Days6 => DAY * 6,
            IntervalBucket::Days5 => DAY * 5,
            IntervalBucket::Days4 => DAY * 4,
            IntervalBucket::Days3 => DAY * 3,
            IntervalBucket::Days2 => DAY * 2,
            IntervalBucket::Days1 => DAY,
            IntervalBucket::Hours12 => HOUR * 12,
            IntervalBucket::Hours6 => HOUR * 6,
            IntervalBucket::Hours5 => HOUR * 5,
            IntervalBucket::Hours3 => HOUR * 3,
            IntervalBucket::Hours1 => HOUR,
            IntervalBucket::Minutes30 => MINUTE * 30,
            IntervalBucket::Minutes5 => MINUTE * 5,
            IntervalBucket::Minutes4 => MINUTE * 4,
            IntervalBucket::Minutes1 => MINUTE,
            IntervalBucket::Seconds30 => SECOND * 30,
            IntervalBucket::Seconds5 => SECOND * 5,
            IntervalBucket::Seconds1 => SECOND,
        }
    }

    /// The 1 s and 5 s buckets start in lockstep; every other bucket gets a
    /// random first-fire offset.
    pub fn is_jittered(self) -> bool {
        !matches!(self, IntervalBucket::Seconds1 | IntervalBucket::Seconds5)
    }

    /// Short event name, e.g. `m5` or `d1`.
    pub fn name(self) -> &'static str {
        match self {
            IntervalBucket::Days7 => "d7",
            IntervalBucket::Days6 => "d6",
            IntervalBucket::Days5 => "d5",
            IntervalBucket::Days4 => "d4",
            IntervalBucket::Days3 => "d3",
            IntervalBucket::Days2 => "d2",
            IntervalBucket::Days1 => "d1",
            IntervalBucket::Hours12 => "h12",
            IntervalBucket::Hours6 => "h6",
            IntervalBucket::Hours5 => "h5",
            IntervalBucket::Hours3 => "h3",
            IntervalBucket::Hours1 => "h1",
            IntervalBucket::Minutes30 => "m30",
            IntervalBucket::Minutes5 => "m5",
            IntervalBucket::Minutes4 => "m4",
            IntervalBucket::Minutes1 => "m1",
            IntervalBucket::Seconds30 => "s30",
            IntervalBucket::Seconds5 => "s5",
            IntervalBucket::Seconds1 => "s1",
        }
    }
}

impl fmt::Display for IntervalBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Calendar fields whose change between two ticks is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarBoundary {
    NewHour,
    NewDay,
    NewWeek,
    NewMonth,
    NewYear,
}

impl CalendarBoundary {
    pub const ALL: [CalendarBoundary; 5] = [
        CalendarBoundary::NewHour,
        CalendarBoundary::NewDay,
        CalendarBoundary::NewWeek,
        CalendarBoundary::NewMonth,
        CalendarBoundary::NewYear,
    ];

    /// True when the field this boundary watches differs between the two times.
    pub fn crossed(self, previous: &CalendarTime, current: &CalendarTime) -> bool {
        match self {
            CalendarBoundary::NewHour => previous.hour() != current.hour(),
            CalendarBoundary::NewDay => previous.day() != current.day(),
            CalendarBoundary::NewWeek => previous.iso_week() != current.iso_week(),
            CalendarBoundary::NewMonth => previous.month() != current.month(),
            CalendarBoundary::NewYear => previous.year() != current.year(),
        }
    }
}

/// Subscription key: which notifications a handler receives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Interval(IntervalBucket),
    Boundary(CalendarBoundary),
    /// Completion reports for the task with this id.
    Task(String),
    QueueDepth,
    QueueLimit,
    DuplicateTask,
    SimulationFinished,
}

impl EventKind {
    pub fn task(id: impl Into<String>) -> Self {
        EventKind::Task(id.into())
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Interval(bucket) => write!(f, "{bucket}"),
            EventKind::Boundary(CalendarBoundary::NewHour) => f.write_str("newHour"),
            EventKind::Boundary(CalendarBoundary::NewDay) => f.write_str("newDay"),
            EventKind::Boundary(CalendarBoundary::NewWeek) => f.write_str("newWeek"),
            EventKind::Boundary(CalendarBoundary::NewMonth) => f.write_str("newMonth"),
            EventKind::Boundary(CalendarBoundary::NewYear) => f.write_str("newYear"),
            EventKind::Task(id) => write!(f, "task:{id}"),
            EventKind::QueueDepth => f.write_str("queueDepth"),
            EventKind::QueueLimit => f.write_str("queueLimit"),
            EventKind::DuplicateTask => f.write_str("duplicateTask"),
            EventKind::SimulationFinished => f.write_str("simulationFinished"),
        }
    }
}

/// Everything the scheduler reports to the outside world.
#[derive(Debug, Clone)]
pub enum Notification {
    Interval {
        bucket: IntervalBucket,
        at: CalendarTime,
    },
    Boundary {
        boundary: CalendarBoundary,
        at: CalendarTime,
    },
    TaskCompleted(TaskReport),
    /// An enqueue brought the queue to `ratio` of its acceptable depth (>= 0.7).
    QueueDepth { ratio: f64 },
    /// The queue is full; always carries `1.0`.
    QueueLimit { ratio: f64 },
    /// A task was skipped because it is already queued or running.
    DuplicateTask {
        duplicate_id: String,
        running_id: Option<String>,
    },
    SimulationFinished { at: CalendarTime },
}

impl Notification {
    pub fn kind(&self) -> EventKind {
        match self {
            Notification::Interval { bucket, .. } => EventKind::Interval(*bucket),
            Notification::Boundary { boundary, .. } => EventKind::Boundary(*boundary),
            Notification::TaskCompleted(report) => EventKind::Task(report.task_id.clone()),
            Notification::QueueDepth { .. } => EventKind::QueueDepth,
            Notification::QueueLimit { .. } => EventKind::QueueLimit,
            Notification::DuplicateTask { .. } => EventKind::DuplicateTask,
            Notification::SimulationFinished { .. } => EventKind::SimulationFinished,
        }
    }
}

/// Identifies a subscription for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Synchronous subscriber.
///
/// Handlers run on the clock driver's task, so they must be cheap and must
/// not block. Closures `Fn(&Notification)` implement this automatically.
pub trait EventHandler: Send + Sync {
    fn handle(&self, notification: &Notification);
}

impl<F> EventHandler for F
where
    F: Fn(&Notification) + Send + Sync,
{
    fn handle(&self, notification: &Notification) {
        self(notification)
    }
}

/// A registered handler bound to one event kind.
pub struct Subscription {
    pub id: SubscriptionId,
    pub kind: EventKind,
    pub handler: Arc<dyn EventHandler>,
    /// Lower value = earlier delivery. Ties keep subscription order.
    pub priority: i32,
}

impl Subscription {
    pub fn new(kind: EventKind, handler: Arc<dyn EventHandler>) -> Self {
        Self {
            id: SubscriptionId::new(),
            kind,
            handler,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}
