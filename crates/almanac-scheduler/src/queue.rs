use std::collections::VecDeque;

use almanac_core::Timestamp;
use tracing::debug;

use crate::types::QueueConfig;

/// Queue length ratio at which every enqueue emits a depth warning.
pub const DEPTH_WARNING_RATIO: f64 = 0.7;

/// Registry identity of a scheduled task. Ids are advisory and may repeat;
/// keys never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskKey(pub(crate) u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedTask {
    pub key: TaskKey,
    pub id: String,
}

/// Outcome of asking the queue for room.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    /// At or above the acceptable depth. `warn` is set at most once per
    /// debounce window.
    Full { warn: bool },
    /// Room available. `depth_ratio` is set when the enqueue would take the
    /// queue to 70 % or more of its acceptable depth.
    Accepted { depth_ratio: Option<f64> },
}

/// Single-flight FIFO with duplicate detection and depth backpressure.
#[derive(Debug)]
pub struct DispatchQueue {
    entries: VecDeque<QueuedTask>,
    running: Option<QueuedTask>,
    config: QueueConfig,
    warning_debounce_ms: i64,
    /// Earliest logical time at which the next limit warning may fire.
    next_limit_warning: Option<Timestamp>,
}

impl DispatchQueue {
    pub fn new(config: QueueConfig, warning_debounce_ms: i64) -> Self {
        Self {
            entries: VecDeque::new(),
            running: None,
            config,
            warning_debounce_ms,
            next_limit_warning: None,
        }
    }

    pub fn config(&self) -> QueueConfig {
        self.config
    }

    /// A zero depth is ignored and the previous depth kept.
    pub fn set_config(&mut self, accept_duplicates: bool, acceptable_depth: usize) {
        self.config.accept_duplicates = accept_duplicates;
        if acceptable_depth > 0 {
            self.config.acceptable_depth = acceptable_depth;
        } else {
            debug!(
                kept = self.config.acceptable_depth,
                "acceptable queue depth of zero ignored"
            );
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn running(&self) -> Option<&QueuedTask> {
        self.running.as_ref()
    }

    pub fn running_id(&self) -> Option<String> {
        self.running.as_ref().map(|t| t.id.clone())
    }

    /// True if a task with this id is queued or currently running.
    pub fn is_duplicate(&self, id: &str) -> bool {
        self.running.as_ref().is_some_and(|t| t.id == id) || self.entries.iter().any(|t| t.id == id)
    }

    /// Check whether one more entry fits, arming the limit-warning debounce
    /// when it does not.
    pub fn admit(&mut self, now: Timestamp) -> Admission {
        let depth = self.config.acceptable_depth;
        if self.entries.len() >= depth {
            let warn = !matches!(self.next_limit_warning, Some(next) if next > now);
            if warn {
                self.next_limit_warning = Some(now + self.warning_debounce_ms);
            }
            return Admission::Full { warn };
        }

        let ratio = (self.entries.len() + 1) as f64 / depth as f64;
        Admission::Accepted {
            depth_ratio: (ratio >= DEPTH_WARNING_RATIO).then_some(ratio),
        }
    }

    pub fn push(&mut self, task: QueuedTask) {
        self.entries.push_back(task);
    }

    /// Pop the head and mark it running, unless something is already running.
    pub fn start_next(&mut self) -> Option<QueuedTask> {
        if self.running.is_some() {
            return None;
        }
        let next = self.entries.pop_front()?;
        self.running = Some(next.clone());
        Some(next)
    }

    /// Clear the running marker if it belongs to `key`.
    pub fn finish(&mut self, key: TaskKey) {
        if self.running.as_ref().is_some_and(|t| t.key == key) {
            self.running = None;
        }
    }
}
