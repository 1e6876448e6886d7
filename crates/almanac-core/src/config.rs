use chrono::NaiveDateTime;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AlmanacError, Result};

pub const DEFAULT_TIMEZONE: &str = "America/Vancouver";
pub const DEFAULT_QUEUE_DEPTH: usize = 10;
pub const DEFAULT_REALTIME_TICK_MS: u64 = 250;
pub const DEFAULT_QUEUE_WARNING_DEBOUNCE_MS: u64 = 60_000;
pub const DEFAULT_SIMULATION_INCREMENT_SECS: u64 = 60;

/// Top-level config (almanac.toml + ALMANAC_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlmanacConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Window used by `almanac simulate` when no CLI overrides are given.
    #[serde(default)]
    pub simulation: Option<SimulationConfig>,
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// IANA name; calendar fields and boundaries are read in this zone.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub accept_duplicate_tasks: bool,
    /// Zero is treated as "unset" and replaced by the default.
    #[serde(default = "default_queue_depth")]
    pub acceptable_queue_depth: usize,
    #[serde(default = "default_realtime_tick_ms")]
    pub realtime_tick_ms: u64,
    #[serde(default = "default_queue_warning_debounce_ms")]
    pub queue_warning_debounce_ms: u64,
    /// Fixes interval-bucket jitter for reproducible runs.
    #[serde(default)]
    pub jitter_seed: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            accept_duplicate_tasks: false,
            acceptable_queue_depth: DEFAULT_QUEUE_DEPTH,
            realtime_tick_ms: DEFAULT_REALTIME_TICK_MS,
            queue_warning_debounce_ms: DEFAULT_QUEUE_WARNING_DEBOUNCE_MS,
            jitter_seed: None,
        }
    }
}

/// Simulated window, expressed as wall-clock times in the scheduler timezone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    #[serde(default = "default_increment_secs")]
    pub increment_secs: u64,
    /// Real milliseconds between ticks; absent or 0 runs as fast as possible.
    #[serde(default)]
    pub tick_interval_ms: Option<u64>,
}

/// A task declared in the config file. Its job logs `message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub id: String,
    #[serde(default = "bool_true")]
    pub repeat: bool,
    #[serde(default)]
    pub repeat_every_secs: Option<u64>,
    #[serde(default)]
    pub fire_on_start: bool,
    /// `"HH:MM"`, 24-hour clock.
    #[serde(default)]
    pub time_of_day: Option<String>,
    /// Weekday names, e.g. `["mon", "fri"]`.
    #[serde(default)]
    pub days_of_week: Option<Vec<String>>,
    #[serde(default)]
    pub weeks_of_month: Option<Vec<u32>>,
    #[serde(default)]
    pub days_of_month: Option<Vec<u32>>,
    #[serde(default)]
    pub months_of_year: Option<Vec<u32>>,
    #[serde(default)]
    pub message: Option<String>,
}

fn bool_true() -> bool {
    true
}
fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}
fn default_queue_depth() -> usize {
    DEFAULT_QUEUE_DEPTH
}
fn default_realtime_tick_ms() -> u64 {
    DEFAULT_REALTIME_TICK_MS
}
fn default_queue_warning_debounce_ms() -> u64 {
    DEFAULT_QUEUE_WARNING_DEBOUNCE_MS
}
fn default_increment_secs() -> u64 {
    DEFAULT_SIMULATION_INCREMENT_SECS
}

impl AlmanacConfig {
    /// Load config from a TOML file with ALMANAC_* env var overrides.
    ///
    /// Nested keys use a double underscore:
    /// `ALMANAC_SCHEDULER__TIMEZONE=UTC`.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.almanac/almanac.toml
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        debug!(path = %path, "loading config");

        Self::figment(&path)
            .extract()
            .map_err(|e| AlmanacError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("ALMANAC_").split("__"))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.almanac/almanac.toml", home)
}
