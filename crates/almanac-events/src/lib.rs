//! `almanac-events` — notification bus between the scheduler and its listeners.

pub mod bus;
pub mod error;
pub mod types;

pub use bus::EventBus;
pub use error::{EventError, Result};
pub use types::{
    CalendarBoundary, EventHandler, EventKind, IntervalBucket, Notification, Subscription,
    SubscriptionId,
};
