use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventError {
    /// One or more handlers panicked while receiving a notification. The
    /// remaining handlers were still called.
    #[error("{failed} subscriber(s) panicked handling {kind}")]
    SubscriberPanicked { kind: String, failed: usize },
}

pub type Result<T> = std::result::Result<T, EventError>;
