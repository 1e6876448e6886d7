use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlmanacError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown timezone: {name}")]
    InvalidTimezone { name: String },

    /// The calendar components do not name an instant in the given timezone
    /// (out of range, or skipped by a DST transition).
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

impl AlmanacError {
    /// Short error code string, stable across releases for log filtering.
    pub fn code(&self) -> &'static str {
        match self {
            AlmanacError::Config(_) => "CONFIG_ERROR",
            AlmanacError::InvalidTimezone { .. } => "INVALID_TIMEZONE",
            AlmanacError::InvalidTimestamp(_) => "INVALID_TIMESTAMP",
        }
    }
}

pub type Result<T> = std::result::Result<T, AlmanacError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_has_a_code() {
        let errors = [
            AlmanacError::Config("bad".to_string()),
            AlmanacError::InvalidTimezone {
                name: "Mars/Olympus".to_string(),
            },
            AlmanacError::InvalidTimestamp("2021-03-14 02:30".to_string()),
        ];
        let codes: Vec<_> = errors.iter().map(AlmanacError::code).collect();
        assert_eq!(codes, ["CONFIG_ERROR", "INVALID_TIMEZONE", "INVALID_TIMESTAMP"]);
    }
}
