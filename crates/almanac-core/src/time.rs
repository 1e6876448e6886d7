//! Timezone-aware calendar view over a [`Timestamp`].
//!
//! All calendar arithmetic is delegated to `chrono` and the `chrono-tz`
//! database; the scheduler only ever reads fields off a [`CalendarTime`].

use std::fmt;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::error::{AlmanacError, Result};
use crate::types::Timestamp;

/// Resolve an IANA timezone name such as `America/Vancouver`.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>().map_err(|_| AlmanacError::InvalidTimezone {
        name: name.to_string(),
    })
}

/// Current wall-clock time in milliseconds.
pub fn wall_clock_now() -> Timestamp {
    Utc::now().timestamp_millis()
}

/// An instant together with the timezone its calendar fields are read in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarTime {
    inner: DateTime<Tz>,
}

impl CalendarTime {
    /// View `timestamp` in `tz`.
    pub fn at(timestamp: Timestamp, tz: Tz) -> Result<Self> {
        let utc = DateTime::from_timestamp_millis(timestamp).ok_or_else(|| {
            AlmanacError::InvalidTimestamp(format!("{timestamp} ms is out of range"))
        })?;
        Ok(Self {
            inner: utc.with_timezone(&tz),
        })
    }

    /// Build an instant from wall-clock components interpreted in `tz`.
    ///
    /// Ambiguous local times (DST fall-back) resolve to the earlier instant;
    /// local times skipped by a DST jump are rejected.
    pub fn from_local(
        tz: Tz,
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
        second: u32,
    ) -> Result<Self> {
        let inner = tz
            .with_ymd_and_hms(year, month, day, hour, minute, second)
            .earliest()
            .ok_or_else(|| {
                AlmanacError::InvalidTimestamp(format!(
                    "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02} does not exist in {}",
                    tz.name()
                ))
            })?;
        Ok(Self { inner })
    }

    pub fn timestamp(&self) -> Timestamp {
        self.inner.timestamp_millis()
    }

    pub fn timezone(&self) -> Tz {
        self.inner.timezone()
    }

    pub fn datetime(&self) -> DateTime<Tz> {
        self.inner
    }

    pub fn year(&self) -> i32 {
        self.inner.year()
    }

    /// 1 = January … 12 = December.
    pub fn month(&self) -> u32 {
        self.inner.month()
    }

    /// Day of month, 1-based.
    pub fn day(&self) -> u32 {
        self.inner.day()
    }

    /// ISO day of week: 1 = Monday … 7 = Sunday.
    pub fn day_of_week(&self) -> u32 {
        self.inner.weekday().number_from_monday()
    }

    /// ISO-8601 week number.
    pub fn iso_week(&self) -> u32 {
        self.inner.iso_week().week()
    }

    /// `ceil(day / 7)`: days 1-7 are week 1, 29-31 are week 5.
    pub fn week_of_month(&self) -> u32 {
        self.inner.day().div_ceil(7)
    }

    pub fn hour(&self) -> u32 {
        self.inner.hour()
    }

    pub fn minute(&self) -> u32 {
        self.inner.minute()
    }

    pub fn second(&self) -> u32 {
        self.inner.second()
    }

    /// Same instant, read in another timezone.
    pub fn in_timezone(&self, tz: Tz) -> Self {
        Self {
            inner: self.inner.with_timezone(&tz),
        }
    }

    /// Render with a `strftime` pattern, e.g. `%b-%-d|%H:%M` → `Jan-2|12:01`.
    pub fn format(&self, pattern: &str) -> Result<String> {
        let items: Vec<Item<'_>> = StrftimeItems::new(pattern).collect();
        if items.iter().any(|item| matches!(item, Item::Error)) {
            return Err(AlmanacError::Config(format!(
                "invalid format pattern: {pattern}"
            )));
        }
        Ok(self.inner.format_with_items(items.into_iter()).to_string())
    }
}

impl fmt::Display for CalendarTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vancouver() -> Tz {
        parse_timezone("America/Vancouver").unwrap()
    }

    #[test]
    fn local_components_round_trip_through_timestamp() {
        let tz = vancouver();
        let t = CalendarTime::from_local(tz, 2020, 1, 6, 12, 0, 0).unwrap();
        let back = CalendarTime::at(t.timestamp(), tz).unwrap();
        assert_eq!(back.year(), 2020);
        assert_eq!(back.month(), 1);
        assert_eq!(back.day(), 6);
        assert_eq!(back.hour(), 12);
        assert_eq!(back.minute(), 0);
        // 2020-01-06 was a Monday.
        assert_eq!(back.day_of_week(), 1);
        assert_eq!(back.week_of_month(), 1);
    }

    #[test]
    fn week_of_month_boundaries() {
        let tz = vancouver();
        let week = |day| {
            CalendarTime::from_local(tz, 2020, 1, day, 0, 0, 0)
                .unwrap()
                .week_of_month()
        };
        assert_eq!(week(1), 1);
        assert_eq!(week(7), 1);
        assert_eq!(week(8), 2);
        assert_eq!(week(28), 4);
        assert_eq!(week(29), 5);
        assert_eq!(week(31), 5);
    }

    #[test]
    fn fields_follow_the_timezone() {
        let tz = vancouver();
        let t = CalendarTime::from_local(tz, 2020, 1, 1, 20, 0, 0).unwrap();
        let utc = t.in_timezone(chrono_tz::UTC);
        assert_eq!(utc.day(), 2);
        assert_eq!(utc.hour(), 4);
        assert_eq!(t.timestamp(), utc.timestamp());
    }

    #[test]
    fn formats_with_strftime() {
        let tz = vancouver();
        let t = CalendarTime::from_local(tz, 2020, 1, 2, 12, 1, 0).unwrap();
        assert_eq!(t.format("%b-%-d|%H:%M").unwrap(), "Jan-2|12:01");
        assert_eq!(t.format("%a").unwrap(), "Thu");
        assert!(t.format("%Q").is_err());
    }

    #[test]
    fn skipped_local_time_is_rejected() {
        // Clocks jumped from 02:00 to 03:00 on 2020-03-08 in Vancouver.
        let err = CalendarTime::from_local(vancouver(), 2020, 3, 8, 2, 30, 0).unwrap_err();
        assert_eq!(err.code(), "INVALID_TIMESTAMP");
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        assert!(parse_timezone("Mars/Olympus_Mons").is_err());
        assert!(parse_timezone("Africa/Abidjan").is_ok());
    }
}
