use almanac_core::{CalendarTime, Timestamp, MINUTE};
use almanac_events::{CalendarBoundary, IntervalBucket};
use rand::Rng;

/// Upper bound (exclusive) of the random first-fire offset per bucket.
const MAX_JITTER_MS: i64 = MINUTE;

const BUCKET_COUNT: usize = IntervalBucket::ALL.len();

/// Tracks when each interval bucket last fired and the previous tick's
/// calendar fields.
#[derive(Debug, Clone)]
pub struct IntervalTracker {
    /// Indexed by `IntervalBucket as usize`, matching `IntervalBucket::ALL`.
    last_fired: [Timestamp; BUCKET_COUNT],
    previous: Option<CalendarTime>,
}

impl IntervalTracker {
    pub fn new() -> Self {
        Self {
            last_fired: [0; BUCKET_COUNT],
            previous: None,
        }
    }

    /// Re-arm every bucket at `start`.
    ///
    /// Buckets other than 1 s and 5 s are pushed forward by a random offset
    /// in `[0, 60 s)` so that independent schedulers do not fire in lockstep.
    /// Only the first fire moves; the cadence afterwards is unchanged.
    pub fn reset<R: Rng + ?Sized>(&mut self, start: &CalendarTime, rng: &mut R) {
        let ts = start.timestamp();
        for bucket in IntervalBucket::ALL {
            let jitter = if bucket.is_jittered() {
                rng.gen_range(0..MAX_JITTER_MS)
            } else {
                0
            };
            self.last_fired[bucket as usize] = ts + jitter;
        }
        self.previous = Some(*start);
    }

    /// Buckets whose duration has elapsed at `now`, longest first. Each
    /// returned bucket is re-armed at `now`.
    pub fn elapsed(&mut self, now: Timestamp) -> Vec<IntervalBucket> {
        let mut fired = Vec::new();
        for bucket in IntervalBucket::ALL {
            let last = &mut self.last_fired[bucket as usize];
            if now - *last >= bucket.duration_ms() {
                *last = now;
                fired.push(bucket);
            }
        }
        fired
    }

    /// Calendar boundaries crossed since the previous call, then remember
    /// `current` as the previous tick.
    ///
    /// Edge-triggered on field change, so each rollover is reported once
    /// whatever the tick cadence.
    pub fn crossed(&mut self, current: &CalendarTime) -> Vec<CalendarBoundary> {
        let crossed = match &self.previous {
            Some(previous) => {
                // Compare in the current timezone in case it changed mid-run.
                let previous = previous.in_timezone(current.timezone());
                CalendarBoundary::ALL
                    .into_iter()
                    .filter(|b| b.crossed(&previous, current))
                    .collect()
            }
            None => Vec::new(),
        };
        self.previous = Some(*current);
        crossed
    }

    pub fn last_fired(&self, bucket: IntervalBucket) -> Timestamp {
        self.last_fired[bucket as usize]
    }
}

impl Default for IntervalTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use almanac_core::time::parse_timezone;
    use almanac_core::{DAY, SECOND};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> CalendarTime {
        let tz = parse_timezone("America/Vancouver").unwrap();
        CalendarTime::from_local(tz, y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn jitter_spares_short_buckets_and_stays_under_a_minute() {
        let start = at(2020, 1, 1, 0, 0);
        let mut tracker = IntervalTracker::new();
        tracker.reset(&start, &mut StdRng::seed_from_u64(7));

        for bucket in IntervalBucket::ALL {
            let offset = tracker.last_fired(bucket) - start.timestamp();
            if bucket.is_jittered() {
                assert!((0..MINUTE).contains(&offset), "{bucket} offset {offset}");
            } else {
                assert_eq!(offset, 0, "{bucket} should not be jittered");
            }
        }
    }

    #[test]
    fn same_seed_same_jitter() {
        let start = at(2020, 1, 1, 0, 0);
        let mut a = IntervalTracker::new();
        let mut b = IntervalTracker::new();
        a.reset(&start, &mut StdRng::seed_from_u64(42));
        b.reset(&start, &mut StdRng::seed_from_u64(42));
        for bucket in IntervalBucket::ALL {
            assert_eq!(a.last_fired(bucket), b.last_fired(bucket));
        }
    }

    #[test]
    fn buckets_fire_longest_first_and_rearm() {
        let start = at(2020, 1, 1, 0, 0);
        let mut tracker = IntervalTracker::new();
        tracker.reset(&start, &mut StdRng::seed_from_u64(1));

        let t0 = start.timestamp();
        assert!(tracker.elapsed(t0).is_empty());
        assert_eq!(
            tracker.elapsed(t0 + SECOND),
            vec![IntervalBucket::Seconds1]
        );
        assert_eq!(
            tracker.elapsed(t0 + 5 * SECOND),
            vec![IntervalBucket::Seconds5, IntervalBucket::Seconds1]
        );

        // Well past every jittered first-fire: everything fires in order.
        let fired = tracker.elapsed(t0 + 8 * DAY);
        assert_eq!(fired, IntervalBucket::ALL.to_vec());
        assert!(tracker.elapsed(t0 + 8 * DAY).is_empty());
    }

    #[test]
    fn boundaries_are_edge_triggered() {
        let mut tracker = IntervalTracker::new();
        let start = at(2019, 12, 31, 23, 0);
        tracker.reset(&start, &mut StdRng::seed_from_u64(1));

        assert!(tracker.crossed(&start).is_empty());
        assert!(tracker.crossed(&at(2019, 12, 31, 23, 30)).is_empty());

        // 2020-01-01 is a Wednesday: ISO week 1 of 2020 started on Monday
        // 2019-12-30, so the week does not change at the new year.
        let crossed = tracker.crossed(&at(2020, 1, 1, 0, 0));
        assert_eq!(
            crossed,
            vec![
                CalendarBoundary::NewHour,
                CalendarBoundary::NewDay,
                CalendarBoundary::NewMonth,
                CalendarBoundary::NewYear,
            ]
        );
        assert!(tracker.crossed(&at(2020, 1, 1, 0, 30)).is_empty());
        assert_eq!(
            tracker.crossed(&at(2020, 1, 1, 0, 30).in_timezone(chrono_tz::UTC)),
            Vec::<CalendarBoundary>::new()
        );
    }

    #[test]
    fn new_week_on_monday() {
        let mut tracker = IntervalTracker::new();
        tracker.reset(&at(2020, 1, 5, 23, 0), &mut StdRng::seed_from_u64(1));
        let crossed = tracker.crossed(&at(2020, 1, 6, 0, 0));
        assert!(crossed.contains(&CalendarBoundary::NewWeek));
        assert!(!crossed.contains(&CalendarBoundary::NewMonth));
    }
}
