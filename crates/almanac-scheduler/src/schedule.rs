//! Calendar eligibility: decides whether a rule may be enqueued at a given tick.
//!
//! Pure functions over a [`TaskRule`] and a [`CalendarTime`]; queue admission
//! (duplicates, depth) is the dispatch queue's business.

use almanac_core::{CalendarTime, Timestamp};

use crate::task::{CalendarConstraints, TaskRule};

/// The calendar filter that rejected a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    MonthOfYear,
    WeekOfMonth,
    DayOfWeek,
    DayOfMonth,
    TimeOfDay,
}

/// Result of evaluating one rule at one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// Never run and marked fire-on-start: enqueue without further checks.
    FireOnStart,
    /// Has run before and the repeat interval has not elapsed.
    NotDue,
    /// A calendar filter rejected this tick.
    Mismatch(Constraint),
    /// Every check passed; subject to queue admission.
    Due,
}

/// Evaluate fire-on-start, the repeat throttle and calendar filters, in that order.
pub fn evaluate(rule: &TaskRule, now: Timestamp, at: &CalendarTime) -> Eligibility {
    if rule.fire_on_start && rule.last_run_time.is_none() {
        return Eligibility::FireOnStart;
    }

    // Never-run tasks skip the throttle: their seeded next_runnable_time only
    // matters once they have a run history.
    if rule.last_run_time.is_some() && now < rule.next_runnable_time.unwrap_or(0) {
        return Eligibility::NotDue;
    }

    match first_mismatch(&rule.constraints, at) {
        Some(constraint) => Eligibility::Mismatch(constraint),
        None => Eligibility::Due,
    }
}

/// First filter (month, week, weekday, day, time of day) that rejects `at`.
pub fn first_mismatch(constraints: &CalendarConstraints, at: &CalendarTime) -> Option<Constraint> {
    if let Some(months) = &constraints.months_of_year {
        if !months.contains(&at.month()) {
            return Some(Constraint::MonthOfYear);
        }
    }

    if let Some(weeks) = &constraints.weeks_of_month {
        let index = at.week_of_month() as usize - 1;
        if !weeks.get(index).copied().unwrap_or(false) {
            return Some(Constraint::WeekOfMonth);
        }
    }

    if let Some(days) = &constraints.days_of_week {
        let index = at.day_of_week() as usize - 1;
        if !days[index] {
            return Some(Constraint::DayOfWeek);
        }
    }

    if let Some(days) = &constraints.days_of_month {
        if !days.contains(&at.day()) {
            return Some(Constraint::DayOfMonth);
        }
    }

    // Lower bound only: hour and minute are each compared on their own, so
    // 12:00 admits 13:05 but 12:30 rejects 13:05.
    if let Some(time) = constraints.time_of_day {
        if at.hour() < time.hour || at.minute() < time.minute {
            return Some(Constraint::TimeOfDay);
        }
    }

    None
}
