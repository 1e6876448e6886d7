// Scheduling behaviour under normal load: calendar matching, repeat
// intervals and event emission over simulated windows.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use almanac_core::{CalendarTime, MINUTE};
use almanac_events::{CalendarBoundary, EventKind, IntervalBucket, Notification};
use almanac_scheduler::{Scheduler, SimulationOutcome, SimulationParams};
use chrono::Weekday;
use serde_json::Value;

const HOUR: i64 = 60 * MINUTE;

fn scheduler() -> Scheduler {
    Scheduler::new().with_jitter_seed(2020)
}

/// Let spawned job bodies that were dispatched on the last ticks finish.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Job that records its dispatch time formatted with `pattern`.
fn recorder(
    pattern: &'static str,
) -> (
    Arc<Mutex<Vec<String>>>,
    impl Fn(CalendarTime) -> std::future::Ready<anyhow::Result<Value>> + Send + Sync + 'static,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let job = move |at: CalendarTime| {
        sink.lock().unwrap().push(at.format(pattern).unwrap());
        std::future::ready(Ok(Value::Null))
    };
    (seen, job)
}

#[tokio::test]
async fn empty_simulation_only_moves_time() {
    let scheduler = scheduler();
    let start = scheduler.target_timestamp(2020, 1, 1, 0, 0, 0).unwrap();
    let end = scheduler.target_timestamp(2020, 1, 1, 1, 5, 0).unwrap();

    let outcome = scheduler
        .start_simulated(SimulationParams::new(start, end))
        .await
        .unwrap();

    assert_eq!(outcome, SimulationOutcome::Finished);
    assert_eq!(scheduler.now(), end);
    assert!(scheduler.tasks().is_empty());
    assert!(!scheduler.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn back_to_back_simulations_restart_cleanly() {
    let scheduler = scheduler();
    let start = scheduler.target_timestamp(2020, 1, 1, 0, 0, 0).unwrap();

    for _ in 0..200 {
        let first = scheduler
            .start_simulated(SimulationParams::new(start, start + 5 * MINUTE))
            .await
            .unwrap();
        assert_eq!(first, SimulationOutcome::Finished);
        assert!(!scheduler.is_running());

        let second = scheduler
            .start_simulated(SimulationParams::new(start, start + 5 * MINUTE))
            .await
            .unwrap();
        assert_eq!(second, SimulationOutcome::Finished);
    }
}

#[tokio::test]
async fn one_shot_fire_on_start_runs_once_and_leaves_the_registry() {
    let scheduler = scheduler();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();

    let task = scheduler
        .new_task("one-shot")
        .with_repeat(false)
        .with_fire_on_start(true)
        .with_job(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { anyhow::Ok(Value::from("done")) }
        });
    scheduler.schedule_task(task);
    assert_eq!(scheduler.tasks().len(), 1);

    let start = scheduler.target_timestamp(2020, 1, 1, 0, 0, 0).unwrap();
    let end = scheduler.target_timestamp(2020, 1, 1, 1, 5, 0).unwrap();
    scheduler
        .start_simulated(SimulationParams::new(start, end))
        .await
        .unwrap();
    settle().await;

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(scheduler.tasks().is_empty());
}

#[tokio::test]
async fn seeded_run_history_is_respected() {
    let scheduler = scheduler();
    let (seen, job) = recorder("%b-%-d|%H:%M");

    let last = scheduler.target_timestamp(2020, 1, 1, 0, 0, 0).unwrap();
    let next = scheduler.target_timestamp(2020, 1, 2, 0, 0, 0).unwrap();
    let task = scheduler
        .new_task("noon")
        .with_time_of_day(12, 0)
        .with_run_history(last, next)
        .with_job(job);
    scheduler.schedule_task(task);

    let start = scheduler.target_timestamp(2020, 1, 1, 0, 0, 0).unwrap();
    let end = scheduler.target_timestamp(2020, 1, 3, 0, 0, 0).unwrap();
    scheduler
        .start_simulated(SimulationParams::new(start, end))
        .await
        .unwrap();
    settle().await;

    // Eligible at 12:00, dispatched on the following minute tick.
    assert_eq!(*seen.lock().unwrap(), vec!["Jan-2|12:01".to_string()]);
}

#[tokio::test]
async fn five_minute_repeat_fires_twelve_times_an_hour() {
    let scheduler = scheduler();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();

    let task = scheduler
        .new_task("every-five")
        .with_repeat_every(0, 5, 0)
        .with_fire_on_start(true)
        .with_job(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { anyhow::Ok(Value::Null) }
        });
    scheduler.schedule_task(task);

    let start = scheduler.target_timestamp(2020, 1, 1, 0, 0, 0).unwrap();
    let end = scheduler.target_timestamp(2020, 1, 1, 1, 0, 0).unwrap();
    scheduler
        .start_simulated(SimulationParams::new(start, end))
        .await
        .unwrap();
    settle().await;

    assert_eq!(runs.load(Ordering::SeqCst), 12);
    let snapshot = scheduler.task("every-five").unwrap();
    assert_eq!(snapshot.run_count, 12);
    assert_eq!(snapshot.successful_runs, 12);
    assert_eq!(snapshot.failed_runs, 0);
}

#[tokio::test]
async fn first_monday_of_the_month_at_noon() {
    let scheduler = scheduler();
    let (seen, job) = recorder("%Y-%m-%d|%a");

    let task = scheduler
        .new_task("first-monday")
        .with_weeks_of_month([1])
        .with_days_of_week([Weekday::Mon])
        .with_time_of_day(12, 0)
        .with_job(job);
    scheduler.schedule_task(task);

    let start = scheduler.target_timestamp(2020, 1, 1, 0, 0, 0).unwrap();
    let end = scheduler.target_timestamp(2020, 2, 15, 0, 0, 0).unwrap();
    scheduler
        .start_simulated(SimulationParams::new(start, end).with_increment(HOUR))
        .await
        .unwrap();
    settle().await;

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["2020-01-06|Mon".to_string(), "2020-02-03|Mon".to_string()]
    );
}

#[tokio::test]
async fn monday_and_tuesday_at_nine_past_eight() {
    let scheduler = scheduler();
    let (seen, job) = recorder("%a %-H:%M");

    let task = scheduler
        .new_task("weekday-morning")
        .with_days_of_week([Weekday::Mon, Weekday::Tue])
        .with_time_of_day(8, 9)
        .with_job(job);
    scheduler.schedule_task(task);

    let start = scheduler.target_timestamp(2022, 2, 13, 0, 0, 0).unwrap();
    let end = scheduler.target_timestamp(2022, 2, 16, 0, 0, 0).unwrap();
    scheduler
        .start_simulated(SimulationParams::new(start, end))
        .await
        .unwrap();
    settle().await;

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["Mon 8:10".to_string(), "Tue 8:10".to_string()]
    );
}

#[tokio::test]
async fn christmas_morning_fires_once() {
    let scheduler = scheduler();
    let (seen, job) = recorder("%b-%-d");

    let task = scheduler
        .new_task("christmas")
        .with_months_of_year([12])
        .with_days_of_month([25])
        .with_time_of_day(8, 0)
        .with_job(job);
    scheduler.schedule_task(task);

    let start = scheduler.target_timestamp(2020, 11, 1, 0, 0, 0).unwrap();
    let end = scheduler.target_timestamp(2021, 1, 2, 0, 0, 0).unwrap();
    scheduler
        .start_simulated(SimulationParams::new(start, end).with_increment(HOUR))
        .await
        .unwrap();
    settle().await;

    assert_eq!(*seen.lock().unwrap(), vec!["Dec-25".to_string()]);
}

#[tokio::test]
async fn completion_reports_carry_counters() {
    let scheduler = scheduler();
    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = reports.clone();
    scheduler.on(EventKind::task("hourly"), move |n: &Notification| {
        if let Notification::TaskCompleted(report) = n {
            sink.lock().unwrap().push(report.clone());
        }
    });

    let task = scheduler
        .new_task("hourly")
        .with_repeat_every(1, 0, 0)
        .with_fire_on_start(true)
        .with_job(|at: CalendarTime| async move { anyhow::Ok(Value::from(at.hour())) });
    scheduler.schedule_task(task);

    let start = scheduler.target_timestamp(2020, 6, 1, 0, 0, 0).unwrap();
    scheduler
        .start_simulated(SimulationParams::new(start, start + 3 * HOUR))
        .await
        .unwrap();
    settle().await;

    let reports = reports.lock().unwrap();
    assert_eq!(reports.len(), 3);
    for (i, report) in reports.iter().enumerate() {
        assert!(report.succeeded());
        assert_eq!(report.run_count, i as u64 + 1);
        assert_eq!(report.successful_runs, i as u64 + 1);
        assert_eq!(report.failed_runs, 0);
        assert!(report.next_runnable_time.unwrap() > report.last_run_time);
    }
    // Enqueued on the hour, dispatched a minute later.
    assert_eq!(reports[0].last_run_time, start + MINUTE);
}

#[tokio::test]
async fn boundary_and_interval_events_over_a_day() {
    let scheduler = scheduler();
    let hours = Arc::new(AtomicUsize::new(0));
    let days = Arc::new(AtomicUsize::new(0));
    let minutes = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));

    for (kind, counter) in [
        (EventKind::Boundary(CalendarBoundary::NewHour), hours.clone()),
        (EventKind::Boundary(CalendarBoundary::NewDay), days.clone()),
        (EventKind::Interval(IntervalBucket::Minutes1), minutes.clone()),
        (EventKind::SimulationFinished, finished.clone()),
    ] {
        scheduler.on(kind, move |_: &Notification| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    }

    let start = scheduler.target_timestamp(2020, 1, 1, 0, 0, 0).unwrap();
    scheduler
        .start_simulated(SimulationParams::new(start, start + 24 * HOUR))
        .await
        .unwrap();

    // Ticks run 00:00 through 23:59; the first tick never reports a boundary.
    assert_eq!(hours.load(Ordering::SeqCst), 23);
    assert_eq!(days.load(Ordering::SeqCst), 0);
    // The one-minute bucket is jittered by under a minute, which can push
    // its first fire back by one tick.
    let minutes = minutes.load(Ordering::SeqCst);
    assert!((1438..=1439).contains(&minutes), "minutes = {minutes}");
    assert_eq!(finished.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn realtime_emits_second_ticks_until_stopped() {
    let scheduler = scheduler();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    scheduler.on(
        EventKind::Interval(IntervalBucket::Seconds1),
        move |n: &Notification| {
            let _ = tx.send(n.kind());
        },
    );

    scheduler.start_realtime().unwrap();
    assert!(scheduler.is_running());

    let received = tokio::time::timeout(Duration::from_secs(10), async {
        let mut count = 0;
        while count < 3 {
            rx.recv().await.unwrap();
            count += 1;
        }
        count
    })
    .await
    .expect("three one-second ticks within ten seconds");

    scheduler.stop();
    assert_eq!(received, 3);
    assert!(!scheduler.is_running());
}
