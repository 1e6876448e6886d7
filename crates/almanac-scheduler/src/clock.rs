//! Clock driver: the loop that calls [`Scheduler::tick`] until told to stop.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{error, info};

use crate::engine::{Scheduler, TickOutcome};

/// Real-time pacing between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Cadence {
    /// One tick per period.
    Every(Duration),
    /// Yield to the runtime between ticks and otherwise run flat out.
    Immediate,
}

/// Why a driver loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DriverExit {
    /// A simulated run reached its end time.
    Finished,
    /// The shutdown channel fired or was dropped.
    Stopped,
    /// A tick could not be evaluated; carries the rendered error.
    Failed(String),
}

/// Tick `scheduler` at `cadence` until the simulation ends or `shutdown`
/// broadcasts `true`.
pub(crate) async fn drive(
    scheduler: Scheduler,
    cadence: Cadence,
    mut shutdown: watch::Receiver<bool>,
) -> DriverExit {
    info!(mode = %scheduler.mode(), ?cadence, "scheduler clock started");

    let mut ticker = match cadence {
        Cadence::Every(period) => {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Some(interval)
        }
        Cadence::Immediate => None,
    };

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("scheduler clock stopped");
                    return DriverExit::Stopped;
                }
            }
            _ = pace(&mut ticker) => {
                match scheduler.tick() {
                    Ok(TickOutcome::Continue) => {}
                    Ok(TickOutcome::Finished) => {
                        info!(now = scheduler.now(), "simulation finished");
                        return DriverExit::Finished;
                    }
                    Err(e) => {
                        error!("scheduler tick error: {e}");
                        return DriverExit::Failed(e.to_string());
                    }
                }
            }
        }
    }
}

async fn pace(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => tokio::task::yield_now().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SimulationParams;
    use almanac_core::MINUTE;

    #[tokio::test]
    async fn stops_on_shutdown_signal() {
        let scheduler = Scheduler::new();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(drive(
            scheduler,
            Cadence::Every(Duration::from_millis(10)),
            rx,
        ));
        tx.send(true).unwrap();
        assert_eq!(handle.await.unwrap(), DriverExit::Stopped);
    }

    #[tokio::test]
    async fn dropped_sender_stops_the_loop() {
        let scheduler = Scheduler::new();
        let (tx, rx) = watch::channel(false);
        drop(tx);
        assert_eq!(
            drive(scheduler, Cadence::Immediate, rx).await,
            DriverExit::Stopped
        );
    }

    #[tokio::test]
    async fn immediate_cadence_runs_a_simulation_to_the_end() {
        let scheduler = Scheduler::new();
        let start = scheduler.target_timestamp(2020, 1, 1, 0, 0, 0).unwrap();
        let outcome = scheduler
            .start_simulated(SimulationParams::new(start, start + 10 * MINUTE))
            .await
            .unwrap();
        assert_eq!(outcome, crate::types::SimulationOutcome::Finished);
        assert_eq!(scheduler.now(), start + 10 * MINUTE);
    }
}
