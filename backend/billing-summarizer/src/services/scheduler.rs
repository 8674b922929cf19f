//! Background sweep loops.
//!
//! Hourly and daily sweeps fire just after each UTC period boundary; the
//! incremental sweep runs on a fixed interval. All loops stop on the shared
//! broadcast shutdown signal.

use crate::services::summarizer::{BillingSummarizer, SweepMode};
use crate::utils::clock::truncate;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

/// Delay after a period boundary before the full sweep starts, so late rows land.
const BOUNDARY_GRACE: Duration = Duration::from_secs(60);

/// Spawn the hourly, daily and incremental loops.
pub fn spawn_sweeps(
    summarizer: Arc<BillingSummarizer>,
    incremental_interval: Duration,
    shutdown: &broadcast::Sender<()>,
) -> Vec<tokio::task::JoinHandle<()>> {
    vec![
        tokio::spawn(run_period_loop(
            Arc::clone(&summarizer),
            SweepMode::Hourly,
            shutdown.subscribe(),
        )),
        tokio::spawn(run_period_loop(
            Arc::clone(&summarizer),
            SweepMode::Daily,
            shutdown.subscribe(),
        )),
        tokio::spawn(run_incremental_loop(
            summarizer,
            incremental_interval,
            shutdown.subscribe(),
        )),
    ]
}

/// Run a full sweep once per period, shortly after each boundary.
pub async fn run_period_loop(
    summarizer: Arc<BillingSummarizer>,
    mode: SweepMode,
    mut shutdown: broadcast::Receiver<()>,
) {
    let period = match mode {
        SweepMode::Hourly => ChronoDuration::hours(1),
        SweepMode::Daily => ChronoDuration::days(1),
        SweepMode::Incremental => {
            error!("Incremental sweeps are not period-aligned; use run_incremental_loop");
            return;
        }
    };
    info!(mode = mode.as_str(), "Starting billing sweep loop");

    loop {
        let delay = until_next_boundary(Utc::now(), period) + BOUNDARY_GRACE;
        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                let result = match mode {
                    SweepMode::Daily => summarizer.run_daily().await,
                    _ => summarizer.run_hourly().await,
                };
                if let Err(e) = result {
                    error!(
                        mode = mode.as_str(),
                        error = %e,
                        "Billing sweep failed, will retry next period"
                    );
                }
            }
            _ = shutdown.recv() => {
                info!(mode = mode.as_str(), "Received shutdown signal, stopping billing sweep loop");
                break;
            }
        }
    }

    info!(mode = mode.as_str(), "Billing sweep loop stopped");
}

/// Run the incremental sweep every `every`, backing off after repeated failures.
pub async fn run_incremental_loop(
    summarizer: Arc<BillingSummarizer>,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut timer = interval(every);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut consecutive_failures = 0u32;

    info!(interval_secs = every.as_secs(), "Starting incremental billing loop");

    loop {
        tokio::select! {
            _ = timer.tick() => {
                match summarizer.run_incremental().await {
                    Ok(_) => {
                        if consecutive_failures > 0 {
                            info!(recovered_after = consecutive_failures, "Incremental billing recovered after failures");
                            consecutive_failures = 0;
                        }
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        error!(
                            error = %e,
                            consecutive_failures = consecutive_failures,
                            "Incremental billing sweep failed, will retry on next interval"
                        );
                        if consecutive_failures >= 3 {
                            let backoff_secs = 2u64.pow(consecutive_failures.min(5));
                            info!(backoff_secs = backoff_secs, "Applying backoff after consecutive failures");
                            tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                        }
                    }
                }
            }
            _ = shutdown.recv() => {
                info!("Received shutdown signal, stopping incremental billing loop");
                break;
            }
        }
    }

    info!("Incremental billing loop stopped");
}

/// Time from `now` until the next multiple of `period` since the epoch.
pub fn until_next_boundary(now: DateTime<Utc>, period: ChronoDuration) -> Duration {
    let next = truncate(now, period) + period;
    (next - now).to_std().unwrap_or(Duration::ZERO)
}
