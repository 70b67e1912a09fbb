// Copyright 2025 Felipe Torres González
//
//    Licensed under the Apache License, Version 2.0 (the "License");
//    you may not use this file except in compliance with the License.
//    You may obtain a copy of the License at
//
//        http://www.apache.org/licenses/LICENSE-2.0
//
//    Unless required by applicable law or agreed to in writing, software
//    distributed under the License is distributed on an "AS IS" BASIS,
//    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//    See the License for the specific language governing permissions and
//    limitations under the License.

use crate::participants::{ParticipantsConfig, ShutdownToken, Updater};
use chrono::{DateTime, Local, NaiveDate, TimeDelta, TimeZone};
use std::{sync::Arc, time::Duration};
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

/// Time limit of a stale sweep.
const STALE_SWEEP_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// A stale sweep slower than this is reported.
const STALE_SWEEP_SLOW: Duration = Duration::from_secs(2 * 60);
/// Time limit of a full refresh.
const FULL_UPDATE_TIMEOUT: Duration = Duration::from_secs(2 * 3600);
/// A full refresh slower than this is reported.
const FULL_UPDATE_SLOW: Duration = Duration::from_secs(3600);
const FULL_UPDATE_PERIOD: Duration = Duration::from_secs(24 * 3600);
/// Used when the configured update interval is zero.
const FALLBACK_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Lifecycle of a [RefreshWorker].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Created,
    Running,
    Stopping,
    Stopped,
}

/// Background worker that keeps the participants cache warm.
///
/// # Description
///
/// Once started, the worker runs two independent loops on the Tokio runtime:
///
/// - **Stale sweep**: right away and then every `update_interval`, it asks the [Updater] to refresh
///   up to `batch_size` chats older than `stale_threshold`.
/// - **Full refresh**: every day at `full_update_hour` (local time), it asks the [Updater] to
///   refresh every known chat. The schedule is anchored to the first run: each run is due exactly
///   24 hours after the previous one was due, no matter how long it took.
///
/// A failed run is logged and the loop waits for its next firing. Nothing is retried right away.
///
/// Both loops watch the same [ShutdownToken]. Shutdown is cooperative: a run in progress is not
/// interrupted, it completes or hits its own time limit.
///
/// Dropping a running worker without calling [RefreshWorker::stop] leaves the loops running until
/// the token is cancelled.
pub struct RefreshWorker<U> {
    updater: Arc<U>,
    config: ParticipantsConfig,
    shutdown: ShutdownToken,
    state: WorkerState,
    handles: Vec<JoinHandle<()>>,
}

impl<U: Updater> RefreshWorker<U> {
    pub fn new(updater: Arc<U>, config: ParticipantsConfig) -> Self {
        RefreshWorker {
            updater,
            config,
            shutdown: ShutdownToken::new(),
            state: WorkerState::Created,
            handles: Vec::new(),
        }
    }

    /// Watch an external shutdown signal instead of a private one.
    pub fn with_shutdown(mut self, shutdown: ShutdownToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Current state. A running worker whose token was cancelled from outside reports
    /// [WorkerState::Stopping] until [RefreshWorker::stop] completes.
    pub fn state(&self) -> WorkerState {
        match self.state {
            WorkerState::Running if self.shutdown.is_cancelled() => WorkerState::Stopping,
            state => state,
        }
    }

    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    /// Launch the background loops.
    ///
    /// # Description
    ///
    /// It returns right away. When background sync is disabled in the configuration, nothing is
    /// launched and the worker stays in [WorkerState::Created]. Starting a worker twice does
    /// nothing.
    pub fn start(&mut self) {
        if self.state != WorkerState::Created {
            warn!(state = ?self.state, "Participants worker already started");
            return;
        }

        if !self.config.enable_background_sync {
            info!("Participants background sync is disabled, worker not started");
            return;
        }
        self.state = WorkerState::Running;

        info!(
            update_interval = ?self.config.update_interval,
            full_update_hour = self.config.full_update_hour,
            batch_size = self.config.batch_size,
            stale_threshold = ?self.config.stale_threshold,
            "Starting participants worker"
        );

        self.handles.push(tokio::spawn(stale_loop(
            self.updater.clone(),
            self.config.clone(),
            self.shutdown.clone(),
        )));
        self.handles.push(tokio::spawn(full_loop(
            self.updater.clone(),
            self.config.clone(),
            self.shutdown.clone(),
        )));
    }

    /// Signal the loops to stop and wait until both have exited.
    pub async fn stop(&mut self) {
        if self.state == WorkerState::Stopped {
            return;
        }

        self.state = WorkerState::Stopping;
        self.shutdown.cancel();

        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!("A participants loop ended abnormally: {e}");
            }
        }

        self.state = WorkerState::Stopped;
        info!("Participants worker stopped");
    }
}

/// Compute the next time the full refresh is due.
///
/// # Description
///
/// The result is today at `hour:00` when that is not in the past, otherwise tomorrow at the same
/// hour. Hours above 23 are taken as 23. When `hour:00` doesn't exist in the time zone of `now`
/// (a DST gap), the first valid time after it is used.
pub fn next_full_update<Tz: TimeZone>(now: &DateTime<Tz>, hour: u32) -> DateTime<Tz> {
    let hour = hour.min(23);
    let tz = now.timezone();
    let at = |date: NaiveDate| -> Option<DateTime<Tz>> {
        let naive = date.and_hms_opt(hour, 0, 0)?;
        tz.from_local_datetime(&naive)
            .earliest()
            .or_else(|| tz.from_local_datetime(&(naive + TimeDelta::hours(1))).earliest())
    };

    let today = now.date_naive();
    match at(today) {
        Some(next) if next >= *now => next,
        _ => today
            .succ_opt()
            .and_then(&at)
            .unwrap_or_else(|| now.clone() + TimeDelta::days(1)),
    }
}

fn items_per_second(items: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { items as f64 / secs } else { 0.0 }
}

async fn stale_loop<U: Updater>(
    updater: Arc<U>,
    config: ParticipantsConfig,
    shutdown: ShutdownToken,
) {
    let period = if config.update_interval.is_zero() {
        warn!("Update interval of the participants can't be zero, using {FALLBACK_INTERVAL:?}");
        FALLBACK_INTERVAL
    } else {
        config.update_interval
    };

    // The first tick completes immediately.
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => run_stale_sweep(updater.as_ref(), &config).await,
        }
    }

    info!("Stale participants loop stopped");
}

async fn run_stale_sweep<U: Updater>(updater: &U, config: &ParticipantsConfig) {
    let start = Instant::now();
    debug!("Starting stale participants update");

    let result = tokio::time::timeout(
        STALE_SWEEP_TIMEOUT,
        updater.update_stale(config.stale_threshold, config.batch_size),
    )
    .await;
    let elapsed = start.elapsed();

    match result {
        Ok(Ok(updated)) => {
            info!(
                updated,
                ?elapsed,
                items_per_second = items_per_second(updated, elapsed),
                "Stale participants update completed"
            );
            if elapsed > STALE_SWEEP_SLOW {
                warn!(?elapsed, expected_max = ?STALE_SWEEP_SLOW, "Stale participants update was slow");
            }
        }
        Ok(Err(e)) => error!(?elapsed, "Stale participants update failed: {e}"),
        Err(_) => error!(
            ?elapsed,
            timeout = ?STALE_SWEEP_TIMEOUT,
            "Stale participants update timed out"
        ),
    }
}

async fn full_loop<U: Updater>(
    updater: Arc<U>,
    config: ParticipantsConfig,
    shutdown: ShutdownToken,
) {
    let now = Local::now();
    let first = next_full_update(&now, config.full_update_hour);
    let delay = (first.clone() - now).to_std().unwrap_or(Duration::ZERO);
    info!(next_run = %first, ?delay, "Full participants update scheduled");

    let mut deadline = Instant::now() + delay;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep_until(deadline) => {
                run_full_update(updater.as_ref(), &config).await;

                deadline += FULL_UPDATE_PERIOD;
                let now = Instant::now();
                while deadline <= now {
                    warn!("Full participants update overran its slot, skipping a day");
                    deadline += FULL_UPDATE_PERIOD;
                }
            }
        }
    }

    info!("Full participants loop stopped");
}

async fn run_full_update<U: Updater>(updater: &U, config: &ParticipantsConfig) {
    let start = Instant::now();
    info!("Starting full participants update");

    let result =
        tokio::time::timeout(FULL_UPDATE_TIMEOUT, updater.update_all(config.batch_size)).await;
    let elapsed = start.elapsed();

    match result {
        Ok(Ok(updated)) => {
            info!(
                updated,
                ?elapsed,
                items_per_second = items_per_second(updated, elapsed),
                "Full participants update completed"
            );
            if elapsed > FULL_UPDATE_SLOW {
                warn!(?elapsed, expected_max = ?FULL_UPDATE_SLOW, "Full participants update was slow");
            }
            if updated == 0 {
                warn!("Full participants update didn't update any chat");
            }
        }
        Ok(Err(e)) => error!(?elapsed, "Full participants update failed: {e}"),
        Err(_) => error!(
            ?elapsed,
            timeout = ?FULL_UPDATE_TIMEOUT,
            "Full participants update timed out"
        ),
    }
}
