//! Periodic sweep scheduler.
//!
//! Fires the coordinator every `SWEEP_INTERVAL_SECS` (default: 60 seconds).
//! At most one run is ever in flight: a tick that lands while the previous
//! run is still going is logged and dropped, never queued.
//!
//! Shutdown is cooperative. Once signalled, no new run starts and the loop
//! waits for the in-flight run (if any) to finish before returning.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::config::SweepConfig;
use crate::sweep::coordinator::{RunSummary, SweepJob};

/// Result of a single scheduler tick.
#[derive(Debug)]
pub enum TickResult {
    /// The run finished.
    Completed(RunSummary),
    /// A previous run was still in flight.
    Skipped,
    /// The run failed or panicked.
    Failed(String),
}

/// Holds the in-flight flag for the lifetime of one run.
///
/// Clearing happens on drop, so a run that errors or panics still frees the
/// next tick.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SweepScheduler {
    job: Arc<dyn SweepJob>,
    interval: Duration,
    enabled: bool,
    in_flight: AtomicBool,
}

impl SweepScheduler {
    pub fn new(job: Arc<dyn SweepJob>, config: &SweepConfig) -> Self {
        Self {
            job,
            interval: config.interval,
            enabled: config.enabled,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Whether a run is currently in flight.
    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run the job once, unless a run is already in flight.
    pub async fn tick(&self) -> TickResult {
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            tracing::info!("Previous sweep still running, skipping tick");
            return TickResult::Skipped;
        };

        match AssertUnwindSafe(self.job.run()).catch_unwind().await {
            Ok(Ok(summary)) => TickResult::Completed(summary),
            Ok(Err(e)) => TickResult::Failed(e.to_string()),
            Err(_) => TickResult::Failed("sweep panicked".to_string()),
        }
    }

    /// Tick until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// The first tick fires one interval after start. Each run is spawned so
    /// the timer keeps ticking while it is in flight.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if !self.enabled {
            tracing::info!("Sweeping is disabled, not starting scheduler");
            return;
        }

        tracing::info!("Starting sweep scheduler with interval {:?}", self.interval);

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Don't run immediately on startup
        interval.tick().await;

        let mut runs = JoinSet::new();
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let scheduler = Arc::clone(&self);
                    runs.spawn(async move {
                        log_tick(&scheduler.tick().await);
                    });
                }
                Some(joined) = runs.join_next(), if !runs.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("Sweep task failed to join: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if !runs.is_empty() {
            tracing::info!("Waiting for in-flight sweep to finish");
        }
        while runs.join_next().await.is_some() {}
        tracing::info!("Sweep scheduler stopped");
    }
}

fn log_tick(result: &TickResult) {
    match result {
        TickResult::Completed(summary) => tracing::info!(
            channels = summary.channels,
            completed = summary.completed,
            skipped = summary.skipped,
            aborted = summary.aborted,
            failed = summary.failed,
            processed = summary.processed,
            deleted = summary.deleted,
            errors = summary.errors,
            "Sweep run finished"
        ),
        TickResult::Skipped => {}
        TickResult::Failed(error) => tracing::error!("Sweep run failed: {}", error),
    }
}

/// A running scheduler task.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal shutdown and wait for the in-flight run to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            tracing::error!("Sweep scheduler task failed: {}", e);
        }
    }
}

/// Spawn the scheduler as a background task.
pub fn spawn_scheduler(scheduler: SweepScheduler) -> SchedulerHandle {
    let (shutdown, rx) = watch::channel(false);
    let scheduler = Arc::new(scheduler);
    let handle = tokio::spawn(async move {
        scheduler.run(rx).await;
    });
    SchedulerHandle { shutdown, handle }
}
