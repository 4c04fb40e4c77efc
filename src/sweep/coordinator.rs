//! One sweep run across every configured channel.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{FutureExt, StreamExt, stream};

use crate::channels::ChannelGateway;
use crate::clock::{Clock, Sleeper, SystemClock, TokioSleeper};
use crate::config::SweepConfig;
use crate::db::PolicyStore;
use crate::error::SweepError;
use crate::policy::RetentionPolicy;
use crate::sweep::executor::{BackoffPolicy, DeletionExecutor};
use crate::sweep::stats::StatsReporter;
use crate::sweep::sweeper::{ChannelReport, ChannelSweeper, SweepOutcome};

/// Collaborators of a sweep.
pub struct SweepDeps {
    pub store: Arc<dyn PolicyStore>,
    pub gateway: Arc<dyn ChannelGateway>,
    pub clock: Arc<dyn Clock>,
    pub sleeper: Arc<dyn Sleeper>,
}

impl SweepDeps {
    /// Wall clock and tokio timers.
    pub fn new(store: Arc<dyn PolicyStore>, gateway: Arc<dyn ChannelGateway>) -> Self {
        Self {
            store,
            gateway,
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }
}

/// Aggregate counts for one run, for logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Policies considered.
    pub channels: usize,
    pub completed: usize,
    /// Channels that no longer exist.
    pub skipped: usize,
    /// Channels stopped by a permission failure.
    pub aborted: usize,
    /// Channels whose sweep failed unexpectedly.
    pub failed: usize,
    pub processed: u64,
    pub deleted: u64,
    pub errors: u64,
}

impl RunSummary {
    fn absorb(&mut self, report: &ChannelReport) {
        match report.outcome {
            SweepOutcome::Completed => self.completed += 1,
            SweepOutcome::ChannelGone => self.skipped += 1,
            SweepOutcome::Aborted => self.aborted += 1,
            SweepOutcome::Failed(_) => self.failed += 1,
        }
        self.processed += report.run.processed;
        self.deleted += report.run.deleted;
        self.errors += report.run.errors;
    }
}

/// Something the scheduler can run periodically.
#[async_trait]
pub trait SweepJob: Send + Sync {
    async fn run(&self) -> Result<RunSummary, SweepError>;
}

/// Sweeps every active policy, isolating failures per channel.
pub struct SweepCoordinator {
    store: Arc<dyn PolicyStore>,
    sweeper: ChannelSweeper,
    guild_id: Option<String>,
    max_concurrent_channels: usize,
}

impl SweepCoordinator {
    pub fn new(deps: SweepDeps, config: &SweepConfig) -> Self {
        let executor = DeletionExecutor::new(
            Arc::clone(&deps.gateway),
            deps.sleeper,
            BackoffPolicy::from_config(config),
        );
        let stats = StatsReporter::new(Arc::clone(&deps.store), Arc::clone(&deps.gateway));
        let sweeper = ChannelSweeper::new(deps.gateway, executor, stats, deps.clock, config.page_size);

        Self {
            store: deps.store,
            sweeper,
            guild_id: config.guild_id.clone(),
            max_concurrent_channels: config.max_concurrent_channels.max(1),
        }
    }

    /// Sweep every active channel once.
    ///
    /// Fails only if the policy list cannot be loaded. Channels are swept at
    /// most `max_concurrent_channels` at a time; each policy is a distinct
    /// channel, so no two sweeps touch the same counter.
    pub async fn run_once(&self) -> Result<RunSummary, SweepError> {
        let policies = self
            .store
            .list_active_policies(self.guild_id.as_deref())
            .await?;
        tracing::info!("Checking {} channels for expired messages", policies.len());

        let sweeps: Vec<_> = policies.iter().map(|p| self.sweep_isolated(p)).collect();
        let results: Vec<_> = stream::iter(sweeps)
            .buffered(self.max_concurrent_channels)
            .collect()
            .await;

        let mut summary = RunSummary {
            channels: policies.len(),
            ..Default::default()
        };
        for (policy, result) in results {
            match result {
                Ok(report) => summary.absorb(&report),
                Err(_) => {
                    summary.failed += 1;
                    tracing::error!(
                        channel_id = %policy.channel_id,
                        code = "panic",
                        "Channel sweep panicked"
                    );
                }
            }
        }

        Ok(summary)
    }

    /// Sweep one channel, turning a panic into an `Err` for that channel only.
    async fn sweep_isolated<'a>(
        &self,
        policy: &'a RetentionPolicy,
    ) -> (&'a RetentionPolicy, std::thread::Result<ChannelReport>) {
        let result = AssertUnwindSafe(self.sweeper.sweep(policy)).catch_unwind().await;
        (policy, result)
    }
}

#[async_trait]
impl SweepJob for SweepCoordinator {
    async fn run(&self) -> Result<RunSummary, SweepError> {
        self.run_once().await
    }
}
