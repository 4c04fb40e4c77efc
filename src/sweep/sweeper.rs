//! Sweep of a single channel.
//!
//! History is walked newest to oldest, one page at a time:
//!
//! ```text
//! Paging ──► Evaluating ──► Deleting ──► UpdatingStats ──┐
//!   ▲                                                    │
//!   └──────────── oldest message still expired ◄─────────┘
//! ```
//!
//! Paging stops when a page is empty or short, when its oldest message is
//! still inside the retention window, on a permission failure (`Aborted`),
//! when the channel no longer exists, or when a page cannot be fetched
//! (`Failed`). A rate-limited page fetch is retried once after backing off.

use std::sync::Arc;

use crate::channels::{CandidateMessage, ChannelGateway};
use crate::clock::Clock;
use crate::error::GatewayError;
use crate::policy::RetentionPolicy;
use crate::sweep::executor::{DeletionExecutor, FatalReason};
use crate::sweep::stats::StatsReporter;

/// How a channel sweep ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// History walked as far as the retention window requires.
    Completed,
    /// The channel is gone or inaccessible; skipped for this run.
    ChannelGone,
    /// Stopped early because the bot lacks permissions.
    Aborted,
    /// Stopped early because history could not be listed; carries the
    /// error code.
    Failed(&'static str),
}

/// Working state of one channel sweep. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepRun {
    /// ID of the oldest message seen so far.
    pub cursor: Option<String>,
    pub pages: u64,
    pub processed: u64,
    pub deleted: u64,
    pub errors: u64,
}

/// Result of sweeping one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelReport {
    pub channel_id: String,
    pub outcome: SweepOutcome,
    pub run: SweepRun,
    /// Total recorded in the store after this sweep, if any stats were written.
    pub total_deleted: Option<u64>,
}

pub struct ChannelSweeper {
    gateway: Arc<dyn ChannelGateway>,
    executor: DeletionExecutor,
    stats: StatsReporter,
    clock: Arc<dyn Clock>,
    page_size: usize,
}

impl ChannelSweeper {
    pub fn new(
        gateway: Arc<dyn ChannelGateway>,
        executor: DeletionExecutor,
        stats: StatsReporter,
        clock: Arc<dyn Clock>,
        page_size: usize,
    ) -> Self {
        Self {
            gateway,
            executor,
            stats,
            clock,
            page_size: page_size.max(1),
        }
    }

    /// One page of history, retried once if the platform rate limits us.
    async fn fetch_page(
        &self,
        channel_id: &str,
        before: Option<&str>,
    ) -> Result<Vec<CandidateMessage>, GatewayError> {
        match self
            .gateway
            .fetch_messages_before(channel_id, before, self.page_size)
            .await
        {
            Err(GatewayError::RateLimited { retry_after }) => {
                self.executor.back_off(channel_id, retry_after).await;
                self.gateway
                    .fetch_messages_before(channel_id, before, self.page_size)
                    .await
            }
            other => other,
        }
    }

    /// Delete every unpinned message in the policy's channel that has
    /// outlived its TTL.
    ///
    /// Never fails: counts from pages already processed are always reported,
    /// even when a later page cannot be fetched.
    pub async fn sweep(&self, policy: &RetentionPolicy) -> ChannelReport {
        let channel_id = policy.channel_id.as_str();
        tracing::debug!(
            channel_id,
            guild_id = %policy.guild_id,
            ttl_seconds = policy.ttl_seconds,
            "Sweeping channel"
        );

        let mut run = SweepRun::default();
        let mut outcome = SweepOutcome::Completed;
        let mut total_deleted = None;

        loop {
            let page = match self.fetch_page(channel_id, run.cursor.as_deref()).await {
                Ok(page) => page,
                Err(GatewayError::UnknownChannel) => {
                    tracing::info!(channel_id, "Channel no longer exists, skipping");
                    outcome = SweepOutcome::ChannelGone;
                    break;
                }
                Err(GatewayError::PermissionDenied) => {
                    tracing::error!(channel_id, "Missing permissions to read channel history");
                    outcome = SweepOutcome::Aborted;
                    break;
                }
                Err(e) => {
                    tracing::error!(
                        channel_id,
                        code = e.code(),
                        error = %e,
                        "Failed to fetch channel history"
                    );
                    outcome = SweepOutcome::Failed(e.code());
                    break;
                }
            };
            run.pages += 1;

            let Some(oldest) = page.last() else {
                break;
            };
            run.processed += page.len() as u64;

            // One instant per page so every expiry decision in it agrees.
            let now = self.clock.now();
            let candidates: Vec<String> = page
                .iter()
                .filter(|m| !m.pinned && policy.is_expired(m.created_at, now))
                .map(|m| m.id.clone())
                .collect();

            if !candidates.is_empty() {
                tracing::info!(channel_id, count = candidates.len(), "Found expired messages");
                let batch = self.executor.delete_batch(channel_id, &candidates).await;
                run.deleted += batch.deleted;
                run.errors += batch.errors;

                if let Some(stats) = self.stats.record_deletions(channel_id, batch.deleted).await {
                    total_deleted = Some(stats.messages_deleted);
                }

                match batch.fatal {
                    Some(FatalReason::PermissionDenied) => {
                        outcome = SweepOutcome::Aborted;
                        break;
                    }
                    Some(FatalReason::ChannelGone) => {
                        outcome = SweepOutcome::ChannelGone;
                        break;
                    }
                    None => {}
                }
            }

            let keep_going = page.len() >= self.page_size && policy.is_expired(oldest.created_at, now);
            run.cursor = Some(oldest.id.clone());
            if !keep_going {
                break;
            }
        }

        if let Some(total) = total_deleted.filter(|_| outcome != SweepOutcome::ChannelGone) {
            self.stats
                .refresh_label(channel_id, policy.ttl_seconds, total)
                .await;
        }

        tracing::info!(
            channel_id,
            outcome = ?outcome,
            pages = run.pages,
            processed = run.processed,
            deleted = run.deleted,
            errors = run.errors,
            "Channel sweep finished"
        );

        ChannelReport {
            channel_id: policy.channel_id.clone(),
            outcome,
            run,
            total_deleted,
        }
    }
}
