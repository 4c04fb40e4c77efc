//! Deletion stats and channel label reporting.

use std::sync::Arc;

use crate::channels::ChannelGateway;
use crate::db::PolicyStore;
use crate::policy::{PolicyStats, format_label};

/// Records confirmed deletions in the policy store and mirrors the running
/// total into the channel label.
///
/// Neither step ever fails a sweep: store errors leave the counter behind
/// until the next successful batch, and label errors are dropped.
pub struct StatsReporter {
    store: Arc<dyn PolicyStore>,
    gateway: Arc<dyn ChannelGateway>,
}

impl StatsReporter {
    pub fn new(store: Arc<dyn PolicyStore>, gateway: Arc<dyn ChannelGateway>) -> Self {
        Self { store, gateway }
    }

    /// Add `deleted` to the channel's total.
    ///
    /// Returns the updated counters, or `None` if they could not be recorded.
    pub async fn record_deletions(&self, channel_id: &str, deleted: u64) -> Option<PolicyStats> {
        if deleted == 0 {
            return None;
        }

        match self.store.increment_stats(channel_id, deleted).await {
            Ok(Some(stats)) => {
                tracing::debug!(
                    channel_id,
                    deleted,
                    total_deleted = stats.messages_deleted,
                    "Updated deletion stats"
                );
                Some(stats)
            }
            Ok(None) => {
                tracing::warn!(channel_id, deleted, "No retention policy found, stats not recorded");
                None
            }
            Err(e) => {
                tracing::error!(channel_id, deleted, error = %e, "Failed to update deletion stats");
                None
            }
        }
    }

    /// Best-effort label refresh. Failures are logged and otherwise ignored.
    pub async fn refresh_label(&self, channel_id: &str, ttl_seconds: u64, messages_deleted: u64) {
        let label = format_label(ttl_seconds, messages_deleted);
        match self.gateway.set_channel_label(channel_id, &label).await {
            Ok(()) => tracing::debug!(channel_id, label = %label, "Updated channel label"),
            Err(e) => tracing::warn!(
                channel_id,
                code = e.code(),
                error = %e,
                "Failed to update channel label"
            ),
        }
    }
}
