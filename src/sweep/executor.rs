//! Deletion of one batch of expired messages.
//!
//! Bulk deletion is tried first. If the platform refuses because some
//! messages are past its bulk-delete window, the batch is deleted one message
//! at a time with fixed pauses between calls.

use std::sync::Arc;
use std::time::Duration;

use crate::channels::ChannelGateway;
use crate::clock::Sleeper;
use crate::config::SweepConfig;
use crate::error::GatewayError;

/// Pauses applied during one-by-one deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Pause between consecutive individual deletions.
    pub delete_interval: Duration,
    /// Pause after a rate-limit response. The rate-limited message is not
    /// retried in this run.
    pub rate_limit_pause: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            delete_interval: Duration::from_millis(200),
            rate_limit_pause: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &SweepConfig) -> Self {
        Self {
            delete_interval: config.delete_delay,
            rate_limit_pause: config.rate_limit_pause,
        }
    }

    /// Pause after a rate limit: the fixed pause, stretched if the platform
    /// asked for longer.
    pub fn rate_limit_delay(&self, retry_after: Option<Duration>) -> Duration {
        retry_after.map_or(self.rate_limit_pause, |r| r.max(self.rate_limit_pause))
    }
}

/// Why a batch stopped the whole channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalReason {
    PermissionDenied,
    ChannelGone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteStrategy {
    #[default]
    Bulk,
    Individual,
}

/// Counts for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub deleted: u64,
    pub errors: u64,
    pub fatal: Option<FatalReason>,
    pub strategy: DeleteStrategy,
}

impl BatchOutcome {
    fn fatal(reason: FatalReason, errors: u64) -> Self {
        Self {
            errors,
            fatal: Some(reason),
            ..Default::default()
        }
    }
}

pub struct DeletionExecutor {
    gateway: Arc<dyn ChannelGateway>,
    sleeper: Arc<dyn Sleeper>,
    backoff: BackoffPolicy,
}

impl DeletionExecutor {
    pub fn new(
        gateway: Arc<dyn ChannelGateway>,
        sleeper: Arc<dyn Sleeper>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            gateway,
            sleeper,
            backoff,
        }
    }

    /// Delete `message_ids` from `channel_id`.
    ///
    /// Never fails: every platform error is folded into the returned counts,
    /// and conditions that must stop the channel are reported as `fatal`.
    pub async fn delete_batch(&self, channel_id: &str, message_ids: &[String]) -> BatchOutcome {
        if message_ids.is_empty() {
            return BatchOutcome::default();
        }

        let result = match self.gateway.bulk_delete(channel_id, message_ids).await {
            Err(GatewayError::RateLimited { retry_after }) => {
                self.back_off(channel_id, retry_after).await;
                self.gateway.bulk_delete(channel_id, message_ids).await
            }
            other => other,
        };

        match result {
            Ok(()) => {
                tracing::info!(channel_id, deleted = message_ids.len(), "Bulk deleted messages");
                BatchOutcome {
                    deleted: message_ids.len() as u64,
                    ..Default::default()
                }
            }
            Err(GatewayError::AgeWindowExceeded) => {
                tracing::info!(
                    channel_id,
                    count = message_ids.len(),
                    "Messages too old for bulk delete, deleting individually"
                );
                self.delete_individually(channel_id, message_ids).await
            }
            Err(GatewayError::PermissionDenied) => {
                tracing::error!(channel_id, "Missing permissions to delete messages");
                BatchOutcome::fatal(FatalReason::PermissionDenied, 1)
            }
            Err(GatewayError::UnknownChannel) => {
                tracing::info!(channel_id, "Channel disappeared during bulk delete");
                BatchOutcome::fatal(FatalReason::ChannelGone, 0)
            }
            Err(e) => {
                tracing::error!(
                    channel_id,
                    code = e.code(),
                    error = %e,
                    "Unexpected error during bulk delete"
                );
                BatchOutcome {
                    errors: 1,
                    ..Default::default()
                }
            }
        }
    }

    /// Wait out a rate limit before the caller's single retry.
    pub async fn back_off(&self, channel_id: &str, retry_after: Option<Duration>) {
        let pause = self.backoff.rate_limit_delay(retry_after);
        tracing::warn!(
            channel_id,
            pause_ms = pause.as_millis() as u64,
            "Rate limited, backing off before retrying"
        );
        self.sleeper.sleep(pause).await;
    }

    async fn delete_individually(&self, channel_id: &str, message_ids: &[String]) -> BatchOutcome {
        let mut outcome = BatchOutcome {
            strategy: DeleteStrategy::Individual,
            ..Default::default()
        };

        for (i, message_id) in message_ids.iter().enumerate() {
            let is_last = i + 1 == message_ids.len();

            let pause = match self.gateway.delete_message(channel_id, message_id).await {
                Ok(()) => {
                    tracing::debug!(channel_id, message_id = %message_id, "Deleted message");
                    outcome.deleted += 1;
                    (!is_last).then_some(self.backoff.delete_interval)
                }
                Err(GatewayError::NotFound) => {
                    tracing::debug!(
                        channel_id,
                        message_id = %message_id,
                        "Message already deleted, counting as success"
                    );
                    outcome.deleted += 1;
                    (!is_last).then_some(self.backoff.delete_interval)
                }
                Err(GatewayError::RateLimited { retry_after }) => {
                    let pause = self.backoff.rate_limit_delay(retry_after);
                    tracing::warn!(
                        channel_id,
                        message_id = %message_id,
                        pause_ms = pause.as_millis() as u64,
                        "Rate limited, skipping message and backing off"
                    );
                    outcome.errors += 1;
                    Some(pause)
                }
                Err(GatewayError::PermissionDenied) => {
                    tracing::error!(channel_id, "Missing permissions to delete messages");
                    outcome.errors += 1;
                    outcome.fatal = Some(FatalReason::PermissionDenied);
                    break;
                }
                Err(GatewayError::UnknownChannel) => {
                    tracing::info!(channel_id, "Channel disappeared during deletion");
                    outcome.fatal = Some(FatalReason::ChannelGone);
                    break;
                }
                Err(e) => {
                    tracing::error!(
                        channel_id,
                        message_id = %message_id,
                        code = e.code(),
                        error = %e,
                        "Error deleting message"
                    );
                    outcome.errors += 1;
                    (!is_last).then_some(self.backoff.delete_interval)
                }
            };

            if let Some(pause) = pause.filter(|p| !p.is_zero()) {
                self.sleeper.sleep(pause).await;
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeDelta, Utc};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::channels::{CandidateMessage, MemoryGateway};
    use crate::clock::{ManualClock, RecordingSleeper};

    struct Fixture {
        gateway: Arc<MemoryGateway>,
        sleeper: Arc<RecordingSleeper>,
        executor: DeletionExecutor,
        now: DateTime<Utc>,
    }

    fn fixture() -> Fixture {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let gateway = Arc::new(MemoryGateway::new(Arc::new(ManualClock::new(now))));
        let sleeper = Arc::new(RecordingSleeper::new());
        let executor = DeletionExecutor::new(gateway.clone(), sleeper.clone(), BackoffPolicy::default());
        Fixture {
            gateway,
            sleeper,
            executor,
            now,
        }
    }

    fn ids(range: std::ops::RangeInclusive<u64>) -> Vec<String> {
        range.map(|i| i.to_string()).collect()
    }

    async fn seed(f: &Fixture, count: u64, age: TimeDelta) {
        f.gateway
            .seed(
                "c",
                (1..=count).map(|i| CandidateMessage::new(i.to_string(), f.now - age)),
            )
            .await;
    }

    #[test]
    fn test_rate_limit_delay() {
        let backoff = BackoffPolicy::default();
        assert_eq!(backoff.rate_limit_delay(None), Duration::from_secs(5));
        assert_eq!(
            backoff.rate_limit_delay(Some(Duration::from_millis(300))),
            Duration::from_secs(5)
        );
        assert_eq!(
            backoff.rate_limit_delay(Some(Duration::from_secs(12))),
            Duration::from_secs(12)
        );
    }

    #[tokio::test]
    async fn test_bulk_success() {
        let f = fixture();
        seed(&f, 10, TimeDelta::hours(2)).await;

        let outcome = f.executor.delete_batch("c", &ids(1..=10)).await;

        assert_eq!(
            outcome,
            BatchOutcome {
                deleted: 10,
                ..Default::default()
            }
        );
        assert!(f.gateway.remaining("c").await.is_empty());
        assert!(f.gateway.calls().await.single_deletes.is_empty());
        assert!(f.sleeper.pauses().is_empty());
    }

    #[tokio::test]
    async fn test_falls_back_when_too_old() {
        let f = fixture();
        seed(&f, 5, TimeDelta::days(20)).await;

        let outcome = f.executor.delete_batch("c", &ids(1..=5)).await;

        assert_eq!(outcome.deleted, 5);
        assert_eq!(outcome.errors, 0);
        assert_eq!(outcome.strategy, DeleteStrategy::Individual);
        assert!(f.gateway.remaining("c").await.is_empty());
        // A pause between each pair of deletions, none after the last.
        assert_eq!(f.sleeper.pauses(), vec![Duration::from_millis(200); 4]);
    }

    #[tokio::test]
    async fn test_not_found_counts_as_deleted_and_continues() {
        let f = fixture();
        seed(&f, 4, TimeDelta::days(20)).await;
        f.gateway.remove_silently("c", "2").await;

        let outcome = f.executor.delete_batch("c", &ids(1..=4)).await;

        assert_eq!(outcome.deleted, 4);
        assert_eq!(outcome.errors, 0);
        assert_eq!(outcome.fatal, None);
        assert_eq!(f.gateway.calls().await.single_deletes.len(), 4);
    }

    #[tokio::test]
    async fn test_rate_limited_message_is_skipped_not_retried() {
        let f = fixture();
        seed(&f, 5, TimeDelta::days(20)).await;
        f.gateway
            .fail_delete("c", "3", GatewayError::RateLimited { retry_after: None })
            .await;

        let outcome = f.executor.delete_batch("c", &ids(1..=5)).await;

        assert_eq!(outcome.deleted, 4);
        assert_eq!(outcome.errors, 1);
        assert_eq!(f.gateway.remaining("c").await, ["3"]);
        let singles: Vec<_> = f
            .gateway
            .calls()
            .await
            .single_deletes
            .into_iter()
            .map(|(_, id)| id)
            .collect();
        assert_eq!(singles, ids(1..=5));
        assert_eq!(
            f.sleeper.pauses(),
            vec![
                Duration::from_millis(200),
                Duration::from_millis(200),
                Duration::from_secs(5),
                Duration::from_millis(200),
            ]
        );
    }

    #[tokio::test]
    async fn test_permission_denied_stops_batch() {
        let f = fixture();
        seed(&f, 5, TimeDelta::days(20)).await;
        f.gateway
            .fail_delete("c", "2", GatewayError::PermissionDenied)
            .await;

        let outcome = f.executor.delete_batch("c", &ids(1..=5)).await;

        assert_eq!(outcome.deleted, 1);
        assert_eq!(outcome.errors, 1);
        assert_eq!(outcome.fatal, Some(FatalReason::PermissionDenied));
        assert_eq!(f.gateway.calls().await.single_deletes.len(), 2);
        assert_eq!(f.gateway.remaining("c").await.len(), 4);
    }

    #[tokio::test]
    async fn test_other_individual_errors_continue() {
        let f = fixture();
        seed(&f, 3, TimeDelta::days(20)).await;
        f.gateway
            .fail_delete("c", "1", GatewayError::Http("connection reset".into()))
            .await;

        let outcome = f.executor.delete_batch("c", &ids(1..=3)).await;

        assert_eq!(outcome.deleted, 2);
        assert_eq!(outcome.errors, 1);
        assert_eq!(outcome.fatal, None);
    }

    #[tokio::test]
    async fn test_bulk_permission_denied_is_fatal() {
        let f = fixture();
        seed(&f, 3, TimeDelta::hours(2)).await;
        f.gateway.fail_bulk("c", GatewayError::PermissionDenied).await;

        let outcome = f.executor.delete_batch("c", &ids(1..=3)).await;

        assert_eq!(outcome.fatal, Some(FatalReason::PermissionDenied));
        assert_eq!(outcome.deleted, 0);
        assert!(f.gateway.calls().await.single_deletes.is_empty());
    }

    #[tokio::test]
    async fn test_bulk_other_error_does_not_fall_back() {
        let f = fixture();
        seed(&f, 3, TimeDelta::hours(2)).await;
        f.gateway
            .fail_bulk(
                "c",
                GatewayError::Api {
                    status: 500,
                    code: None,
                    message: "internal".into(),
                },
            )
            .await;

        let outcome = f.executor.delete_batch("c", &ids(1..=3)).await;

        assert_eq!(
            outcome,
            BatchOutcome {
                errors: 1,
                ..Default::default()
            }
        );
        assert!(f.gateway.calls().await.single_deletes.is_empty());
        assert_eq!(f.gateway.remaining("c").await.len(), 3);
    }

    #[tokio::test]
    async fn test_rate_limited_bulk_is_retried_once() {
        let f = fixture();
        seed(&f, 3, TimeDelta::hours(2)).await;
        f.gateway
            .fail_bulk(
                "c",
                GatewayError::RateLimited {
                    retry_after: Some(Duration::from_secs(8)),
                },
            )
            .await;

        let outcome = f.executor.delete_batch("c", &ids(1..=3)).await;

        assert_eq!(outcome.deleted, 3);
        assert_eq!(outcome.errors, 0);
        assert_eq!(f.sleeper.pauses(), vec![Duration::from_secs(8)]);
        assert_eq!(f.gateway.calls().await.bulk_deletes.len(), 2);
        assert!(f.gateway.remaining("c").await.is_empty());
    }

    #[tokio::test]
    async fn test_bulk_rate_limited_twice_counts_one_error() {
        let f = fixture();
        seed(&f, 3, TimeDelta::hours(2)).await;
        for _ in 0..2 {
            f.gateway
                .fail_bulk("c", GatewayError::RateLimited { retry_after: None })
                .await;
        }

        let outcome = f.executor.delete_batch("c", &ids(1..=3)).await;

        assert_eq!(
            outcome,
            BatchOutcome {
                errors: 1,
                ..Default::default()
            }
        );
        assert_eq!(f.sleeper.pauses(), vec![Duration::from_secs(5)]);
        assert_eq!(f.gateway.calls().await.bulk_deletes.len(), 2);
        assert_eq!(f.gateway.remaining("c").await.len(), 3);
    }

    #[tokio::test]
    async fn test_channel_gone_mid_batch() {
        let f = fixture();
        seed(&f, 3, TimeDelta::days(20)).await;
        f.gateway
            .fail_delete("c", "2", GatewayError::UnknownChannel)
            .await;

        let outcome = f.executor.delete_batch("c", &ids(1..=3)).await;

        assert_eq!(outcome.fatal, Some(FatalReason::ChannelGone));
        assert_eq!(outcome.deleted, 1);
        assert_eq!(outcome.errors, 0);
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_calls() {
        let f = fixture();
        let outcome = f.executor.delete_batch("c", &[]).await;
        assert_eq!(outcome, BatchOutcome::default());
        assert!(f.gateway.calls().await.bulk_deletes.is_empty());
    }
}
