//! Policy store: durable per-channel retention policies and stats.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::policy::{PolicyStats, RetentionPolicy};

/// Storage abstraction for retention policies.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// All configured policies, optionally restricted to one guild.
    async fn list_active_policies(
        &self,
        guild_id: Option<&str>,
    ) -> Result<Vec<RetentionPolicy>, DatabaseError>;

    async fn get_policy(&self, channel_id: &str) -> Result<Option<RetentionPolicy>, DatabaseError>;

    /// Create or update a channel's policy. Existing stats are preserved.
    async fn set_policy(
        &self,
        channel_id: &str,
        guild_id: &str,
        ttl_seconds: u64,
    ) -> Result<RetentionPolicy, DatabaseError>;

    /// Returns whether a policy existed.
    async fn remove_policy(&self, channel_id: &str) -> Result<bool, DatabaseError>;

    /// Atomically add `deleted_count` to the channel's total and stamp the
    /// last deletion time.
    ///
    /// Returns `None` if the channel has no policy (removed mid-sweep).
    async fn increment_stats(
        &self,
        channel_id: &str,
        deleted_count: u64,
    ) -> Result<Option<PolicyStats>, DatabaseError>;
}

fn validate_ttl(ttl_seconds: u64) -> Result<(), DatabaseError> {
    if ttl_seconds == 0 || i64::try_from(ttl_seconds).is_err() {
        return Err(DatabaseError::Constraint(format!(
            "ttl_seconds must be between 1 and {}, got {}",
            i64::MAX,
            ttl_seconds
        )));
    }
    Ok(())
}
