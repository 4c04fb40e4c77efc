//! In-process policy store.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::clock::{Clock, SystemClock};
use crate::db::{PolicyStore, validate_ttl};
use crate::error::DatabaseError;
use crate::policy::{PolicyStats, RetentionPolicy};

/// Policy store backed by a map. Same semantics as [`PgStore`](crate::db::PgStore).
pub struct MemoryStore {
    policies: RwLock<BTreeMap<String, RetentionPolicy>>,
    clock: Arc<dyn Clock>,
    fail_increments: RwLock<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            policies: RwLock::new(BTreeMap::new()),
            clock,
            fail_increments: RwLock::new(false),
        }
    }

    /// Make every subsequent `increment_stats` fail.
    pub async fn fail_increments(&self, fail: bool) {
        *self.fail_increments.write().await = fail;
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn list_active_policies(
        &self,
        guild_id: Option<&str>,
    ) -> Result<Vec<RetentionPolicy>, DatabaseError> {
        let policies = self.policies.read().await;
        Ok(policies
            .values()
            .filter(|p| guild_id.is_none_or(|g| p.guild_id == g))
            .cloned()
            .collect())
    }

    async fn get_policy(&self, channel_id: &str) -> Result<Option<RetentionPolicy>, DatabaseError> {
        Ok(self.policies.read().await.get(channel_id).cloned())
    }

    async fn set_policy(
        &self,
        channel_id: &str,
        guild_id: &str,
        ttl_seconds: u64,
    ) -> Result<RetentionPolicy, DatabaseError> {
        validate_ttl(ttl_seconds)?;
        let now = self.clock.now();
        let mut policies = self.policies.write().await;
        let policy = policies
            .entry(channel_id.to_string())
            .and_modify(|p| {
                p.guild_id = guild_id.to_string();
                p.ttl_seconds = ttl_seconds;
                p.updated_at = now;
            })
            .or_insert_with(|| RetentionPolicy {
                channel_id: channel_id.to_string(),
                guild_id: guild_id.to_string(),
                ttl_seconds,
                messages_deleted: 0,
                last_deletion_at: None,
                created_at: now,
                updated_at: now,
            });
        Ok(policy.clone())
    }

    async fn remove_policy(&self, channel_id: &str) -> Result<bool, DatabaseError> {
        Ok(self.policies.write().await.remove(channel_id).is_some())
    }

    async fn increment_stats(
        &self,
        channel_id: &str,
        deleted_count: u64,
    ) -> Result<Option<PolicyStats>, DatabaseError> {
        if *self.fail_increments.read().await {
            return Err(DatabaseError::Pool("store unavailable".to_string()));
        }
        let now = self.clock.now();
        let mut policies = self.policies.write().await;
        Ok(policies.get_mut(channel_id).map(|p| {
            p.messages_deleted = p.messages_deleted.saturating_add(deleted_count);
            p.last_deletion_at = Some(now);
            p.updated_at = now;
            PolicyStats {
                messages_deleted: p.messages_deleted,
                last_deletion_at: p.last_deletion_at,
            }
        }))
    }
}
