//! PostgreSQL policy store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, Pool, Runtime};
use tokio_postgres::{NoTls, Row};

use crate::config::DatabaseConfig;
use crate::db::{PolicyStore, validate_ttl};
use crate::error::DatabaseError;
use crate::policy::{PolicyStats, RetentionPolicy};

mod embedded {
    refinery::embed_migrations!("migrations");
}

const POLICY_COLUMNS: &str = "channel_id, guild_id, ttl_seconds, messages_deleted, \
                              last_deletion, created_at, updated_at";

/// Policy store backed by the `vanishing_channels` table.
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Create a new store and connect to the database.
    ///
    /// Fails if the database cannot be reached.
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let mut cfg = Config::new();
        cfg.url = Some(config.url().to_string());
        cfg.pool = Some(deadpool_postgres::PoolConfig {
            max_size: config.pool_size,
            ..Default::default()
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;

        // Test connection
        let _ = pool.get().await?;

        Ok(Self { pool })
    }

    /// Apply the embedded schema migrations.
    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let mut conn = self.conn().await?;
        let report = embedded::migrations::runner()
            .run_async(&mut **conn)
            .await?;
        for migration in report.applied_migrations() {
            tracing::info!(
                version = migration.version(),
                name = migration.name(),
                "Applied migration"
            );
        }
        Ok(())
    }

    /// Get a connection from the pool.
    pub async fn conn(&self) -> Result<deadpool_postgres::Object, DatabaseError> {
        Ok(self.pool.get().await?)
    }
}

fn row_to_policy(row: &Row) -> RetentionPolicy {
    RetentionPolicy {
        channel_id: row.get("channel_id"),
        guild_id: row.get("guild_id"),
        ttl_seconds: row.get::<_, i64>("ttl_seconds").max(0) as u64,
        messages_deleted: row.get::<_, i64>("messages_deleted").max(0) as u64,
        last_deletion_at: row.get("last_deletion"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn to_i64(value: u64, what: &str) -> Result<i64, DatabaseError> {
    i64::try_from(value)
        .map_err(|_| DatabaseError::Constraint(format!("{} out of range: {}", what, value)))
}

#[async_trait]
impl PolicyStore for PgStore {
    async fn list_active_policies(
        &self,
        guild_id: Option<&str>,
    ) -> Result<Vec<RetentionPolicy>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = match guild_id {
            Some(guild_id) => {
                conn.query(
                    &format!(
                        "SELECT {} FROM vanishing_channels WHERE guild_id = $1 ORDER BY channel_id",
                        POLICY_COLUMNS
                    ),
                    &[&guild_id],
                )
                .await?
            }
            None => {
                conn.query(
                    &format!(
                        "SELECT {} FROM vanishing_channels ORDER BY channel_id",
                        POLICY_COLUMNS
                    ),
                    &[],
                )
                .await?
            }
        };

        tracing::debug!(
            count = rows.len(),
            guild_id = guild_id.unwrap_or("*"),
            "Loaded retention policies"
        );
        Ok(rows.iter().map(row_to_policy).collect())
    }

    async fn get_policy(&self, channel_id: &str) -> Result<Option<RetentionPolicy>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "SELECT {} FROM vanishing_channels WHERE channel_id = $1",
                    POLICY_COLUMNS
                ),
                &[&channel_id],
            )
            .await?;
        Ok(row.as_ref().map(row_to_policy))
    }

    async fn set_policy(
        &self,
        channel_id: &str,
        guild_id: &str,
        ttl_seconds: u64,
    ) -> Result<RetentionPolicy, DatabaseError> {
        validate_ttl(ttl_seconds)?;
        let ttl = to_i64(ttl_seconds, "ttl_seconds")?;
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO vanishing_channels (channel_id, guild_id, ttl_seconds, messages_deleted) \
                     VALUES ($1, $2, $3, 0) \
                     ON CONFLICT (channel_id) DO UPDATE \
                     SET guild_id = EXCLUDED.guild_id, ttl_seconds = EXCLUDED.ttl_seconds, updated_at = NOW() \
                     RETURNING {}",
                    POLICY_COLUMNS
                ),
                &[&channel_id, &guild_id, &ttl],
            )
            .await?;

        tracing::info!(channel_id, guild_id, ttl_seconds, "Set retention policy");
        Ok(row_to_policy(&row))
    }

    async fn remove_policy(&self, channel_id: &str) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let removed = conn
            .execute(
                "DELETE FROM vanishing_channels WHERE channel_id = $1",
                &[&channel_id],
            )
            .await?;
        tracing::info!(channel_id, removed = removed > 0, "Removed retention policy");
        Ok(removed > 0)
    }

    async fn increment_stats(
        &self,
        channel_id: &str,
        deleted_count: u64,
    ) -> Result<Option<PolicyStats>, DatabaseError> {
        let delta = to_i64(deleted_count, "deleted_count")?;
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                "UPDATE vanishing_channels \
                 SET messages_deleted = messages_deleted + $2, last_deletion = NOW(), updated_at = NOW() \
                 WHERE channel_id = $1 \
                 RETURNING messages_deleted, last_deletion",
                &[&channel_id, &delta],
            )
            .await?;

        Ok(row.map(|row| PolicyStats {
            messages_deleted: row.get::<_, i64>("messages_deleted").max(0) as u64,
            last_deletion_at: row.get::<_, Option<DateTime<Utc>>>("last_deletion"),
        }))
    }
}
