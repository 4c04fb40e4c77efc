//! Channel gateway trait and message types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::GatewayError;

/// Discord's epoch (2015-01-01T00:00:00Z) in Unix milliseconds.
pub const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;

/// A message fetched for an expiry check. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateMessage {
    /// Platform message ID (a snowflake).
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub pinned: bool,
}

impl CandidateMessage {
    pub fn new(id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            created_at,
            pinned: false,
        }
    }

    /// Mark the message as pinned.
    pub fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }
}

/// Creation time encoded in a snowflake ID.
pub fn snowflake_timestamp(id: &str) -> Option<DateTime<Utc>> {
    let raw: u64 = id.parse().ok()?;
    let millis = i64::try_from(raw >> 22).ok()?.checked_add(DISCORD_EPOCH_MS)?;
    DateTime::from_timestamp_millis(millis)
}

/// Smallest snowflake that could have been minted at `at`.
pub fn snowflake_at(at: DateTime<Utc>) -> u64 {
    let offset = (at.timestamp_millis() - DISCORD_EPOCH_MS).max(0) as u64;
    offset << 22
}

/// Remote chat-platform operations used by the sweeper.
///
/// Implementations map platform failures onto [`GatewayError`]'s
/// `UnknownChannel`, `NotFound`, `PermissionDenied`, `AgeWindowExceeded` and
/// `RateLimited` variants; the sweep algorithm branches on exactly those.
#[async_trait]
pub trait ChannelGateway: Send + Sync {
    /// Up to `limit` messages older than `before` (or the newest messages
    /// when `before` is `None`), ordered newest first.
    async fn fetch_messages_before(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CandidateMessage>, GatewayError>;

    /// Delete many messages in one call.
    ///
    /// Fails with `AgeWindowExceeded` if any message is older than the
    /// platform's bulk-delete window.
    async fn bulk_delete(&self, channel_id: &str, message_ids: &[String])
    -> Result<(), GatewayError>;

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<(), GatewayError>;

    /// Replace the channel's human-readable label (the topic on Discord).
    async fn set_channel_label(&self, channel_id: &str, text: &str) -> Result<(), GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snowflake_timestamp() {
        // Example ID from Discord's API reference.
        let at = snowflake_timestamp("175928847299117063").unwrap();
        assert_eq!(at.timestamp_millis(), 1_462_015_105_796);
    }

    #[test]
    fn test_snowflake_round_trip_preserves_millis() {
        let at = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        let id = snowflake_at(at).to_string();
        assert_eq!(snowflake_timestamp(&id), Some(at));
    }

    #[test]
    fn test_snowflake_rejects_non_numeric() {
        assert_eq!(snowflake_timestamp("abc"), None);
        assert_eq!(snowflake_timestamp(""), None);
    }

    #[test]
    fn test_candidate_builder() {
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let msg = CandidateMessage::new("1", at).pinned();
        assert!(msg.pinned);
        assert_eq!(msg.id, "1");
    }
}
