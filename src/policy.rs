//! Retention policies and their human-readable forms.

use std::sync::LazyLock;

use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Retention configuration and cumulative statistics for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub channel_id: String,
    pub guild_id: String,
    /// Messages older than this many seconds are deleted. Always > 0.
    pub ttl_seconds: u64,
    /// Total messages deleted under this policy. Never decreases.
    pub messages_deleted: u64,
    pub last_deletion_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RetentionPolicy {
    pub fn ttl(&self) -> TimeDelta {
        TimeDelta::seconds(i64::try_from(self.ttl_seconds).unwrap_or(i64::MAX))
    }

    /// Whether a message created at `created_at` has outlived the TTL at `now`.
    ///
    /// The comparison is strict: a message exactly `ttl` old is kept.
    pub fn is_expired(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(created_at) > self.ttl()
    }

    /// Channel label summarising this policy.
    pub fn label(&self) -> String {
        format_label(self.ttl_seconds, self.messages_deleted)
    }
}

/// Counters returned by a stats increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyStats {
    pub messages_deleted: u64,
    pub last_deletion_at: Option<DateTime<Utc>>,
}

static DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)(d|h|m|s)$").expect("static regex"));

/// Parse a TTL such as `6h`, `1d`, `30m` or `60s` into seconds.
///
/// Returns `None` for malformed input, zero, or overflow.
pub fn parse_ttl(input: &str) -> Option<u64> {
    let caps = DURATION_RE.captures(input.trim())?;
    let value: u64 = caps[1].parse().ok()?;
    let unit = match &caps[2] {
        "d" => 86_400,
        "h" => 3_600,
        "m" => 60,
        _ => 1,
    };
    value.checked_mul(unit).filter(|secs| *secs > 0)
}

/// Format seconds as the largest whole unit (`1d`, `6h`, `30m`, `45s`).
pub fn format_ttl(seconds: u64) -> String {
    if seconds >= 86_400 {
        format!("{}d", seconds / 86_400)
    } else if seconds >= 3_600 {
        format!("{}h", seconds / 3_600)
    } else if seconds >= 60 {
        format!("{}m", seconds / 60)
    } else {
        format!("{}s", seconds)
    }
}

/// Format a count with thousands separators.
pub fn format_count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Channel label text, e.g. `vanish: 6h, vanished 1,234 messages`.
pub fn format_label(ttl_seconds: u64, messages_deleted: u64) -> String {
    format!(
        "vanish: {}, vanished {} messages",
        format_ttl(ttl_seconds),
        format_count(messages_deleted)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(ttl_seconds: u64) -> RetentionPolicy {
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        RetentionPolicy {
            channel_id: "100".into(),
            guild_id: "1".into(),
            ttl_seconds,
            messages_deleted: 0,
            last_deletion_at: None,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn test_parse_ttl_units() {
        assert_eq!(parse_ttl("60s"), Some(60));
        assert_eq!(parse_ttl("30m"), Some(1_800));
        assert_eq!(parse_ttl("6h"), Some(21_600));
        assert_eq!(parse_ttl("1d"), Some(86_400));
        assert_eq!(parse_ttl(" 2h "), Some(7_200));
    }

    #[test]
    fn test_parse_ttl_rejects_garbage() {
        assert_eq!(parse_ttl(""), None);
        assert_eq!(parse_ttl("6"), None);
        assert_eq!(parse_ttl("h"), None);
        assert_eq!(parse_ttl("6w"), None);
        assert_eq!(parse_ttl("-1h"), None);
        assert_eq!(parse_ttl("1.5h"), None);
        assert_eq!(parse_ttl("0s"), None);
        assert_eq!(parse_ttl("99999999999999999999d"), None);
    }

    #[test]
    fn test_format_ttl_picks_largest_unit() {
        assert_eq!(format_ttl(45), "45s");
        assert_eq!(format_ttl(90), "1m");
        assert_eq!(format_ttl(7_200), "2h");
        assert_eq!(format_ttl(90_000), "1d");
    }

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1_000), "1,000");
        assert_eq!(format_count(1_234_567), "1,234,567");
    }

    #[test]
    fn test_label() {
        let mut p = policy(21_600);
        p.messages_deleted = 1_234;
        assert_eq!(p.label(), "vanish: 6h, vanished 1,234 messages");
    }

    #[test]
    fn test_expiry_is_strict() {
        let p = policy(3_600);
        let now = DateTime::from_timestamp(1_700_100_000, 0).unwrap();

        assert!(!p.is_expired(now - TimeDelta::seconds(3_600), now));
        assert!(p.is_expired(now - TimeDelta::milliseconds(3_600_001), now));
        assert!(!p.is_expired(now - TimeDelta::seconds(10), now));
    }
}
