//! Discord REST gateway.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::channels::{CandidateMessage, ChannelGateway, snowflake_timestamp};
use crate::clock::{Clock, SystemClock};
use crate::config::DiscordConfig;
use crate::error::GatewayError;

/// Discord refuses bulk deletion of messages older than this many seconds.
pub const BULK_DELETE_MAX_AGE_SECS: i64 = 14 * 86_400;

/// Most IDs accepted by a single bulk-delete call.
const BULK_DELETE_MAX_IDS: usize = 100;

/// Discord's limit on channel topic length.
const MAX_TOPIC_CHARS: usize = 1024;

const USER_AGENT: &str = concat!("DiscordBot (vanish, ", env!("CARGO_PKG_VERSION"), ")");

// JSON error codes, see https://discord.com/developers/docs/topics/opcodes-and-status-codes
const UNKNOWN_CHANNEL: u64 = 10003;
const UNKNOWN_MESSAGE: u64 = 10008;
const MISSING_ACCESS: u64 = 50001;
const MISSING_PERMISSIONS: u64 = 50013;
const MESSAGE_TOO_OLD_TO_BULK_DELETE: u64 = 50034;

/// Gateway speaking to Discord's HTTP API with a bot token.
pub struct DiscordGateway {
    client: reqwest::Client,
    api_base: String,
    authorization: SecretString,
    clock: Arc<dyn Clock>,
}

impl DiscordGateway {
    pub fn new(config: &DiscordConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            authorization: SecretString::from(format!("Bot {}", config.token.expose_secret())),
            clock: Arc::new(SystemClock),
        })
    }

    /// Use a different clock for the bulk-delete age pre-check.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header("Authorization", self.authorization.expose_secret())
    }

    /// Whether every ID is young enough for bulk deletion.
    fn within_bulk_window(&self, message_ids: &[String]) -> bool {
        let cutoff = self.clock.now() - TimeDelta::seconds(BULK_DELETE_MAX_AGE_SECS);
        message_ids
            .iter()
            .all(|id| snowflake_timestamp(id).is_none_or(|at| at > cutoff))
    }
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    id: String,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    pinned: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<u64>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    retry_after: Option<f64>,
}

fn to_candidate(msg: ApiMessage) -> Result<CandidateMessage, GatewayError> {
    let created_at = msg
        .timestamp
        .as_deref()
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| ts.with_timezone(&Utc))
        .or_else(|| snowflake_timestamp(&msg.id))
        .ok_or_else(|| {
            GatewayError::InvalidResponse(format!("message {} has no usable timestamp", msg.id))
        })?;
    Ok(CandidateMessage {
        id: msg.id,
        created_at,
        pinned: msg.pinned,
    })
}

/// Map a non-success response onto the error taxonomy.
fn classify(status: u16, body: ApiErrorBody, retry_after_header: Option<f64>) -> GatewayError {
    if status == 429 {
        let retry_after = body
            .retry_after
            .or(retry_after_header)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok());
        return GatewayError::RateLimited { retry_after };
    }

    match body.code {
        Some(UNKNOWN_CHANNEL | MISSING_ACCESS) => GatewayError::UnknownChannel,
        Some(UNKNOWN_MESSAGE) => GatewayError::NotFound,
        Some(MISSING_PERMISSIONS) => GatewayError::PermissionDenied,
        Some(MESSAGE_TOO_OLD_TO_BULK_DELETE) => GatewayError::AgeWindowExceeded,
        code => GatewayError::Api {
            status,
            code,
            message: body.message.unwrap_or_default(),
        },
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after_header = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<f64>().ok());
    let text = response.text().await.unwrap_or_default();
    let body: ApiErrorBody = serde_json::from_str(&text).unwrap_or_default();

    Err(classify(status.as_u16(), body, retry_after_header))
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[async_trait]
impl ChannelGateway for DiscordGateway {
    async fn fetch_messages_before(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CandidateMessage>, GatewayError> {
        let mut query = vec![("limit", limit.clamp(1, 100).to_string())];
        if let Some(before) = before {
            query.push(("before", before.to_string()));
        }

        let response = self
            .request(reqwest::Method::GET, &format!("/channels/{}/messages", channel_id))
            .query(&query)
            .send()
            .await?;
        let messages: Vec<ApiMessage> = check(response)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        messages.into_iter().map(to_candidate).collect()
    }

    async fn bulk_delete(
        &self,
        channel_id: &str,
        message_ids: &[String],
    ) -> Result<(), GatewayError> {
        match message_ids {
            [] => return Ok(()),
            // The bulk endpoint requires at least two IDs.
            [single] => {
                return match self.delete_message(channel_id, single).await {
                    Err(GatewayError::NotFound) => Ok(()),
                    other => other,
                };
            }
            _ => {}
        }

        if !self.within_bulk_window(message_ids) {
            return Err(GatewayError::AgeWindowExceeded);
        }

        for chunk in message_ids.chunks(BULK_DELETE_MAX_IDS) {
            let response = self
                .request(
                    reqwest::Method::POST,
                    &format!("/channels/{}/messages/bulk-delete", channel_id),
                )
                .json(&serde_json::json!({ "messages": chunk }))
                .send()
                .await?;
            check(response).await?;
        }
        Ok(())
    }

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<(), GatewayError> {
        let response = self
            .request(
                reqwest::Method::DELETE,
                &format!("/channels/{}/messages/{}", channel_id, message_id),
            )
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn set_channel_label(&self, channel_id: &str, text: &str) -> Result<(), GatewayError> {
        let response = self
            .request(reqwest::Method::PATCH, &format!("/channels/{}", channel_id))
            .json(&serde_json::json!({ "topic": truncate_chars(text, MAX_TOPIC_CHARS) }))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::snowflake_at;
    use crate::clock::ManualClock;

    fn body(code: Option<u64>) -> ApiErrorBody {
        ApiErrorBody {
            code,
            message: Some("nope".to_string()),
            retry_after: None,
        }
    }

    fn offline_gateway(now: DateTime<Utc>) -> DiscordGateway {
        // Port 9 (discard) on loopback: any request that slips through fails fast.
        let config = DiscordConfig {
            token: SecretString::from("test-token"),
            api_base: "http://127.0.0.1:9/".to_string(),
        };
        DiscordGateway::new(&config)
            .unwrap()
            .with_clock(Arc::new(ManualClock::new(now)))
    }

    #[test]
    fn test_classify_json_codes() {
        assert!(matches!(classify(404, body(Some(10003)), None), GatewayError::UnknownChannel));
        assert!(matches!(classify(403, body(Some(50001)), None), GatewayError::UnknownChannel));
        assert!(matches!(classify(404, body(Some(10008)), None), GatewayError::NotFound));
        assert!(matches!(classify(403, body(Some(50013)), None), GatewayError::PermissionDenied));
        assert!(matches!(classify(400, body(Some(50034)), None), GatewayError::AgeWindowExceeded));
    }

    #[test]
    fn test_classify_rate_limit_prefers_body() {
        let mut b = body(None);
        b.retry_after = Some(1.5);
        match classify(429, b, Some(9.0)) {
            GatewayError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Some(Duration::from_millis(1500)));
            }
            other => panic!("unexpected {:?}", other),
        }

        match classify(429, ApiErrorBody::default(), Some(2.0)) {
            GatewayError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Some(Duration::from_secs(2)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_classify_unknown_is_api_error() {
        match classify(500, body(None), None) {
            GatewayError::Api { status, code, message } => {
                assert_eq!(status, 500);
                assert_eq!(code, None);
                assert_eq!(message, "nope");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_to_candidate_uses_payload_timestamp() {
        let msg = ApiMessage {
            id: "175928847299117063".to_string(),
            timestamp: Some("2024-05-01T12:00:00.000000+00:00".to_string()),
            pinned: true,
        };
        let candidate = to_candidate(msg).unwrap();
        assert!(candidate.pinned);
        assert_eq!(candidate.created_at.to_rfc3339(), "2024-05-01T12:00:00+00:00");
    }

    #[test]
    fn test_to_candidate_falls_back_to_snowflake() {
        let msg = ApiMessage {
            id: "175928847299117063".to_string(),
            timestamp: None,
            pinned: false,
        };
        let candidate = to_candidate(msg).unwrap();
        assert_eq!(candidate.created_at.timestamp_millis(), 1_462_015_105_796);

        let bad = ApiMessage {
            id: "not-a-snowflake".to_string(),
            timestamp: None,
            pinned: false,
        };
        assert!(matches!(to_candidate(bad), Err(GatewayError::InvalidResponse(_))));
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("héllo", 2), "hé");
    }

    #[tokio::test]
    async fn test_bulk_delete_prechecks_age_window() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let gateway = offline_gateway(now);
        let ids = vec![
            snowflake_at(now - TimeDelta::days(1)).to_string(),
            snowflake_at(now - TimeDelta::days(20)).to_string(),
        ];

        let err = gateway.bulk_delete("1", &ids).await.unwrap_err();
        assert!(matches!(err, GatewayError::AgeWindowExceeded));
    }

    #[tokio::test]
    async fn test_bulk_delete_empty_is_noop() {
        let gateway = offline_gateway(Utc::now());
        assert!(gateway.bulk_delete("1", &[]).await.is_ok());
    }
}
