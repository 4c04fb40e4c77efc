//! Error types for the retention service.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Sweep error: {0}")]
    Sweep(#[from] SweepError),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Policy store errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(#[from] tokio_postgres::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Constraint violated: {0}")]
    Constraint(String),
}

impl From<deadpool_postgres::PoolError> for DatabaseError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        DatabaseError::Pool(e.to_string())
    }
}

impl From<refinery::Error> for DatabaseError {
    fn from(e: refinery::Error) -> Self {
        DatabaseError::Migration(e.to_string())
    }
}

/// Errors surfaced by the chat platform.
///
/// The first five variants are the platform conditions the sweeper reacts
/// to; everything else is an opaque failure.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The channel was deleted or the bot can no longer see it.
    #[error("Unknown channel")]
    UnknownChannel,

    /// The message is already gone.
    #[error("Unknown message")]
    NotFound,

    #[error("Missing permissions")]
    PermissionDenied,

    /// Bulk deletion refused because a message is older than the platform's
    /// bulk-delete window.
    #[error("Messages are too old for bulk deletion")]
    AgeWindowExceeded,

    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("API error {status} (code {code:?}): {message}")]
    Api {
        status: u16,
        code: Option<u64>,
        message: String,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// Stable short code for logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownChannel => "unknown_channel",
            Self::NotFound => "not_found",
            Self::PermissionDenied => "permission_denied",
            Self::AgeWindowExceeded => "age_window_exceeded",
            Self::RateLimited { .. } => "rate_limited",
            Self::Http(_) => "http",
            Self::Api { .. } => "api",
            Self::InvalidResponse(_) => "invalid_response",
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        GatewayError::Http(e.to_string())
    }
}

/// Errors that abort a whole sweep run.
///
/// Per-channel failures never surface here; they are isolated and logged by
/// the coordinator.
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("Failed to list retention policies: {0}")]
    Store(#[from] DatabaseError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_error_codes_are_distinct() {
        let errors = [
            GatewayError::UnknownChannel,
            GatewayError::NotFound,
            GatewayError::PermissionDenied,
            GatewayError::AgeWindowExceeded,
            GatewayError::RateLimited { retry_after: None },
            GatewayError::Http("boom".into()),
            GatewayError::Api {
                status: 500,
                code: None,
                message: "oops".into(),
            },
            GatewayError::InvalidResponse("bad json".into()),
        ];
        let mut codes: Vec<_> = errors.iter().map(GatewayError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_sweep_error_wraps_store_failure() {
        let err: SweepError = DatabaseError::Pool("connection refused".into()).into();
        assert_eq!(
            err.to_string(),
            "Failed to list retention policies: Connection pool error: connection refused"
        );
    }

    #[test]
    fn test_startup_errors_convert_into_crate_error() {
        fn discord_token() -> Result<()> {
            Err(ConfigError::MissingEnvVar("DISCORD_TOKEN".into()))?
        }
        fn migrate() -> Result<()> {
            Err(DatabaseError::Migration("relation exists".into()))?
        }

        let err = discord_token().unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::MissingEnvVar(_))));
        assert_eq!(
            err.to_string(),
            "Configuration error: Missing required environment variable: DISCORD_TOKEN"
        );
        assert!(matches!(migrate().unwrap_err(), Error::Database(DatabaseError::Migration(_))));
    }
}
