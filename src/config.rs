//! Configuration loaded from the environment.

use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::error::ConfigError;

/// Discord's largest page for message listing.
pub const MAX_PAGE_SIZE: usize = 100;

/// Service configuration.
#[derive(Debug)]
pub struct Config {
    pub database: DatabaseConfig,
    /// Absent when only store-facing commands are run.
    pub discord: Option<DiscordConfig>,
    pub sweep: SweepConfig,
    pub log_format: LogFormat,
}

#[derive(Debug)]
pub struct DatabaseConfig {
    pub url: SecretString,
    pub pool_size: usize,
}

impl DatabaseConfig {
    pub fn url(&self) -> &str {
        self.url.expose_secret()
    }
}

#[derive(Debug)]
pub struct DiscordConfig {
    pub token: SecretString,
    pub api_base: String,
}

/// Knobs for the retention sweep.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub enabled: bool,
    /// Period between scheduler ticks.
    pub interval: Duration,
    /// Messages requested per page (1..=100).
    pub page_size: usize,
    /// Pause between individual deletions.
    pub delete_delay: Duration,
    /// Pause after the platform rate-limits an individual deletion.
    pub rate_limit_pause: Duration,
    /// Channels swept concurrently within one run.
    pub max_concurrent_channels: usize,
    /// Only sweep policies belonging to this guild.
    pub guild_id: Option<String>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
            page_size: MAX_PAGE_SIZE,
            delete_delay: Duration::from_millis(200),
            rate_limit_pause: Duration::from_secs(5),
            max_concurrent_channels: 1,
            guild_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("invalid log format '{}', expected 'pretty' or 'json'", s)),
        }
    }
}

impl Config {
    /// Load configuration from the process environment (and `.env`).
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let database = DatabaseConfig {
            url: SecretString::from(env.required("DATABASE_URL")?),
            pool_size: env.parse_or("DATABASE_POOL_SIZE", 5)?,
        };

        let discord = env.optional("DISCORD_TOKEN").map(|token| DiscordConfig {
            token: SecretString::from(token),
            api_base: env
                .optional("DISCORD_API_BASE")
                .unwrap_or_else(|| "https://discord.com/api/v10".to_string()),
        });

        let defaults = SweepConfig::default();
        let page_size: usize = env.parse_or("SWEEP_PAGE_SIZE", defaults.page_size)?;
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(ConfigError::InvalidValue {
                key: "SWEEP_PAGE_SIZE".to_string(),
                message: format!("must be between 1 and {}", MAX_PAGE_SIZE),
            });
        }

        let interval_secs: u64 = env.parse_or("SWEEP_INTERVAL_SECS", defaults.interval.as_secs())?;
        if interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SWEEP_INTERVAL_SECS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        let max_concurrent_channels: usize =
            env.parse_or("SWEEP_MAX_CONCURRENT_CHANNELS", defaults.max_concurrent_channels)?;
        if max_concurrent_channels == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SWEEP_MAX_CONCURRENT_CHANNELS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        let sweep = SweepConfig {
            enabled: env.parse_or("SWEEP_ENABLED", defaults.enabled)?,
            interval: Duration::from_secs(interval_secs),
            page_size,
            delete_delay: Duration::from_millis(
                env.parse_or("SWEEP_DELETE_DELAY_MS", defaults.delete_delay.as_millis() as u64)?,
            ),
            rate_limit_pause: Duration::from_millis(env.parse_or(
                "SWEEP_RATE_LIMIT_PAUSE_MS",
                defaults.rate_limit_pause.as_millis() as u64,
            )?),
            max_concurrent_channels,
            guild_id: env.optional("SWEEP_GUILD_ID"),
        };

        Ok(Self {
            database,
            discord,
            sweep,
            log_format: env.parse_or("LOG_FORMAT", LogFormat::default())?,
        })
    }

    /// Discord settings, required by anything that talks to the platform.
    pub fn discord(&self) -> Result<&DiscordConfig, ConfigError> {
        self.discord
            .as_ref()
            .ok_or_else(|| ConfigError::MissingEnvVar("DISCORD_TOKEN".to_string()))
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
            None => Ok(default),
        }
    }
}
