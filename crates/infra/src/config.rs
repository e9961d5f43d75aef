//! Process configuration read from the environment.

use std::time::Duration;

use sellerdesk_core::RetentionPolicy;
use sellerdesk_core::retention::MAX_RETENTION_DAYS;
use sellerdesk_marketplace::MarketplaceConfig;
use sellerdesk_marketplace::config::{DEFAULT_API_URL, DEFAULT_AUTH_URL};
use thiserror::Error;

/// Upper bound for the producer period and the stale task lease.
pub const MAX_INTERVAL_SECS: u64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Push delivery credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct FcmConfig {
    pub project_id: String,
    pub access_token: String,
}

impl std::fmt::Debug for FcmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FcmConfig")
            .field("project_id", &self.project_id)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    /// Base64 of the 32-byte token encryption key.
    pub encryption_key: String,
    pub marketplace: MarketplaceConfig,
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    pub producer_interval: Duration,
    pub conversation_page_size: u32,
    pub retention: RetentionPolicy,
    /// When set, `processing` tasks claimed longer ago than this are put back to `pending`.
    pub stale_task_lease: Option<Duration>,
    pub fcm: Option<FcmConfig>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let marketplace = MarketplaceConfig::new(
            required("MARKETPLACE_CLIENT_ID")?,
            required("MARKETPLACE_CLIENT_SECRET")?,
            required("MARKETPLACE_REDIRECT_URI")?,
        )
        .with_api_url(get("MARKETPLACE_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()))
        .with_auth_url(get("MARKETPLACE_AUTH_URL").unwrap_or_else(|| DEFAULT_AUTH_URL.to_string()))
        .with_timeout(Duration::from_secs(parse_or(
            &get,
            "MARKETPLACE_TIMEOUT_SECS",
            30u64,
        )?));

        let retention = RetentionPolicy::from_days(
            retention_days(parse_or(&get, "IDEMPOTENCY_RETENTION_DAYS", 30i64)?, "IDEMPOTENCY_RETENTION_DAYS")?,
            retention_days(parse_or(&get, "METADATA_RETENTION_DAYS", 90i64)?, "METADATA_RETENTION_DAYS")?,
        )
        .map_err(|e| ConfigError::Invalid {
            name: "RETENTION_DAYS",
            reason: e.to_string(),
        })?;

        let stale_task_lease = match get("STALE_TASK_LEASE_SECS") {
            Some(raw) => Some(interval_secs(parse("STALE_TASK_LEASE_SECS", &raw)?, "STALE_TASK_LEASE_SECS")?),
            None => None,
        };

        let fcm = match (get("FCM_PROJECT_ID"), get("FCM_ACCESS_TOKEN")) {
            (Some(project_id), Some(access_token)) => Some(FcmConfig {
                project_id,
                access_token,
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing("FCM_ACCESS_TOKEN")),
            (None, Some(_)) => return Err(ConfigError::Missing("FCM_PROJECT_ID")),
        };

        let conversation_page_size: u32 = parse_or(&get, "CONVERSATION_PAGE_SIZE", 20)?;
        if conversation_page_size == 0 {
            return Err(ConfigError::Invalid {
                name: "CONVERSATION_PAGE_SIZE",
                reason: "must be at least 1".into(),
            });
        }

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            database_max_connections: parse_or(&get, "DATABASE_MAX_CONNECTIONS", 5)?,
            encryption_key: required("ENCRYPTION_KEY")?,
            marketplace,
            poll_interval: Duration::from_secs(parse_or(&get, "WORKER_POLL_INTERVAL_SECS", 10)?),
            error_backoff: Duration::from_secs(parse_or(&get, "WORKER_ERROR_BACKOFF_SECS", 15)?),
            producer_interval: interval_secs(parse_or(&get, "PRODUCER_INTERVAL_SECS", 300)?, "PRODUCER_INTERVAL_SECS")?,
            conversation_page_size,
            retention,
            stale_task_lease,
            fcm,
        })
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("database_max_connections", &self.database_max_connections)
            .field("api_url", &self.marketplace.api_url)
            .field("auth_url", &self.marketplace.auth_url)
            .field("poll_interval", &self.poll_interval)
            .field("error_backoff", &self.error_backoff)
            .field("producer_interval", &self.producer_interval)
            .field("conversation_page_size", &self.conversation_page_size)
            .field("retention", &self.retention)
            .field("stale_task_lease", &self.stale_task_lease)
            .field("fcm", &self.fcm)
            .finish_non_exhaustive()
    }
}

fn parse<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

fn parse_or<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => parse(name, &raw),
        None => Ok(default),
    }
}

fn retention_days(days: i64, name: &'static str) -> Result<i64, ConfigError> {
    if !(1..=MAX_RETENTION_DAYS).contains(&days) {
        return Err(ConfigError::Invalid {
            name,
            reason: format!("must be between 1 and {MAX_RETENTION_DAYS} days"),
        });
    }
    Ok(days)
}

fn interval_secs(secs: u64, name: &'static str) -> Result<Duration, ConfigError> {
    if !(1..=MAX_INTERVAL_SECS).contains(&secs) {
        return Err(ConfigError::Invalid {
            name,
            reason: format!("must be between 1 and {MAX_INTERVAL_SECS} seconds"),
        });
    }
    Ok(Duration::from_secs(secs))
}
