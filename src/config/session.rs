use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Internal service connection used to resolve application users.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Base URL of the internal service.
    pub url: String,

    /// Request timeout.
    #[serde(default = "default_service_timeout_secs")]
    pub timeout_secs: u64,
}

impl ServiceConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.url).map_err(|e| {
            ConfigError::Validation(format!("service.url is not a valid URL: {e}"))
        })?;
        Ok(())
    }
}

fn default_service_timeout_secs() -> u64 {
    30
}

/// Session store backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionStoreConfig {
    /// In-process store. Sessions are lost on restart and not shared across nodes.
    #[default]
    Memory,
    /// Redis-backed store shared by all gateway nodes.
    Redis(RedisSessionConfig),
}

impl SessionStoreConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        match self {
            SessionStoreConfig::Memory => Ok(()),
            SessionStoreConfig::Redis(redis) => {
                if !cfg!(feature = "redis") {
                    return Err(ConfigError::Validation(
                        "session.type = \"redis\" requires the 'redis' feature".into(),
                    ));
                }
                if redis.url.trim().is_empty() {
                    return Err(ConfigError::Validation(
                        "session.url must not be empty".into(),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Redis session store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisSessionConfig {
    /// Redis connection URL.
    pub url: String,

    /// Key prefix for session entries.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Session lifetime.
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_key_prefix() -> String {
    "ov:".to_string()
}

fn default_session_ttl_secs() -> u64 {
    // 32 minutes, matching the frontend's idle timeout plus a grace period
    32 * 60
}
