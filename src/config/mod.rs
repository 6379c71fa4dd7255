//! Configuration module for the API gateway's SAML integration.
//!
//! The gateway is configured via a TOML file, with support for environment
//! variable interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! app_base_url = "https://oppivelvollisuus.espoo.fi"
//!
//! [service]
//! url = "http://service:8080"
//!
//! [ad]
//! user_id_key = "http://schemas.microsoft.com/identity/claims/objectidentifier"
//! external_id_prefix = "espoo-ad"
//!
//! [ad.saml]
//! private_cert = "/config/saml-private.pem"
//! public_cert_or_url_for_saml_metadata = "https://login.microsoftonline.com/.../federationmetadata.xml"
//! callback_url = "https://oppivelvollisuus.espoo.fi/api/auth/saml/login/callback"
//! issuer = "oppivelvollisuus"
//! entry_point = "https://login.microsoftonline.com/.../saml2"
//! logout_url = "https://login.microsoftonline.com/.../saml2"
//! ```

mod observability;
mod saml;
mod session;

use std::path::Path;

pub use observability::*;
pub use saml::*;
use serde::{Deserialize, Serialize};
pub use session::*;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Public base URL of the application, or `"local"` for development.
    pub app_base_url: AppBaseUrl,

    /// Active Directory SAML integration.
    pub ad: AdConfig,

    /// Internal service (user directory) connection.
    pub service: ServiceConfig,

    /// Session store backend.
    #[serde(default)]
    pub session: SessionStoreConfig,

    /// Observability configuration (logging).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl GatewayConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing required variables will cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let config: GatewayConfig = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency and completeness.
    fn validate(&self) -> Result<(), ConfigError> {
        self.ad.validate()?;
        self.service.validate()?;
        self.session.validate()?;

        if self.app_base_url.is_local() {
            tracing::warn!(
                "app_base_url is \"local\": RelayState redirects are accepted without origin \
                 checks. Never use this setting outside local development."
            );
        }

        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Expand environment variables in the format `${VAR_NAME}`.
/// Skips commented lines (lines where content before the variable is a comment).
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| ConfigError::Validation(format!("Invalid env var pattern: {e}")))?;
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');

        let mut line_result = String::with_capacity(line.len());
        let mut last_end = 0;

        for cap in re.captures_iter(line) {
            let Some(whole) = cap.get(0) else {
                continue;
            };

            // Skip if this variable is inside a comment
            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            line_result.push_str(&line[last_end..whole.start()]);

            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            line_result.push_str(&value);

            last_end = whole.end();
        }

        line_result.push_str(&line[last_end..]);
        result.push_str(&line_result);
        result.push('\n');
    }

    // Remove trailing newline if input didn't have one
    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}
