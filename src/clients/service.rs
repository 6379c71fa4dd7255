//! Internal service client.
//!
//! The gateway does not own user records: every successful SAML login is
//! reported to the internal service, which creates or updates the user and
//! returns its internal id.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ServiceConfig;

/// Error type for user directory operations.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Service returned {status}: {body}")]
    Api { status: u16, body: String },
}

/// Result type for user directory operations.
pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Login report sent to the internal service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLoginRequest {
    /// `{prefix}:{external id}`.
    pub external_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserLoginResponse {
    pub id: Uuid,
}

/// Resolves an external identity to an internal user.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn user_login(&self, request: UserLoginRequest) -> DirectoryResult<UserLoginResponse>;
}

/// HTTP client for the internal service.
#[derive(Clone)]
pub struct ServiceClient {
    http_client: Client,
    base_url: String,
}

impl ServiceClient {
    pub fn new(config: &ServiceConfig) -> DirectoryResult<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http_client,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl UserDirectory for ServiceClient {
    async fn user_login(&self, request: UserLoginRequest) -> DirectoryResult<UserLoginResponse> {
        let url = format!("{}/system/user-login", self.base_url);
        let response = self.http_client.post(&url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "User login rejected by service");
            return Err(DirectoryError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}
