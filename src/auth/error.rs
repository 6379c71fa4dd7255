use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use super::session_store::SessionError;
use crate::clients::DirectoryError;

/// Errors raised by the SAML integration.
///
/// None of these are process-fatal: each is scoped to the single
/// authentication request in flight.
#[derive(Debug, thiserror::Error)]
pub enum SamlError {
    /// Unreadable certificate or key file, or missing required configuration.
    #[error("SAML configuration error: {0}")]
    Configuration(String),

    /// Network or XML failure while resolving certificates from a metadata URL.
    #[error("Failed to fetch SAML metadata: {0}")]
    MetadataFetch(String),

    /// The validated profile does not have the expected attribute shape.
    #[error("SAML profile validation failed: {0}")]
    ProfileValidation(String),

    /// A required identity attribute is missing.
    #[error("{0}")]
    Auth(String),

    /// The protocol engine rejected a message.
    #[error("SAML protocol error: {0}")]
    Protocol(String),

    #[error("User directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Session store error: {0}")]
    Session(#[from] SessionError),
}

impl SamlError {
    fn code(&self) -> &'static str {
        match self {
            SamlError::Configuration(_) => "configuration_error",
            SamlError::MetadataFetch(_) => "metadata_fetch_error",
            SamlError::ProfileValidation(_) => "profile_validation_error",
            SamlError::Auth(_) => "authentication_error",
            SamlError::Protocol(_) => "saml_protocol_error",
            SamlError::Directory(_) => "user_directory_error",
            SamlError::Session(_) => "session_error",
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Debug, Serialize)]
struct ErrorDetail<'a> {
    code: &'a str,
    message: String,
}

impl IntoResponse for SamlError {
    fn into_response(self) -> Response {
        let status = match &self {
            SamlError::Auth(_) | SamlError::ProfileValidation(_) | SamlError::Protocol(_) => {
                StatusCode::UNAUTHORIZED
            }
            SamlError::MetadataFetch(_) | SamlError::Directory(_) => StatusCode::BAD_GATEWAY,
            SamlError::Configuration(_) | SamlError::Session(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        // Internal details stay in the logs
        let message = match status {
            StatusCode::UNAUTHORIZED => self.to_string(),
            _ => "Authentication is temporarily unavailable".to_string(),
        };

        tracing::error!(error = %self, code = self.code(), "SAML request failed");

        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}
