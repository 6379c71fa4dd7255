//! Per-request context handed to the SAML callbacks.

use axum::{
    body::Bytes,
    extract::{FromRequest, Request},
};
use http::{HeaderMap, Method, Uri, header::CONTENT_TYPE, request::Parts};
use serde_json::{Map, Value};

use super::{SamlError, session_store::AppSessionUser};

/// Upper bound for SAML POST bodies. Signed responses with embedded
/// certificates are a few tens of kilobytes.
const MAX_BODY_BYTES: usize = 512 * 1024;

/// How the current user was attached to the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserScope {
    /// Restored from the browser session.
    Session,
    /// Attached for this request only and never persisted.
    Request,
}

/// The incoming HTTP request as seen by the SAML callbacks.
#[derive(Debug, Clone)]
pub struct SamlRequest {
    method: Method,
    uri: Uri,
    body: Map<String, Value>,
    user: Option<(AppSessionUser, UserScope)>,
}

impl SamlRequest {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            body: Map::new(),
            user: None,
        }
    }

    /// Build from request parts and the raw body.
    ///
    /// Form and JSON bodies are parsed; other content types leave the body
    /// empty. A session user placed in the request extensions by the session
    /// layer is picked up.
    pub fn from_parts(parts: &Parts, body: &[u8]) -> Result<Self, SamlError> {
        let mut request = Self::new(parts.method.clone(), parts.uri.clone());
        request.body = parse_body(&parts.headers, body)?;
        if let Some(user) = parts.extensions.get::<AppSessionUser>() {
            request.user = Some((user.clone(), UserScope::Session));
        }
        Ok(request)
    }

    pub fn with_body(mut self, body: Map<String, Value>) -> Self {
        self.body = body;
        self
    }

    pub fn with_session_user(mut self, user: AppSessionUser) -> Self {
        self.user = Some((user, UserScope::Session));
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn body_field(&self, name: &str) -> Option<&Value> {
        self.body.get(name)
    }

    /// First value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.uri.query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    pub fn raw_query(&self) -> Option<&str> {
        self.uri.query()
    }

    pub fn user(&self) -> Option<&AppSessionUser> {
        self.user.as_ref().map(|(user, _)| user)
    }

    pub fn user_scope(&self) -> Option<UserScope> {
        self.user.as_ref().map(|(_, scope)| *scope)
    }

    /// Attach a user for the remainder of this request only.
    pub fn login_scoped(&mut self, user: AppSessionUser) {
        self.user = Some((user, UserScope::Request));
    }
}

fn parse_body(headers: &HeaderMap, body: &[u8]) -> Result<Map<String, Value>, SamlError> {
    if body.is_empty() {
        return Ok(Map::new());
    }

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match mime.as_str() {
        "application/x-www-form-urlencoded" => Ok(url::form_urlencoded::parse(body)
            .map(|(key, value)| (key.into_owned(), Value::String(value.into_owned())))
            .collect()),
        "application/json" => match serde_json::from_slice(body) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Ok(Map::new()),
            Err(e) => Err(SamlError::Protocol(format!("Invalid JSON body: {e}"))),
        },
        _ => Ok(Map::new()),
    }
}

impl<S> FromRequest<S> for SamlRequest
where
    S: Send + Sync,
{
    type Rejection = SamlError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let (parts, body) = req.into_parts();
        let bytes = Bytes::from_request(Request::from_parts(parts.clone(), body), state)
            .await
            .map_err(|e| SamlError::Protocol(format!("Failed to read request body: {e}")))?;
        if bytes.len() > MAX_BODY_BYTES {
            return Err(SamlError::Protocol("Request body too large".into()));
        }
        Self::from_parts(&parts, &bytes)
    }
}
