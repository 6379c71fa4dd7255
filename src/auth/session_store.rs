//! Session storage backends for SAML-authenticated sessions.
//!
//! This module provides a `SessionStore` trait with two implementations:
//! - `MemorySessionStore`: In-memory storage (single-node only)
//! - `RedisSessionStore`: Shared storage for multi-node deployments (`redis` feature)
//!
//! Every session is also indexed by its [`LogoutToken`] so that an IdP-initiated
//! logout can find the session when the browser did not send a session cookie.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::SessionStoreConfig;

/// Result type for session store operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that can occur during session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// The authenticated identity stored in a session.
///
/// Besides the internal user id, it carries the SAML subject fields needed to
/// correlate a later Single Logout request with the session created at login.
/// Field names follow the SAML profile naming so that sessions written by other
/// gateway components deserialize unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSessionUser {
    /// Internal user id returned by the user directory.
    pub id: Uuid,

    #[serde(default)]
    pub issuer: Option<String>,

    #[serde(default, rename = "nameID")]
    pub name_id: Option<String>,

    #[serde(default, rename = "nameIDFormat")]
    pub name_id_format: Option<String>,

    #[serde(default)]
    pub name_qualifier: Option<String>,

    #[serde(default)]
    pub sp_name_qualifier: Option<String>,

    #[serde(default)]
    pub session_index: Option<String>,
}

impl AppSessionUser {
    /// A user without SAML linkage (e.g. created by a non-SAML login).
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            issuer: None,
            name_id: None,
            name_id_format: None,
            name_qualifier: None,
            sp_name_qualifier: None,
            session_index: None,
        }
    }

    /// The logout token for this user, if it has a SAML subject.
    pub fn logout_token(&self) -> Option<LogoutToken> {
        self.name_id
            .as_deref()
            .map(|name_id| LogoutToken::new(name_id, self.session_index.as_deref()))
    }
}

/// Lookup key built from a SAML subject's `(nameID, sessionIndex)` pair.
#[derive(Clone, PartialEq, Eq)]
pub struct LogoutToken(String);

impl LogoutToken {
    pub fn new(name_id: &str, session_index: Option<&str>) -> Self {
        Self(format!("{}:::{}", name_id, session_index.unwrap_or_default()))
    }

    /// Hex-encoded SHA-256 of the token.
    ///
    /// Stores key by the digest so subject identifiers never appear in key names.
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(self.0.as_bytes()))
    }
}

impl std::fmt::Debug for LogoutToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LogoutToken").field(&self.digest()).finish()
    }
}

/// A session found in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSession {
    pub id: Uuid,
    pub user: AppSessionUser,
}

/// Trait for session storage.
///
/// Implementations must be thread-safe and handle concurrent access.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store a new session and index it by the user's logout token.
    async fn create_session(&self, user: AppSessionUser) -> SessionResult<Uuid>;

    /// Get a session by ID.
    async fn get_session(&self, id: Uuid) -> SessionResult<Option<AppSessionUser>>;

    /// Find the session created for a SAML subject. Read-only.
    async fn lookup_by_logout_token(
        &self,
        token: &LogoutToken,
    ) -> SessionResult<Option<StoredSession>>;

    /// Delete a session and its logout token index entry.
    async fn delete_session(&self, id: Uuid) -> SessionResult<()>;
}

pub type SharedSessionStore = Arc<dyn SessionStore>;

/// Create the configured session store.
pub async fn create_session_store(config: &SessionStoreConfig) -> SessionResult<SharedSessionStore> {
    match config {
        SessionStoreConfig::Memory => {
            tracing::debug!("Using in-memory session store");
            Ok(Arc::new(MemorySessionStore::new()))
        }
        #[cfg(feature = "redis")]
        SessionStoreConfig::Redis(redis) => {
            tracing::debug!(key_prefix = %redis.key_prefix, "Using Redis session store");
            Ok(Arc::new(RedisSessionStore::connect(redis).await?))
        }
        #[cfg(not(feature = "redis"))]
        SessionStoreConfig::Redis(_) => Err(SessionError::Backend(
            "Redis session store requires the 'redis' feature".into(),
        )),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory Session Store
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct MemoryInner {
    sessions: HashMap<Uuid, AppSessionUser>,
    logout_index: HashMap<String, Uuid>,
}

/// In-memory session store.
///
/// Suitable for development and single-node deployments.
/// Sessions are lost on restart and not shared across nodes.
#[derive(Default)]
pub struct MemorySessionStore {
    inner: RwLock<MemoryInner>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_session(&self, user: AppSessionUser) -> SessionResult<Uuid> {
        let id = Uuid::new_v4();
        let mut inner = self.inner.write().await;
        if let Some(token) = user.logout_token() {
            inner.logout_index.insert(token.digest(), id);
        }
        inner.sessions.insert(id, user);
        Ok(id)
    }

    async fn get_session(&self, id: Uuid) -> SessionResult<Option<AppSessionUser>> {
        let inner = self.inner.read().await;
        Ok(inner.sessions.get(&id).cloned())
    }

    async fn lookup_by_logout_token(
        &self,
        token: &LogoutToken,
    ) -> SessionResult<Option<StoredSession>> {
        let inner = self.inner.read().await;
        Ok(inner
            .logout_index
            .get(&token.digest())
            .and_then(|id| {
                inner.sessions.get(id).map(|user| StoredSession {
                    id: *id,
                    user: user.clone(),
                })
            }))
    }

    async fn delete_session(&self, id: Uuid) -> SessionResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(user) = inner.sessions.remove(&id)
            && let Some(token) = user.logout_token()
        {
            inner.logout_index.remove(&token.digest());
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Redis Session Store
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(feature = "redis")]
pub use self::redis_store::RedisSessionStore;

#[cfg(feature = "redis")]
mod redis_store {
    use std::time::Duration;

    use async_trait::async_trait;
    use redis::aio::MultiplexedConnection;
    use uuid::Uuid;

    use super::{
        AppSessionUser, LogoutToken, SessionError, SessionResult, SessionStore, StoredSession,
    };
    use crate::config::RedisSessionConfig;

    impl From<redis::RedisError> for SessionError {
        fn from(e: redis::RedisError) -> Self {
            SessionError::Backend(e.to_string())
        }
    }

    /// Session store backed by Redis.
    ///
    /// Sessions are stored as JSON with a TTL under `{prefix}sess:{id}`; the
    /// logout token index lives under `{prefix}slo:{digest}` with the same TTL.
    pub struct RedisSessionStore {
        conn: MultiplexedConnection,
        key_prefix: String,
        ttl: Duration,
    }

    impl RedisSessionStore {
        pub async fn connect(config: &RedisSessionConfig) -> SessionResult<Self> {
            let client = redis::Client::open(config.url.as_str())?;
            let conn = client.get_multiplexed_async_connection().await?;
            Ok(Self {
                conn,
                key_prefix: config.key_prefix.clone(),
                ttl: Duration::from_secs(config.ttl_secs),
            })
        }

        fn session_key(&self, id: Uuid) -> String {
            format!("{}sess:{}", self.key_prefix, id)
        }

        fn logout_key(&self, token: &LogoutToken) -> String {
            format!("{}slo:{}", self.key_prefix, token.digest())
        }

        async fn read_session(&self, id: Uuid) -> SessionResult<Option<AppSessionUser>> {
            let mut conn = self.conn.clone();
            let value: Option<String> = redis::cmd("GET")
                .arg(self.session_key(id))
                .query_async(&mut conn)
                .await?;
            value
                .map(|json| {
                    serde_json::from_str(&json)
                        .map_err(|e| SessionError::Serialization(e.to_string()))
                })
                .transpose()
        }
    }

    #[async_trait]
    impl SessionStore for RedisSessionStore {
        async fn create_session(&self, user: AppSessionUser) -> SessionResult<Uuid> {
            let id = Uuid::new_v4();
            let json = serde_json::to_string(&user)
                .map_err(|e| SessionError::Serialization(e.to_string()))?;
            let ttl = self.ttl.as_secs();

            let mut pipe = redis::pipe();
            pipe.atomic()
                .cmd("SET")
                .arg(self.session_key(id))
                .arg(json)
                .arg("EX")
                .arg(ttl)
                .ignore();
            if let Some(token) = user.logout_token() {
                pipe.cmd("SET")
                    .arg(self.logout_key(&token))
                    .arg(id.to_string())
                    .arg("EX")
                    .arg(ttl)
                    .ignore();
            }

            let mut conn = self.conn.clone();
            let () = pipe.query_async(&mut conn).await?;
            Ok(id)
        }

        async fn get_session(&self, id: Uuid) -> SessionResult<Option<AppSessionUser>> {
            self.read_session(id).await
        }

        async fn lookup_by_logout_token(
            &self,
            token: &LogoutToken,
        ) -> SessionResult<Option<StoredSession>> {
            let mut conn = self.conn.clone();
            let session_id: Option<String> = redis::cmd("GET")
                .arg(self.logout_key(token))
                .query_async(&mut conn)
                .await?;

            let Some(session_id) = session_id else {
                return Ok(None);
            };
            let id = Uuid::parse_str(&session_id)
                .map_err(|e| SessionError::Serialization(e.to_string()))?;

            Ok(self
                .read_session(id)
                .await?
                .map(|user| StoredSession { id, user }))
        }

        async fn delete_session(&self, id: Uuid) -> SessionResult<()> {
            let user = self.read_session(id).await?;

            let mut keys = vec![self.session_key(id)];
            if let Some(token) = user.as_ref().and_then(AppSessionUser::logout_token) {
                keys.push(self.logout_key(&token));
            }

            let mut conn = self.conn.clone();
            let _: i64 = redis::cmd("DEL").arg(keys).query_async(&mut conn).await?;
            Ok(())
        }
    }
}
