mod password;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::AppError;

pub use password::{hash_password, verify_password};

/// The signed-in dashboard account. There is exactly one configured
/// operator, so sessions only need to carry its name.
#[derive(Debug, Clone)]
pub struct Operator {
    pub username: String,
    pub source: String,
}

#[derive(Debug)]
struct SessionEntry {
    username: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct AuthManager {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    ttl: ChronoDuration,
}

impl AuthManager {
    pub fn new(token_ttl_hours: i64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: ChronoDuration::hours(token_ttl_hours),
        }
    }

    pub async fn issue(&self, username: String) -> String {
        let mut buf = [0u8; 32];
        OsRng.fill_bytes(&mut buf);
        let token = URL_SAFE_NO_PAD.encode(buf);
        let expires_at = Utc::now() + self.ttl;
        let mut sessions = self.sessions.write().await;
        sessions.insert(
            token.clone(),
            SessionEntry {
                username,
                expires_at,
            },
        );
        token
    }

    pub async fn resolve(&self, token: &str) -> Option<String> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get(token)?;
        if entry.expires_at <= Utc::now() {
            sessions.remove(token);
            return None;
        }
        Some(entry.username.clone())
    }

    pub async fn prune_expired(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let now = Utc::now();
        let expired: Vec<String> = sessions
            .iter()
            .filter_map(|(token, entry)| {
                if entry.expires_at <= now {
                    Some(token.clone())
                } else {
                    None
                }
            })
            .collect();
        for token in &expired {
            sessions.remove(token);
        }
        expired.len()
    }
}

#[derive(Debug, Clone)]
pub struct AuthUser(pub Operator);

impl<S> FromRequestParts<S> for AuthUser
where
    Arc<AuthManager>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let manager = Arc::<AuthManager>::from_ref(state);
        let token_result: Result<String, AppError> = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .ok_or_else(|| AppError::unauthorized("Missing or invalid token"));

        async move {
            let token = token_result?;
            let username = manager
                .resolve(&token)
                .await
                .ok_or_else(|| AppError::unauthorized("Missing or invalid token"))?;
            Ok(AuthUser(Operator {
                username,
                source: "session".to_string(),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn issued_tokens_resolve_until_expiry() {
        let manager = AuthManager::new(24);
        let token = manager.issue("dae".to_string()).await;
        assert_eq!(manager.resolve(&token).await.as_deref(), Some("dae"));
        assert!(manager.resolve("bogus").await.is_none());
    }

    #[tokio::test]
    async fn expired_tokens_are_dropped_on_resolve() {
        let manager = AuthManager::new(0);
        let token = manager.issue("dae".to_string()).await;
        assert!(manager.resolve(&token).await.is_none());
        // The expired entry was removed, not just hidden.
        assert_eq!(manager.prune_expired().await, 0);
    }

    #[tokio::test]
    async fn prune_removes_only_expired_sessions() {
        let manager = AuthManager::new(0);
        manager.issue("stale".to_string()).await;
        let live = AuthManager::new(24);
        live.issue("fresh".to_string()).await;

        assert_eq!(manager.prune_expired().await, 1);
        assert_eq!(live.prune_expired().await, 0);
    }
}
