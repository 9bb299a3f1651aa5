//! Session Store
//!
//! Tracks which issued tokens are still live. Each session is one cache
//! entry:
//!
//! ```text
//! tk:<token>  ->  <userID>      (TTL = token lifetime)
//! ```
//!
//! Liveness and authenticity are separate checks. The token codec proves a
//! token was minted by this service; this store proves it has not been
//! revoked or aged out. The auth middleware requires both.

use std::time::Duration;

use crate::observability::{security_event, SecurityEvent};
use crate::store::{StoreError, TimedStore};

const KEY_PREFIX: &str = "tk:";

/// Why a session is not live.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No entry for this token
    #[error("token not found")]
    NotFound,

    /// Entry exists but belongs to another user
    #[error("token belongs to another user")]
    Mismatch,

    /// The store could not be reached
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Live-token registry backed by the cache.
#[derive(Debug, Clone)]
pub struct SessionStore {
    store: TimedStore,
}

impl SessionStore {
    pub fn new(store: TimedStore) -> Self {
        Self { store }
    }

    fn key(token: &str) -> String {
        format!("{}{}", KEY_PREFIX, token)
    }

    /// Record a freshly issued token. Overwrites any entry for the same token.
    pub async fn save(
        &self,
        token: &str,
        user_id: i64,
        user_type: i16,
        platform: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.store
            .set(&Self::key(token), user_id.to_string(), ttl)
            .await?;

        security_event!(
            SecurityEvent::SessionCreated,
            user_id = user_id,
            user_type = user_type,
            platform = %platform,
            ttl_secs = ttl.as_secs(),
            token = %token_prefix(token),
            "Session saved"
        );
        Ok(())
    }

    /// Confirm the token is live and belongs to `user_id`.
    pub async fn check_live(&self, token: &str, user_id: i64) -> Result<(), SessionError> {
        let stored = self.store.get(&Self::key(token)).await?;
        let stored = stored
            .filter(|s| !s.is_empty())
            .ok_or(SessionError::NotFound)?;

        match stored.parse::<i64>() {
            Ok(id) if id == user_id => Ok(()),
            _ => Err(SessionError::Mismatch),
        }
    }

    /// Invalidate a session.
    ///
    /// Deletes the same `tk:<token>` entry that [`check_live`](Self::check_live)
    /// reads, so the token stops working immediately.
    pub async fn revoke(&self, user_id: i64, token: &str) -> Result<bool, StoreError> {
        let existed = self.store.delete(&Self::key(token)).await?;

        security_event!(
            SecurityEvent::SessionDestroyed,
            user_id = user_id,
            existed = existed,
            token = %token_prefix(token),
            "Session revoked"
        );
        Ok(existed)
    }
}

/// First few characters of a token, for logs.
pub fn token_prefix(token: &str) -> &str {
    let end = token
        .char_indices()
        .nth(10)
        .map(|(i, _)| i)
        .unwrap_or(token.len());
    &token[..end]
}
