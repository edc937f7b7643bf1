//! Access-token cache for the Firestore REST client.
//!
//! Tokens are refreshed a minute before they expire. Concurrent callers
//! that find a stale token serialize on the write lock so only one refresh
//! reaches the token provider.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use gcp_auth::TokenProvider;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{FirestoreError, FirestoreResult};

const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Used when the provider reports an expiry that cannot be converted.
const FALLBACK_TTL: Duration = Duration::from_secs(50 * 60);

/// OAuth scope for the Firestore REST API.
pub const FIRESTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        now + REFRESH_MARGIN < self.expires_at
    }

    fn is_unexpired(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Shared token cache.
pub struct TokenCache {
    provider: Arc<dyn TokenProvider>,
    slot: RwLock<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            provider,
            slot: RwLock::new(None),
        }
    }

    /// Drop the cached token so the next call fetches a new one.
    pub async fn invalidate(&self) {
        *self.slot.write().await = None;
    }

    /// Current access token, refreshing when close to expiry.
    ///
    /// A failed refresh falls back to the cached token while it has not
    /// expired outright.
    pub async fn get_token(&self) -> FirestoreResult<String> {
        if let Some(cached) = self.slot.read().await.as_ref() {
            if cached.is_fresh(Instant::now()) {
                return Ok(cached.access_token.clone());
            }
        }

        let mut slot = self.slot.write().await;
        if let Some(cached) = slot.as_ref() {
            if cached.is_fresh(Instant::now()) {
                return Ok(cached.access_token.clone());
            }
        }

        match self.provider.token(&[FIRESTORE_SCOPE]).await {
            Ok(token) => {
                let access_token = token.as_str().to_string();
                let expires_at = Instant::now() + remaining_ttl(token.expires_at());
                *slot = Some(CachedToken {
                    access_token: access_token.clone(),
                    expires_at,
                });
                debug!("Refreshed Firestore access token");
                Ok(access_token)
            }
            Err(e) => match slot.as_ref() {
                Some(cached) if cached.is_unexpired(Instant::now()) => {
                    warn!("Token refresh failed, reusing cached token: {}", e);
                    Ok(cached.access_token.clone())
                }
                _ => Err(FirestoreError::auth_error(format!(
                    "Failed to obtain access token: {}",
                    e
                ))),
            },
        }
    }
}

fn remaining_ttl(expires_at: chrono::DateTime<Utc>) -> Duration {
    let now = Utc::now();
    if expires_at <= now {
        return Duration::ZERO;
    }
    (expires_at - now).to_std().unwrap_or(FALLBACK_TTL)
}
