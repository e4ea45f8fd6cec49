//! Access-token lifecycle for the Drive client.
//!
//! `get_valid_token` hides the whole acquisition chain: in-memory cache,
//! persisted state, refresh through the token-exchange service, and finally
//! interactive authorization through the injected [`Authorizer`]. The
//! application never holds the OAuth client secret; code exchange and refresh
//! are delegated to the external token service.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::error::TokenError;
use super::single_flight::SingleFlight;
use crate::db::SyncStateRepository;
use crate::models::now_ms;

/// Tokens are considered expired slightly early so a request started near the
/// deadline does not race the actual expiry.
const EXPIRY_LEEWAY_MS: i64 = 10_000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// One-time authorization code obtained from the identity provider's consent
/// flow, together with the redirect URI it was issued for.
#[derive(Debug, Clone)]
pub struct AuthorizationCode {
    pub code: String,
    pub redirect_uri: String,
}

/// Seam for the interactive part of the flow. The CLI implementation opens a
/// consent URL and waits on a loopback redirect; tests inject stubs.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn obtain_code(&self) -> Result<AuthorizationCode, TokenError>;
}

/// Response shape of the token-exchange service (`/oauth/exchange` and
/// `/oauth/refresh`), mirroring the provider's token endpoint.
#[derive(Debug, Clone, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    refresh_token: Option<String>,
    #[allow(dead_code)]
    token_type: Option<String>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: i64,
}

impl CachedToken {
    fn is_valid(&self, now: i64) -> bool {
        self.expires_at - EXPIRY_LEEWAY_MS > now
    }
}

/// Cheaply cloneable handle; clones share the cache and the in-flight
/// acquisition.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    service_url: String,
    state: SyncStateRepository,
    cache: Mutex<Option<CachedToken>>,
    flight: SingleFlight<CachedToken, TokenError>,
    authorizer: Arc<dyn Authorizer>,
}

impl TokenManager {
    pub fn new(
        service_url: impl Into<String>,
        state: SyncStateRepository,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            inner: Arc::new(Inner {
                http,
                service_url: service_url.into(),
                state,
                cache: Mutex::new(None),
                flight: SingleFlight::new(),
                authorizer,
            }),
        }
    }

    /// Produce a currently-valid bearer token, acquiring or refreshing one if
    /// necessary. Concurrent callers during an acquisition share one flow.
    pub async fn get_valid_token(&self) -> Result<String, TokenError> {
        let now = now_ms();

        if let Some(cached) = self.inner.cache.lock().unwrap().clone() {
            if cached.is_valid(now) {
                return Ok(cached.token);
            }
        }

        let state = self
            .inner
            .state
            .get()
            .await
            .map_err(|e| TokenError::Storage(e.to_string()))?;
        if let (Some(token), Some(expires_at)) =
            (state.access_token, state.access_token_expires_at)
        {
            let cached = CachedToken { token, expires_at };
            if cached.is_valid(now) {
                let token = cached.token.clone();
                *self.inner.cache.lock().unwrap() = Some(cached);
                return Ok(token);
            }
        }

        let inner = self.inner.clone();
        let acquired = self.inner.flight.run(|| Inner::acquire(inner)).await?;
        Ok(acquired.token)
    }

    /// Drop the cached and stored access token, forcing the next call to
    /// acquire a fresh one. Used on an explicit 401 from downstream.
    pub async fn invalidate(&self) -> Result<(), TokenError> {
        *self.inner.cache.lock().unwrap() = None;
        self.inner
            .state
            .update(|s| {
                s.access_token = None;
                s.access_token_expires_at = None;
            })
            .await
            .map_err(|e| TokenError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Explicit sign-out: drop every credential, including the refresh token.
    pub async fn sign_out(&self) -> Result<(), TokenError> {
        *self.inner.cache.lock().unwrap() = None;
        self.inner
            .state
            .update(|s| {
                s.access_token = None;
                s.access_token_expires_at = None;
                s.refresh_token = None;
            })
            .await
            .map_err(|e| TokenError::Storage(e.to_string()))?;
        Ok(())
    }
}

impl Inner {
    async fn acquire(inner: Arc<Inner>) -> Result<CachedToken, TokenError> {
        let state = inner
            .state
            .get()
            .await
            .map_err(|e| TokenError::Storage(e.to_string()))?;

        if let Some(refresh_token) = state.refresh_token {
            debug!("refreshing access token");
            match inner
                .post_token("/oauth/refresh", serde_json::json!({ "refresh_token": refresh_token }))
                .await
            {
                Ok(response) => return inner.store(response).await,
                Err(e) => {
                    warn!(error = %e, "token refresh failed, falling back to interactive authorization");
                }
            }
        }

        let code = inner.authorizer.obtain_code().await?;
        debug!("exchanging authorization code");
        let response = inner
            .post_token(
                "/oauth/exchange",
                serde_json::json!({ "code": code.code, "redirect_uri": code.redirect_uri }),
            )
            .await?;
        inner.store(response).await
    }

    async fn post_token(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<TokenResponse, TokenError> {
        let url = format!("{}{}", self.service_url.trim_end_matches('/'), path);
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TokenError::Exchange(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TokenError::Exchange(format!("{status}: {text}")));
        }
        response
            .json()
            .await
            .map_err(|e| TokenError::Exchange(e.to_string()))
    }

    /// Persist a successful exchange/refresh result. Read-merge-write so a
    /// concurrently written settings field survives.
    async fn store(&self, response: TokenResponse) -> Result<CachedToken, TokenError> {
        let expires_at = now_ms() + response.expires_in * 1000;
        let cached = CachedToken {
            token: response.access_token.clone(),
            expires_at,
        };

        self.state
            .update(|s| {
                s.access_token = Some(response.access_token.clone());
                s.access_token_expires_at = Some(expires_at);
                if let Some(refresh) = response.refresh_token.clone() {
                    s.refresh_token = Some(refresh);
                }
                s.last_error = None;
            })
            .await
            .map_err(|e| TokenError::Storage(e.to_string()))?;

        *self.cache.lock().unwrap() = Some(cached.clone());
        Ok(cached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    struct FailingAuthorizer;

    #[async_trait]
    impl Authorizer for FailingAuthorizer {
        async fn obtain_code(&self) -> Result<AuthorizationCode, TokenError> {
            Err(TokenError::Authorization("no consent in tests".into()))
        }
    }

    fn manager(state: SyncStateRepository) -> TokenManager {
        TokenManager::new("http://127.0.0.1:9", state, Arc::new(FailingAuthorizer))
    }

    #[test]
    fn test_cached_token_leeway() {
        let token = CachedToken {
            token: "t".into(),
            expires_at: 100_000,
        };
        assert!(token.is_valid(80_000));
        // within the 10s leeway counts as expired
        assert!(!token.is_valid(95_000));
        assert!(!token.is_valid(200_000));
    }

    #[tokio::test]
    async fn test_uses_stored_token_without_acquisition() {
        let (_dir, pool) = test_pool().await;
        let state = SyncStateRepository::new(pool);
        state
            .update(|s| {
                s.access_token = Some("stored".into());
                s.access_token_expires_at = Some(now_ms() + 3_600_000);
            })
            .await
            .unwrap();

        let manager = manager(state);
        // The failing authorizer proves no interactive flow runs.
        assert_eq!(manager.get_valid_token().await.unwrap(), "stored");
    }

    #[tokio::test]
    async fn test_expired_token_without_refresh_requires_authorization() {
        let (_dir, pool) = test_pool().await;
        let state = SyncStateRepository::new(pool);
        state
            .update(|s| {
                s.access_token = Some("stale".into());
                s.access_token_expires_at = Some(now_ms() - 1_000);
            })
            .await
            .unwrap();

        let manager = manager(state);
        let err = manager.get_valid_token().await.unwrap_err();
        assert!(matches!(err, TokenError::Authorization(_)));
    }

    #[tokio::test]
    async fn test_invalidate_clears_access_but_keeps_refresh() {
        let (_dir, pool) = test_pool().await;
        let state = SyncStateRepository::new(pool.clone());
        state
            .update(|s| {
                s.access_token = Some("tok".into());
                s.access_token_expires_at = Some(now_ms() + 3_600_000);
                s.refresh_token = Some("refresh".into());
                s.auto_sync = true;
            })
            .await
            .unwrap();

        let manager = manager(state.clone());
        manager.get_valid_token().await.unwrap();
        manager.invalidate().await.unwrap();

        let stored = state.get().await.unwrap();
        assert!(stored.access_token.is_none());
        assert_eq!(stored.refresh_token.as_deref(), Some("refresh"));
        assert!(stored.auto_sync);
    }

    #[tokio::test]
    async fn test_sign_out_drops_refresh_token_too() {
        let (_dir, pool) = test_pool().await;
        let state = SyncStateRepository::new(pool);
        state
            .update(|s| {
                s.access_token = Some("tok".into());
                s.refresh_token = Some("refresh".into());
            })
            .await
            .unwrap();

        let manager = manager(state.clone());
        manager.sign_out().await.unwrap();

        let stored = state.get().await.unwrap();
        assert!(stored.access_token.is_none());
        assert!(stored.refresh_token.is_none());
    }
}
