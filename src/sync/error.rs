//! Sync error taxonomy.
//!
//! Transient network failures are retried inside the Drive client and only
//! surface here once retries exhaust. Per-image failures are logged and
//! skipped by the engine; everything else propagates to the caller.

use thiserror::Error;

/// Errors from token acquisition and refresh.
///
/// Clone because an in-flight acquisition is shared by every concurrent
/// caller, and each of them receives the same settled result.
#[derive(Debug, Clone, Error)]
pub enum TokenError {
    #[error("Google Drive is not configured. Set drive.client_id and drive.token_service_url in config.")]
    NotConfigured,
    #[error("interactive authorization failed: {0}")]
    Authorization(String),
    #[error("token exchange failed: {0}")]
    Exchange(String),
    #[error("token storage failed: {0}")]
    Storage(String),
}

/// Errors from a sync pass or a Drive operation.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("network error: {0}")]
    Network(String),
    #[error("Drive API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("remote layout error: {0}")]
    Layout(String),
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

impl SyncError {
    /// True for the 403/404 class the engine self-heals from by recreating
    /// the remote object.
    pub fn is_missing_remote(&self) -> bool {
        matches!(self, SyncError::Api { status: 403 | 404, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_missing_remote() {
        let gone = SyncError::Api {
            status: 404,
            body: String::new(),
        };
        let forbidden = SyncError::Api {
            status: 403,
            body: String::new(),
        };
        let rate_limited = SyncError::Api {
            status: 429,
            body: String::new(),
        };
        assert!(gone.is_missing_remote());
        assert!(forbidden.is_missing_remote());
        assert!(!rate_limited.is_missing_remote());
    }
}
