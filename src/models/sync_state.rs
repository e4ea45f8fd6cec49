use serde::{Deserialize, Serialize};

/// Fixed key of the single sync-state row.
pub const PROVIDER: &str = "google-drive";

/// Persistent state for the Google Drive connection: remote layout ids,
/// credentials, and sync bookkeeping.
///
/// Credential fields and settings fields are written by independent code
/// paths, so every write must go through
/// [`SyncStateRepository::update`](crate::db::SyncStateRepository::update) —
/// an unconditional overwrite can silently destroy a concurrently stored
/// token.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncState {
    pub drive_folder_id: Option<String>,
    pub recipes_file_id: Option<String>,
    pub images_folder_id: Option<String>,
    pub access_token: Option<String>,
    pub access_token_expires_at: Option<i64>,
    pub refresh_token: Option<String>,
    pub auto_sync: bool,
    pub last_sync_at: Option<i64>,
    pub last_error: Option<String>,
}

impl SyncState {
    /// True when a connection has been established at least once.
    pub fn is_connected(&self) -> bool {
        self.access_token.is_some() || self.refresh_token.is_some()
    }
}
