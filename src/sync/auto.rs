//! Automatic synchronization around CLI commands.
//!
//! Runs a sync pass before read commands and after successful write commands
//! when `auto_sync` is enabled. Any failure degrades gracefully: the CLI must
//! keep working offline, so errors are logged and swallowed.

use tracing::{debug, warn};

use super::engine::SyncEngine;
use crate::db::SyncStateRepository;

pub async fn try_auto_sync(engine: &SyncEngine, state: &SyncStateRepository) {
    let current = match state.get().await {
        Ok(state) => state,
        Err(e) => {
            warn!(error = %e, "auto-sync: could not read sync state");
            return;
        }
    };
    if !current.auto_sync || !current.is_connected() {
        debug!("auto-sync disabled or not connected, skipping");
        return;
    }

    if let Err(e) = engine.sync_now().await {
        warn!(error = %e, "auto-sync failed");
    }
}
