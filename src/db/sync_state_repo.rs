use sqlx::SqlitePool;

use crate::models::{SyncState, PROVIDER};

/// Repository for the single sync-state row.
///
/// Writes only happen through [`Self::update`], a read-merge-write: the
/// latest row is read, the caller's patch is applied, and the result is
/// written back inside one transaction. Token refresh, sync completion and
/// settings toggles all write this row independently; a plain overwrite
/// would let one of them erase another's fields.
#[derive(Clone)]
pub struct SyncStateRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct SyncStateRow {
    drive_folder_id: Option<String>,
    recipes_file_id: Option<String>,
    images_folder_id: Option<String>,
    access_token: Option<String>,
    access_token_expires_at: Option<i64>,
    refresh_token: Option<String>,
    auto_sync: bool,
    last_sync_at: Option<i64>,
    last_error: Option<String>,
}

impl SyncStateRow {
    fn into_state(self) -> SyncState {
        SyncState {
            drive_folder_id: self.drive_folder_id,
            recipes_file_id: self.recipes_file_id,
            images_folder_id: self.images_folder_id,
            access_token: self.access_token,
            access_token_expires_at: self.access_token_expires_at,
            refresh_token: self.refresh_token,
            auto_sync: self.auto_sync,
            last_sync_at: self.last_sync_at,
            last_error: self.last_error,
        }
    }
}

impl SyncStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Read the current state, defaulting when the row does not exist yet.
    pub async fn get(&self) -> Result<SyncState, sqlx::Error> {
        let row: Option<SyncStateRow> =
            sqlx::query_as("SELECT * FROM sync_state WHERE provider = ?")
                .bind(PROVIDER)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(SyncStateRow::into_state).unwrap_or_default())
    }

    /// Read-merge-write: apply `patch` to the latest stored state and persist
    /// the result. Returns the state as written.
    pub async fn update<F>(&self, patch: F) -> Result<SyncState, sqlx::Error>
    where
        F: FnOnce(&mut SyncState),
    {
        let mut tx = self.pool.begin().await?;

        let row: Option<SyncStateRow> =
            sqlx::query_as("SELECT * FROM sync_state WHERE provider = ?")
                .bind(PROVIDER)
                .fetch_optional(&mut *tx)
                .await?;
        let mut state = row.map(SyncStateRow::into_state).unwrap_or_default();

        patch(&mut state);

        sqlx::query(
            r#"
            INSERT INTO sync_state (provider, drive_folder_id, recipes_file_id,
                images_folder_id, access_token, access_token_expires_at,
                refresh_token, auto_sync, last_sync_at, last_error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(provider) DO UPDATE SET
                drive_folder_id = excluded.drive_folder_id,
                recipes_file_id = excluded.recipes_file_id,
                images_folder_id = excluded.images_folder_id,
                access_token = excluded.access_token,
                access_token_expires_at = excluded.access_token_expires_at,
                refresh_token = excluded.refresh_token,
                auto_sync = excluded.auto_sync,
                last_sync_at = excluded.last_sync_at,
                last_error = excluded.last_error
            "#,
        )
        .bind(PROVIDER)
        .bind(&state.drive_folder_id)
        .bind(&state.recipes_file_id)
        .bind(&state.images_folder_id)
        .bind(&state.access_token)
        .bind(state.access_token_expires_at)
        .bind(&state.refresh_token)
        .bind(state.auto_sync)
        .bind(state.last_sync_at)
        .bind(&state.last_error)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn test_get_defaults_when_missing() {
        let (_dir, pool) = test_pool().await;
        let repo = SyncStateRepository::new(pool);

        let state = repo.get().await.unwrap();
        assert_eq!(state, SyncState::default());
    }

    #[tokio::test]
    async fn test_patches_to_different_fields_do_not_clobber() {
        let (_dir, pool) = test_pool().await;
        let repo = SyncStateRepository::new(pool);

        // Settings path writes auto_sync...
        repo.update(|s| s.auto_sync = true).await.unwrap();
        // ...then the token path writes credentials.
        repo.update(|s| {
            s.access_token = Some("tok".into());
            s.refresh_token = Some("refresh".into());
        })
        .await
        .unwrap();
        // ...then sync completion writes bookkeeping.
        let state = repo
            .update(|s| {
                s.last_sync_at = Some(123);
                s.last_error = None;
            })
            .await
            .unwrap();

        assert!(state.auto_sync);
        assert_eq!(state.access_token.as_deref(), Some("tok"));
        assert_eq!(state.refresh_token.as_deref(), Some("refresh"));
        assert_eq!(state.last_sync_at, Some(123));
    }

    #[tokio::test]
    async fn test_update_returns_written_state() {
        let (_dir, pool) = test_pool().await;
        let repo = SyncStateRepository::new(pool);

        let written = repo
            .update(|s| s.drive_folder_id = Some("folder".into()))
            .await
            .unwrap();
        assert_eq!(written.drive_folder_id.as_deref(), Some("folder"));
        assert_eq!(repo.get().await.unwrap(), written);
    }
}
