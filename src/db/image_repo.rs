use std::collections::HashSet;

use sqlx::SqlitePool;

use crate::models::ImageAsset;

pub struct ImageRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct ImageRow {
    id: String,
    file_name: Option<String>,
    mime: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    updated_at: i64,
    deleted_at: Option<i64>,
    drive_id: Option<String>,
    blob: Option<Vec<u8>>,
}

impl ImageRow {
    fn into_asset(self) -> ImageAsset {
        ImageAsset {
            id: self.id,
            file_name: self.file_name,
            mime: self.mime,
            width: self.width,
            height: self.height,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
            drive_id: self.drive_id,
            blob: self.blob,
        }
    }
}

impl ImageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<ImageAsset>, sqlx::Error> {
        let row: Option<ImageRow> = sqlx::query_as("SELECT * FROM images WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(ImageRow::into_asset))
    }

    pub async fn list(&self) -> Result<Vec<ImageAsset>, sqlx::Error> {
        let rows: Vec<ImageRow> = sqlx::query_as("SELECT * FROM images ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(ImageRow::into_asset).collect())
    }

    /// Insert or replace an asset exactly as given. Used by the sync engine,
    /// which controls timestamps explicitly.
    pub async fn upsert(&self, asset: &ImageAsset) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO images (id, file_name, mime, width, height, updated_at,
                deleted_at, drive_id, blob)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                file_name = excluded.file_name,
                mime = excluded.mime,
                width = excluded.width,
                height = excluded.height,
                updated_at = excluded.updated_at,
                deleted_at = excluded.deleted_at,
                drive_id = excluded.drive_id,
                blob = excluded.blob
            "#,
        )
        .bind(&asset.id)
        .bind(&asset.file_name)
        .bind(&asset.mime)
        .bind(asset.width)
        .bind(asset.height)
        .bind(asset.updated_at)
        .bind(asset.deleted_at)
        .bind(&asset.drive_id)
        .bind(&asset.blob)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Soft delete: drop the blob to free space, stamp `deleted_at`, keep the
    /// drive mapping so the deletion propagates on the next push.
    pub async fn tombstone(&self, id: &str, deleted_at: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE images SET deleted_at = ?, blob = NULL WHERE id = ?")
            .bind(deleted_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record (or confirm) the remote file mapping for an asset.
    pub async fn set_drive_id(&self, id: &str, drive_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE images SET drive_id = ? WHERE id = ?")
            .bind(drive_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Tombstone every live asset whose id is not referenced by any recipe.
    /// Returns the ids that were tombstoned.
    pub async fn tombstone_unreferenced(
        &self,
        referenced: &HashSet<String>,
        now: i64,
    ) -> Result<Vec<String>, sqlx::Error> {
        let live: Vec<(String,)> =
            sqlx::query_as("SELECT id FROM images WHERE deleted_at IS NULL")
                .fetch_all(&self.pool)
                .await?;

        let mut orphaned = Vec::new();
        for (id,) in live {
            if !referenced.contains(&id) {
                self.tombstone(&id, now).await?;
                orphaned.push(id);
            }
        }
        Ok(orphaned)
    }

    /// Permanently remove tombstoned assets whose deletion is older than the
    /// cutoff. Returns the number of rows purged.
    pub async fn purge_tombstoned_before(&self, cutoff: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM images WHERE deleted_at IS NOT NULL AND deleted_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn test_tombstone_clears_blob_and_keeps_mapping() {
        let (_dir, pool) = test_pool().await;
        let repo = ImageRepository::new(pool);

        let mut asset = ImageAsset::new(vec![1, 2, 3], "image/png");
        asset.drive_id = Some("drv1".into());
        repo.upsert(&asset).await.unwrap();

        repo.tombstone(&asset.id, 500).await.unwrap();

        let stored = repo.get_by_id(&asset.id).await.unwrap().unwrap();
        assert_eq!(stored.deleted_at, Some(500));
        assert!(stored.blob.is_none());
        assert_eq!(stored.drive_id.as_deref(), Some("drv1"));
    }

    #[tokio::test]
    async fn test_tombstone_unreferenced_skips_referenced_and_dead() {
        let (_dir, pool) = test_pool().await;
        let repo = ImageRepository::new(pool);

        let kept = ImageAsset::new(vec![1], "image/png");
        let orphan = ImageAsset::new(vec![2], "image/png");
        let mut dead = ImageAsset::new(vec![3], "image/png");
        dead.deleted_at = Some(10);
        dead.blob = None;
        repo.upsert(&kept).await.unwrap();
        repo.upsert(&orphan).await.unwrap();
        repo.upsert(&dead).await.unwrap();

        let referenced: HashSet<String> = [kept.id.clone()].into_iter().collect();
        let orphaned = repo.tombstone_unreferenced(&referenced, 999).await.unwrap();

        assert_eq!(orphaned, vec![orphan.id.clone()]);
        let stored = repo.get_by_id(&orphan.id).await.unwrap().unwrap();
        assert_eq!(stored.deleted_at, Some(999));
        // already-tombstoned asset keeps its original stamp
        let dead_stored = repo.get_by_id(&dead.id).await.unwrap().unwrap();
        assert_eq!(dead_stored.deleted_at, Some(10));
    }

    #[tokio::test]
    async fn test_purge_respects_cutoff() {
        let (_dir, pool) = test_pool().await;
        let repo = ImageRepository::new(pool);

        let mut old = ImageAsset::new(vec![1], "image/png");
        old.deleted_at = Some(100);
        old.blob = None;
        let mut recent = ImageAsset::new(vec![2], "image/png");
        recent.deleted_at = Some(900);
        recent.blob = None;
        repo.upsert(&old).await.unwrap();
        repo.upsert(&recent).await.unwrap();

        let purged = repo.purge_tombstoned_before(500).await.unwrap();
        assert_eq!(purged, 1);
        assert!(repo.get_by_id(&old.id).await.unwrap().is_none());
        assert!(repo.get_by_id(&recent.id).await.unwrap().is_some());
    }
}
