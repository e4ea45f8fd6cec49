//! One full synchronization pass against the remote store.
//!
//! `sync_now` serializes its steps because each depends on the previous:
//! layout, recipe merge, image reconciliation, payload upload, state persist.
//! Pull runs before push so a stale local copy is never uploaded over a newer
//! remote one, remote-deletion detection runs before push so a deletion from
//! another device is not undone by a re-upload, and orphan collection runs
//! after the recipe merge so it sees the authoritative reference set.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;
use std::time::Duration;

use image::GenericImageView;
use tracing::{debug, info, warn};

use super::drive::{DriveClient, DriveFileMeta};
use super::error::SyncError;
use super::payload::RemotePayload;
use crate::db::{ImageRepository, RecipeRepository, SyncStateRepository};
use crate::models::{now_ms, ImageAsset, Recipe};

const APP_ROOT: &str = "RecipeBox";
const DB_FOLDER: &str = "db";
const IMAGES_FOLDER: &str = "images";
const RECIPES_FILE: &str = "recipes.json";
const PAYLOAD_MIME: &str = "application/json";

/// Tombstoned assets are purged after this window.
const RETENTION_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// How long a pass waits for a concurrent pass to finish before running
/// unguarded instead of deadlocking.
const LOCK_WAIT: Duration = Duration::from_secs(5);

fn sync_lock() -> &'static tokio::sync::Mutex<()> {
    static LOCK: OnceLock<tokio::sync::Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| tokio::sync::Mutex::new(()))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncReport {
    pub uploaded: usize,
    pub downloaded: usize,
    pub merged: usize,
}

struct RemoteLayout {
    db_folder_id: String,
    images_folder_id: String,
    recipes_file_id: String,
}

pub struct SyncEngine {
    drive: DriveClient,
    recipes: RecipeRepository,
    images: ImageRepository,
    state: SyncStateRepository,
}

impl SyncEngine {
    pub fn new(
        drive: DriveClient,
        recipes: RecipeRepository,
        images: ImageRepository,
        state: SyncStateRepository,
    ) -> Self {
        Self {
            drive,
            recipes,
            images,
            state,
        }
    }

    /// Run one full pass. On success `last_sync_at` is stamped and
    /// `last_error` cleared; on failure the error message is persisted and
    /// the error propagated.
    pub async fn sync_now(&self) -> Result<SyncReport, SyncError> {
        let _guard = match tokio::time::timeout(LOCK_WAIT, sync_lock().lock()).await {
            Ok(guard) => Some(guard),
            Err(_) => {
                warn!("sync lock still held after {LOCK_WAIT:?}, running unguarded");
                None
            }
        };

        match self.run_pass().await {
            Ok(report) => {
                self.state
                    .update(|s| {
                        s.last_sync_at = Some(now_ms());
                        s.last_error = None;
                    })
                    .await?;
                info!(
                    uploaded = report.uploaded,
                    downloaded = report.downloaded,
                    merged = report.merged,
                    "sync complete"
                );
                Ok(report)
            }
            Err(e) => {
                let message = e.to_string();
                if let Err(persist) = self
                    .state
                    .update(|s| s.last_error = Some(message.clone()))
                    .await
                {
                    warn!(error = %persist, "failed to record sync error");
                }
                Err(e)
            }
        }
    }

    async fn run_pass(&self) -> Result<SyncReport, SyncError> {
        let mut layout = self.ensure_layout().await?;

        let local = self.recipes.list().await?;
        let remote = match self
            .drive
            .download_json::<RemotePayload>(&layout.recipes_file_id)
            .await
        {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "could not read remote recipes file, treating as empty");
                RemotePayload::empty()
            }
        };

        let downloaded = remote.data.recipes.len();
        let merged = lww_merge(local, remote.data.recipes);
        self.recipes.replace_all(&merged).await?;

        self.reconcile_images(&layout, &merged).await?;

        self.upload_payload(&mut layout, &RemotePayload::new(merged.clone()))
            .await?;

        Ok(SyncReport {
            uploaded: merged.len(),
            downloaded,
            merged: merged.len(),
        })
    }

    /// Ensure the remote folder tree and the recipes database file exist, and
    /// persist their ids.
    async fn ensure_layout(&self) -> Result<RemoteLayout, SyncError> {
        let db_folder_id = self.drive.ensure_path(&[APP_ROOT, DB_FOLDER]).await?;
        let images_folder_id = self.drive.ensure_path(&[APP_ROOT, IMAGES_FOLDER]).await?;

        let recipes_file_id = match self
            .drive
            .find_by_name(RECIPES_FILE, Some(&db_folder_id))
            .await?
        {
            Some(id) => id,
            None => {
                debug!("remote recipes file missing, creating empty one");
                let body = serde_json::to_vec(&RemotePayload::empty())?;
                self.drive
                    .upload_new(RECIPES_FILE, &db_folder_id, PAYLOAD_MIME, body)
                    .await?
            }
        };

        let layout = RemoteLayout {
            db_folder_id,
            images_folder_id,
            recipes_file_id,
        };
        self.state
            .update(|s| {
                s.drive_folder_id = Some(layout.db_folder_id.clone());
                s.images_folder_id = Some(layout.images_folder_id.clone());
                s.recipes_file_id = Some(layout.recipes_file_id.clone());
            })
            .await?;
        Ok(layout)
    }

    /// Overwrite the remote recipes file. A 403/404 means the file vanished
    /// (or this client's mapping is stale): recreate it under the known db
    /// folder and persist the new id.
    async fn upload_payload(
        &self,
        layout: &mut RemoteLayout,
        payload: &RemotePayload,
    ) -> Result<(), SyncError> {
        let body = serde_json::to_vec(payload)?;
        match self
            .drive
            .update_content(&layout.recipes_file_id, PAYLOAD_MIME, body.clone())
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_missing_remote() => {
                warn!(error = %e, "remote recipes file rejected update, recreating");
                let new_id = self
                    .drive
                    .upload_new(RECIPES_FILE, &layout.db_folder_id, PAYLOAD_MIME, body)
                    .await?;
                layout.recipes_file_id = new_id.clone();
                self.state
                    .update(|s| s.recipes_file_id = Some(new_id.clone()))
                    .await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn reconcile_images(
        &self,
        layout: &RemoteLayout,
        merged: &[Recipe],
    ) -> Result<(), SyncError> {
        let remote_files = self.drive.list(&layout.images_folder_id).await?;

        let by_file_id: HashMap<&str, &DriveFileMeta> =
            remote_files.iter().map(|f| (f.id.as_str(), f)).collect();
        let by_asset_id: HashMap<String, &DriveFileMeta> = remote_files
            .iter()
            .map(|f| (asset_id_from_name(&f.name).to_string(), f))
            .collect();

        self.pull_images(&by_asset_id).await?;
        self.detect_remote_deletions(&by_file_id, &by_asset_id)
            .await?;
        self.push_images(layout, &by_file_id, &by_asset_id).await?;

        let now = now_ms();
        let referenced: HashSet<String> = merged
            .iter()
            .flat_map(|r| r.image_ids.iter().cloned())
            .collect();
        let orphaned = self.images.tombstone_unreferenced(&referenced, now).await?;
        if !orphaned.is_empty() {
            info!(count = orphaned.len(), "tombstoned unreferenced images");
        }

        let purged = self
            .images
            .purge_tombstoned_before(now - RETENTION_MS)
            .await?;
        if purged > 0 {
            debug!(purged, "purged expired image tombstones");
        }
        Ok(())
    }

    /// Download every remote image that is newer than (or missing from) the
    /// local store. A single image's failure is logged and skipped.
    async fn pull_images(
        &self,
        by_asset_id: &HashMap<String, &DriveFileMeta>,
    ) -> Result<(), SyncError> {
        for (asset_id, meta) in by_asset_id {
            let local = self.images.get_by_id(asset_id).await?;
            let remote_ms = meta.modified_ms();
            if !pull_needed(local.as_ref(), remote_ms) {
                continue;
            }

            let blob = match self.drive.download_bytes(&meta.id).await {
                Ok(blob) => blob,
                Err(e) => {
                    warn!(asset_id, error = %e, "image download failed, skipping");
                    continue;
                }
            };

            let dims = decode_dimensions(&blob);
            let asset = ImageAsset {
                id: asset_id.clone(),
                file_name: Some(meta.name.clone()),
                mime: meta
                    .mime_type
                    .clone()
                    .or_else(|| Some(mime_for_name(&meta.name).to_string())),
                width: dims.map(|(w, _)| w),
                height: dims.map(|(_, h)| h),
                // A clock far behind the remote would otherwise make the
                // pulled copy immediately look stale.
                updated_at: remote_ms.max(now_ms()),
                deleted_at: None,
                drive_id: Some(meta.id.clone()),
                blob: Some(blob),
            };
            self.images.upsert(&asset).await?;
            debug!(asset_id, "pulled remote image");
        }
        Ok(())
    }

    /// An asset this client previously uploaded that no longer appears in the
    /// remote listing was deleted from another device: tombstone it locally.
    ///
    /// Only assets with a recorded `drive_id` are considered, so a never-
    /// uploaded local asset is never mistaken for a deletion. The flip side:
    /// an asset whose upload succeeded but whose mapping write failed looks
    /// never-uploaded here and survives a genuine remote deletion.
    async fn detect_remote_deletions(
        &self,
        by_file_id: &HashMap<&str, &DriveFileMeta>,
        by_asset_id: &HashMap<String, &DriveFileMeta>,
    ) -> Result<(), SyncError> {
        let now = now_ms();
        for asset in self.images.list().await? {
            if asset.is_tombstoned() {
                continue;
            }
            let Some(drive_id) = &asset.drive_id else {
                continue;
            };
            if by_file_id.contains_key(drive_id.as_str()) || by_asset_id.contains_key(&asset.id) {
                continue;
            }
            info!(asset_id = %asset.id, "remote image deleted, tombstoning locally");
            self.images.tombstone(&asset.id, now).await?;
        }
        Ok(())
    }

    async fn push_images(
        &self,
        layout: &RemoteLayout,
        by_file_id: &HashMap<&str, &DriveFileMeta>,
        by_asset_id: &HashMap<String, &DriveFileMeta>,
    ) -> Result<(), SyncError> {
        for asset in self.images.list().await? {
            let remote = asset
                .drive_id
                .as_deref()
                .and_then(|id| by_file_id.get(id).copied())
                .or_else(|| by_asset_id.get(&asset.id).copied());

            if let Err(e) = self.push_one(layout, &asset, remote).await {
                warn!(asset_id = %asset.id, error = %e, "image push failed, skipping");
            }
        }
        Ok(())
    }

    async fn push_one(
        &self,
        layout: &RemoteLayout,
        asset: &ImageAsset,
        remote: Option<&DriveFileMeta>,
    ) -> Result<(), SyncError> {
        let mime = asset.mime.as_deref().unwrap_or("application/octet-stream");

        if asset.is_tombstoned() {
            // Never re-upload a tombstoned asset; propagate the deletion.
            if let Some(remote) = remote {
                debug!(asset_id = %asset.id, "trashing remote copy of deleted image");
                self.drive.trash(&remote.id).await?;
            }
            return Ok(());
        }

        let Some(remote) = remote else {
            let Some(blob) = &asset.blob else {
                return Ok(());
            };
            let name = format!("{}.{}", asset.id, ext_for_mime(mime));
            let drive_id = self
                .drive
                .upload_new(&name, &layout.images_folder_id, mime, blob.clone())
                .await?;
            self.images.set_drive_id(&asset.id, &drive_id).await?;
            debug!(asset_id = %asset.id, "uploaded new image");
            return Ok(());
        };

        if asset.updated_at > remote.modified_ms() {
            if let Some(blob) = &asset.blob {
                self.drive
                    .update_content(&remote.id, mime, blob.clone())
                    .await?;
                debug!(asset_id = %asset.id, "updated remote image content");
            }
        }
        if asset.drive_id.is_none() {
            self.images.set_drive_id(&asset.id, &remote.id).await?;
        }
        Ok(())
    }
}

/// Last-writer-wins merge over the union of recipe ids; the local version
/// wins exact timestamp ties. Result is sorted by `updated_at` descending.
fn lww_merge(local: Vec<Recipe>, remote: Vec<Recipe>) -> Vec<Recipe> {
    let mut by_id: HashMap<String, Recipe> = HashMap::new();
    for recipe in remote {
        by_id.insert(recipe.id.clone(), recipe);
    }
    for recipe in local {
        match by_id.get(&recipe.id) {
            Some(existing) if existing.updated_at > recipe.updated_at => {}
            _ => {
                by_id.insert(recipe.id.clone(), recipe);
            }
        }
    }
    let mut merged: Vec<Recipe> = by_id.into_values().collect();
    merged.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    merged
}

/// Whether a remote image should be downloaded over the local state.
/// A local tombstone at or after the remote modified time blocks the pull so
/// a deletion is not resurrected by an older remote copy.
fn pull_needed(local: Option<&ImageAsset>, remote_ms: i64) -> bool {
    let Some(asset) = local else {
        return true;
    };
    if let Some(deleted_at) = asset.deleted_at {
        return remote_ms > deleted_at;
    }
    asset.blob.is_none() || remote_ms > asset.updated_at
}

/// The remote file's base name (extension stripped) is the asset id.
fn asset_id_from_name(name: &str) -> &str {
    name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name)
}

fn ext_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/webp" => "webp",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        _ => "bin",
    }
}

fn mime_for_name(name: &str) -> &'static str {
    match name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("webp") => "image/webp",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

fn decode_dimensions(blob: &[u8]) -> Option<(u32, u32)> {
    image::load_from_memory(blob).ok().map(|img| img.dimensions())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipe(id: &str, updated_at: i64) -> Recipe {
        let mut r = Recipe::new(format!("Recipe {id}"));
        r.id = id.to_string();
        r.updated_at = updated_at;
        r
    }

    #[test]
    fn test_merge_is_idempotent() {
        let set = vec![recipe("a", 100), recipe("b", 50)];
        let merged = lww_merge(set.clone(), set.clone());
        assert_eq!(merged, set);
    }

    #[test]
    fn test_merge_local_wins_when_newer() {
        let local = recipe("r1", 100);
        let remote = recipe("r1", 50);
        let merged = lww_merge(vec![local.clone()], vec![remote]);
        assert_eq!(merged, vec![local]);
    }

    #[test]
    fn test_merge_local_wins_exact_ties() {
        let mut local = recipe("r1", 100);
        local.title = "local".into();
        let mut remote = recipe("r1", 100);
        remote.title = "remote".into();

        let merged = lww_merge(vec![local], vec![remote]);
        assert_eq!(merged[0].title, "local");
    }

    #[test]
    fn test_merge_keeps_one_sided_records() {
        let local = recipe("l1", 100);
        let remote = recipe("r2", 10);
        let merged = lww_merge(vec![local.clone()], vec![remote.clone()]);

        assert_eq!(merged.len(), 2);
        // one-sided remote record carried over unchanged
        assert!(merged.contains(&remote));
        assert!(merged.contains(&local));
    }

    #[test]
    fn test_merge_sorts_by_updated_at_descending() {
        let merged = lww_merge(
            vec![recipe("a", 10), recipe("b", 300)],
            vec![recipe("c", 200)],
        );
        let stamps: Vec<i64> = merged.iter().map(|r| r.updated_at).collect();
        assert_eq!(stamps, vec![300, 200, 10]);
    }

    fn asset(updated_at: i64) -> ImageAsset {
        let mut a = ImageAsset::new(vec![1, 2, 3], "image/webp");
        a.updated_at = updated_at;
        a
    }

    #[test]
    fn test_pull_needed_when_absent_locally() {
        assert!(pull_needed(None, 1_000));
    }

    #[test]
    fn test_pull_needed_when_remote_strictly_newer() {
        let local = asset(100);
        assert!(pull_needed(Some(&local), 200));
        assert!(!pull_needed(Some(&local), 100));
        assert!(!pull_needed(Some(&local), 50));
    }

    #[test]
    fn test_pull_needed_when_blob_missing() {
        let mut local = asset(1_000);
        local.blob = None;
        assert!(pull_needed(Some(&local), 10));
    }

    #[test]
    fn test_pull_blocked_by_recent_tombstone() {
        let mut local = asset(100);
        local.blob = None;
        local.deleted_at = Some(500);
        // remote at or before the deletion must not resurrect the image
        assert!(!pull_needed(Some(&local), 500));
        assert!(!pull_needed(Some(&local), 400));
        // a strictly newer remote version does come back
        assert!(pull_needed(Some(&local), 501));
    }

    #[test]
    fn test_asset_id_from_name_strips_last_extension() {
        assert_eq!(asset_id_from_name("im2.webp"), "im2");
        assert_eq!(asset_id_from_name("archive.tar.gz"), "archive.tar");
        assert_eq!(asset_id_from_name("noext"), "noext");
    }

    #[test]
    fn test_mime_extension_mapping() {
        assert_eq!(ext_for_mime("image/webp"), "webp");
        assert_eq!(ext_for_mime("image/jpeg"), "jpg");
        assert_eq!(ext_for_mime("text/plain"), "bin");
        assert_eq!(mime_for_name("a.webp"), "image/webp");
        assert_eq!(mime_for_name("a.jpeg"), "image/jpeg");
        assert_eq!(mime_for_name("a"), "application/octet-stream");
    }
}
