use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::now_ms;

/// A stored image attachment.
///
/// The id is generated once at creation and doubles as the base name of the
/// remote file (`<id>.<ext>`), joining the local and remote representations.
/// A set `deleted_at` marks the asset as tombstoned: the blob is dropped but
/// the row (and any `drive_id` mapping) is kept so the deletion can propagate
/// on the next sync.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageAsset {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drive_id: Option<String>,
    #[serde(skip)]
    pub blob: Option<Vec<u8>>,
}

impl ImageAsset {
    pub fn new(blob: Vec<u8>, mime: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            file_name: None,
            mime: Some(mime.into()),
            width: None,
            height: None,
            updated_at: now_ms(),
            deleted_at: None,
            drive_id: None,
            blob: Some(blob),
        }
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    /// True when the asset is logically deleted.
    pub fn is_tombstoned(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_asset_has_blob_and_no_tombstone() {
        let asset = ImageAsset::new(vec![1, 2, 3], "image/webp");
        assert!(asset.blob.is_some());
        assert!(!asset.is_tombstoned());
        assert!(asset.drive_id.is_none());
    }
}
