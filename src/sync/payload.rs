//! Wire format of the remote recipe database file.
//!
//! `recipes.json` on the remote carries a versioned envelope so a future
//! format change can be detected instead of silently misread.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::models::Recipe;

pub const PAYLOAD_FORMAT: &str = "recipebox.sync.v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePayload {
    pub format: String,
    pub exported_at: String,
    pub data: PayloadData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadData {
    #[serde(default)]
    pub recipes: Vec<Recipe>,
}

impl RemotePayload {
    pub fn new(recipes: Vec<Recipe>) -> Self {
        Self {
            format: PAYLOAD_FORMAT.to_string(),
            exported_at: Utc::now().to_rfc3339(),
            data: PayloadData { recipes },
        }
    }

    /// Starting point when the remote file is missing or unreadable.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wire_names() {
        let payload = RemotePayload::new(vec![Recipe::new("Pancakes")]);
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["format"], PAYLOAD_FORMAT);
        assert!(json["exportedAt"].is_string());
        assert_eq!(json["data"]["recipes"][0]["title"], "Pancakes");
    }

    #[test]
    fn test_missing_recipes_defaults_to_empty() {
        let payload: RemotePayload = serde_json::from_str(
            r#"{"format":"recipebox.sync.v1","exportedAt":"2026-01-01T00:00:00Z","data":{}}"#,
        )
        .unwrap();
        assert!(payload.data.recipes.is_empty());
    }
}
