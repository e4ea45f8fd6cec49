use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::now_ms;

/// An ingredient line within a recipe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngredientRef {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl IngredientRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            quantity: None,
            note: None,
        }
    }
}

/// A single preparation step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecipeStep {
    pub id: String,
    pub order: u32,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_min: Option<u32>,
}

impl RecipeStep {
    pub fn new(order: u32, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            order,
            text: text.into(),
            duration_min: None,
        }
    }
}

/// A recipe record. Field names serialize camelCase because the same shape
/// travels in the remote recipes file.
///
/// `created_at`/`updated_at` are epoch milliseconds. The repository stamps
/// them on create/update; only the sync merge writes them through verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servings: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prep_time_min: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cook_time_min: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_time_min: Option<i32>,
    #[serde(default)]
    pub favorite: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub ingredients: Vec<IngredientRef>,
    #[serde(default)]
    pub steps: Vec<RecipeStep>,
    #[serde(default)]
    pub image_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Recipe {
    pub fn new(title: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            description: None,
            servings: None,
            prep_time_min: None,
            cook_time_min: None,
            total_time_min: None,
            favorite: false,
            tags: Vec::new(),
            categories: Vec::new(),
            ingredients: Vec::new(),
            steps: Vec::new(),
            image_ids: Vec::new(),
            source_url: None,
            source_name: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_servings(mut self, servings: i32) -> Self {
        self.servings = Some(servings);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stamps_matching_timestamps() {
        let recipe = Recipe::new("Pancakes");
        assert!(!recipe.id.is_empty());
        assert_eq!(recipe.created_at, recipe.updated_at);
        assert!(recipe.created_at > 0);
    }

    #[test]
    fn test_wire_field_names_are_camel_case() {
        let recipe = Recipe::new("Pancakes").with_servings(4);
        let json = serde_json::to_value(&recipe).unwrap();
        assert!(json.get("updatedAt").is_some());
        assert!(json.get("createdAt").is_some());
        assert!(json.get("imageIds").is_some());
        assert!(json.get("updated_at").is_none());
    }

    #[test]
    fn test_deserialize_minimal_payload() {
        // Imported payloads may omit every optional field.
        let json = r#"{"id":"r1","title":"Soup","createdAt":5,"updatedAt":9}"#;
        let recipe: Recipe = serde_json::from_str(json).unwrap();
        assert_eq!(recipe.id, "r1");
        assert_eq!(recipe.updated_at, 9);
        assert!(recipe.tags.is_empty());
        assert!(!recipe.favorite);
    }
}
