mod image;
mod recipe;
mod sync_state;

pub use image::ImageAsset;
pub use recipe::{IngredientRef, Recipe, RecipeStep};
pub use sync_state::{SyncState, PROVIDER};

/// Current time as epoch milliseconds, the logical timestamp unit used by
/// every entity and by the remote payload.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
