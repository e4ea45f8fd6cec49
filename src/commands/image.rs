use std::path::{Path, PathBuf};

use clap::{Args, Subcommand};
use image::GenericImageView;

use crate::db::{ImageRepository, RecipeRepository};
use crate::models::{now_ms, ImageAsset};

/// Manage recipe images
#[derive(Args)]
pub struct ImageCommand {
    #[command(subcommand)]
    pub command: ImageSubcommand,
}

#[derive(Subcommand)]
pub enum ImageSubcommand {
    /// Attach an image file to a recipe
    Add {
        /// Recipe ID
        recipe_id: String,

        /// Path to the image file
        path: PathBuf,
    },

    /// List stored images
    List,

    /// Detach and delete an image
    Remove {
        /// Image ID
        id: String,
    },
}

impl ImageCommand {
    pub async fn run(
        &self,
        images: &ImageRepository,
        recipes: &RecipeRepository,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ImageSubcommand::Add { recipe_id, path } => {
                let mut recipe = recipes
                    .get_by_id(recipe_id)
                    .await?
                    .ok_or_else(|| format!("Recipe not found: {}", recipe_id))?;

                let blob = std::fs::read(path)?;
                let mut asset = ImageAsset::new(blob, mime_for_path(path));
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    asset = asset.with_file_name(name);
                }
                // Dimensions are best-effort display metadata.
                if let Ok(decoded) = image::load_from_memory(asset.blob.as_deref().unwrap_or(&[]))
                {
                    let (width, height) = decoded.dimensions();
                    asset = asset.with_dimensions(width, height);
                }

                images.upsert(&asset).await?;
                recipe.image_ids.push(asset.id.clone());
                recipes.update(recipe).await?;

                println!("Attached image {} to recipe {}", asset.id, recipe_id);
                Ok(())
            }
            ImageSubcommand::List => {
                let assets = images.list().await?;
                if assets.is_empty() {
                    println!("No images stored.");
                    return Ok(());
                }
                for asset in &assets {
                    let status = if asset.is_tombstoned() {
                        "deleted"
                    } else if asset.drive_id.is_some() {
                        "synced"
                    } else {
                        "local"
                    };
                    let size = match (asset.width, asset.height) {
                        (Some(w), Some(h)) => format!("{}x{}", w, h),
                        _ => "?".to_string(),
                    };
                    println!(
                        "{}  {:7}  {:9}  {}",
                        asset.id,
                        status,
                        size,
                        asset.file_name.as_deref().unwrap_or("-")
                    );
                }
                Ok(())
            }
            ImageSubcommand::Remove { id } => {
                images
                    .get_by_id(id)
                    .await?
                    .ok_or_else(|| format!("Image not found: {}", id))?;

                // Drop the reference from any recipe, then tombstone so the
                // deletion propagates on the next sync.
                for mut recipe in recipes.list().await? {
                    if recipe.image_ids.iter().any(|i| i == id) {
                        recipe.image_ids.retain(|i| i != id);
                        recipes.update(recipe).await?;
                    }
                }
                images.tombstone(id, now_ms()).await?;

                println!("Removed image {}", id);
                Ok(())
            }
        }
    }
}

fn mime_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("webp") => "image/webp",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_for_path() {
        assert_eq!(mime_for_path(Path::new("a.webp")), "image/webp");
        assert_eq!(mime_for_path(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(mime_for_path(Path::new("a.jpeg")), "image/jpeg");
        assert_eq!(mime_for_path(Path::new("a")), "application/octet-stream");
    }
}
