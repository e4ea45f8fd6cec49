use clap::{Args, Subcommand, ValueEnum};

use crate::db::RecipeRepository;
use crate::models::{IngredientRef, Recipe, RecipeStep};

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Manage recipes
#[derive(Args)]
pub struct RecipeCommand {
    #[command(subcommand)]
    pub command: RecipeSubcommand,
}

#[derive(Subcommand)]
pub enum RecipeSubcommand {
    /// Add a new recipe
    Add {
        /// Recipe title
        title: String,

        /// Short description
        #[arg(long, short)]
        description: Option<String>,

        /// Number of servings
        #[arg(long, short)]
        servings: Option<i32>,

        /// Tag (can be repeated)
        #[arg(long = "tag", value_name = "TAG")]
        tags: Vec<String>,

        /// Ingredient name (can be repeated)
        #[arg(long = "ingredient", value_name = "NAME")]
        ingredients: Vec<String>,

        /// Preparation step, in order (can be repeated)
        #[arg(long = "step", value_name = "TEXT")]
        steps: Vec<String>,
    },

    /// List all recipes
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show a recipe
    Show {
        /// Recipe ID
        id: String,
    },

    /// Delete a recipe
    Delete {
        /// Recipe ID
        id: String,
    },

    /// Mark a recipe as favorite (or clear with --unset)
    Favorite {
        /// Recipe ID
        id: String,

        /// Clear the favorite flag instead of setting it
        #[arg(long)]
        unset: bool,
    },
}

impl RecipeCommand {
    pub async fn run(&self, repo: &RecipeRepository) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            RecipeSubcommand::Add {
                title,
                description,
                servings,
                tags,
                ingredients,
                steps,
            } => {
                let mut recipe = Recipe::new(title).with_tags(tags.clone());
                if let Some(description) = description {
                    recipe = recipe.with_description(description);
                }
                if let Some(servings) = servings {
                    recipe = recipe.with_servings(*servings);
                }
                recipe.ingredients = ingredients.iter().map(IngredientRef::new).collect();
                recipe.steps = steps
                    .iter()
                    .enumerate()
                    .map(|(i, text)| RecipeStep::new(i as u32 + 1, text))
                    .collect();

                let created = repo.create(recipe).await?;
                println!("Added recipe '{}' ({})", created.title, created.id);
                Ok(())
            }
            RecipeSubcommand::List { format } => {
                let recipes = repo.list().await?;
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&recipes)?);
                    }
                    OutputFormat::Text => {
                        if recipes.is_empty() {
                            println!("No recipes yet. Add one with 'recipebox recipe add'.");
                            return Ok(());
                        }
                        for recipe in &recipes {
                            let star = if recipe.favorite { "* " } else { "  " };
                            println!("{}{}  {}", star, recipe.id, recipe.title);
                        }
                        println!();
                        println!("{} recipe(s)", recipes.len());
                    }
                }
                Ok(())
            }
            RecipeSubcommand::Show { id } => {
                let recipe = repo
                    .get_by_id(id)
                    .await?
                    .ok_or_else(|| format!("Recipe not found: {}", id))?;
                print_recipe(&recipe);
                Ok(())
            }
            RecipeSubcommand::Delete { id } => {
                if repo.delete(id).await? {
                    println!("Deleted recipe {}", id);
                    Ok(())
                } else {
                    Err(format!("Recipe not found: {}", id).into())
                }
            }
            RecipeSubcommand::Favorite { id, unset } => {
                let updated = repo.set_favorite(id, !unset).await?;
                if updated.favorite {
                    println!("Marked '{}' as favorite", updated.title);
                } else {
                    println!("Removed favorite from '{}'", updated.title);
                }
                Ok(())
            }
        }
    }
}

fn print_recipe(recipe: &Recipe) {
    println!("{}", recipe.title);
    println!("{}", "=".repeat(recipe.title.len()));
    if recipe.favorite {
        println!("Favorite");
    }
    if let Some(description) = &recipe.description {
        println!();
        println!("{}", description);
    }
    if let Some(servings) = recipe.servings {
        println!();
        println!("Servings: {}", servings);
    }
    if !recipe.tags.is_empty() {
        println!("Tags: {}", recipe.tags.join(", "));
    }
    if !recipe.ingredients.is_empty() {
        println!();
        println!("Ingredients:");
        for ingredient in &recipe.ingredients {
            match &ingredient.quantity {
                Some(quantity) => println!("  - {} ({})", ingredient.name, quantity),
                None => println!("  - {}", ingredient.name),
            }
        }
    }
    if !recipe.steps.is_empty() {
        println!();
        println!("Steps:");
        for step in &recipe.steps {
            println!("  {}. {}", step.order, step.text);
        }
    }
    if !recipe.image_ids.is_empty() {
        println!();
        println!("Images: {}", recipe.image_ids.join(", "));
    }
    println!();
    println!("ID: {}", recipe.id);
}
