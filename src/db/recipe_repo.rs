use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{now_ms, IngredientRef, Recipe, RecipeStep};

pub struct RecipeRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct RecipeRow {
    id: String,
    title: String,
    description: Option<String>,
    servings: Option<i32>,
    prep_time_min: Option<i32>,
    cook_time_min: Option<i32>,
    total_time_min: Option<i32>,
    favorite: bool,
    tags: String,
    categories: String,
    ingredients: String,
    steps: String,
    image_ids: String,
    source_url: Option<String>,
    source_name: Option<String>,
    notes: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl RecipeRow {
    fn into_recipe(self) -> Recipe {
        Recipe {
            id: self.id,
            title: self.title,
            description: self.description,
            servings: self.servings,
            prep_time_min: self.prep_time_min,
            cook_time_min: self.cook_time_min,
            total_time_min: self.total_time_min,
            favorite: self.favorite,
            tags: serde_json::from_str(&self.tags).unwrap_or_default(),
            categories: serde_json::from_str(&self.categories).unwrap_or_default(),
            ingredients: serde_json::from_str::<Vec<IngredientRef>>(&self.ingredients)
                .unwrap_or_default(),
            steps: serde_json::from_str::<Vec<RecipeStep>>(&self.steps).unwrap_or_default(),
            image_ids: serde_json::from_str(&self.image_ids).unwrap_or_default(),
            source_url: self.source_url,
            source_name: self.source_name,
            notes: self.notes,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl RecipeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new recipe. Generates an id when none is supplied and stamps
    /// `created_at` (when unset) and `updated_at` to the current time.
    pub async fn create(&self, mut recipe: Recipe) -> Result<Recipe, sqlx::Error> {
        if recipe.id.is_empty() {
            recipe.id = Uuid::new_v4().to_string();
        }
        let now = now_ms();
        if recipe.created_at == 0 {
            recipe.created_at = now;
        }
        recipe.updated_at = now;

        let mut tx = self.pool.begin().await?;
        insert_recipe(&mut tx, &recipe).await?;
        tx.commit().await?;

        Ok(recipe)
    }

    /// Update an existing recipe, always re-stamping `updated_at`. Merge
    /// replacement must not go through here; it uses [`Self::replace_all`].
    pub async fn update(&self, mut recipe: Recipe) -> Result<Recipe, sqlx::Error> {
        recipe.updated_at = now_ms();

        let tags = json_column(&recipe.tags);
        let categories = json_column(&recipe.categories);
        let ingredients = json_column(&recipe.ingredients);
        let steps = json_column(&recipe.steps);
        let image_ids = json_column(&recipe.image_ids);

        let result = sqlx::query(
            r#"
            UPDATE recipes
            SET title = ?, description = ?, servings = ?, prep_time_min = ?,
                cook_time_min = ?, total_time_min = ?, favorite = ?, tags = ?,
                categories = ?, ingredients = ?, steps = ?, image_ids = ?,
                source_url = ?, source_name = ?, notes = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&recipe.title)
        .bind(&recipe.description)
        .bind(recipe.servings)
        .bind(recipe.prep_time_min)
        .bind(recipe.cook_time_min)
        .bind(recipe.total_time_min)
        .bind(recipe.favorite)
        .bind(&tags)
        .bind(&categories)
        .bind(&ingredients)
        .bind(&steps)
        .bind(&image_ids)
        .bind(&recipe.source_url)
        .bind(&recipe.source_name)
        .bind(&recipe.notes)
        .bind(recipe.updated_at)
        .bind(&recipe.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound);
        }
        Ok(recipe)
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<Recipe>, sqlx::Error> {
        let row: Option<RecipeRow> = sqlx::query_as("SELECT * FROM recipes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(RecipeRow::into_recipe))
    }

    pub async fn list(&self) -> Result<Vec<Recipe>, sqlx::Error> {
        let rows: Vec<RecipeRow> =
            sqlx::query_as("SELECT * FROM recipes ORDER BY updated_at DESC")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(RecipeRow::into_recipe).collect())
    }

    pub async fn delete(&self, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM recipes WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Toggle the favorite flag. Goes through [`Self::update`] so the
    /// timestamp bookkeeping applies.
    pub async fn set_favorite(&self, id: &str, favorite: bool) -> Result<Recipe, sqlx::Error> {
        let mut recipe = self
            .get_by_id(id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;
        recipe.favorite = favorite;
        self.update(recipe).await
    }

    /// Replace the whole collection with the merged set inside one
    /// transaction; partial states are never observable. Timestamps are
    /// written verbatim from the winning side — this is the one legitimate
    /// bypass of the stamping in create/update.
    pub async fn replace_all(&self, recipes: &[Recipe]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM recipes").execute(&mut *tx).await?;
        for recipe in recipes {
            insert_recipe(&mut tx, recipe).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

async fn insert_recipe(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    recipe: &Recipe,
) -> Result<(), sqlx::Error> {
    let tags = json_column(&recipe.tags);
    let categories = json_column(&recipe.categories);
    let ingredients = json_column(&recipe.ingredients);
    let steps = json_column(&recipe.steps);
    let image_ids = json_column(&recipe.image_ids);

    sqlx::query(
        r#"
        INSERT INTO recipes (id, title, description, servings, prep_time_min,
            cook_time_min, total_time_min, favorite, tags, categories,
            ingredients, steps, image_ids, source_url, source_name, notes,
            created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&recipe.id)
    .bind(&recipe.title)
    .bind(&recipe.description)
    .bind(recipe.servings)
    .bind(recipe.prep_time_min)
    .bind(recipe.cook_time_min)
    .bind(recipe.total_time_min)
    .bind(recipe.favorite)
    .bind(&tags)
    .bind(&categories)
    .bind(&ingredients)
    .bind(&steps)
    .bind(&image_ids)
    .bind(&recipe.source_url)
    .bind(&recipe.source_name)
    .bind(&recipe.notes)
    .bind(recipe.created_at)
    .bind(recipe.updated_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

fn json_column<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn test_create_stamps_timestamps() {
        let (_dir, pool) = test_pool().await;
        let repo = RecipeRepository::new(pool);

        let mut recipe = Recipe::new("Pancakes");
        recipe.created_at = 0;
        recipe.updated_at = 42; // caller-supplied value must be ignored

        let created = repo.create(recipe).await.unwrap();
        assert!(created.created_at > 0);
        assert!(created.updated_at >= created.created_at);
    }

    #[tokio::test]
    async fn test_update_restamps_updated_at() {
        let (_dir, pool) = test_pool().await;
        let repo = RecipeRepository::new(pool);

        let created = repo.create(Recipe::new("Soup")).await.unwrap();
        let before = created.updated_at;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let mut edited = created.clone();
        edited.title = "Onion soup".to_string();
        edited.updated_at = 1; // caller-supplied value must be ignored
        let updated = repo.update(edited).await.unwrap();

        assert!(updated.updated_at > before);
        let fetched = repo.get_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched.title, "Onion soup");
    }

    #[tokio::test]
    async fn test_round_trip_preserves_nested_fields() {
        let (_dir, pool) = test_pool().await;
        let repo = RecipeRepository::new(pool);

        let mut recipe = Recipe::new("Meatballs").with_tags(vec!["classic".into()]);
        recipe.ingredients = vec![IngredientRef::new("Ground beef")];
        recipe.steps = vec![RecipeStep::new(1, "Roll into balls.")];
        recipe.image_ids = vec!["im1".into()];

        let created = repo.create(recipe).await.unwrap();
        let fetched = repo.get_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_replace_all_preserves_caller_timestamps() {
        let (_dir, pool) = test_pool().await;
        let repo = RecipeRepository::new(pool);

        repo.create(Recipe::new("Old")).await.unwrap();

        let mut winner = Recipe::new("Winner");
        winner.created_at = 100;
        winner.updated_at = 200;

        repo.replace_all(std::slice::from_ref(&winner)).await.unwrap();

        let all = repo.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].updated_at, 200);
        assert_eq!(all[0].created_at, 100);
    }

    #[tokio::test]
    async fn test_delete() {
        let (_dir, pool) = test_pool().await;
        let repo = RecipeRepository::new(pool);

        let created = repo.create(Recipe::new("Gone")).await.unwrap();
        assert!(repo.delete(&created.id).await.unwrap());
        assert!(repo.get_by_id(&created.id).await.unwrap().is_none());
        assert!(!repo.delete(&created.id).await.unwrap());
    }
}
