use anyhow::Context;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::repo_types::{Recipe, RecipeFields};

const RECIPE_COLUMNS: &str = "id, title, time_minutes, price, link, image";

/// Optional id filters for the recipe list; `None` means "don't filter".
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecipeFilter {
    pub tags: Option<Vec<i64>>,
    pub ingredients: Option<Vec<i64>>,
}

pub async fn list_by_user(
    db: &PgPool,
    user_id: Uuid,
    filter: &RecipeFilter,
) -> anyhow::Result<Vec<Recipe>> {
    sqlx::query_as::<_, Recipe>(&format!(
        r#"
        SELECT {RECIPE_COLUMNS}
          FROM recipes r
         WHERE r.user_id = $1
           AND ($2::bigint[] IS NULL OR EXISTS (
                SELECT 1 FROM recipe_tags rt
                 WHERE rt.recipe_id = r.id AND rt.tag_id = ANY($2)))
           AND ($3::bigint[] IS NULL OR EXISTS (
                SELECT 1 FROM recipe_ingredients ri
                 WHERE ri.recipe_id = r.id AND ri.ingredient_id = ANY($3)))
         ORDER BY r.id DESC
        "#
    ))
    .bind(user_id)
    .bind(filter.tags.as_deref())
    .bind(filter.ingredients.as_deref())
    .fetch_all(db)
    .await
    .context("list recipes")
}

pub async fn get(db: &PgPool, user_id: Uuid, id: i64) -> anyhow::Result<Option<Recipe>> {
    sqlx::query_as::<_, Recipe>(&format!(
        "SELECT {RECIPE_COLUMNS} FROM recipes WHERE id = $1 AND user_id = $2"
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(db)
    .await
    .context("get recipe")
}

pub async fn insert_tx(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    fields: &RecipeFields,
) -> anyhow::Result<Recipe> {
    sqlx::query_as::<_, Recipe>(&format!(
        r#"
        INSERT INTO recipes (user_id, title, time_minutes, price, link)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {RECIPE_COLUMNS}
        "#
    ))
    .bind(user_id)
    .bind(&fields.title)
    .bind(fields.time_minutes)
    .bind(fields.price)
    .bind(&fields.link)
    .fetch_one(&mut **tx)
    .await
    .context("insert recipe")
}

/// Overwrites the scalar fields. The owner column is never touched.
pub async fn update_tx(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    id: i64,
    fields: &RecipeFields,
) -> anyhow::Result<Option<Recipe>> {
    sqlx::query_as::<_, Recipe>(&format!(
        r#"
        UPDATE recipes
           SET title = $3, time_minutes = $4, price = $5, link = $6
         WHERE id = $1 AND user_id = $2
        RETURNING {RECIPE_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(user_id)
    .bind(&fields.title)
    .bind(fields.time_minutes)
    .bind(fields.price)
    .bind(&fields.link)
    .fetch_optional(&mut **tx)
    .await
    .context("update recipe")
}

pub async fn delete(db: &PgPool, user_id: Uuid, id: i64) -> anyhow::Result<Option<Recipe>> {
    sqlx::query_as::<_, Recipe>(&format!(
        "DELETE FROM recipes WHERE id = $1 AND user_id = $2 RETURNING {RECIPE_COLUMNS}"
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(db)
    .await
    .context("delete recipe")
}

/// Points the recipe at a new image key and returns the key it replaced.
/// `None` when the recipe does not exist for this user.
pub async fn set_image_tx(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    id: i64,
    image: &str,
) -> anyhow::Result<Option<Option<String>>> {
    let previous = sqlx::query_scalar::<_, Option<String>>(
        "SELECT image FROM recipes WHERE id = $1 AND user_id = $2 FOR UPDATE",
    )
    .bind(id)
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await
    .context("lock recipe image")?;

    if previous.is_none() {
        return Ok(None);
    }

    sqlx::query("UPDATE recipes SET image = $2 WHERE id = $1")
        .bind(id)
        .bind(image)
        .execute(&mut **tx)
        .await
        .context("set recipe image")?;

    Ok(previous)
}
