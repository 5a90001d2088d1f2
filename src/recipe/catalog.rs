//! Tags and ingredients: user-owned names attached to recipes through join
//! tables. Both kinds share one set of queries, parameterised by
//! [`CatalogKind`].

use std::collections::HashMap;

use anyhow::Context;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::repo_types::CatalogItem;

/// Many-to-many link between `recipes` and one catalog table.
#[derive(Debug, Clone, Copy)]
pub struct JoinTable {
    pub table: &'static str,
    pub column: &'static str,
}

impl JoinTable {
    /// Linked item ids per recipe, each list ascending.
    pub async fn ids_by_recipe(
        &self,
        db: &PgPool,
        recipe_ids: &[i64],
    ) -> anyhow::Result<HashMap<i64, Vec<i64>>> {
        let rows = sqlx::query_as::<_, (i64, i64)>(&format!(
            "SELECT recipe_id, {col} FROM {table} WHERE recipe_id = ANY($1) ORDER BY {col}",
            col = self.column,
            table = self.table,
        ))
        .bind(recipe_ids)
        .fetch_all(db)
        .await
        .with_context(|| format!("list {}", self.table))?;

        let mut out: HashMap<i64, Vec<i64>> = HashMap::new();
        for (recipe_id, item_id) in rows {
            out.entry(recipe_id).or_default().push(item_id);
        }
        Ok(out)
    }

    /// Makes `ids` the exact set of items linked to `recipe_id`.
    pub async fn replace(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        recipe_id: i64,
        ids: &[i64],
    ) -> anyhow::Result<()> {
        sqlx::query(&format!("DELETE FROM {} WHERE recipe_id = $1", self.table))
            .bind(recipe_id)
            .execute(&mut **tx)
            .await
            .with_context(|| format!("clear {}", self.table))?;

        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query(&format!(
            r#"
            INSERT INTO {table} (recipe_id, {col})
            SELECT $1, item_id FROM UNNEST($2::bigint[]) AS item_id
            ON CONFLICT DO NOTHING
            "#,
            table = self.table,
            col = self.column,
        ))
        .bind(recipe_id)
        .bind(ids)
        .execute(&mut **tx)
        .await
        .with_context(|| format!("link {}", self.table))?;
        Ok(())
    }
}

pub trait CatalogKind: Send + Sync + 'static {
    /// Table holding the items.
    const TABLE: &'static str;
    /// Field name used in recipe payloads and error messages.
    const FIELD: &'static str;
    const JOIN: JoinTable;
}

pub struct Tags;

impl CatalogKind for Tags {
    const TABLE: &'static str = "tags";
    const FIELD: &'static str = "tags";
    const JOIN: JoinTable = JoinTable {
        table: "recipe_tags",
        column: "tag_id",
    };
}

pub struct Ingredients;

impl CatalogKind for Ingredients {
    const TABLE: &'static str = "ingredients";
    const FIELD: &'static str = "ingredients";
    const JOIN: JoinTable = JoinTable {
        table: "recipe_ingredients",
        column: "ingredient_id",
    };
}

pub async fn list<K: CatalogKind>(
    db: &PgPool,
    user_id: Uuid,
    assigned_only: bool,
) -> anyhow::Result<Vec<CatalogItem>> {
    let sql = if assigned_only {
        format!(
            r#"
            SELECT DISTINCT i.id, i.name
              FROM {table} i
              JOIN {join} j ON j.{col} = i.id
             WHERE i.user_id = $1
             ORDER BY i.name DESC, i.id DESC
            "#,
            table = K::TABLE,
            join = K::JOIN.table,
            col = K::JOIN.column,
        )
    } else {
        format!(
            "SELECT id, name FROM {} WHERE user_id = $1 ORDER BY name DESC, id DESC",
            K::TABLE
        )
    };
    sqlx::query_as::<_, CatalogItem>(&sql)
        .bind(user_id)
        .fetch_all(db)
        .await
        .with_context(|| format!("list {}", K::TABLE))
}

pub async fn get<K: CatalogKind>(
    db: &PgPool,
    user_id: Uuid,
    id: i64,
) -> anyhow::Result<Option<CatalogItem>> {
    sqlx::query_as::<_, CatalogItem>(&format!(
        "SELECT id, name FROM {} WHERE id = $1 AND user_id = $2",
        K::TABLE
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(db)
    .await
    .with_context(|| format!("get {}", K::TABLE))
}

pub async fn create<K: CatalogKind>(
    db: &PgPool,
    user_id: Uuid,
    name: &str,
) -> anyhow::Result<CatalogItem> {
    sqlx::query_as::<_, CatalogItem>(&format!(
        "INSERT INTO {} (user_id, name) VALUES ($1, $2) RETURNING id, name",
        K::TABLE
    ))
    .bind(user_id)
    .bind(name)
    .fetch_one(db)
    .await
    .with_context(|| format!("insert {}", K::TABLE))
}

pub async fn rename<K: CatalogKind>(
    db: &PgPool,
    user_id: Uuid,
    id: i64,
    name: &str,
) -> anyhow::Result<Option<CatalogItem>> {
    sqlx::query_as::<_, CatalogItem>(&format!(
        "UPDATE {} SET name = $3 WHERE id = $1 AND user_id = $2 RETURNING id, name",
        K::TABLE
    ))
    .bind(id)
    .bind(user_id)
    .bind(name)
    .fetch_optional(db)
    .await
    .with_context(|| format!("update {}", K::TABLE))
}

pub async fn delete<K: CatalogKind>(db: &PgPool, user_id: Uuid, id: i64) -> anyhow::Result<bool> {
    let res = sqlx::query(&format!(
        "DELETE FROM {} WHERE id = $1 AND user_id = $2",
        K::TABLE
    ))
    .bind(id)
    .bind(user_id)
    .execute(db)
    .await
    .with_context(|| format!("delete {}", K::TABLE))?;
    Ok(res.rows_affected() > 0)
}

/// The subset of `ids` that exist and belong to `user_id`.
pub async fn owned_ids<K: CatalogKind>(
    db: &PgPool,
    user_id: Uuid,
    ids: &[i64],
) -> anyhow::Result<Vec<i64>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    sqlx::query_scalar::<_, i64>(&format!(
        "SELECT id FROM {} WHERE user_id = $1 AND id = ANY($2)",
        K::TABLE
    ))
    .bind(user_id)
    .bind(ids)
    .fetch_all(db)
    .await
    .with_context(|| format!("check {} ownership", K::TABLE))
}

/// Items linked to one recipe, for the nested detail shape.
pub async fn for_recipe<K: CatalogKind>(
    db: &PgPool,
    recipe_id: i64,
) -> anyhow::Result<Vec<CatalogItem>> {
    sqlx::query_as::<_, CatalogItem>(&format!(
        r#"
        SELECT i.id, i.name
          FROM {table} i
          JOIN {join} j ON j.{col} = i.id
         WHERE j.recipe_id = $1
         ORDER BY i.id
        "#,
        table = K::TABLE,
        join = K::JOIN.table,
        col = K::JOIN.column,
    ))
    .bind(recipe_id)
    .fetch_all(db)
    .await
    .with_context(|| format!("list {} for recipe", K::TABLE))
}
