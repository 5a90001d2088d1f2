use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;

/// A recipe row. Queries are always scoped to the owner, so the owner
/// column is not loaded.
#[derive(Debug, Clone, FromRow)]
pub struct Recipe {
    pub id: i64,
    pub title: String,
    pub time_minutes: i32,
    pub price: Decimal,
    pub link: String,
    pub image: Option<String>,
}

/// A tag or an ingredient; both have the same shape on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct CatalogItem {
    pub id: i64,
    pub name: String,
}

/// Scalar recipe fields as written to the `recipes` table.
#[derive(Debug, Clone, PartialEq)]
pub struct RecipeFields {
    pub title: String,
    pub time_minutes: i32,
    pub price: Decimal,
    pub link: String,
}
