use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::repo_types::{CatalogItem, Recipe};

/// Write shape of a recipe. Missing fields are reported by validation.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RecipePayload {
    pub title: Option<String>,
    pub time_minutes: Option<i64>,
    pub price: Option<Decimal>,
    pub link: Option<String>,
    pub tags: Option<Vec<i64>>,
    pub ingredients: Option<Vec<i64>>,
}

/// List/create/update shape: related rows as ids.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecipeResponse {
    pub id: i64,
    pub title: String,
    pub ingredients: Vec<i64>,
    pub tags: Vec<i64>,
    pub time_minutes: i32,
    pub price: Decimal,
    pub link: String,
}

impl RecipeResponse {
    pub fn new(r: Recipe, tags: Vec<i64>, ingredients: Vec<i64>) -> Self {
        Self {
            id: r.id,
            title: r.title,
            ingredients,
            tags,
            time_minutes: r.time_minutes,
            price: r.price,
            link: r.link,
        }
    }
}

/// Detail shape: related rows nested.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecipeDetail {
    pub id: i64,
    pub title: String,
    pub ingredients: Vec<CatalogItem>,
    pub tags: Vec<CatalogItem>,
    pub time_minutes: i32,
    pub price: Decimal,
    pub link: String,
    pub image: Option<String>,
}

impl RecipeDetail {
    pub fn new(r: Recipe, tags: Vec<CatalogItem>, ingredients: Vec<CatalogItem>) -> Self {
        Self {
            id: r.id,
            title: r.title,
            ingredients,
            tags,
            time_minutes: r.time_minutes,
            price: r.price,
            link: r.link,
            image: r.image,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RecipeImageResponse {
    pub id: i64,
    pub image: String,
}

/// `?tags=1,2&ingredients=3` on the recipe list.
#[derive(Debug, Default, Deserialize)]
pub struct RecipeListQuery {
    pub tags: Option<String>,
    pub ingredients: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CatalogPayload {
    pub name: Option<String>,
}

/// `?assigned_only=1` on the tag/ingredient lists.
#[derive(Debug, Default, Deserialize)]
pub struct CatalogListQuery {
    pub assigned_only: Option<String>,
}

impl CatalogListQuery {
    pub fn assigned_only(&self) -> bool {
        matches!(
            self.assigned_only.as_deref().map(str::trim),
            Some("1") | Some("true") | Some("True")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recipe() -> Recipe {
        Recipe {
            id: 7,
            title: "Chocolate".into(),
            time_minutes: 30,
            price: Decimal::new(550, 2),
            link: String::new(),
            image: Some("upload/recipe/x.jpg".into()),
        }
    }

    #[test]
    fn list_shape_uses_ids_and_string_price() {
        let json = serde_json::to_value(RecipeResponse::new(recipe(), vec![1, 2], vec![3])).unwrap();
        assert_eq!(
            json,
            json!({
                "id": 7,
                "title": "Chocolate",
                "ingredients": [3],
                "tags": [1, 2],
                "time_minutes": 30,
                "price": "5.50",
                "link": ""
            })
        );
    }

    #[test]
    fn detail_shape_nests_related_rows() {
        let tag = CatalogItem {
            id: 1,
            name: "Vegan".into(),
        };
        let json = serde_json::to_value(RecipeDetail::new(recipe(), vec![tag], vec![])).unwrap();
        assert_eq!(json["tags"], json!([{ "id": 1, "name": "Vegan" }]));
        assert_eq!(json["ingredients"], json!([]));
        assert_eq!(json["image"], json!("upload/recipe/x.jpg"));
    }

    #[test]
    fn payload_accepts_numeric_and_string_prices() {
        let a: RecipePayload = serde_json::from_value(json!({ "price": 5.5 })).unwrap();
        let b: RecipePayload = serde_json::from_value(json!({ "price": "20.32" })).unwrap();
        assert_eq!(a.price, Some(Decimal::new(55, 1)));
        assert_eq!(b.price, Some(Decimal::new(2032, 2)));
    }

    #[test]
    fn assigned_only_flag() {
        let q = |v: Option<&str>| CatalogListQuery {
            assigned_only: v.map(Into::into),
        };
        assert!(q(Some("1")).assigned_only());
        assert!(!q(Some("0")).assigned_only());
        assert!(!q(None).assigned_only());
    }
}
