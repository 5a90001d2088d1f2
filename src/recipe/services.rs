use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use super::catalog::{self, CatalogKind, Ingredients, Tags};
use super::dto::{RecipeDetail, RecipeListQuery, RecipePayload, RecipeResponse};
use super::repo::{self, RecipeFilter};
use super::repo_types::{Recipe, RecipeFields};
use crate::error::{AppError, FieldErrors};
use crate::state::AppState;

const REQUIRED: &str = "This field is required.";
const MAX_TEXT_LEN: usize = 255;
const PRICE_MAX_DIGITS: u32 = 10;
const PRICE_DECIMAL_PLACES: u32 = 2;

/// Parses a comma-separated id list such as `"1, 2"`.
pub fn parse_id_list(field: &str, raw: &str) -> Result<Vec<i64>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|_| AppError::field(field, format!("\"{s}\" is not a valid id.")))
        })
        .collect()
}

/// Blank filters (`?tags=` or `?tags=,`) are treated as absent.
pub fn parse_filter(q: &RecipeListQuery) -> Result<RecipeFilter, AppError> {
    let ids = |field: &str, raw: Option<&str>| -> Result<Option<Vec<i64>>, AppError> {
        let Some(raw) = raw else { return Ok(None) };
        let ids = parse_id_list(field, raw)?;
        Ok((!ids.is_empty()).then_some(ids))
    };
    Ok(RecipeFilter {
        tags: ids("tags", q.tags.as_deref())?,
        ingredients: ids("ingredients", q.ingredients.as_deref())?,
    })
}

/// A recipe write that passed shape validation; related ids are not yet
/// checked against the store.
#[derive(Debug, Clone, PartialEq)]
pub struct RecipeWrite {
    pub fields: RecipeFields,
    pub tags: Vec<i64>,
    pub ingredients: Vec<i64>,
}

pub fn validate_name(errors: &mut FieldErrors, field: &str, value: Option<&str>) -> String {
    let value = value.map(str::trim).unwrap_or_default();
    if value.is_empty() {
        errors.add(field, REQUIRED);
    } else if value.chars().count() > MAX_TEXT_LEN {
        errors.add(field, "Ensure this field has no more than 255 characters.");
    }
    value.to_string()
}

fn validate_price(errors: &mut FieldErrors, price: Option<Decimal>) -> Decimal {
    let Some(price) = price else {
        errors.add("price", REQUIRED);
        return Decimal::ZERO;
    };
    let normalized = price.normalize();
    let whole_digits_limit = Decimal::from(10_i64.pow(PRICE_MAX_DIGITS - PRICE_DECIMAL_PLACES));
    if normalized.scale() > PRICE_DECIMAL_PLACES {
        errors.add(
            "price",
            format!("Ensure that there are no more than {PRICE_DECIMAL_PLACES} decimal places."),
        );
    } else if normalized.abs() >= whole_digits_limit {
        errors.add(
            "price",
            format!("Ensure that there are no more than {PRICE_MAX_DIGITS} digits in total."),
        );
    }
    let mut price = normalized.round_dp(PRICE_DECIMAL_PLACES);
    price.rescale(PRICE_DECIMAL_PLACES);
    price
}

fn dedup(mut ids: Vec<i64>) -> Vec<i64> {
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Full-write validation, used for create and PUT.
pub fn validate_write(p: RecipePayload) -> Result<RecipeWrite, AppError> {
    let mut errors = FieldErrors::new();
    let title = validate_name(&mut errors, "title", p.title.as_deref());

    let time_minutes = match p.time_minutes {
        None => {
            errors.add("time_minutes", REQUIRED);
            0
        }
        Some(t) => i32::try_from(t).unwrap_or_else(|_| {
            errors.add("time_minutes", "A valid integer is required.");
            0
        }),
    };

    let price = validate_price(&mut errors, p.price);

    let link = p.link.unwrap_or_default().trim().to_string();
    if link.chars().count() > MAX_TEXT_LEN {
        errors.add("link", "Ensure this field has no more than 255 characters.");
    }

    errors.into_result()?;
    Ok(RecipeWrite {
        fields: RecipeFields {
            title,
            time_minutes,
            price,
            link,
        },
        tags: dedup(p.tags.unwrap_or_default()),
        ingredients: dedup(p.ingredients.unwrap_or_default()),
    })
}

/// PATCH: fields absent from the payload keep their stored values.
pub fn merge_partial(
    p: RecipePayload,
    current: &Recipe,
    current_tags: Vec<i64>,
    current_ingredients: Vec<i64>,
) -> Result<RecipeWrite, AppError> {
    validate_write(RecipePayload {
        title: p.title.or_else(|| Some(current.title.clone())),
        time_minutes: p.time_minutes.or(Some(i64::from(current.time_minutes))),
        price: p.price.or(Some(current.price)),
        link: p.link.or_else(|| Some(current.link.clone())),
        tags: p.tags.or(Some(current_tags)),
        ingredients: p.ingredients.or(Some(current_ingredients)),
    })
}

async fn check_owned<K: CatalogKind>(
    st: &AppState,
    user_id: Uuid,
    ids: &[i64],
    errors: &mut FieldErrors,
) -> Result<(), AppError> {
    let owned = catalog::owned_ids::<K>(&st.db, user_id, ids).await?;
    for id in ids.iter().filter(|id| !owned.contains(*id)) {
        errors.add(
            K::FIELD,
            format!("Invalid pk \"{id}\" - object does not exist."),
        );
    }
    Ok(())
}

/// Related ids must name the caller's own tags and ingredients.
pub async fn check_related(st: &AppState, user_id: Uuid, w: &RecipeWrite) -> Result<(), AppError> {
    let mut errors = FieldErrors::new();
    check_owned::<Tags>(st, user_id, &w.tags, &mut errors).await?;
    check_owned::<Ingredients>(st, user_id, &w.ingredients, &mut errors).await?;
    errors.into_result()
}

/// Inserts (`id == None`) or overwrites a recipe and its links in one
/// transaction.
pub async fn save(
    st: &AppState,
    user_id: Uuid,
    id: Option<i64>,
    w: RecipeWrite,
) -> Result<RecipeResponse, AppError> {
    check_related(st, user_id, &w).await?;

    let mut tx = st.db.begin().await?;
    let recipe = match id {
        None => repo::insert_tx(&mut tx, user_id, &w.fields).await?,
        Some(id) => repo::update_tx(&mut tx, user_id, id, &w.fields)
            .await?
            .ok_or(AppError::NotFound)?,
    };
    Tags::JOIN.replace(&mut tx, recipe.id, &w.tags).await?;
    Ingredients::JOIN.replace(&mut tx, recipe.id, &w.ingredients).await?;
    tx.commit().await?;

    info!(
        %user_id,
        recipe_id = recipe.id,
        created = id.is_none(),
        tags = w.tags.len(),
        ingredients = w.ingredients.len(),
        "recipe saved"
    );
    Ok(RecipeResponse::new(recipe, w.tags, w.ingredients))
}

pub async fn list(
    st: &AppState,
    user_id: Uuid,
    filter: &RecipeFilter,
) -> Result<Vec<RecipeResponse>, AppError> {
    let recipes = repo::list_by_user(&st.db, user_id, filter).await?;
    let ids: Vec<i64> = recipes.iter().map(|r| r.id).collect();
    let mut tags = Tags::JOIN.ids_by_recipe(&st.db, &ids).await?;
    let mut ingredients = Ingredients::JOIN.ids_by_recipe(&st.db, &ids).await?;

    Ok(recipes
        .into_iter()
        .map(|r| {
            let t = tags.remove(&r.id).unwrap_or_default();
            let i = ingredients.remove(&r.id).unwrap_or_default();
            RecipeResponse::new(r, t, i)
        })
        .collect())
}

pub async fn current_links(st: &AppState, recipe_id: i64) -> Result<(Vec<i64>, Vec<i64>), AppError> {
    let ids = [recipe_id];
    let tags = Tags::JOIN
        .ids_by_recipe(&st.db, &ids)
        .await?
        .remove(&recipe_id)
        .unwrap_or_default();
    let ingredients = Ingredients::JOIN
        .ids_by_recipe(&st.db, &ids)
        .await?
        .remove(&recipe_id)
        .unwrap_or_default();
    Ok((tags, ingredients))
}

pub async fn detail(st: &AppState, user_id: Uuid, id: i64) -> Result<RecipeDetail, AppError> {
    let recipe = repo::get(&st.db, user_id, id)
        .await?
        .ok_or(AppError::NotFound)?;
    let tags = catalog::for_recipe::<Tags>(&st.db, recipe.id).await?;
    let ingredients = catalog::for_recipe::<Ingredients>(&st.db, recipe.id).await?;
    Ok(RecipeDetail::new(recipe, tags, ingredients))
}
