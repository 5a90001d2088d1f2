use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};

use super::catalog::{self, CatalogKind};
use super::dto::{
    CatalogListQuery, CatalogPayload, RecipeDetail, RecipeImageResponse, RecipeListQuery,
    RecipePayload, RecipeResponse,
};
use super::repo;
use super::repo_types::CatalogItem;
use super::services;
use crate::{
    auth::AuthUser,
    error::{AppError, FieldErrors},
    extract::ApiJson,
    images::services::{attach_recipe_image, ImageUpload},
    state::AppState,
};

const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

// --- routers ---

pub fn recipe_routes() -> Router<AppState> {
    Router::new()
        .route("/recipe/recipes", get(list_recipes).post(create_recipe))
        .route(
            "/recipe/recipes/:id",
            get(get_recipe)
                .put(put_recipe)
                .patch(patch_recipe)
                .delete(delete_recipe),
        )
        .route(
            "/recipe/recipes/:id/upload-image",
            post(upload_image).layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES)),
        )
}

pub fn catalog_routes<K: CatalogKind>() -> Router<AppState> {
    let collection = format!("/recipe/{}", K::TABLE);
    let item = format!("/recipe/{}/:id", K::TABLE);
    Router::new()
        .route(&collection, get(list_items::<K>).post(create_item::<K>))
        .route(
            &item,
            get(get_item::<K>)
                .put(update_item::<K>)
                .patch(update_item::<K>)
                .delete(delete_item::<K>),
        )
}

// --- recipes ---

#[instrument(skip(state))]
pub async fn list_recipes(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(q): Query<RecipeListQuery>,
) -> Result<Json<Vec<RecipeResponse>>, AppError> {
    let filter = services::parse_filter(&q)?;
    Ok(Json(services::list(&state, user_id, &filter).await?))
}

#[instrument(skip(state, payload))]
pub async fn create_recipe(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiJson(payload): ApiJson<RecipePayload>,
) -> Result<(StatusCode, Json<RecipeResponse>), AppError> {
    let write = services::validate_write(payload)?;
    let created = services::save(&state, user_id, None, write).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[instrument(skip(state))]
pub async fn get_recipe(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<RecipeDetail>, AppError> {
    Ok(Json(services::detail(&state, user_id, id).await?))
}

#[instrument(skip(state, payload))]
pub async fn put_recipe(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
    ApiJson(payload): ApiJson<RecipePayload>,
) -> Result<Json<RecipeResponse>, AppError> {
    let write = services::validate_write(payload)?;
    Ok(Json(services::save(&state, user_id, Some(id), write).await?))
}

#[instrument(skip(state, payload))]
pub async fn patch_recipe(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
    ApiJson(payload): ApiJson<RecipePayload>,
) -> Result<Json<RecipeResponse>, AppError> {
    let current = repo::get(&state.db, user_id, id)
        .await?
        .ok_or(AppError::NotFound)?;
    let (tags, ingredients) = services::current_links(&state, id).await?;
    let write = services::merge_partial(payload, &current, tags, ingredients)?;
    Ok(Json(services::save(&state, user_id, Some(id), write).await?))
}

#[instrument(skip(state))]
pub async fn delete_recipe(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let deleted = repo::delete(&state.db, user_id, id)
        .await?
        .ok_or(AppError::NotFound)?;
    if let Some(image) = deleted.image {
        if let Err(e) = state.storage.delete_object(&image).await {
            warn!(error = %e, image = %image, "failed to delete recipe image");
        }
    }
    info!(%user_id, recipe_id = id, "recipe deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /recipe/recipes/:id/upload-image (multipart, field `image`)
#[instrument(skip(state, mp))]
pub async fn upload_image(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
    mp: Result<Multipart, MultipartRejection>,
) -> Result<Json<RecipeImageResponse>, AppError> {
    let mut mp = mp.map_err(|e| AppError::field("image", e.body_text()))?;

    let mut upload = None;
    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?
    {
        if field.name() != Some("image") {
            continue;
        }
        let Some(filename) = field.file_name().map(str::to_string) else {
            return Err(AppError::field(
                "image",
                "The submitted data was not a file. Check the encoding type on the form.",
            ));
        };
        let body = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        upload = Some(ImageUpload::new(Some(filename), body)?);
        break;
    }
    let upload = upload.ok_or_else(|| AppError::field("image", "No file was submitted."))?;

    let image = attach_recipe_image(&state, user_id, id, upload).await?;
    Ok(Json(RecipeImageResponse { id, image }))
}

// --- tags & ingredients ---

#[instrument(skip(state), fields(kind = K::TABLE))]
pub async fn list_items<K: CatalogKind>(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(q): Query<CatalogListQuery>,
) -> Result<Json<Vec<CatalogItem>>, AppError> {
    let items = catalog::list::<K>(&state.db, user_id, q.assigned_only()).await?;
    Ok(Json(items))
}

fn validate_item(payload: CatalogPayload) -> Result<String, AppError> {
    let mut errors = FieldErrors::new();
    let name = services::validate_name(&mut errors, "name", payload.name.as_deref());
    errors.into_result()?;
    Ok(name)
}

#[instrument(skip(state, payload), fields(kind = K::TABLE))]
pub async fn create_item<K: CatalogKind>(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiJson(payload): ApiJson<CatalogPayload>,
) -> Result<(StatusCode, Json<CatalogItem>), AppError> {
    let name = validate_item(payload)?;
    let item = catalog::create::<K>(&state.db, user_id, &name).await?;
    info!(%user_id, id = item.id, "{} created", K::TABLE);
    Ok((StatusCode::CREATED, Json(item)))
}

#[instrument(skip(state), fields(kind = K::TABLE))]
pub async fn get_item<K: CatalogKind>(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<CatalogItem>, AppError> {
    catalog::get::<K>(&state.db, user_id, id)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound)
}

/// PUT and PATCH: `name` is the only writable field, so both require it.
#[instrument(skip(state, payload), fields(kind = K::TABLE))]
pub async fn update_item<K: CatalogKind>(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
    ApiJson(payload): ApiJson<CatalogPayload>,
) -> Result<Json<CatalogItem>, AppError> {
    let name = validate_item(payload)?;
    catalog::rename::<K>(&state.db, user_id, id, &name)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound)
}

#[instrument(skip(state), fields(kind = K::TABLE))]
pub async fn delete_item<K: CatalogKind>(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    if catalog::delete::<K>(&state.db, user_id, id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound)
    }
}
