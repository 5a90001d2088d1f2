pub mod catalog;
pub mod dto;
pub mod handlers;
pub mod repo;
pub mod repo_types;
pub mod services;

use crate::state::AppState;
use axum::Router;
use catalog::{Ingredients, Tags};

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::recipe_routes())
        .merge(handlers::catalog_routes::<Tags>())
        .merge(handlers::catalog_routes::<Ingredients>())
}
