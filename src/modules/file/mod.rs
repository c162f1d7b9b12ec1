use axum::routing::get;
use axum::{middleware, Router};

use crate::state::AppState;

pub mod dto;
pub mod handler;
pub mod model;
pub mod repository;
pub mod service;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(handler::list_files).post(handler::upload_file))
        .route("/search", get(handler::search_files))
        .route(
            "/{id}",
            get(handler::get_file)
                .patch(handler::edit_file)
                .delete(handler::delete_file),
        )
        .route("/{id}/owns", get(handler::owns_file))
        .route("/{id}/stream", get(handler::stream_file))
        .route_layer(middleware::from_fn_with_state(
            state,
            crate::middleware::auth::auth_middleware,
        ))
}
