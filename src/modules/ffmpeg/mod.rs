use axum::routing::{get, post};
use axum::{middleware, Router};

use crate::state::AppState;

pub mod dto;
pub mod handler;
pub mod service;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/start", get(handler::start))
        .route("/progress", get(handler::progress))
        .route("/process", post(handler::process))
        .route_layer(middleware::from_fn_with_state(
            state,
            crate::middleware::auth::auth_middleware,
        ))
}
