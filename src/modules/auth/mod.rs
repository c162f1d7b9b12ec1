use axum::routing::{get, post};
use axum::{middleware, Router};

use crate::state::AppState;

pub mod dto;
pub mod handler;
pub mod model;
pub mod repository;
pub mod service;

pub fn router(state: AppState) -> Router<AppState> {
    let public_routes = Router::new()
        .route("/register", post(handler::register))
        .route("/login", post(handler::login));

    let protected_routes = Router::new()
        .route("/logout", post(handler::logout))
        .route("/me", get(handler::get_me))
        .route("/validate", get(handler::validate))
        .route_layer(middleware::from_fn_with_state(
            state,
            crate::middleware::auth::auth_middleware,
        ));

    public_routes.merge(protected_routes)
}
