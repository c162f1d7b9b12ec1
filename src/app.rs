use axum::extract::DefaultBodyLimit;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Room for multipart boundaries and the option fields around the video.
const FORM_OVERHEAD: usize = 1024 * 1024;

pub fn create_app(state: AppState) -> Router {
    let body_limit = usize::try_from(state.config.upload_max_size)
        .unwrap_or(usize::MAX)
        .saturating_add(FORM_OVERHEAD);

    crate::routes::configure_routes(state.clone())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(body_limit))
                .layer(RequestBodyLimitLayer::new(body_limit)),
        )
        .with_state(state)
}
