use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::error;

use crate::common::response::ApiError;
use crate::modules::auth::service::verify_access_token;
use crate::state::AppState;

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let unauthorized = |reason: &str| ApiError(format!("Unauthorized: {reason}"), StatusCode::UNAUTHORIZED);

    let token = bearer_token(req.headers())
        .ok_or_else(|| unauthorized("Missing or invalid token"))?
        .to_owned();

    let revoked = state.redis.is_revoked(&token).await.map_err(|e| {
        error!("Redis error: {}", e);
        ApiError("Internal Server Error: Redis unavailable".to_string(), StatusCode::INTERNAL_SERVER_ERROR)
    })?;
    if revoked {
        return Err(unauthorized("Token is revoked"));
    }

    let claims = verify_access_token(&state.config.jwt_secret, &token)
        .map_err(|_| unauthorized("Invalid token signature"))?;

    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}
