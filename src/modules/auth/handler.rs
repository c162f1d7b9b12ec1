use axum::{
    extract::{Extension, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};

use tracing::debug;

use super::dto::{AuthResponse, LoginRequest, MeResponse, RegisterRequest, TokenClaims, UserResponse};
use super::service::AuthService;
use crate::common::response::{ApiError, ApiResponse, ApiSuccess};
use crate::middleware::auth::bearer_token;
use crate::state::AppState;

/// Register a new user
#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User created successfully", body = ApiResponse<UserResponse>),
        (status = 400, description = "Bad Request"),
        (status = 409, description = "Email or username taken")
    ),
    tag = "Auth"
)]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = AuthService::register(&state, payload).await?;
    Ok(ApiSuccess(ApiResponse::success(user, "User registered successfully"), StatusCode::CREATED))
}

/// Login user and get an access token
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = ApiResponse<AuthResponse>),
        (status = 401, description = "Unauthorized")
    ),
    tag = "Auth"
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let response = AuthService::login(&state, payload).await?;
    Ok(ApiSuccess(ApiResponse::success(response, "Login successful"), StatusCode::OK))
}

/// Logout user
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    responses(
        // String instead of () keeps the schema generator happy
        (status = 200, description = "Logged out successfully", body = ApiResponse<String>),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn logout(
    State(state): State<AppState>,
    Extension(claims): Extension<TokenClaims>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let token = bearer_token(&headers)
        .ok_or_else(|| ApiError("Unauthorized: Missing or invalid token".to_string(), StatusCode::UNAUTHORIZED))?;

    AuthService::logout(&state, token, &claims).await?;
    Ok(ApiSuccess(ApiResponse::success((), "Logged out successfully"), StatusCode::OK))
}

/// Current user, storage usage and most recent uploads
#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    responses(
        (status = 200, description = "Current user", body = ApiResponse<MeResponse>),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn get_me(
    State(state): State<AppState>,
    Extension(claims): Extension<TokenClaims>,
) -> Result<impl IntoResponse, ApiError> {
    let me = AuthService::me(&state, claims.sub).await?;
    Ok(ApiSuccess(ApiResponse::success(me, "User retrieved successfully"), StatusCode::OK))
}

/// Check that the bearer token is still accepted
#[utoipa::path(
    get,
    path = "/api/v1/auth/validate",
    responses(
        (status = 200, description = "Token is valid", body = ApiResponse<String>),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn validate(Extension(claims): Extension<TokenClaims>) -> Result<impl IntoResponse, ApiError> {
    debug!(user_id = %claims.sub, "token validated");
    Ok(ApiSuccess(ApiResponse::success((), "Token is valid"), StatusCode::OK))
}
