use anyhow::anyhow;
use axum::http::StatusCode;
use jsonwebtoken::{decode, encode, get_current_timestamp, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::dto::{AuthResponse, LoginRequest, MeResponse, RegisterRequest, TokenClaims, UserResponse};
use super::repository::AuthRepository;
use crate::common::response::ApiError;
use crate::common::security;
use crate::modules::file::dto::FileResponse;
use crate::modules::file::repository::FileRepository;
use crate::state::AppState;

pub const ACCESS_TOKEN_TTL_SECS: u64 = 15 * 60;
const RECENT_FILES: i64 = 10;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),
    #[error("{0} already exists")]
    Conflict(&'static str),
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("User not found")]
    UnknownUser,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Validation(msg) => ApiError::bad_request(msg),
            AuthError::Conflict(_) => ApiError(err.to_string(), StatusCode::CONFLICT),
            AuthError::InvalidCredentials | AuthError::UnknownUser => ApiError(err.to_string(), StatusCode::UNAUTHORIZED),
            AuthError::Internal(e) => ApiError::internal(e),
        }
    }
}

pub struct AuthService;

impl AuthService {
    pub async fn register(state: &AppState, req: RegisterRequest) -> Result<UserResponse, AuthError> {
        req.validate().map_err(|e| AuthError::Validation(e.to_string()))?;

        if AuthRepository::find_user_by_email(&state.db, &req.email).await?.is_some() {
            return Err(AuthError::Conflict("Email"));
        }
        if AuthRepository::find_user_by_username(&state.db, &req.username).await?.is_some() {
            return Err(AuthError::Conflict("Username"));
        }

        let password_hash = security::hash_password(&req.password)?;
        let user = AuthRepository::create_user_with_stats(
            &state.db,
            &req.username,
            &req.email,
            &password_hash,
            state.config.storage_max_per_user,
        )
        .await?;

        info!(user_id = %user.id, "user registered");
        Ok(user.into())
    }

    pub async fn login(state: &AppState, req: LoginRequest) -> Result<AuthResponse, AuthError> {
        req.validate().map_err(|e| AuthError::Validation(e.to_string()))?;

        let user = AuthRepository::find_user_by_email(&state.db, &req.email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        security::verify_password(&req.password, &user.password_hash).map_err(|_| AuthError::InvalidCredentials)?;

        let access_token = create_access_token(&state.config.jwt_secret, user.id)?;

        Ok(AuthResponse {
            access_token,
            expires_in: ACCESS_TOKEN_TTL_SECS,
            user: user.into(),
        })
    }

    /// Revokes the access token for the rest of its lifetime.
    pub async fn logout(state: &AppState, token: &str, claims: &TokenClaims) -> Result<(), AuthError> {
        let remaining = (claims.exp as u64).saturating_sub(get_current_timestamp());
        state
            .redis
            .revoke_token(token, remaining)
            .await
            .map_err(|e| anyhow!("Failed to revoke token: {}", e))?;

        info!(user_id = %claims.sub, "user logged out");
        Ok(())
    }

    pub async fn me(state: &AppState, user_id: Uuid) -> Result<MeResponse, AuthError> {
        let user = AuthRepository::find_user_by_id(&state.db, user_id)
            .await?
            .ok_or(AuthError::UnknownUser)?;

        let stats = FileRepository::get_stats(&state.db, user_id)
            .await?
            .ok_or_else(|| anyhow!("no storage stats for user {}", user_id))?;

        let recent_files = FileRepository::list_recent(&state.db, user_id, RECENT_FILES)
            .await?
            .into_iter()
            .map(|f| FileResponse::new(f, &state.config.public_media_url))
            .collect();

        Ok(MeResponse {
            user: user.into(),
            stats: stats.into(),
            recent_files,
        })
    }
}

pub fn create_access_token(secret: &str, user_id: Uuid) -> anyhow::Result<String> {
    let now = get_current_timestamp();
    let claims = TokenClaims {
        sub: user_id,
        exp: (now + ACCESS_TOKEN_TTL_SECS) as usize,
        iat: now as usize,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| anyhow!("Failed to sign token: {}", e))
}

pub fn verify_access_token(secret: &str, token: &str) -> anyhow::Result<TokenClaims> {
    decode::<TokenClaims>(token, &DecodingKey::from_secret(secret.as_bytes()), &Validation::default())
        .map(|data| data.claims)
        .map_err(|e| anyhow!("Invalid token: {}", e))
}
