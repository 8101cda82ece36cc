use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::api::ApiState;
use crate::db::Db;
use crate::error::{ApiError, Result};
use crate::models::User;

pub const MIN_PASSWORD_LEN: usize = 6;

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("password hashing failed: {}", e)))
}

/// False for a wrong password and for a stored hash that does not parse.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(e) => {
            log::warn!("stored password hash is malformed: {}", e);
            false
        }
    }
}

pub fn validate_registration(username: &str, email: &str, password: &str) -> Result<()> {
    let username_len = username.chars().count();
    if !(3..=80).contains(&username_len) {
        return Err(ApiError::InvalidInput("username must be 3-80 characters".into()));
    }
    if email.len() > 120 || !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
        return Err(ApiError::InvalidInput("email address is not valid".into()));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::InvalidInput(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Creates a bearer token for `user_id` that stays valid for `ttl_hours`.
pub async fn issue_token(db: &Db, user_id: i64, ttl_hours: i64) -> Result<String> {
    let expires_at = Duration::try_hours(ttl_hours)
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("token lifetime of {} hours is out of range", ttl_hours)))?;
    let token = Uuid::new_v4().to_string();
    db.insert_token(&token, user_id, expires_at).await?;
    Ok(token)
}

/// The caller behind a valid `Authorization: Bearer <token>` header.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub token: String,
}

#[axum::async_trait]
impl FromRequestParts<ApiState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState) -> Result<Self> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?;

        let user = state
            .db
            .user_for_token(token, Utc::now())
            .await?
            .ok_or_else(|| ApiError::Unauthorized("invalid or expired token".into()))?;

        Ok(AuthUser {
            user,
            token: token.to_string(),
        })
    }
}
