//! Session trust boundary for the management API.
//!
//! The sign-in front end issues an HS256 JWT (cookie or bearer header) once
//! the OAuth flow completes. This layer:
//! 1. drops any client-supplied `x-user-id` header,
//! 2. verifies the session token's signature and expiry,
//! 3. resolves the account by e-mail, creating it on first sight,
//! 4. forwards the request with `x-user-id` set to the account id.
//!
//! Handlers read the id back with the [`UserId`] extractor and never see
//! unverified identity.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::user::NewUser;
use crate::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Claims carried by the session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Provider account id.
    pub sub: String,
    pub email: String,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub exp: usize,
}

pub fn verify_session(token: &str, secret: &str) -> Result<SessionClaims, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.leeway = 30;
    decode::<SessionClaims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::debug!("session token rejected: {}", e);
            AppError::Unauthorized("Authentication required".into())
        })
}

/// Pull the session token from `Authorization: Bearer` or the session cookie.
pub fn session_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == cookie_name)
        .map(|(_, value)| value.to_string())
        .filter(|v| !v.is_empty())
}

/// Middleware: verifies the session and injects `x-user-id`.
pub async fn require_session(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    req.headers_mut().remove(USER_ID_HEADER);

    match resolve_user(&state, req.headers()).await {
        Ok(user_id) => {
            // Uuid renders as ASCII hex, always a valid header value.
            if let Ok(val) = HeaderValue::from_str(&user_id.to_string()) {
                req.headers_mut().insert(USER_ID_HEADER, val);
            }
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}

async fn resolve_user(state: &AppState, headers: &HeaderMap) -> Result<Uuid, AppError> {
    let token = session_token(headers, &state.config.session_cookie).ok_or_else(|| {
        tracing::debug!("no session token on management request");
        AppError::Unauthorized("Authentication required".into())
    })?;
    let claims = verify_session(&token, &state.config.session_secret)?;

    let email = claims.email.trim().to_lowercase();
    if email.is_empty() {
        return Err(AppError::Unauthorized("Session has no e-mail".into()));
    }

    if let Some(user) = state
        .store
        .find_user_by_email(&email)
        .await
        .map_err(AppError::database)?
    {
        return Ok(user.id);
    }

    let user = state
        .store
        .insert_user(&NewUser {
            email,
            name: claims.name,
            avatar_url: claims.picture,
            provider: "google".into(),
            provider_id: Some(claims.sub),
        })
        .await
        .map_err(AppError::database)?;
    tracing::info!(user_id = %user.id, "user created on first sign-in");
    Ok(user.id)
}

/// Authenticated caller, read from the header set by [`require_session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("User not authenticated".into()))?;
        Uuid::parse_str(raw)
            .map(UserId)
            .map_err(|_| AppError::Validation("Invalid user ID format".into()))
    }
}
