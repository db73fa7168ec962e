use std::sync::Arc;

use anyhow::{Context, Result};
use argon2::PasswordVerifier;
use argon2::{password_hash::SaltString, Argon2, PasswordHash};
use axum::extract::FromRequestParts;
use axum::http::{request::Parts, HeaderMap, Request};
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{db_helpers::get_user_by_id, errors::RequestError, models::User, AppState};

pub const AUTH_COOKIE: &str = "authToken";
const SESSION_DURATION: time::Duration = time::Duration::hours(1);

#[derive(Debug, Serialize, Deserialize)]
struct AuthClaim {
    user_id: i64,
    exp: i64,
}

/// The verified caller, attached to the request by [`require_auth`].
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub id: i64,
}

/// An authenticated caller whose account carries the admin flag.
pub struct AdminUser(pub User);

fn app_state(parts: &Parts) -> Result<&Arc<AppState>, RequestError> {
    parts.extensions.get::<Arc<AppState>>().ok_or_else(|| {
        tracing::error!("AppState extension missing from request");
        RequestError::ServerError
    })
}

/// Reads and verifies the session cookie. `Ok(None)` when no cookie is sent.
fn session_from_headers(headers: &HeaderMap, secret: &str) -> Result<Option<AuthUser>, RequestError> {
    let jar = CookieJar::from_headers(headers);
    match jar.get(AUTH_COOKIE) {
        Some(cookie) => verify_jwt_token(secret, cookie.value()).map(|id| Some(AuthUser { id })),
        None => Ok(None),
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync + 'static,
{
    type Rejection = RequestError;
    async fn from_request_parts(parts: &mut Parts, _: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(*user);
        }
        let state = app_state(parts)?;
        session_from_headers(&parts.headers, &state.config.jwt_secret)?
            .ok_or(RequestError::NotAuthorized("Access denied: no token provided"))
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync + 'static,
{
    type Rejection = RequestError;
    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthUser { id } = AuthUser::from_request_parts(parts, state).await?;
        let app = app_state(parts)?.clone();
        match get_user_by_id(&app.pool, id).await? {
            Some(user) if user.is_admin => Ok(AdminUser(user)),
            Some(_) => Err(RequestError::Forbidden),
            None => Err(RequestError::NotAuthorized("Account no longer exists")),
        }
    }
}

/// Rejects requests without a valid session before any handler runs and
/// attaches the verified [`AuthUser`] for the handlers downstream.
pub async fn require_auth<B>(mut request: Request<B>, next: Next<B>) -> Result<Response, RequestError> {
    let secret = match request.extensions().get::<Arc<AppState>>() {
        Some(state) => state.config.jwt_secret.clone(),
        None => return Err(RequestError::ServerError),
    };
    let user = session_from_headers(request.headers(), &secret)?
        .ok_or(RequestError::NotAuthorized("Access denied: no token provided"))?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

pub fn get_jwt_token(secret: &str, id: i64) -> Result<String> {
    let expiry_date = OffsetDateTime::now_utc() + SESSION_DURATION;
    let claim = AuthClaim {
        user_id: id,
        exp: expiry_date.unix_timestamp(),
    };

    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claim,
        &jsonwebtoken::EncodingKey::from_secret(secret.as_ref()),
    )
    .context("Failed to generate jwt token")
}

pub fn verify_jwt_token(secret: &str, token: &str) -> Result<i64, RequestError> {
    let token_data = jsonwebtoken::decode::<AuthClaim>(
        token,
        &jsonwebtoken::DecodingKey::from_secret(secret.as_ref()),
        &jsonwebtoken::Validation::default(),
    )
    .map_err(|e| {
        tracing::debug!("Error verifying token: {}", e);
        RequestError::NotAuthorized("Invalid or expired token")
    })?;
    let claim = token_data.claims;
    if claim.exp < OffsetDateTime::now_utc().unix_timestamp() {
        return Err(RequestError::NotAuthorized("Invalid or expired token"));
    }
    Ok(claim.user_id)
}

/// Session cookie carrying a freshly signed token for `user_id`.
pub fn session_cookie(secret: &str, user_id: i64, secure: bool) -> Result<Cookie<'static>> {
    let token = get_jwt_token(secret, user_id)?;
    Ok(Cookie::build(AUTH_COOKIE, token)
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(SESSION_DURATION)
        .path("/")
        .finish())
}

pub fn removal_cookie() -> Cookie<'static> {
    Cookie::build(AUTH_COOKIE, "").path("/").finish()
}

pub async fn verify_password_argon2(password: String, hash: Option<String>) -> Result<bool> {
    // Accounts created through a social login have no password.
    let hash = match hash {
        Some(hash) => hash,
        None => return Ok(false),
    };
    tokio::task::spawn_blocking(move || {
        let hash = PasswordHash::new(hash.as_str())
            .map_err(|_| anyhow::anyhow!("Failed to verify password"))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok())
    })
    .await
    .context("Failed to verify password")?
}

/// Which stored credential a login password matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordMatch {
    Account,
    PendingReset,
    Neither,
}

/// Checks `password` against the account password first, then against an
/// unexpired temporary password from a reset request.
pub async fn match_password(
    user: &User,
    password: &str,
    now: DateTime<Utc>,
) -> Result<PasswordMatch> {
    if verify_password_argon2(password.to_owned(), user.password.clone()).await? {
        return Ok(PasswordMatch::Account);
    }
    let pending = match user.reset_expires_at {
        Some(expires_at) if expires_at > now => user.reset_password.clone(),
        _ => None,
    };
    if verify_password_argon2(password.to_owned(), pending).await? {
        return Ok(PasswordMatch::PendingReset);
    }
    Ok(PasswordMatch::Neither)
}

pub async fn hash_password_argon2(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(rand::thread_rng());
        let hash = PasswordHash::generate(Argon2::default(), password, salt.as_salt())
            .map_err(|_| anyhow::anyhow!("Failed to hash password"))?;
        Ok(hash.to_string())
    })
    .await
    .context("Failed to hash password")?
}
