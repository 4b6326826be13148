// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! `/users` routes: account creation, sign-in, session refresh and profile.
//!
//! Refresh tokens travel only in the `reel_refresh_token` cookie (HttpOnly,
//! SameSite=Strict, scoped to `/users`). Response bodies carry the access
//! token and the public user summary, never the refresh token.

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    middleware,
    routing::{delete, get, post},
    Extension, Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::{Validate, ValidationErrors};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::middleware::auth::{bearer_token, require_admin, AuthUser};
use crate::models::{ProfileUpdate, Role, User, UserSummary};
use crate::services::password::{hash_password_blocking, verify_password_blocking};
use crate::services::tokens::generate_refresh_token;
use crate::services::TokenRejection;
use crate::AppState;

pub const REFRESH_COOKIE: &str = "reel_refresh_token";
const REFRESH_COOKIE_PATH: &str = "/users";

/// Routes that need no access token.
pub fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users/signup", post(signup))
        .route("/users/signin", post(signin))
        .route("/users/google-signin", post(google_signin))
        .route("/users/google-signup", post(google_signin))
        .route("/users/refresh-token", post(refresh_token))
        // Takes a possibly expired access token, so it checks it itself.
        .route("/users/refresh-access-token", post(refresh_access_token))
}

/// Routes behind `require_auth`; deletion additionally behind the admin gate.
pub fn protected_routes(state: &Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/users/logout", post(logout))
        .route("/users/me", get(me))
        .route(
            "/users/{id}",
            delete(delete_user)
                .route_layer(middleware::from_fn_with_state(state.clone(), require_admin))
                .get(get_user)
                .put(update_user),
        )
}

// ─── Request / response types ────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SigninRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GoogleSigninRequest {
    pub credential: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, max = 64, message = "Username must be 1 to 64 characters"))]
    pub username: Option<String>,
    pub profile_picture: Option<String>,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: Option<String>,
    pub role: Option<Role>,
}

/// Signup input after presence checks.
#[derive(Debug, Validate)]
struct NewAccount {
    #[validate(email(message = "Invalid email address"))]
    email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    password: String,
    #[validate(length(min = 1, max = 64, message = "Username must be 1 to 64 characters"))]
    username: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    pub access_token: String,
    pub user: UserSummary,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenResponse {
    pub access_token: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user: UserSummary,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

// ─── Helpers ─────────────────────────────────────────────────────

fn json_body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

fn validation_message(errors: &ValidationErrors) -> String {
    let mut messages: Vec<String> = errors
        .field_errors()
        .values()
        .flat_map(|errs| errs.iter())
        .map(|e| {
            e.message
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_else(|| e.code.to_string())
        })
        .collect();
    messages.sort();
    messages.join("; ")
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn refresh_cookie(config: &Config, token: String) -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE, token))
        .http_only(true)
        .secure(config.secure_cookies())
        .same_site(SameSite::Strict)
        .path(REFRESH_COOKIE_PATH)
        .max_age(time::Duration::seconds(
            i64::try_from(config.refresh_token_ttl.as_secs()).unwrap_or(i64::MAX),
        ))
        .build()
}

fn clear_refresh_cookie(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(REFRESH_COOKIE).path(REFRESH_COOKIE_PATH))
}

/// Refresh token from the JSON body (`refreshToken`) or, failing that, the cookie.
fn presented_refresh_token(body: &Bytes, jar: &CookieJar) -> Result<String> {
    let from_body = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        serde_json::from_slice::<RefreshTokenRequest>(body)
            .map_err(|e| AppError::BadRequest(format!("Invalid request body: {}", e)))?
            .refresh_token
    };

    non_empty(from_body)
        .or_else(|| non_empty(jar.get(REFRESH_COOKIE).map(|c| c.value().to_string())))
        .ok_or_else(|| AppError::BadRequest("Refresh token is required".to_string()))
}

/// Issue an access token and a ledger-backed refresh token for `user`.
async fn start_session(
    state: &AppState,
    jar: CookieJar,
    user: &User,
) -> Result<(CookieJar, String)> {
    let access_token = state.tokens.issue_access_token(user)?;
    let refresh_token = generate_refresh_token()?;
    state
        .ledger
        .add(&user.id, &refresh_token, state.tokens.refresh_ttl())
        .await?;

    Ok((jar.add(refresh_cookie(&state.config, refresh_token)), access_token))
}

// ─── Handlers ────────────────────────────────────────────────────

/// Create a password account and start a session.
async fn signup(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    payload: std::result::Result<Json<SignupRequest>, JsonRejection>,
) -> Result<(StatusCode, CookieJar, Json<AuthResponse>)> {
    let req = json_body(payload)?;
    let (Some(email), Some(password), Some(username)) = (
        non_empty(req.email),
        req.password.filter(|p| !p.is_empty()),
        non_empty(req.username),
    ) else {
        return Err(AppError::BadRequest(
            "Email, password and username are required".to_string(),
        ));
    };

    let account = NewAccount {
        email: email.trim().to_string(),
        password,
        username: username.trim().to_string(),
    };
    account
        .validate()
        .map_err(|e| AppError::BadRequest(validation_message(&e)))?;

    if state.store.find_user_by_email(&account.email).await?.is_some() {
        return Err(AppError::Conflict("Email already registered".to_string()));
    }

    let password_hash = hash_password_blocking(account.password).await?;
    let user = User::new_local(&account.email, &account.username, password_hash, Utc::now());
    state.store.create_user(&user).await?;

    let (jar, access_token) = start_session(&state, jar, &user).await?;

    tracing::info!(user_id = %user.id, "User signed up");

    Ok((
        StatusCode::CREATED,
        jar,
        Json(AuthResponse {
            message: Some("User created successfully"),
            access_token,
            user: user.summary(),
        }),
    ))
}

/// Password sign-in.
async fn signin(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    payload: std::result::Result<Json<SigninRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<AuthResponse>)> {
    let req = json_body(payload)?;
    let (Some(email), Some(password)) = (non_empty(req.email), req.password.filter(|p| !p.is_empty()))
    else {
        return Err(AppError::BadRequest(
            "Email and password are required".to_string(),
        ));
    };

    let user = state
        .store
        .find_user_by_email(&email)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    if !verify_password_blocking(password, user.password_hash.clone()).await {
        tracing::info!(user_id = %user.id, "Sign-in with wrong password");
        return Err(AppError::InvalidCredentials);
    }

    let (jar, access_token) = start_session(&state, jar, &user).await?;

    tracing::info!(user_id = %user.id, "User signed in");

    Ok((
        jar,
        Json(AuthResponse {
            message: None,
            access_token,
            user: user.summary(),
        }),
    ))
}

/// Google sign-in; also serves `/users/google-signup`.
async fn google_signin(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    payload: std::result::Result<Json<GoogleSigninRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<AuthResponse>)> {
    let req = json_body(payload)?;
    let credential = non_empty(req.credential).ok_or_else(|| {
        AppError::InvalidAssertion("Google credential is required".to_string())
    })?;

    let user = state.identity.resolve(&credential).await?;
    let (jar, access_token) = start_session(&state, jar, &user).await?;

    tracing::info!(user_id = %user.id, "User signed in with Google");

    Ok((
        jar,
        Json(AuthResponse {
            message: Some("Signed in with Google"),
            access_token,
            user: user.summary(),
        }),
    ))
}

/// Rotate the presented refresh token and mint a new access token.
async fn refresh_token(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    body: Bytes,
) -> Result<(CookieJar, Json<AccessTokenResponse>)> {
    let presented = presented_refresh_token(&body, &jar)?;

    let owner = state
        .ledger
        .find_owner(&presented)
        .await?
        .ok_or(AppError::RefreshTokenNotFound)?;

    let replacement = generate_refresh_token()?;
    let user = state
        .ledger
        .rotate(&owner.id, &presented, &replacement, state.tokens.refresh_ttl())
        .await?;

    let access_token = state.tokens.issue_access_token(&user)?;

    Ok((
        jar.add(refresh_cookie(&state.config, replacement)),
        Json(AccessTokenResponse { access_token }),
    ))
}

/// New access token for the bearer of a correctly signed, possibly
/// expired, access token, provided the user still has a live session.
async fn refresh_access_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<AccessTokenResponse>> {
    let token = bearer_token(&headers)?;

    let claims = state
        .tokens
        .decode_ignoring_expiry(token)
        .map_err(|rejection| match rejection {
            TokenRejection::Malformed => {
                AppError::Internal(anyhow::anyhow!("Malformed access token presented"))
            }
            TokenRejection::Invalid | TokenRejection::Expired => AppError::InvalidToken,
        })?;

    let user = state
        .store
        .get_user(&claims.id)
        .await?
        .ok_or(AppError::NoValidRefreshToken)?;

    if !user.has_valid_refresh_token(Utc::now()) {
        return Err(AppError::NoValidRefreshToken);
    }

    let access_token = state.tokens.issue_access_token(&user)?;
    Ok(Json(AccessTokenResponse { access_token }))
}

/// Revoke the presented refresh token.
async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    jar: CookieJar,
    body: Bytes,
) -> Result<(CookieJar, Json<MessageResponse>)> {
    let presented = presented_refresh_token(&body, &jar)?;
    let not_found = || AppError::NotFound("Refresh token not found".to_string());

    let owner = state
        .ledger
        .find_owner(&presented)
        .await?
        .ok_or_else(not_found)?;

    if owner.id != auth.id {
        tracing::warn!(user_id = %auth.id, "Logout with another user's refresh token");
        return Err(not_found());
    }

    if !state.ledger.revoke(&owner.id, &presented).await? {
        return Err(not_found());
    }

    tracing::info!(user_id = %auth.id, "User logged out");

    Ok((
        clear_refresh_cookie(jar),
        Json(MessageResponse {
            message: "Logged out successfully",
        }),
    ))
}

/// Current user's summary.
async fn me(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<UserResponse>> {
    let user = state
        .store
        .get_user(&auth.id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    Ok(Json(UserResponse {
        user: user.summary(),
    }))
}

async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>> {
    let user = state
        .store
        .get_user(&id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    Ok(Json(UserResponse {
        user: user.summary(),
    }))
}

/// Edit a profile. Users may edit themselves; admins may edit anyone and
/// are the only ones who may change a role.
async fn update_user(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<UpdateUserRequest>, JsonRejection>,
) -> Result<Json<UserResponse>> {
    let req = json_body(payload)?;
    req.validate()
        .map_err(|e| AppError::BadRequest(validation_message(&e)))?;

    let caller = state
        .store
        .get_user(&auth.id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    if caller.id != id && !caller.is_admin() {
        return Err(AppError::Forbidden(
            "Not allowed to modify this user".to_string(),
        ));
    }
    if req.role.is_some() && !caller.is_admin() {
        return Err(AppError::Forbidden(
            "Only admins can change roles".to_string(),
        ));
    }

    let username = match req.username.map(|u| u.trim().to_string()) {
        Some(u) if u.is_empty() => {
            return Err(AppError::BadRequest("Username must not be blank".to_string()))
        }
        other => other,
    };
    let password_hash = match req.password {
        Some(password) => {
            let target = if caller.id == id {
                caller
            } else {
                state
                    .store
                    .get_user(&id)
                    .await?
                    .ok_or_else(|| AppError::NotFound("User not found".to_string()))?
            };
            // Accounts created through Google never get a local password.
            if target.password_hash.is_none() {
                return Err(AppError::BadRequest(
                    "Password sign-in is not enabled for this account".to_string(),
                ));
            }
            Some(hash_password_blocking(password).await?)
        }
        None => None,
    };

    let update = ProfileUpdate {
        username,
        profile_picture: req
            .profile_picture
            .map(|p| Some(p.trim().to_string()).filter(|p| !p.is_empty())),
        password_hash,
        role: req.role,
    };

    let user = state
        .store
        .update_user(&id, &|user: &mut User| user.apply_update(&update))
        .await?
        .into_user()
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    tracing::info!(user_id = %id, by = %auth.id, "User updated");

    Ok(Json(UserResponse {
        user: user.summary(),
    }))
}

/// Hard-delete a user (admin only).
async fn delete_user(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>> {
    if !state.store.delete_user(&id).await? {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    tracing::info!(user_id = %id, by = %auth.id, "User deleted");

    Ok(Json(MessageResponse {
        message: "User deleted successfully",
    }))
}
