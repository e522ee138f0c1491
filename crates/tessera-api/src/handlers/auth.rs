//! Authentication API handlers
//!
//! Session tokens travel as `HttpOnly` cookies; response bodies only carry
//! the user id.
//!
//! Author: hephaex@gmail.com

use crate::audit::ClientInfo;
use crate::auth::cookie::{build_cookie, clear_cookie, ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE};
use crate::auth::models::{
    EmptyResponse, IdResponse, LoginRequest, RegisterRequest, UserProfileResponse,
};
use crate::auth::service::AuthOutcome;
use crate::auth::{AuthenticatedUser, RefreshSession};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, StatusCode},
    response::{AppendHeaders, IntoResponse, Response},
    Extension, Json,
};
use std::sync::Arc;
use validator::Validate;

/// Respond with the user id and fresh session cookies
fn session_response(
    state: &AppState,
    status: StatusCode,
    outcome: AuthOutcome,
) -> Result<Response, AppError> {
    let settings = state.token_settings();
    let cookies = &state.config.cookies;

    let access = build_cookie(
        ACCESS_TOKEN_COOKIE,
        &outcome.tokens.access_token,
        settings.access_expiration_secs,
        cookies,
    )?;
    let refresh = build_cookie(
        REFRESH_TOKEN_COOKIE,
        &outcome.tokens.refresh_token,
        settings.refresh_expiration_secs,
        cookies,
    )?;

    Ok((
        status,
        AppendHeaders([(header::SET_COOKIE, access), (header::SET_COOKIE, refresh)]),
        Json(IdResponse {
            id: outcome.user_id,
        }),
    )
        .into_response())
}

/// Register a new customer account
///
/// Creates the account and opens a session: the `accessToken` and
/// `refreshToken` cookies are set on the response.
///
/// # Responses
///
/// * `201 Created` - Account created, returns the new user id
/// * `400 Bad Request` - Invalid input or email already registered
/// * `500 Internal Server Error` - Server error
#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered successfully", body = IdResponse),
        (status = 400, description = "Invalid input or duplicate email", body = crate::error::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::error::ErrorResponse),
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = payload?;
    let request = request.normalized();
    request.validate()?;

    let client = ClientInfo::from_headers(&headers);
    let outcome = state.auth_service.register(request, &client).await?;

    session_response(&state, StatusCode::CREATED, outcome)
}

/// Login with email and password
///
/// # Responses
///
/// * `200 OK` - Authenticated, session cookies set
/// * `400 Bad Request` - Invalid input
/// * `401 Unauthorized` - Email or password does not match
#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = IdResponse),
        (status = 400, description = "Invalid input", body = crate::error::ErrorResponse),
        (status = 401, description = "Invalid credentials", body = crate::error::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::error::ErrorResponse),
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = payload?;
    let request = request.normalized();
    request.validate()?;

    let client = ClientInfo::from_headers(&headers);
    let outcome = state.auth_service.login(request, &client).await?;

    session_response(&state, StatusCode::OK, outcome)
}

/// Get the current user's profile
#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Current user profile", body = UserProfileResponse),
        (status = 400, description = "User no longer exists", body = crate::error::ErrorResponse),
        (status = 401, description = "Not authenticated", body = crate::error::ErrorResponse),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<UserProfileResponse>, AppError> {
    let profile = state.auth_service.me(&user).await?;
    Ok(Json(profile.into()))
}

/// Rotate the refresh token
///
/// Reads the `refreshToken` cookie. The presented token is consumed and a
/// new pair is set as cookies; presenting the old token again fails.
///
/// # Responses
///
/// * `200 OK` - New session cookies set
/// * `401 Unauthorized` - Refresh token invalid, revoked or already used
#[utoipa::path(
    post,
    path = "/auth/refresh",
    tag = "auth",
    responses(
        (status = 200, description = "Tokens rotated", body = IdResponse),
        (status = 401, description = "Invalid or revoked refresh token", body = crate::error::ErrorResponse),
    ),
    security(
        ("refresh_cookie" = [])
    )
)]
pub async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<RefreshSession>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let client = ClientInfo::from_headers(&headers);
    let outcome = state.auth_service.refresh(&session, &client).await?;

    session_response(&state, StatusCode::OK, outcome)
}

/// Logout
///
/// Revokes the refresh token's ledger entry and clears both cookies.
/// Logging out with an already revoked token still succeeds.
#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "auth",
    responses(
        (status = 200, description = "Logged out", body = EmptyResponse),
        (status = 401, description = "Not authenticated", body = crate::error::ErrorResponse),
    ),
    security(
        ("bearer_auth" = [], "refresh_cookie" = [])
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<RefreshSession>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let client = ClientInfo::from_headers(&headers);
    state.auth_service.logout(&session, &client).await?;

    let cookies = &state.config.cookies;
    let access = clear_cookie(ACCESS_TOKEN_COOKIE, cookies)?;
    let refresh = clear_cookie(REFRESH_TOKEN_COOKIE, cookies)?;

    Ok((
        StatusCode::OK,
        AppendHeaders([(header::SET_COOKIE, access), (header::SET_COOKIE, refresh)]),
        Json(EmptyResponse::default()),
    )
        .into_response())
}
