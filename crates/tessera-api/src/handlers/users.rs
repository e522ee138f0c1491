//! User administration handlers
//!
//! Author: hephaex@gmail.com

use crate::audit::ClientInfo;
use crate::auth::models::{CreateUserRequest, IdResponse};
use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use std::sync::Arc;
use validator::Validate;

/// Create a manager account (admin only)
///
/// The new account gets the `manager` role and, optionally, a tenant. No
/// session is opened for it.
///
/// # Responses
///
/// * `201 Created` - Account created, returns its id
/// * `400 Bad Request` - Invalid input or email already registered
/// * `401 Unauthorized` - Not authenticated
/// * `403 Forbidden` - Caller is not an admin
#[utoipa::path(
    post,
    path = "/users",
    tag = "users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created", body = IdResponse),
        (status = 400, description = "Invalid input or duplicate email", body = crate::error::ErrorResponse),
        (status = 401, description = "Not authenticated", body = crate::error::ErrorResponse),
        (status = 403, description = "Admin role required", body = crate::error::ErrorResponse),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn create_user_handler(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<AuthenticatedUser>,
    headers: HeaderMap,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<IdResponse>), AppError> {
    let Json(request) = payload?;
    let request = request.normalized();
    request.validate()?;

    let client = ClientInfo::from_headers(&headers);
    let id = state
        .auth_service
        .create_user(request, &admin, &client)
        .await?;

    Ok((StatusCode::CREATED, Json(IdResponse { id })))
}
