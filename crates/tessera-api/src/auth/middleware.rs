/// Request gates for protected routes
///
/// - [`authenticate`]: verifies the access token and attaches [`AuthenticatedUser`].
/// - [`verify_refresh_token`]: verifies the refresh token and its ledger entry,
///   attaching [`RefreshSession`].
/// - [`parse_refresh_token`]: verifies the refresh token signature only.
/// - [`require_role`]: role allow-list check, layered after `authenticate`.
///
/// Every gate short-circuits with an error response before the handler runs.
use super::cookie::{read_cookie, ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE};
use super::jwt::{validate_access_token, validate_refresh_token, JwtError, RefreshClaims};
use crate::audit::{audit_log, AuditEvent, ClientInfo};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tessera_core::{CoreError, RefreshLedger, Role};
use thiserror::Error;

/// Authenticated user information extracted from the access token
///
/// Added to request extensions by [`authenticate`]; handlers extract it with
/// `Extension<AuthenticatedUser>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: i64,
    pub role: Role,
}

/// Verified refresh token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSession {
    pub user_id: i64,
    pub role: Role,
    /// Ledger entry id carried as `jti`
    pub token_id: i64,
}

impl TryFrom<RefreshClaims> for RefreshSession {
    type Error = JwtError;

    fn try_from(claims: RefreshClaims) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: claims.user_id()?,
            role: claims.role,
            token_id: claims.token_id()?,
        })
    }
}

/// Gate errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No token provided")]
    MissingToken,

    #[error("Invalid Authorization header format")]
    InvalidAuthHeader,

    #[error("Invalid token: {0}")]
    InvalidToken(#[from] JwtError),

    #[error("Token has been revoked")]
    TokenRevoked,

    #[error("Insufficient permissions")]
    InsufficientPermissions,

    #[error("Ledger lookup failed: {0}")]
    Storage(#[from] CoreError),
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingToken | AuthError::InvalidAuthHeader | AuthError::TokenRevoked => {
                AppError::Authentication(err.to_string())
            }
            AuthError::InvalidToken(e) => e.into(),
            AuthError::InsufficientPermissions => {
                AppError::Authorization("You don't have enough permissions".to_string())
            }
            AuthError::Storage(e) => e.into(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        AppError::from(self).into_response()
    }
}

/// Access token from `Authorization: Bearer`, else from the `accessToken` cookie
fn access_token_from(request: &Request<Body>) -> Result<String, AuthError> {
    if let Some(value) = request.headers().get(header::AUTHORIZATION) {
        let value = value.to_str().map_err(|_| AuthError::InvalidAuthHeader)?;
        let token = value
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::InvalidAuthHeader)?;
        return Ok(token.to_string());
    }

    read_cookie(request.headers(), ACCESS_TOKEN_COOKIE).ok_or(AuthError::MissingToken)
}

fn reject_token(client: ClientInfo, err: AuthError) -> AuthError {
    audit_log(&AuditEvent::InvalidToken {
        ip_address: client.ip_address,
        user_agent: client.user_agent,
        reason: err.to_string(),
    });
    err
}

/// Authentication gate
///
/// Verifies the access token's RS256 signature, expiry and issuer, then
/// inserts [`AuthenticatedUser`] into request extensions.
///
/// ```ignore
/// let app = Router::new()
///     .route("/auth/me", get(me_handler))
///     .route_layer(middleware::from_fn_with_state(state.clone(), authenticate));
/// ```
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let client = ClientInfo::from_headers(request.headers());

    let token = access_token_from(&request).map_err(|e| reject_token(client.clone(), e))?;

    let user = validate_access_token(&state.keys, state.token_settings(), &token)
        .and_then(|claims| {
            Ok(AuthenticatedUser {
                user_id: claims.user_id()?,
                role: claims.role,
            })
        })
        .map_err(|e| reject_token(client, e.into()))?;

    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

fn refresh_claims_from(
    state: &AppState,
    request: &Request<Body>,
) -> Result<RefreshSession, AuthError> {
    let token =
        read_cookie(request.headers(), REFRESH_TOKEN_COOKIE).ok_or(AuthError::MissingToken)?;
    let claims = validate_refresh_token(&state.keys, state.token_settings(), &token)?;
    Ok(RefreshSession::try_from(claims)?)
}

/// Refresh verification gate
///
/// Verifies the refresh token's HS256 signature and issuer, then requires an
/// unexpired ledger entry with id = `jti` owned by the token's subject.
pub async fn verify_refresh_token(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let client = ClientInfo::from_headers(request.headers());

    let session =
        refresh_claims_from(&state, &request).map_err(|e| reject_token(client.clone(), e))?;

    let live = state
        .ledger
        .find(session.token_id)
        .await?
        .is_some_and(|entry| entry.user_id == session.user_id && !entry.is_expired());
    if !live {
        return Err(reject_token(client, AuthError::TokenRevoked));
    }

    request.extensions_mut().insert(session);
    Ok(next.run(request).await)
}

/// Refresh parse gate
///
/// Verifies the refresh token's signature and attaches its claims without
/// consulting the ledger, so logging out twice is not an error.
pub async fn parse_refresh_token(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let client = ClientInfo::from_headers(request.headers());

    let session = refresh_claims_from(&state, &request).map_err(|e| reject_token(client, e))?;

    request.extensions_mut().insert(session);
    Ok(next.run(request).await)
}

/// Type alias for role middleware future
type RoleMiddlewareFuture =
    std::pin::Pin<Box<dyn std::future::Future<Output = Result<Response, AuthError>> + Send>>;

/// Middleware factory for role-based access control
///
/// Passes the request through only when the authenticated role is one of
/// `allowed`. Membership is exact; admin has no implicit override.
///
/// Must run after [`authenticate`]. Because `route_layer` wraps outward,
/// register it first:
///
/// ```ignore
/// let app = Router::new()
///     .route("/users", post(create_user_handler))
///     .route_layer(middleware::from_fn(require_role(&[Role::Admin])))
///     .route_layer(middleware::from_fn_with_state(state.clone(), authenticate));
/// ```
pub fn require_role(
    allowed: &'static [Role],
) -> impl Fn(Request<Body>, Next) -> RoleMiddlewareFuture + Clone {
    move |request: Request<Body>, next: Next| {
        Box::pin(async move {
            let user = *request
                .extensions()
                .get::<AuthenticatedUser>()
                .ok_or(AuthError::MissingToken)?;

            if !allowed.contains(&user.role) {
                let client = ClientInfo::from_headers(request.headers());
                audit_log(&AuditEvent::AccessDenied {
                    user_id: Some(user.user_id),
                    role: Some(user.role),
                    resource: request.uri().path().to_string(),
                    required_roles: allowed.to_vec(),
                    ip_address: client.ip_address,
                    user_agent: client.user_agent,
                });

                return Err(AuthError::InsufficientPermissions);
            }

            Ok(next.run(request).await)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestContext;
    use axum::{
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Extension, Router,
    };
    use tower::ServiceExt;

    async fn whoami(Extension(user): Extension<AuthenticatedUser>) -> String {
        format!("{}:{}", user.user_id, user.role)
    }

    fn role_router(ctx: &TestContext, allowed: &'static [Role]) -> Router {
        Router::new()
            .route("/guarded", get(whoami))
            .route_layer(middleware::from_fn(require_role(allowed)))
            .route_layer(middleware::from_fn_with_state(
                ctx.state.clone(),
                authenticate,
            ))
            .with_state(ctx.state.clone())
    }

    async fn call(router: Router, auth: Option<String>) -> Response {
        let mut builder = HttpRequest::builder().uri("/guarded");
        if let Some(value) = auth {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        router
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let ctx = TestContext::new().await;
        let response = call(role_router(&ctx, &[Role::Customer]), None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_non_bearer_header_is_unauthorized() {
        let ctx = TestContext::new().await;
        let response = call(
            role_router(&ctx, &[Role::Customer]),
            Some("Basic dXNlcjpwYXNz".to_string()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_allowed_role_passes() {
        let ctx = TestContext::new().await;
        let token = ctx.access_token(5, Role::Customer);

        let response = call(
            role_router(&ctx, &[Role::Customer, Role::Manager]),
            Some(format!("Bearer {token}")),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"5:customer");
    }

    #[tokio::test]
    async fn test_admin_has_no_implicit_override() {
        let ctx = TestContext::new().await;
        let token = ctx.access_token(1, Role::Admin);

        let response = call(
            role_router(&ctx, &[Role::Manager]),
            Some(format!("Bearer {token}")),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_require_role_without_authentication_is_unauthorized() {
        let ctx = TestContext::new().await;
        let router = Router::new()
            .route("/guarded", get(|| async { "ok" }))
            .route_layer(middleware::from_fn(require_role(&[Role::Admin])))
            .with_state(ctx.state.clone());

        let response = call(router, None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_access_token_from_cookie() {
        let ctx = TestContext::new().await;
        let token = ctx.access_token(8, Role::Manager);

        let request = HttpRequest::builder()
            .uri("/guarded")
            .header(header::COOKIE, format!("accessToken={token}"))
            .body(Body::empty())
            .unwrap();
        let response = role_router(&ctx, &[Role::Manager])
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_expired_ledger_entry_is_rejected() {
        let ctx = TestContext::new().await;
        let entry = ctx
            .ledger
            .create(3, chrono::Utc::now() - chrono::Duration::minutes(1))
            .await
            .unwrap();
        let token = ctx.refresh_token(3, Role::Customer, entry.id);

        let router = Router::new()
            .route(
                "/refresh",
                get(|Extension(session): Extension<RefreshSession>| async move {
                    session.token_id.to_string()
                }),
            )
            .route_layer(middleware::from_fn_with_state(
                ctx.state.clone(),
                verify_refresh_token,
            ))
            .with_state(ctx.state.clone());

        let request = HttpRequest::builder()
            .uri("/refresh")
            .header(header::COOKIE, format!("refreshToken={token}"))
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_ledger_entry_of_other_user_is_rejected() {
        let ctx = TestContext::new().await;
        let entry = ctx
            .ledger
            .create(3, chrono::Utc::now() + chrono::Duration::days(1))
            .await
            .unwrap();
        let token = ctx.refresh_token(4, Role::Customer, entry.id);

        let router = Router::new()
            .route("/refresh", get(|| async { "ok" }))
            .route_layer(middleware::from_fn_with_state(
                ctx.state.clone(),
                verify_refresh_token,
            ))
            .with_state(ctx.state.clone());

        let request = HttpRequest::builder()
            .uri("/refresh")
            .header(header::COOKIE, format!("refreshToken={token}"))
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_parse_gate_ignores_ledger() {
        let ctx = TestContext::new().await;
        // No ledger entry with this id exists
        let token = ctx.refresh_token(3, Role::Customer, 999);

        let router = Router::new()
            .route(
                "/logout",
                get(|Extension(session): Extension<RefreshSession>| async move {
                    session.token_id.to_string()
                }),
            )
            .route_layer(middleware::from_fn_with_state(
                ctx.state.clone(),
                parse_refresh_token,
            ))
            .with_state(ctx.state.clone());

        let request = HttpRequest::builder()
            .uri("/logout")
            .header(header::COOKIE, format!("refreshToken={token}"))
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
