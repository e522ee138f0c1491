//! Tessera API - authentication service
//!
//! Issues RS256 access tokens and ledger-backed HS256 refresh tokens as
//! cookies, rotates refresh tokens on use, and gates protected routes by
//! token verification and role.

pub mod audit;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::middleware::security_headers_middleware;
use crate::state::AppState;

/// OpenAPI document
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Tessera API",
        description = "Authentication and authorization for a multi-tenant platform"
    ),
    paths(
        handlers::health::health_check,
        handlers::auth::register_handler,
        handlers::auth::login_handler,
        handlers::auth::me_handler,
        handlers::auth::refresh_handler,
        handlers::auth::logout_handler,
        handlers::users::create_user_handler,
    ),
    components(schemas(
        auth::models::RegisterRequest,
        auth::models::LoginRequest,
        auth::models::CreateUserRequest,
        auth::models::IdResponse,
        auth::models::EmptyResponse,
        auth::models::UserProfileResponse,
        handlers::health::HealthResponse,
        error::ErrorResponse,
        error::ApiError,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Session lifecycle"),
        (name = "users", description = "Account administration"),
        (name = "health", description = "Liveness"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
            components.add_security_scheme(
                "refresh_cookie",
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new(
                    auth::cookie::REFRESH_TOKEN_COOKIE,
                ))),
            );
        }
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    // Same-origin only unless origins are configured
    if origins.is_empty() {
        return CorsLayer::new();
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

/// Build the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .merge(routes::api_routes(state.clone()))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(axum::middleware::from_fn(security_headers_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
