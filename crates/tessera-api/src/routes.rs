//! API route definitions
//!
//! Author: hephaex@gmail.com

use crate::auth::middleware::{authenticate, parse_refresh_token, require_role, verify_refresh_token};
use crate::handlers::{auth, users};
use crate::state::AppState;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tessera_core::Role;

/// Create the authentication and user routes
///
/// `route_layer` wraps outward, so the gate listed last runs first.
pub fn api_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register_handler))
        .route("/auth/login", post(auth::login_handler));

    // Refresh token must be valid and still in the ledger
    let refresh_routes = Router::new()
        .route("/auth/refresh", post(auth::refresh_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            verify_refresh_token,
        ));

    let logout_routes = Router::new()
        .route("/auth/logout", post(auth::logout_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            parse_refresh_token,
        ))
        .route_layer(middleware::from_fn_with_state(state.clone(), authenticate));

    // Protected routes (authentication required)
    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), authenticate));

    let admin_routes = Router::new()
        .route("/users", post(users::create_user_handler))
        .route_layer(middleware::from_fn(require_role(&[Role::Admin])))
        .route_layer(middleware::from_fn_with_state(state, authenticate));

    Router::new()
        .merge(public_routes)
        .merge(refresh_routes)
        .merge(logout_routes)
        .merge(protected_routes)
        .merge(admin_routes)
}
