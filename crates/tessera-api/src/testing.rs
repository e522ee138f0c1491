//! Test fixtures
//!
//! Fixture RSA keys, light Argon2 parameters and an in-memory application
//! state. Compiled for unit tests and behind the `test-utils` feature for
//! the integration tests.

use std::sync::Arc;

use axum::Router;
use tessera_core::{
    AppConfig, AuthConfig, DatabaseBackend, DatabaseConfig, InMemoryRefreshLedger,
    InMemoryUserStore, PasswordHashConfig, Role,
};

use crate::auth::jwt::{generate_access_token, generate_refresh_token, TokenSubject};
use crate::auth::keys::KeyProvider;
use crate::state::AppState;

pub const PRIVATE_KEY_PEM: &str = include_str!("../tests/fixtures/private.pem");
pub const PUBLIC_KEY_PEM: &str = include_str!("../tests/fixtures/public.pem");
/// Unrelated RSA key, for forging tokens
pub const OTHER_PRIVATE_KEY_PEM: &str = include_str!("../tests/fixtures/other_private.pem");
/// Key set holding the public half of [`PRIVATE_KEY_PEM`] under kid `tessera-dev`
pub const JWKS_JSON: &str = include_str!("../tests/fixtures/jwks.json");
pub const REFRESH_SECRET: &str = "tessera-test-refresh-secret";

/// Argon2 parameters cheap enough for tests
pub fn password_config() -> PasswordHashConfig {
    PasswordHashConfig {
        memory_cost: 8192,
        time_cost: 1,
        parallelism: 1,
        output_len: Some(32),
    }
}

/// Configuration with fixture keys and in-memory stores
pub fn test_config() -> AppConfig {
    AppConfig {
        database: DatabaseConfig {
            backend: DatabaseBackend::Memory,
            ..Default::default()
        },
        auth: AuthConfig {
            private_key_pem: Some(PRIVATE_KEY_PEM.to_string()),
            public_key_pem: Some(PUBLIC_KEY_PEM.to_string()),
            refresh_token_secret: Some(REFRESH_SECRET.to_string()),
            password: password_config(),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn key_provider() -> KeyProvider {
    KeyProvider::from_pem(
        Some(PRIVATE_KEY_PEM),
        PUBLIC_KEY_PEM,
        REFRESH_SECRET.as_bytes(),
    )
    .expect("fixture keys are valid")
}

pub fn key_provider_without_private_key() -> KeyProvider {
    KeyProvider::from_pem(None, PUBLIC_KEY_PEM, REFRESH_SECRET.as_bytes())
        .expect("fixture keys are valid")
}

/// Application state over in-memory stores, with handles to the stores
pub struct TestContext {
    pub state: Arc<AppState>,
    pub users: Arc<InMemoryUserStore>,
    pub ledger: Arc<InMemoryRefreshLedger>,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    /// Context whose service cannot sign access tokens
    pub async fn without_private_key() -> Self {
        let mut config = test_config();
        config.auth.private_key_pem = None;
        Self::with_config(config).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let keys = KeyProvider::load(&config.auth)
            .await
            .expect("test keys load");
        let users = Arc::new(InMemoryUserStore::new());
        let ledger = Arc::new(InMemoryRefreshLedger::new());
        let state = Arc::new(AppState::new(config, keys, users.clone(), ledger.clone()));

        Self {
            state,
            users,
            ledger,
        }
    }

    pub fn router(&self) -> Router {
        crate::create_router(self.state.clone())
    }

    /// Access token signed with the fixture key
    pub fn access_token(&self, user_id: i64, role: Role) -> String {
        generate_access_token(
            &key_provider(),
            self.state.token_settings(),
            TokenSubject { user_id, role },
        )
        .expect("sign access token")
    }

    /// Refresh token naming `token_id`, whether or not the ledger has it
    pub fn refresh_token(&self, user_id: i64, role: Role, token_id: i64) -> String {
        generate_refresh_token(
            &key_provider(),
            self.state.token_settings(),
            TokenSubject { user_id, role },
            token_id,
        )
        .expect("sign refresh token")
    }
}
