//! Application state management
//!
//! Author: hephaex@gmail.com

use std::sync::Arc;
use std::time::Instant;

use tessera_core::config::AppConfig;
use tessera_core::{RefreshLedger, UserStore};

use crate::auth::jwt::TokenSettings;
use crate::auth::keys::KeyProvider;
use crate::auth::password::CredentialHasher;
use crate::auth::service::AuthService;
use crate::auth::tokens::TokenIssuer;

/// Application state shared across handlers
///
/// Stores are injected as trait objects; nothing reaches a database through
/// a global handle.
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Server start time
    pub start_time: Instant,
    /// Signing and verification keys
    pub keys: Arc<KeyProvider>,
    /// Refresh token ledger
    pub ledger: Arc<dyn RefreshLedger>,
    /// Token minting
    pub tokens: Arc<TokenIssuer>,
    /// Authentication workflows
    pub auth_service: AuthService,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        keys: KeyProvider,
        users: Arc<dyn UserStore>,
        ledger: Arc<dyn RefreshLedger>,
    ) -> Self {
        let keys = Arc::new(keys);
        let tokens = Arc::new(TokenIssuer::new(
            keys.clone(),
            ledger.clone(),
            TokenSettings::from(&config.auth),
        ));
        let auth_service = AuthService::new(
            users,
            tokens.clone(),
            CredentialHasher::new(config.auth.password.clone()),
        );

        Self {
            config,
            start_time: Instant::now(),
            keys,
            ledger,
            tokens,
            auth_service,
        }
    }

    pub fn token_settings(&self) -> &TokenSettings {
        self.tokens.settings()
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
