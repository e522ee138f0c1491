//! Token issuance backed by the refresh ledger

use std::sync::Arc;

use chrono::{Duration, Utc};
use tessera_core::{CoreError, RefreshLedger, RefreshLedgerEntry};
use tracing::{debug, warn};

use super::jwt::{self, JwtError, TokenSettings, TokenSubject};
use super::keys::KeyProvider;
use crate::error::AppError;

/// Access and refresh token minted together
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Ledger entry the refresh token is bound to
    pub refresh_token_id: i64,
}

/// Mints access/refresh tokens and keeps the refresh ledger in step
pub struct TokenIssuer {
    keys: Arc<KeyProvider>,
    ledger: Arc<dyn RefreshLedger>,
    settings: TokenSettings,
}

impl TokenIssuer {
    pub fn new(keys: Arc<KeyProvider>, ledger: Arc<dyn RefreshLedger>, settings: TokenSettings) -> Self {
        Self {
            keys,
            ledger,
            settings,
        }
    }

    pub fn settings(&self) -> &TokenSettings {
        &self.settings
    }

    pub fn issue_access_token(&self, subject: TokenSubject) -> Result<String, JwtError> {
        jwt::generate_access_token(&self.keys, &self.settings, subject)
    }

    pub fn issue_refresh_token(
        &self,
        subject: TokenSubject,
        entry: &RefreshLedgerEntry,
    ) -> Result<String, JwtError> {
        jwt::generate_refresh_token(&self.keys, &self.settings, subject, entry.id)
    }

    /// Record a new refresh ledger entry expiring one refresh lifetime from now
    pub async fn persist_refresh_entry(&self, user_id: i64) -> tessera_core::Result<RefreshLedgerEntry> {
        let expires_at = i64::try_from(self.settings.refresh_expiration_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| CoreError::ConfigError("refresh token lifetime out of range".to_string()))?;
        let entry = self.ledger.create(user_id, expires_at).await?;
        debug!(user_id, token_id = entry.id, "Persisted refresh token entry");
        Ok(entry)
    }

    /// Delete a ledger entry, reporting whether a row was removed
    pub async fn revoke_refresh_entry(&self, id: i64) -> tessera_core::Result<bool> {
        Ok(self.ledger.delete(id).await? == 1)
    }

    /// Persist a ledger entry and sign a token pair bound to it
    ///
    /// If signing fails the fresh entry is removed before the error is
    /// returned, so no ledger row outlives a failed issuance.
    pub async fn issue_pair(&self, subject: TokenSubject) -> Result<TokenPair, AppError> {
        let entry = self.persist_refresh_entry(subject.user_id).await?;

        let signed = self.issue_access_token(subject).and_then(|access_token| {
            self.issue_refresh_token(subject, &entry)
                .map(|refresh_token| (access_token, refresh_token))
        });

        match signed {
            Ok((access_token, refresh_token)) => Ok(TokenPair {
                access_token,
                refresh_token,
                refresh_token_id: entry.id,
            }),
            Err(e) => {
                if let Err(cleanup) = self.ledger.delete(entry.id).await {
                    warn!(token_id = entry.id, error = %cleanup, "Failed to remove orphaned refresh entry");
                }
                Err(e.into())
            }
        }
    }
}
