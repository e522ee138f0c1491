//! Store traits
//!
//! The service never reaches a database through a global handle. Every
//! component receives the stores it needs as trait objects at construction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{NewUser, RefreshLedgerEntry, Result, UserAccount};

/// Trait for user account persistence
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a new account
    ///
    /// Fails with `CoreError::Conflict` when the email is already taken.
    async fn create(&self, user: NewUser) -> Result<UserAccount>;

    /// Get an account by id
    async fn find_by_id(&self, id: i64) -> Result<Option<UserAccount>>;

    /// Get an account by normalized email
    async fn find_by_email(&self, email: &str) -> Result<Option<UserAccount>>;

    /// Delete an account, returning the number of rows removed
    async fn delete(&self, id: i64) -> Result<u64>;
}

/// Trait for the refresh-token ledger
///
/// Individual inserts and deletes are expected to be atomic. Nothing above
/// this trait spans them with a transaction.
#[async_trait]
pub trait RefreshLedger: Send + Sync {
    /// Record a new refresh token for `user_id`
    async fn create(&self, user_id: i64, expires_at: DateTime<Utc>) -> Result<RefreshLedgerEntry>;

    /// Look up an entry by id
    async fn find(&self, id: i64) -> Result<Option<RefreshLedgerEntry>>;

    /// Delete an entry, returning the number of rows removed (0 or 1)
    async fn delete(&self, id: i64) -> Result<u64>;
}
