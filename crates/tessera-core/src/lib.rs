//! Tessera Core - Domain models, store traits, and shared types
//!
//! This crate defines the core abstractions used by the Tessera auth service:
//! - Account and refresh-ledger models
//! - The closed set of user roles
//! - Common error types
//! - Store traits for user accounts and the refresh-token ledger
//! - In-memory store implementations
//! - Configuration management

pub mod config;
pub mod memory;
pub mod store;

pub use config::{
    AppConfig, AuthConfig, ConfigError, CookieConfig, DatabaseBackend, DatabaseConfig,
    LoggingConfig, PasswordHashConfig, ServerConfig, MAX_TOKEN_TTL_SECS,
};
pub use memory::{InMemoryRefreshLedger, InMemoryUserStore};
pub use store::{RefreshLedger, UserStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for store operations
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

// ============================================================================
// Roles
// ============================================================================

/// User role
///
/// The closed set of roles recognised by the service:
/// - Customer: default role for self-registered accounts
/// - Manager: tenant staff, created by an administrator
/// - Admin: full access including account management
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Manager,
    Admin,
}

impl Role {
    /// Every recognised role
    pub const ALL: [Role; 3] = [Role::Customer, Role::Manager, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Manager => "manager",
            Role::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Role::Customer),
            "manager" => Ok(Role::Manager),
            "admin" => Ok(Role::Admin),
            other => Err(CoreError::ValidationError(format!("Unknown role: {other}"))),
        }
    }
}

// ============================================================================
// Accounts
// ============================================================================

/// Normalize an email address as received from a client
///
/// Emails are stored exactly as given after trimming surrounding whitespace
/// and lower-casing, so lookups must go through the same normalization.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// User account record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    /// Store-assigned identifier
    pub id: i64,

    /// Normalized email address (unique)
    pub email: String,

    pub first_name: String,

    pub last_name: String,

    /// Argon2 PHC string. Never serialized.
    #[serde(skip_serializing)]
    pub password_hash: String,

    pub role: Role,

    /// Owning tenant, if any
    pub tenant_id: Option<i64>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl UserAccount {
    /// Outward representation without the password hash
    pub fn to_profile(&self) -> UserProfile {
        UserProfile {
            id: self.id,
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            role: self.role,
            tenant_id: self.tenant_id,
            created_at: self.created_at,
        }
    }
}

/// Insert payload for a new account
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password_hash: String,
    pub role: Role,
    pub tenant_id: Option<i64>,
}

/// Public account representation (safe for API responses)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Refresh ledger
// ============================================================================

/// Refresh ledger entry
///
/// The existence of an entry is the sole source of truth for whether the
/// refresh token carrying its id (as `jti`) may still be used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshLedgerEntry {
    /// Store-generated id, embedded verbatim as the token's `jti` claim
    pub id: i64,

    /// Owning user
    pub user_id: i64,

    pub expires_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl RefreshLedgerEntry {
    /// Check if the entry has passed its expiry
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

// ============================================================================
// Tests
// ============================================================================
