//! Authentication and authorization module
//!
//! - Token generation and validation (RS256 access, HS256 refresh)
//! - Key material loading, including JWKS
//! - Password hashing with Argon2
//! - Refresh-ledger backed token issuance
//! - Request gates for authentication and role checks
//! - Authentication service for the session workflows
//! - PostgreSQL stores

pub mod cookie;
pub mod jwt;
pub mod keys;
pub mod middleware;
pub mod models;
pub mod password;
pub mod repository;
pub mod service;
pub mod tokens;

pub use jwt::{AccessClaims, JwtError, RefreshClaims, TokenSettings, TokenSubject};
pub use keys::{KeyError, KeyProvider};
pub use middleware::{
    authenticate, parse_refresh_token, require_role, verify_refresh_token, AuthError,
    AuthenticatedUser, RefreshSession,
};
pub use password::{CredentialHasher, PasswordError};
pub use repository::{PgRefreshLedger, PgUserStore};
pub use service::{AuthOutcome, AuthService};
pub use tokens::{TokenIssuer, TokenPair};
