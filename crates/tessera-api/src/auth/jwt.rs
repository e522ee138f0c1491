//! JWT token generation and validation
//!
//! Two token kinds are issued per session:
//! - Access tokens: RS256 with the service's private key, 1 hour, no `jti`.
//! - Refresh tokens: HS256 with a shared secret, 1 year, `jti` naming the
//!   backing refresh ledger entry.
//!
//! Both carry the same fixed issuer, which validation requires.

use super::keys::KeyProvider;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tessera_core::{AuthConfig, Role, UserAccount};
use thiserror::Error;

/// Access token claims
///
/// Access tokens are not individually revocable; their short lifetime bounds
/// the exposure of a leaked token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Token issuer
    pub iss: String,
    /// Subject - stringified user id
    pub sub: String,
    /// User's role
    pub role: Role,
    /// Issued at timestamp (Unix epoch)
    pub iat: u64,
    /// Expiration timestamp (Unix epoch)
    pub exp: u64,
}

/// Refresh token claims
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// Token issuer
    pub iss: String,
    /// Subject - stringified user id
    pub sub: String,
    /// User's role at issuance
    pub role: Role,
    /// Issued at timestamp (Unix epoch)
    pub iat: u64,
    /// Expiration timestamp (Unix epoch)
    pub exp: u64,
    /// Id of the refresh ledger entry backing this token
    pub jti: String,
}

impl AccessClaims {
    pub fn user_id(&self) -> Result<i64, JwtError> {
        parse_id(&self.sub)
    }
}

impl RefreshClaims {
    pub fn user_id(&self) -> Result<i64, JwtError> {
        parse_id(&self.sub)
    }

    pub fn token_id(&self) -> Result<i64, JwtError> {
        parse_id(&self.jti)
    }
}

fn parse_id(value: &str) -> Result<i64, JwtError> {
    value.parse().map_err(|_| JwtError::InvalidToken)
}

/// Identity a token pair is minted for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSubject {
    pub user_id: i64,
    pub role: Role,
}

impl From<&UserAccount> for TokenSubject {
    fn from(user: &UserAccount) -> Self {
        Self {
            user_id: user.id,
            role: user.role,
        }
    }
}

/// JWT token generation and validation errors
#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Failed to encode JWT: {0}")]
    EncodingError(#[from] jsonwebtoken::errors::Error),

    #[error("No private key is configured for access token signing")]
    MissingPrivateKey,

    #[error("No verification key matches the token")]
    UnknownKey,

    #[error("Invalid token format")]
    InvalidToken,

    #[error("Token has expired")]
    ExpiredToken,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Invalid token issuer")]
    InvalidIssuer,

    #[error("System time error: {0}")]
    SystemTimeError(#[from] std::time::SystemTimeError),

    #[error("Token lifetime out of range")]
    LifetimeOverflow,
}

impl JwtError {
    /// True for failures caused by the presented token rather than by the
    /// service's own configuration
    pub fn is_rejection(&self) -> bool {
        !matches!(
            self,
            JwtError::EncodingError(_)
                | JwtError::MissingPrivateKey
                | JwtError::SystemTimeError(_)
                | JwtError::LifetimeOverflow
        )
    }
}

/// Token lifetimes and issuer
#[derive(Debug, Clone)]
pub struct TokenSettings {
    /// Token issuer identifier
    pub issuer: String,
    /// Access token expiration time in seconds (default: 3600 = 1 hour)
    pub access_expiration_secs: u64,
    /// Refresh token expiration time in seconds (default: 1 year)
    pub refresh_expiration_secs: u64,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self::from(&AuthConfig::default())
    }
}

impl From<&AuthConfig> for TokenSettings {
    fn from(config: &AuthConfig) -> Self {
        Self {
            issuer: config.issuer.clone(),
            access_expiration_secs: config.access_token_ttl_secs,
            refresh_expiration_secs: config.refresh_token_ttl_secs,
        }
    }
}

fn now_secs() -> Result<u64, JwtError> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

fn expires_at(now: u64, lifetime_secs: u64) -> Result<u64, JwtError> {
    now.checked_add(lifetime_secs).ok_or(JwtError::LifetimeOverflow)
}

/// Generate an RS256 access token
///
/// The private key is looked up at call time; a service started without one
/// fails here with [`JwtError::MissingPrivateKey`]. The header carries the
/// configured signing `kid`, if any.
pub fn generate_access_token(
    keys: &KeyProvider,
    settings: &TokenSettings,
    subject: TokenSubject,
) -> Result<String, JwtError> {
    let signing_key = keys.signing_key()?;
    let now = now_secs()?;

    let claims = AccessClaims {
        iss: settings.issuer.clone(),
        sub: subject.user_id.to_string(),
        role: subject.role,
        iat: now,
        exp: expires_at(now, settings.access_expiration_secs)?,
    };

    let mut header = Header::new(Algorithm::RS256);
    header.kid = keys.signing_key_id().map(str::to_string);

    Ok(encode(&header, &claims, signing_key)?)
}

/// Generate an HS256 refresh token bound to a ledger entry
pub fn generate_refresh_token(
    keys: &KeyProvider,
    settings: &TokenSettings,
    subject: TokenSubject,
    ledger_entry_id: i64,
) -> Result<String, JwtError> {
    let now = now_secs()?;

    let claims = RefreshClaims {
        iss: settings.issuer.clone(),
        sub: subject.user_id.to_string(),
        role: subject.role,
        iat: now,
        exp: expires_at(now, settings.refresh_expiration_secs)?,
        jti: ledger_entry_id.to_string(),
    };

    Ok(encode(
        &Header::new(Algorithm::HS256),
        &claims,
        keys.refresh_encoding_key(),
    )?)
}

fn map_decode_error(e: jsonwebtoken::errors::Error) -> JwtError {
    use jsonwebtoken::errors::ErrorKind;

    match e.kind() {
        ErrorKind::ExpiredSignature => JwtError::ExpiredToken,
        ErrorKind::InvalidSignature => JwtError::InvalidSignature,
        ErrorKind::InvalidIssuer => JwtError::InvalidIssuer,
        _ => JwtError::InvalidToken,
    }
}

/// Validate an access token and extract claims
///
/// Checks the RS256 signature against the configured public key (or the
/// key-set entry named by the token's `kid`), the expiry, and the issuer.
pub fn validate_access_token(
    keys: &KeyProvider,
    settings: &TokenSettings,
    token: &str,
) -> Result<AccessClaims, JwtError> {
    let header = decode_header(token).map_err(|_| JwtError::InvalidToken)?;
    let decoding_key = keys.verification_key(header.kid.as_deref())?;

    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_issuer(&[&settings.issuer]);
    validation.set_required_spec_claims(&["exp", "iss", "sub"]);

    let token_data =
        decode::<AccessClaims>(token, decoding_key, &validation).map_err(map_decode_error)?;

    Ok(token_data.claims)
}

/// Validate a refresh token's signature, expiry and issuer
///
/// This says nothing about whether the token has been rotated or revoked;
/// that is decided by the refresh ledger.
pub fn validate_refresh_token(
    keys: &KeyProvider,
    settings: &TokenSettings,
    token: &str,
) -> Result<RefreshClaims, JwtError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[&settings.issuer]);
    validation.set_required_spec_claims(&["exp", "iss", "sub", "jti"]);

    let token_data = decode::<RefreshClaims>(token, keys.refresh_decoding_key(), &validation)
        .map_err(map_decode_error)?;

    Ok(token_data.claims)
}
