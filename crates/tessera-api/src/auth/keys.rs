//! Signing and verification key material
//!
//! Access tokens are signed with an RSA private key and verified either with
//! the matching PEM public key or with a JSON Web Key Set. Refresh tokens use
//! a shared HMAC secret for both directions.

use super::jwt::JwtError;
use jsonwebtoken::jwk::{AlgorithmParameters, JwkSet};
use jsonwebtoken::{DecodingKey, EncodingKey};
use tessera_core::{AuthConfig, ConfigError};
use thiserror::Error;
use tracing::{info, warn};

/// Key loading errors
#[derive(Debug, Error)]
pub enum KeyError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid RSA private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid RSA public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid JWKS document: {0}")]
    InvalidJwks(String),

    #[error("Failed to fetch JWKS from {uri}: {message}")]
    JwksFetch { uri: String, message: String },
}

enum Verifier {
    Pem(DecodingKey),
    KeySet(Vec<(Option<String>, DecodingKey)>),
}

/// Key material for both token kinds
pub struct KeyProvider {
    signing: Option<EncodingKey>,
    signing_kid: Option<String>,
    verifier: Verifier,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
}

impl std::fmt::Debug for KeyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let verifier = match &self.verifier {
            Verifier::Pem(_) => "pem".to_string(),
            Verifier::KeySet(keys) => format!("jwks({} keys)", keys.len()),
        };
        f.debug_struct("KeyProvider")
            .field("can_sign", &self.signing.is_some())
            .field("signing_kid", &self.signing_kid)
            .field("verifier", &verifier)
            .finish_non_exhaustive()
    }
}

impl KeyProvider {
    /// Load keys from configuration
    ///
    /// Verification material is resolved in order: public key PEM, JWKS
    /// file, JWKS URI. The refresh secret and some form of verification
    /// material are required. A missing private key is tolerated here and
    /// only fails when an access token is issued.
    pub async fn load(config: &AuthConfig) -> Result<Self, KeyError> {
        let secret = config
            .refresh_token_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::MissingRequired("REFRESH_TOKEN_SECRET".to_string()))?;

        let signing = match config.private_key_material()? {
            Some(pem) => Some(parse_private_key(&pem)?),
            None => {
                warn!("No private key configured; access token issuance will fail");
                None
            }
        };

        let verifier = if let Some(pem) = config.public_key_material()? {
            Verifier::Pem(parse_public_key(&pem)?)
        } else if let Some(json) = config.jwks_material()? {
            parse_jwks(&json)?
        } else if let Some(uri) = config.jwks_uri.as_deref() {
            let json = fetch_jwks(uri).await?;
            parse_jwks(&json)?
        } else {
            return Err(ConfigError::MissingRequired(
                "PUBLIC_KEY, JWKS_PATH or JWKS_URI".to_string(),
            )
            .into());
        };

        let provider = Self::with_verifier(signing, verifier, secret.as_bytes());
        let provider = match config.signing_key_id.as_deref().filter(|k| !k.is_empty()) {
            Some(kid) => provider.with_signing_key_id(kid),
            None => provider,
        };

        if let Verifier::KeySet(keys) = &provider.verifier {
            if provider.can_sign() && provider.signing_kid.is_none() && keys.len() > 1 {
                warn!(
                    keys = keys.len(),
                    "Key set holds several keys but JWT_KEY_ID is unset; issued access tokens will not verify"
                );
            }
        }

        Ok(provider)
    }

    /// Build from PEM strings directly
    pub fn from_pem(
        private_pem: Option<&str>,
        public_pem: &str,
        refresh_secret: &[u8],
    ) -> Result<Self, KeyError> {
        let signing = private_pem.map(parse_private_key).transpose()?;
        let verifier = Verifier::Pem(parse_public_key(public_pem)?);
        Ok(Self::with_verifier(signing, verifier, refresh_secret))
    }

    /// Build from a private key PEM and a JWKS document
    pub fn from_jwks(
        private_pem: Option<&str>,
        jwks_json: &str,
        refresh_secret: &[u8],
    ) -> Result<Self, KeyError> {
        let signing = private_pem.map(parse_private_key).transpose()?;
        let verifier = parse_jwks(jwks_json)?;
        Ok(Self::with_verifier(signing, verifier, refresh_secret))
    }

    fn with_verifier(signing: Option<EncodingKey>, verifier: Verifier, secret: &[u8]) -> Self {
        Self {
            signing,
            signing_kid: None,
            verifier,
            refresh_encoding: EncodingKey::from_secret(secret),
            refresh_decoding: DecodingKey::from_secret(secret),
        }
    }

    /// Whether access tokens can be issued
    pub fn can_sign(&self) -> bool {
        self.signing.is_some()
    }

    pub fn signing_key(&self) -> Result<&EncodingKey, JwtError> {
        self.signing.as_ref().ok_or(JwtError::MissingPrivateKey)
    }

    /// Set the `kid` written into access token headers
    pub fn with_signing_key_id(mut self, kid: impl Into<String>) -> Self {
        self.signing_kid = Some(kid.into());
        self
    }

    pub fn signing_key_id(&self) -> Option<&str> {
        self.signing_kid.as_deref()
    }

    /// Pick the access token verification key
    ///
    /// With a key set, the token's `kid` selects the key. A token without a
    /// `kid` is accepted only when the set holds exactly one key.
    pub fn verification_key(&self, kid: Option<&str>) -> Result<&DecodingKey, JwtError> {
        match &self.verifier {
            Verifier::Pem(key) => Ok(key),
            Verifier::KeySet(keys) => match kid {
                Some(kid) => keys
                    .iter()
                    .find(|(id, _)| id.as_deref() == Some(kid))
                    .map(|(_, key)| key)
                    .ok_or(JwtError::UnknownKey),
                None => match keys.as_slice() {
                    [(_, key)] => Ok(key),
                    _ => Err(JwtError::UnknownKey),
                },
            },
        }
    }

    pub fn refresh_encoding_key(&self) -> &EncodingKey {
        &self.refresh_encoding
    }

    pub fn refresh_decoding_key(&self) -> &DecodingKey {
        &self.refresh_decoding
    }
}

fn parse_private_key(pem: &str) -> Result<EncodingKey, KeyError> {
    EncodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| KeyError::InvalidPrivateKey(e.to_string()))
}

fn parse_public_key(pem: &str) -> Result<DecodingKey, KeyError> {
    DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| KeyError::InvalidPublicKey(e.to_string()))
}

fn parse_jwks(json: &str) -> Result<Verifier, KeyError> {
    let set: JwkSet = serde_json::from_str(json).map_err(|e| KeyError::InvalidJwks(e.to_string()))?;

    let keys = set
        .keys
        .iter()
        .filter(|jwk| matches!(jwk.algorithm, AlgorithmParameters::RSA(_)))
        .map(|jwk| {
            DecodingKey::from_jwk(jwk)
                .map(|key| (jwk.common.key_id.clone(), key))
                .map_err(|e| KeyError::InvalidJwks(e.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if keys.is_empty() {
        return Err(KeyError::InvalidJwks("no RSA keys in set".to_string()));
    }

    info!(keys = keys.len(), "Loaded access token verification key set");
    Ok(Verifier::KeySet(keys))
}

async fn fetch_jwks(uri: &str) -> Result<String, KeyError> {
    let fetch_error = |e: reqwest::Error| KeyError::JwksFetch {
        uri: uri.to_string(),
        message: e.to_string(),
    };

    info!(uri, "Fetching JWKS");
    reqwest::get(uri)
        .await
        .map_err(fetch_error)?
        .error_for_status()
        .map_err(fetch_error)?
        .text()
        .await
        .map_err(fetch_error)
}
