/// Password hashing and verification using Argon2id
///
/// Implements salted, deliberately slow password hashing:
/// - Algorithm: Argon2id (memory-hard, resistant to GPU attacks)
/// - Memory: 64 MB
/// - Iterations: 3
/// - Parallelism: 4 lanes
/// - Salt: 16 bytes random
/// - Output: 32 bytes hash
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, Params,
};
use tessera_core::PasswordHashConfig;
use thiserror::Error;

/// Password hashing and verification errors
#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Failed to hash password: {0}")]
    HashingFailed(String),

    #[error("Failed to verify password: {0}")]
    VerificationFailed(String),

    #[error("Invalid password hash format")]
    InvalidHashFormat,
}

fn to_params(config: &PasswordHashConfig) -> Result<Params, PasswordError> {
    Params::new(
        config.memory_cost,
        config.time_cost,
        config.parallelism,
        config.output_len,
    )
    .map_err(|e| PasswordError::HashingFailed(e.to_string()))
}

/// One-way hashing of user passwords
///
/// The work factor is fixed per instance. Verification reads the parameters
/// back out of the stored PHC string, so digests produced under older
/// parameters keep verifying after the configuration changes.
#[derive(Debug, Clone, Default)]
pub struct CredentialHasher {
    config: PasswordHashConfig,
}

impl CredentialHasher {
    pub fn new(config: PasswordHashConfig) -> Self {
        Self { config }
    }

    /// Hash a plaintext password using Argon2id
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - PHC string format hash (includes algorithm, parameters, salt, and hash)
    /// * `Err(PasswordError)` - If hashing fails
    ///
    /// # Example
    ///
    /// ```no_run
    /// use tessera_api::auth::password::CredentialHasher;
    ///
    /// let hasher = CredentialHasher::default();
    /// let hash = hasher.hash("password123").expect("Failed to hash password");
    /// // Output: $argon2id$v=19$m=65536,t=3,p=4$...
    /// ```
    pub fn hash(&self, password: &str) -> Result<String, PasswordError> {
        let salt = SaltString::generate(&mut OsRng);

        let params = to_params(&self.config)?;
        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

        let password_hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| PasswordError::HashingFailed(e.to_string()))?;

        Ok(password_hash.to_string())
    }

    /// Verify a plaintext password against a stored hash
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - Password matches
    /// * `Ok(false)` - Password does not match
    /// * `Err(PasswordError)` - If the stored hash is malformed
    pub fn verify(&self, password: &str, hash: &str) -> Result<bool, PasswordError> {
        let parsed_hash = PasswordHash::new(hash).map_err(|_| PasswordError::InvalidHashFormat)?;

        match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(PasswordError::VerificationFailed(e.to_string())),
        }
    }

    /// [`hash`](Self::hash) on the blocking thread pool
    pub async fn hash_blocking(&self, password: String) -> Result<String, PasswordError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| PasswordError::HashingFailed(e.to_string()))?
    }

    /// [`verify`](Self::verify) on the blocking thread pool
    pub async fn verify_blocking(
        &self,
        password: String,
        hash: String,
    ) -> Result<bool, PasswordError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| PasswordError::VerificationFailed(e.to_string()))?
    }
}
