//! Authentication service layer
//!
//! Business logic for registration, login, token refresh, logout and
//! administrator user creation. Request bodies arrive already validated.

use std::sync::Arc;

use tessera_core::{normalize_email, CoreError, NewUser, Role, UserProfile, UserStore};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use super::jwt::TokenSubject;
use super::middleware::{AuthenticatedUser, RefreshSession};
use super::models::{CreateUserRequest, LoginRequest, RegisterRequest};
use super::password::{CredentialHasher, PasswordError};
use super::tokens::{TokenIssuer, TokenPair};
use crate::audit::{audit_log, AuditEvent, ClientInfo};
use crate::error::AppError;

const INVALID_CREDENTIALS: &str = "Email or password does not match.";
const DECOY_PASSWORD: &str = "tessera-decoy-password";

/// Result of a flow that opens or continues a session
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub user_id: i64,
    pub tokens: TokenPair,
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    tokens: Arc<TokenIssuer>,
    hasher: CredentialHasher,
    /// Digest checked when the email is unknown so that both login failures
    /// pay for one Argon2 verification
    decoy_hash: Arc<OnceCell<String>>,
}

impl AuthService {
    pub fn new(users: Arc<dyn UserStore>, tokens: Arc<TokenIssuer>, hasher: CredentialHasher) -> Self {
        Self {
            users,
            tokens,
            hasher,
            decoy_hash: Arc::new(OnceCell::new()),
        }
    }

    /// Compute the decoy digest ahead of the first login
    pub async fn warm_up(&self) -> Result<(), PasswordError> {
        self.decoy_hash().await.map(|_| ())
    }

    async fn decoy_hash(&self) -> Result<&str, PasswordError> {
        self.decoy_hash
            .get_or_try_init(|| self.hasher.hash_blocking(DECOY_PASSWORD.to_string()))
            .await
            .map(String::as_str)
    }

    /// Register a new customer and open a session
    ///
    /// # Returns
    ///
    /// * `Ok(AuthOutcome)` - New user id and token pair
    /// * `Err(AppError::Conflict)` - Email already registered
    pub async fn register(
        &self,
        request: RegisterRequest,
        client: &ClientInfo,
    ) -> Result<AuthOutcome, AppError> {
        let email = normalize_email(&request.email);

        let user = match self
            .create_account(
                email.clone(),
                request.first_name,
                request.last_name,
                request.password,
                Role::Customer,
                None,
            )
            .await
        {
            Ok(user) => user,
            Err(e) => {
                audit_log(&AuditEvent::RegistrationFailure {
                    email,
                    reason: e.to_string(),
                    ip_address: client.ip_address.clone(),
                    user_agent: client.user_agent.clone(),
                });
                return Err(e);
            }
        };

        // The account is kept when issuance fails; a later login opens the session
        let tokens = match self.tokens.issue_pair(TokenSubject::from(&user)).await {
            Ok(tokens) => tokens,
            Err(e) => {
                audit_log(&AuditEvent::RegistrationFailure {
                    email: user.email,
                    reason: e.to_string(),
                    ip_address: client.ip_address.clone(),
                    user_agent: client.user_agent.clone(),
                });
                return Err(e);
            }
        };

        audit_log(&AuditEvent::RegistrationSuccess {
            user_id: user.id,
            email: user.email.clone(),
            role: user.role,
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
        });

        Ok(AuthOutcome {
            user_id: user.id,
            tokens,
        })
    }

    /// Login with email and password
    ///
    /// An unknown email and a wrong password fail with the same message, and
    /// both run one password verification.
    pub async fn login(
        &self,
        request: LoginRequest,
        client: &ClientInfo,
    ) -> Result<AuthOutcome, AppError> {
        let email = normalize_email(&request.email);

        let reject = |reason: &str| {
            audit_log(&AuditEvent::LoginFailure {
                email: email.clone(),
                reason: reason.to_string(),
                ip_address: client.ip_address.clone(),
                user_agent: client.user_agent.clone(),
            });
            AppError::Authentication(INVALID_CREDENTIALS.to_string())
        };

        let Some(user) = self.users.find_by_email(&email).await? else {
            let decoy = self.decoy_hash().await?.to_string();
            self.hasher.verify_blocking(request.password, decoy).await?;
            return Err(reject("Unknown email"));
        };

        let password_valid = self
            .hasher
            .verify_blocking(request.password, user.password_hash.clone())
            .await?;
        if !password_valid {
            return Err(reject("Invalid password"));
        }

        let tokens = self.tokens.issue_pair(TokenSubject::from(&user)).await?;

        audit_log(&AuditEvent::LoginSuccess {
            user_id: user.id,
            email: user.email,
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
        });

        Ok(AuthOutcome {
            user_id: user.id,
            tokens,
        })
    }

    /// Rotate a verified refresh token
    ///
    /// A new ledger entry and token pair are created first, then the old
    /// entry is deleted. If the old entry was already gone, another request
    /// consumed the token concurrently: the new entry is discarded and the
    /// refresh is rejected.
    pub async fn refresh(
        &self,
        session: &RefreshSession,
        client: &ClientInfo,
    ) -> Result<AuthOutcome, AppError> {
        let user = self
            .users
            .find_by_id(session.user_id)
            .await?
            .ok_or_else(|| AppError::Authentication("User no longer exists".to_string()))?;

        // Role comes from the stored account, not the presented token
        let tokens = self.tokens.issue_pair(TokenSubject::from(&user)).await?;

        let removed = match self.tokens.revoke_refresh_entry(session.token_id).await {
            Ok(removed) => removed,
            Err(e) => {
                self.discard_entry(tokens.refresh_token_id).await;
                return Err(e.into());
            }
        };

        if !removed {
            self.discard_entry(tokens.refresh_token_id).await;
            audit_log(&AuditEvent::RefreshReuseRejected {
                user_id: user.id,
                token_id: session.token_id,
                ip_address: client.ip_address.clone(),
                user_agent: client.user_agent.clone(),
            });
            return Err(AppError::Authentication(
                "Refresh token has already been used".to_string(),
            ));
        }

        audit_log(&AuditEvent::TokenRefresh {
            user_id: user.id,
            old_token_id: session.token_id,
            new_token_id: tokens.refresh_token_id,
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
        });

        Ok(AuthOutcome {
            user_id: user.id,
            tokens,
        })
    }

    async fn discard_entry(&self, id: i64) {
        if let Err(e) = self.tokens.revoke_refresh_entry(id).await {
            warn!(token_id = id, error = %e, "Failed to discard refresh entry");
        }
    }

    /// Revoke the session's refresh ledger entry
    ///
    /// Revoking an entry that is already gone succeeds.
    pub async fn logout(&self, session: &RefreshSession, client: &ClientInfo) -> Result<(), AppError> {
        let revoked = self.tokens.revoke_refresh_entry(session.token_id).await?;

        audit_log(&AuditEvent::Logout {
            user_id: session.user_id,
            token_id: session.token_id,
            revoked,
            ip_address: client.ip_address.clone(),
        });

        Ok(())
    }

    /// Profile of the authenticated user
    pub async fn me(&self, user: &AuthenticatedUser) -> Result<UserProfile, AppError> {
        let account = self
            .users
            .find_by_id(user.user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        Ok(account.to_profile())
    }

    /// Create a manager account on behalf of an administrator
    ///
    /// No tokens are issued for the new account.
    pub async fn create_user(
        &self,
        request: CreateUserRequest,
        created_by: &AuthenticatedUser,
        client: &ClientInfo,
    ) -> Result<i64, AppError> {
        let user = self
            .create_account(
                normalize_email(&request.email),
                request.first_name,
                request.last_name,
                request.password,
                Role::Manager,
                request.tenant_id,
            )
            .await?;

        audit_log(&AuditEvent::UserCreated {
            user_id: user.id,
            email: user.email,
            role: user.role,
            tenant_id: user.tenant_id,
            created_by: created_by.user_id,
            ip_address: client.ip_address.clone(),
        });

        Ok(user.id)
    }

    async fn create_account(
        &self,
        email: String,
        first_name: String,
        last_name: String,
        password: String,
        role: Role,
        tenant_id: Option<i64>,
    ) -> Result<tessera_core::UserAccount, AppError> {
        if self.users.find_by_email(&email).await?.is_some() {
            return Err(AppError::Conflict("Email is already exists!".to_string()));
        }

        let password_hash = self.hasher.hash_blocking(password).await?;

        let user = self
            .users
            .create(NewUser {
                email,
                first_name,
                last_name,
                password_hash,
                role,
                tenant_id,
            })
            .await
            .map_err(|e| match e {
                // Lost a race with a concurrent insert of the same email
                CoreError::Conflict(_) => AppError::Conflict("Email is already exists!".to_string()),
                other => other.into(),
            })?;

        info!(user_id = user.id, role = %user.role, "User account created");
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestContext;
    use tessera_core::RefreshLedger;

    fn register_request(email: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
            password: "secret123".to_string(),
        }
    }

    fn login_request(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    fn session_for(outcome: &AuthOutcome, role: Role) -> RefreshSession {
        RefreshSession {
            user_id: outcome.user_id,
            role,
            token_id: outcome.tokens.refresh_token_id,
        }
    }

    #[tokio::test]
    async fn test_register_creates_customer_with_hashed_password() {
        let ctx = TestContext::new().await;
        let client = ClientInfo::default();

        let outcome = ctx
            .state
            .auth_service
            .register(register_request(" Jane@Example.com "), &client)
            .await
            .unwrap();

        let user = ctx.users.find_by_id(outcome.user_id).await.unwrap().unwrap();
        assert_eq!(user.email, "jane@example.com");
        assert_eq!(user.role, Role::Customer);
        assert_ne!(user.password_hash, "secret123");
        assert!(ctx
            .ledger
            .find(outcome.tokens.refresh_token_id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_duplicate_registration_conflicts() {
        let ctx = TestContext::new().await;
        let service = &ctx.state.auth_service;
        let client = ClientInfo::default();

        service
            .register(register_request("jane@example.com"), &client)
            .await
            .unwrap();
        let result = service
            .register(register_request("JANE@example.com"), &client)
            .await;

        assert!(matches!(result, Err(AppError::Conflict(_))));
        assert_eq!(ctx.users.len().await, 1);
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[tokio::test]
    async fn test_registration_without_signing_key_is_audited_as_failure() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let ctx = TestContext::without_private_key().await;
        let service = &ctx.state.auth_service;
        let client = ClientInfo::default();

        let result = service
            .register(register_request("jane@example.com"), &client)
            .await;
        assert!(matches!(result, Err(AppError::Configuration(_))));

        let output = logs.text();
        assert!(output.contains("registration_failure"));
        assert!(!output.contains("registration_success"));

        // The account is kept and the email stays taken
        assert_eq!(ctx.users.len().await, 1);
        assert!(ctx.ledger.is_empty().await);
        let retry = service
            .register(register_request("jane@example.com"), &client)
            .await;
        assert!(matches!(retry, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_unknown_email_runs_password_verification() {
        let ctx = TestContext::new().await;
        let service = &ctx.state.auth_service;
        assert!(service.decoy_hash.get().is_none());

        let result = service
            .login(
                login_request("nobody@example.com", "secret123"),
                &ClientInfo::default(),
            )
            .await;
        assert!(matches!(result, Err(AppError::Authentication(_))));

        // The decoy digest carries the configured work factor
        let decoy = service.decoy_hash.get().unwrap();
        assert!(decoy.starts_with("$argon2id$"));
        assert!(decoy.contains("m=8192,t=1,p=1"));
    }

    #[tokio::test]
    async fn test_unknown_email_takes_as_long_as_wrong_password() {
        let ctx = TestContext::new().await;
        let service = &ctx.state.auth_service;
        let client = ClientInfo::default();
        service
            .register(register_request("jane@example.com"), &client)
            .await
            .unwrap();
        service.warm_up().await.unwrap();

        let mut wrong_password = std::time::Duration::ZERO;
        let mut unknown_email = std::time::Duration::ZERO;
        for _ in 0..3 {
            let start = std::time::Instant::now();
            let _ = service
                .login(login_request("jane@example.com", "wrong-password"), &client)
                .await;
            wrong_password += start.elapsed();

            let start = std::time::Instant::now();
            let _ = service
                .login(login_request("nobody@example.com", "wrong-password"), &client)
                .await;
            unknown_email += start.elapsed();
        }

        assert!(
            unknown_email * 10 >= wrong_password,
            "unknown email {unknown_email:?} vs wrong password {wrong_password:?}"
        );
    }

    #[tokio::test]
    async fn test_login_failures_share_message() {
        let ctx = TestContext::new().await;
        let service = &ctx.state.auth_service;
        let client = ClientInfo::default();
        service
            .register(register_request("jane@example.com"), &client)
            .await
            .unwrap();

        let wrong_password = service
            .login(login_request("jane@example.com", "wrong-password"), &client)
            .await
            .unwrap_err();
        let unknown_email = service
            .login(login_request("nobody@example.com", "secret123"), &client)
            .await
            .unwrap_err();

        assert_eq!(wrong_password.to_string(), unknown_email.to_string());
        assert!(matches!(wrong_password, AppError::Authentication(ref m) if m == INVALID_CREDENTIALS));
    }

    #[tokio::test]
    async fn test_login_issues_new_pair() {
        let ctx = TestContext::new().await;
        let service = &ctx.state.auth_service;
        let client = ClientInfo::default();
        let registered = service
            .register(register_request("jane@example.com"), &client)
            .await
            .unwrap();

        let logged_in = service
            .login(login_request("jane@example.com", "secret123"), &client)
            .await
            .unwrap();

        assert_eq!(logged_in.user_id, registered.user_id);
        assert_ne!(
            logged_in.tokens.refresh_token_id,
            registered.tokens.refresh_token_id
        );
        assert_eq!(ctx.ledger.entries_for_user(registered.user_id).await.len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_rotates_ledger_entry() {
        let ctx = TestContext::new().await;
        let service = &ctx.state.auth_service;
        let client = ClientInfo::default();
        let outcome = service
            .register(register_request("jane@example.com"), &client)
            .await
            .unwrap();
        let old_id = outcome.tokens.refresh_token_id;

        let refreshed = service
            .refresh(&session_for(&outcome, Role::Customer), &client)
            .await
            .unwrap();

        assert!(ctx.ledger.find(old_id).await.unwrap().is_none());
        assert!(ctx
            .ledger
            .find(refreshed.tokens.refresh_token_id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_refresh_of_consumed_token_discards_new_entry() {
        let ctx = TestContext::new().await;
        let service = &ctx.state.auth_service;
        let client = ClientInfo::default();
        let outcome = service
            .register(register_request("jane@example.com"), &client)
            .await
            .unwrap();
        let session = session_for(&outcome, Role::Customer);

        // Simulate a concurrent rotation that already consumed the entry
        ctx.ledger.delete(session.token_id).await.unwrap();

        let result = service.refresh(&session, &client).await;
        assert!(matches!(result, Err(AppError::Authentication(_))));
        assert!(ctx.ledger.is_empty().await);
    }

    #[tokio::test]
    async fn test_refresh_uses_stored_role() {
        let ctx = TestContext::new().await;
        let service = &ctx.state.auth_service;
        let client = ClientInfo::default();
        let outcome = service
            .register(register_request("jane@example.com"), &client)
            .await
            .unwrap();

        // Token claims say admin; the account is a customer
        let session = session_for(&outcome, Role::Admin);
        let refreshed = service.refresh(&session, &client).await.unwrap();

        let claims = crate::auth::jwt::validate_access_token(
            &ctx.state.keys,
            ctx.state.token_settings(),
            &refreshed.tokens.access_token,
        )
        .unwrap();
        assert_eq!(claims.role, Role::Customer);
    }

    #[tokio::test]
    async fn test_refresh_for_deleted_user_fails() {
        let ctx = TestContext::new().await;
        let service = &ctx.state.auth_service;
        let client = ClientInfo::default();
        let outcome = service
            .register(register_request("jane@example.com"), &client)
            .await
            .unwrap();
        ctx.users.delete(outcome.user_id).await.unwrap();

        let result = service
            .refresh(&session_for(&outcome, Role::Customer), &client)
            .await;
        assert!(matches!(result, Err(AppError::Authentication(_))));
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let ctx = TestContext::new().await;
        let service = &ctx.state.auth_service;
        let client = ClientInfo::default();
        let outcome = service
            .register(register_request("jane@example.com"), &client)
            .await
            .unwrap();
        let session = session_for(&outcome, Role::Customer);

        service.logout(&session, &client).await.unwrap();
        assert!(ctx.ledger.find(session.token_id).await.unwrap().is_none());
        service.logout(&session, &client).await.unwrap();
    }

    #[tokio::test]
    async fn test_me_for_missing_user_is_not_found() {
        let ctx = TestContext::new().await;
        let user = AuthenticatedUser {
            user_id: 404,
            role: Role::Customer,
        };

        let result = ctx.state.auth_service.me(&user).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_create_user_makes_manager_without_session() {
        let ctx = TestContext::new().await;
        let admin = AuthenticatedUser {
            user_id: 1,
            role: Role::Admin,
        };
        let request = CreateUserRequest {
            email: "manager@example.com".to_string(),
            first_name: "Max".to_string(),
            last_name: "Power".to_string(),
            password: "secret123".to_string(),
            tenant_id: Some(3),
        };

        let id = ctx
            .state
            .auth_service
            .create_user(request, &admin, &ClientInfo::default())
            .await
            .unwrap();

        let user = ctx.users.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(user.role, Role::Manager);
        assert_eq!(user.tenant_id, Some(3));
        assert!(ctx.ledger.is_empty().await);
    }
}
