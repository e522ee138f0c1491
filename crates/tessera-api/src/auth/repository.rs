//! PostgreSQL stores for user accounts and the refresh ledger
//!
//! Tables `users` and `refresh_tokens` are described by the reference schema
//! in `migrations/`; the service does not apply it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tessera_core::{
    CoreError, DatabaseConfig, NewUser, RefreshLedger, RefreshLedgerEntry, Result, Role,
    UserAccount, UserStore,
};

const USER_COLUMNS: &str =
    "id, email, first_name, last_name, password, role, tenant_id, created_at, updated_at";

/// Open a connection pool
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.postgres_pool_size)
        .connect(&config.postgres_url)
        .await
        .map_err(|e| CoreError::DatabaseError(format!("Failed to connect: {e}")))
}

fn database_error(context: &str, e: sqlx::Error) -> CoreError {
    CoreError::DatabaseError(format!("{context}: {e}"))
}

/// Row as stored; `role` is validated on the way out
#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i64,
    email: String,
    first_name: String,
    last_name: String,
    password: String,
    role: String,
    tenant_id: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for UserAccount {
    type Error = CoreError;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(UserAccount {
            id: row.id,
            email: row.email,
            first_name: row.first_name,
            last_name: row.last_name,
            password_hash: row.password,
            role: row.role.parse::<Role>()?,
            tenant_id: row.tenant_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RefreshTokenRow {
    id: i64,
    user_id: i64,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RefreshTokenRow> for RefreshLedgerEntry {
    fn from(row: RefreshTokenRow) -> Self {
        RefreshLedgerEntry {
            id: row.id,
            user_id: row.user_id,
            expires_at: row.expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// User store backed by the `users` table
#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, user: NewUser) -> Result<UserAccount> {
        let query = format!(
            "INSERT INTO users (email, first_name, last_name, password, role, tenant_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW()) RETURNING {USER_COLUMNS}"
        );

        let row = sqlx::query_as::<_, UserRow>(&query)
            .bind(&user.email)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.password_hash)
            .bind(user.role.as_str())
            .bind(user.tenant_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    CoreError::Conflict(format!("Email {} is already registered", user.email))
                }
                other => database_error("Failed to create user", other),
            })?;

        row.try_into()
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<UserAccount>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");

        sqlx::query_as::<_, UserRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| database_error("Failed to fetch user", e))?
            .map(UserAccount::try_from)
            .transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserAccount>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");

        sqlx::query_as::<_, UserRow>(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| database_error("Failed to fetch user", e))?
            .map(UserAccount::try_from)
            .transpose()
    }

    async fn delete(&self, id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| database_error("Failed to delete user", e))?;

        Ok(result.rows_affected())
    }
}

/// Refresh ledger backed by the `refresh_tokens` table
#[derive(Clone)]
pub struct PgRefreshLedger {
    pool: PgPool,
}

impl PgRefreshLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshLedger for PgRefreshLedger {
    async fn create(&self, user_id: i64, expires_at: DateTime<Utc>) -> Result<RefreshLedgerEntry> {
        let row = sqlx::query_as::<_, RefreshTokenRow>(
            "INSERT INTO refresh_tokens (user_id, expires_at, created_at, updated_at) \
             VALUES ($1, $2, NOW(), NOW()) \
             RETURNING id, user_id, expires_at, created_at, updated_at",
        )
        .bind(user_id)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| database_error("Failed to store refresh token", e))?;

        Ok(row.into())
    }

    async fn find(&self, id: i64) -> Result<Option<RefreshLedgerEntry>> {
        let row = sqlx::query_as::<_, RefreshTokenRow>(
            "SELECT id, user_id, expires_at, created_at, updated_at FROM refresh_tokens WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| database_error("Failed to fetch refresh token", e))?;

        Ok(row.map(Into::into))
    }

    async fn delete(&self, id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| database_error("Failed to delete refresh token", e))?;

        Ok(result.rows_affected())
    }
}
