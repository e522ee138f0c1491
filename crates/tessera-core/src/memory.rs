//! In-memory stores
//!
//! Process-local implementations of [`UserStore`] and [`RefreshLedger`],
//! used by tests and by `DATABASE_BACKEND=memory` for local runs. Ids are
//! assigned from a monotonically increasing counter, like a serial column.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::store::{RefreshLedger, UserStore};
use crate::{CoreError, NewUser, RefreshLedgerEntry, Result, UserAccount};

struct Table<T> {
    next_id: i64,
    rows: HashMap<i64, T>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            rows: HashMap::new(),
        }
    }
}

impl<T> Table<T> {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory user store
#[derive(Default)]
pub struct InMemoryUserStore {
    table: RwLock<Table<UserAccount>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored accounts
    pub async fn len(&self) -> usize {
        self.table.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn create(&self, user: NewUser) -> Result<UserAccount> {
        let mut table = self.table.write().await;

        if table.rows.values().any(|u| u.email == user.email) {
            return Err(CoreError::Conflict(format!(
                "Email {} is already registered",
                user.email
            )));
        }

        let now = Utc::now();
        let id = table.allocate_id();
        let account = UserAccount {
            id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            password_hash: user.password_hash,
            role: user.role,
            tenant_id: user.tenant_id,
            created_at: now,
            updated_at: now,
        };
        table.rows.insert(id, account.clone());

        Ok(account)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<UserAccount>> {
        Ok(self.table.read().await.rows.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserAccount>> {
        Ok(self
            .table
            .read()
            .await
            .rows
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn delete(&self, id: i64) -> Result<u64> {
        let removed = self.table.write().await.rows.remove(&id);
        Ok(u64::from(removed.is_some()))
    }
}

/// In-memory refresh ledger
#[derive(Default)]
pub struct InMemoryRefreshLedger {
    table: RwLock<Table<RefreshLedgerEntry>>,
}

impl InMemoryRefreshLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries
    pub async fn len(&self) -> usize {
        self.table.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Entries owned by a user
    pub async fn entries_for_user(&self, user_id: i64) -> Vec<RefreshLedgerEntry> {
        let mut entries: Vec<_> = self
            .table
            .read()
            .await
            .rows
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.id);
        entries
    }
}

#[async_trait]
impl RefreshLedger for InMemoryRefreshLedger {
    async fn create(&self, user_id: i64, expires_at: DateTime<Utc>) -> Result<RefreshLedgerEntry> {
        let mut table = self.table.write().await;
        let now = Utc::now();
        let id = table.allocate_id();
        let entry = RefreshLedgerEntry {
            id,
            user_id,
            expires_at,
            created_at: now,
            updated_at: now,
        };
        table.rows.insert(id, entry.clone());

        Ok(entry)
    }

    async fn find(&self, id: i64) -> Result<Option<RefreshLedgerEntry>> {
        Ok(self.table.read().await.rows.get(&id).cloned())
    }

    async fn delete(&self, id: i64) -> Result<u64> {
        let removed = self.table.write().await.rows.remove(&id);
        Ok(u64::from(removed.is_some()))
    }
}
