//! In-memory account store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::AccountStore;
use crate::account::{Account, AccountId, ConfirmationState, ConfirmationToken};
use crate::{Error, Result};

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    accounts: HashMap<AccountId, Account>,
}

/// Account store held in process memory.
///
/// Every operation runs under one lock, which makes `compare_and_swap`
/// atomic with respect to other callers.
#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    inner: Mutex<Inner>,
}

impl MemoryAccountStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored accounts.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.accounts.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.accounts.is_empty()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn load(&self, id: AccountId) -> Result<Option<Account>> {
        Ok(self.inner.lock().await.accounts.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .accounts
            .values()
            .find(|account| account.email == email)
            .cloned())
    }

    async fn save(&self, account: &mut Account) -> Result<()> {
        let mut inner = self.inner.lock().await;

        let duplicate = inner
            .accounts
            .values()
            .any(|other| other.email == account.email && other.id != account.id);
        if duplicate {
            return Err(Error::DuplicateEmail(account.email.clone()));
        }

        let id = if let Some(id) = account.id {
            if !inner.accounts.contains_key(&id) {
                return Err(Error::AccountNotFound(id.to_string()));
            }
            id
        } else {
            inner.next_id += 1;
            let id = AccountId::new(inner.next_id);
            account.id = Some(id);
            id
        };

        inner.accounts.insert(id, account.clone());
        Ok(())
    }

    async fn reissue(
        &self,
        id: AccountId,
        token: &ConfirmationToken,
        issued_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let Some(account) = inner.accounts.get_mut(&id) else {
            return Ok(false);
        };
        if account.is_confirmed() {
            return Ok(false);
        }

        account.confirmation = ConfirmationState::Pending {
            token: token.clone(),
            issued_at,
        };
        Ok(true)
    }

    async fn compare_and_swap(
        &self,
        id: AccountId,
        expected: &ConfirmationToken,
        new_state: ConfirmationState,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let Some(account) = inner.accounts.get_mut(&id) else {
            return Ok(false);
        };

        let current_matches = account
            .confirmation_token()
            .is_some_and(|current| current == expected);
        if !current_matches {
            return Ok(false);
        }

        account.confirmation = new_state;
        Ok(true)
    }
}
