//! Account storage.
//!
//! The lifecycle never assumes a storage engine; it talks to an
//! [`AccountStore`]. Two implementations ship with the crate: an in-memory
//! map for tests and embedding, and an `SQLite` repository.

mod memory;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::account::{Account, AccountId, ConfirmationState, ConfirmationToken};
use crate::Result;

pub use memory::MemoryAccountStore;
pub use sqlite::SqliteAccountStore;

/// Persistence for accounts under confirmation.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Loads an account by identity.
    async fn load(&self, id: AccountId) -> Result<Option<Account>>;

    /// Loads an account by email address.
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>>;

    /// Saves an account (insert or update).
    ///
    /// Inserting assigns `account.id`. Used for uncontended writes such as
    /// creating an account; replacing the token of an existing account goes
    /// through [`AccountStore::reissue`].
    async fn save(&self, account: &mut Account) -> Result<()>;

    /// Atomically stores a new pending token for an existing account.
    ///
    /// The update applies only if the account exists and is not confirmed,
    /// so a confirmation that lands first is never undone. Returns whether
    /// it applied.
    async fn reissue(
        &self,
        id: AccountId,
        token: &ConfirmationToken,
        issued_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Atomically replaces the confirmation state of an account.
    ///
    /// The update applies only if the account is still unconfirmed and its
    /// stored token equals `expected`. Returns whether it applied.
    async fn compare_and_swap(
        &self,
        id: AccountId,
        expected: &ConfirmationToken,
        new_state: ConfirmationState,
    ) -> Result<bool>;
}
