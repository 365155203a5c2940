//! `SQLite` account repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::debug;

use super::AccountStore;
use crate::account::{Account, AccountId, ConfirmationState, ConfirmationToken};
use crate::{Error, Result};

/// Account store backed by an `SQLite` database.
pub struct SqliteAccountStore {
    pool: SqlitePool,
}

impl SqliteAccountStore {
    /// Opens (or creates) the account database at `database_path`.
    ///
    /// The `accounts` table and its token index are created if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn new(database_path: &str) -> Result<Self> {
        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let repo = Self { pool };
        repo.initialize().await?;
        Ok(repo)
    }

    /// Opens a private in-memory account database.
    ///
    /// Limited to one connection, since every `SQLite` memory connection is
    /// its own database. Used by tests and short-lived tools.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let repo = Self { pool };
        repo.initialize().await?;
        Ok(repo)
    }

    /// Initialize database schema.
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE,
                confirmation_token TEXT,
                confirmation_sent_at TEXT,
                confirmed_at TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                CHECK ((confirmation_token IS NULL) = (confirmation_sent_at IS NULL)),
                CHECK (confirmed_at IS NULL OR confirmation_token IS NULL)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_accounts_confirmation_token
                ON accounts(confirmation_token)
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert(&self, account: &mut Account) -> Result<()> {
        let (token, sent_at, confirmed_at) = state_to_columns(&account.confirmation);
        let result = sqlx::query(
            r"
            INSERT INTO accounts (email, confirmation_token, confirmation_sent_at, confirmed_at)
            VALUES (?, ?, ?, ?)
            ",
        )
        .bind(&account.email)
        .bind(token)
        .bind(sent_at)
        .bind(confirmed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, &account.email))?;

        let id = AccountId::new(result.last_insert_rowid());
        account.id = Some(id);
        debug!("Inserted account {id}");
        Ok(())
    }

    async fn update(&self, id: AccountId, account: &Account) -> Result<()> {
        let (token, sent_at, confirmed_at) = state_to_columns(&account.confirmation);
        let result = sqlx::query(
            r"
            UPDATE accounts SET
                email = ?,
                confirmation_token = ?,
                confirmation_sent_at = ?,
                confirmed_at = ?,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            ",
        )
        .bind(&account.email)
        .bind(token)
        .bind(sent_at)
        .bind(confirmed_at)
        .bind(id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, &account.email))?;

        if result.rows_affected() == 0 {
            return Err(Error::AccountNotFound(id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AccountStore for SqliteAccountStore {
    async fn load(&self, id: AccountId) -> Result<Option<Account>> {
        let row = sqlx::query(
            r"
            SELECT id, email, confirmation_token, confirmation_sent_at, confirmed_at
            FROM accounts
            WHERE id = ?
            ",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_account).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        let row = sqlx::query(
            r"
            SELECT id, email, confirmation_token, confirmation_sent_at, confirmed_at
            FROM accounts
            WHERE email = ?
            ",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_account).transpose()
    }

    async fn save(&self, account: &mut Account) -> Result<()> {
        match account.id {
            Some(id) => self.update(id, account).await,
            None => self.insert(account).await,
        }
    }

    async fn reissue(
        &self,
        id: AccountId,
        token: &ConfirmationToken,
        issued_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE accounts SET
                confirmation_token = ?,
                confirmation_sent_at = ?,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ? AND confirmed_at IS NULL
            ",
        )
        .bind(token.expose())
        .bind(issued_at.to_rfc3339())
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() == 1;
        if !applied {
            debug!("Reissue skipped for account {id}");
        }
        Ok(applied)
    }

    async fn compare_and_swap(
        &self,
        id: AccountId,
        expected: &ConfirmationToken,
        new_state: ConfirmationState,
    ) -> Result<bool> {
        let (token, sent_at, confirmed_at) = state_to_columns(&new_state);
        let result = sqlx::query(
            r"
            UPDATE accounts SET
                confirmation_token = ?,
                confirmation_sent_at = ?,
                confirmed_at = ?,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ? AND confirmation_token = ? AND confirmed_at IS NULL
            ",
        )
        .bind(token)
        .bind(sent_at)
        .bind(confirmed_at)
        .bind(id.0)
        .bind(expected.expose())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

type StateColumns<'a> = (Option<&'a str>, Option<String>, Option<String>);

fn state_to_columns(state: &ConfirmationState) -> StateColumns<'_> {
    match state {
        ConfirmationState::Unconfirmed => (None, None, None),
        ConfirmationState::Pending { token, issued_at } => {
            (Some(token.expose()), Some(issued_at.to_rfc3339()), None)
        }
        ConfirmationState::Confirmed { confirmed_at } => {
            (None, None, Some(confirmed_at.to_rfc3339()))
        }
    }
}

/// Convert a database row to an Account.
fn row_to_account(row: &sqlx::sqlite::SqliteRow) -> Result<Account> {
    let id = AccountId::new(row.try_get("id")?);
    let token: Option<String> = row.try_get("confirmation_token")?;
    let sent_at: Option<String> = row.try_get("confirmation_sent_at")?;
    let confirmed_at: Option<String> = row.try_get("confirmed_at")?;

    let confirmation = match (token, sent_at, confirmed_at) {
        (None, None, None) => ConfirmationState::Unconfirmed,
        (Some(token), Some(sent_at), None) => ConfirmationState::Pending {
            token: ConfirmationToken::new(token),
            issued_at: parse_timestamp(id, &sent_at)?,
        },
        (None, None, Some(confirmed_at)) => ConfirmationState::Confirmed {
            confirmed_at: parse_timestamp(id, &confirmed_at)?,
        },
        _ => {
            return Err(Error::CorruptRecord(format!(
                "account {id} has inconsistent confirmation columns"
            )));
        }
    };

    Ok(Account {
        id: Some(id),
        email: row.try_get("email")?,
        confirmation,
    })
}

fn parse_timestamp(id: AccountId, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::CorruptRecord(format!("account {id} timestamp {value:?}: {e}")))
}

fn map_unique_violation(error: sqlx::Error, email: &str) -> Error {
    match &error {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            Error::DuplicateEmail(email.to_string())
        }
        _ => Error::Database(error),
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_retrieve_account() {
        let repo = SqliteAccountStore::in_memory().await.unwrap();

        let mut account = Account::with_email("test@example.com");
        repo.save(&mut account).await.unwrap();
        assert!(account.id.is_some());

        let retrieved = repo.load(account.id.unwrap()).await.unwrap();
        assert_eq!(retrieved, Some(account));
    }

    #[tokio::test]
    async fn test_pending_state_round_trips() {
        let repo = SqliteAccountStore::in_memory().await.unwrap();

        let mut account = Account::with_email("alice@example.com");
        account.confirmation = ConfirmationState::Pending {
            token: ConfirmationToken::new("abc123"),
            issued_at: at(1_700_000_000),
        };
        repo.save(&mut account).await.unwrap();

        let retrieved = repo
            .find_by_email("alice@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(retrieved.confirmation_token().unwrap().expose(), "abc123");
        assert_eq!(retrieved.confirmation_issued_at(), Some(at(1_700_000_000)));
    }

    #[tokio::test]
    async fn test_update_overwrites_token() {
        let repo = SqliteAccountStore::in_memory().await.unwrap();

        let mut account = Account::with_email("alice@example.com");
        account.confirmation = ConfirmationState::Pending {
            token: ConfirmationToken::new("old"),
            issued_at: at(0),
        };
        repo.save(&mut account).await.unwrap();

        account.confirmation = ConfirmationState::Pending {
            token: ConfirmationToken::new("new"),
            issued_at: at(60),
        };
        repo.save(&mut account).await.unwrap();

        let retrieved = repo.load(account.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(retrieved.confirmation_token().unwrap().expose(), "new");
    }

    #[tokio::test]
    async fn test_update_unknown_id_fails() {
        let repo = SqliteAccountStore::in_memory().await.unwrap();
        let mut account = Account::with_email("ghost@example.com");
        account.id = Some(AccountId::new(77));
        let result = repo.save(&mut account).await;
        assert!(matches!(result, Err(Error::AccountNotFound(_))));
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let repo = SqliteAccountStore::in_memory().await.unwrap();
        repo.save(&mut Account::with_email("alice@example.com"))
            .await
            .unwrap();
        let result = repo.save(&mut Account::with_email("alice@example.com")).await;
        assert!(matches!(result, Err(Error::DuplicateEmail(_))));
    }

    #[tokio::test]
    async fn test_compare_and_swap_applies_once() {
        let repo = SqliteAccountStore::in_memory().await.unwrap();

        let mut account = Account::with_email("alice@example.com");
        account.confirmation = ConfirmationState::Pending {
            token: ConfirmationToken::new("abc123"),
            issued_at: at(0),
        };
        repo.save(&mut account).await.unwrap();
        let id = account.id.unwrap();
        let confirmed = ConfirmationState::Confirmed {
            confirmed_at: at(86400),
        };

        let wrong = ConfirmationToken::new("nope");
        assert!(!repo.compare_and_swap(id, &wrong, confirmed.clone()).await.unwrap());

        let right = ConfirmationToken::new("abc123");
        assert!(repo.compare_and_swap(id, &right, confirmed.clone()).await.unwrap());
        assert!(!repo.compare_and_swap(id, &right, confirmed).await.unwrap());

        let retrieved = repo.load(id).await.unwrap().unwrap();
        assert_eq!(retrieved.confirmed_at(), Some(at(86400)));
        assert!(retrieved.confirmation_token().is_none());
    }

    #[tokio::test]
    async fn test_reissue_never_reopens_confirmed_account() {
        let repo = SqliteAccountStore::in_memory().await.unwrap();

        let mut account = Account::with_email("alice@example.com");
        repo.save(&mut account).await.unwrap();
        let id = account.id.unwrap();

        let first = ConfirmationToken::new("first");
        assert!(repo.reissue(id, &first, at(0)).await.unwrap());
        let retrieved = repo.load(id).await.unwrap().unwrap();
        assert_eq!(retrieved.confirmation_token(), Some(&first));
        assert_eq!(retrieved.confirmation_issued_at(), Some(at(0)));

        let confirmed = ConfirmationState::Confirmed {
            confirmed_at: at(30),
        };
        assert!(repo.compare_and_swap(id, &first, confirmed).await.unwrap());

        let second = ConfirmationToken::new("second");
        assert!(!repo.reissue(id, &second, at(60)).await.unwrap());
        let retrieved = repo.load(id).await.unwrap().unwrap();
        assert_eq!(retrieved.confirmed_at(), Some(at(30)));
        assert!(retrieved.confirmation_token().is_none());

        assert!(!repo.reissue(AccountId::new(404), &second, at(60)).await.unwrap());
    }

    #[tokio::test]
    async fn test_check_constraint_rejects_token_on_confirmed_row() {
        let repo = SqliteAccountStore::in_memory().await.unwrap();
        let result = sqlx::query(
            r"
            INSERT INTO accounts (email, confirmation_token, confirmation_sent_at, confirmed_at)
            VALUES ('bad@example.com', 'tok', '1970-01-01T00:00:00+00:00', '1970-01-01T00:00:00+00:00')
            ",
        )
        .execute(&repo.pool)
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unparseable_timestamp_is_corrupt() {
        let repo = SqliteAccountStore::in_memory().await.unwrap();
        sqlx::query(
            r"
            INSERT INTO accounts (email, confirmed_at)
            VALUES ('odd@example.com', 'yesterday')
            ",
        )
        .execute(&repo.pool)
        .await
        .unwrap();

        let result = repo.find_by_email("odd@example.com").await;
        assert!(matches!(result, Err(Error::CorruptRecord(_))));
    }
}
