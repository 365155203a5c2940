//! Error types for the core library.
//!
//! Only infrastructure faults live here. Confirmation results such as an
//! expired or mismatched token are ordinary values of
//! [`ConfirmOutcome`](crate::ConfirmOutcome).

use thiserror::Error;

use crate::account::AccountId;
use crate::notify::NotifyError;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The secure random source could not produce a token.
    #[error("Random source unavailable: {0}")]
    Random(String),

    /// Confirmation message could not be delivered.
    ///
    /// The issued token stays valid.
    #[error("Notification failed: {0}")]
    Notify(#[from] NotifyError),

    /// A stored record violates the confirmation invariants.
    #[error("Corrupt account record: {0}")]
    CorruptRecord(String),

    /// Account not found.
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Another account already uses this email address.
    #[error("Email already registered: {0}")]
    DuplicateEmail(String),

    /// Registration was attempted for an account that is already confirmed.
    #[error("Account already confirmed: {0}")]
    AlreadyConfirmed(String),

    /// The account has never been saved and has no identity yet.
    #[error("Account has not been saved: {0}")]
    Unsaved(String),

    /// The account has no pending token to send.
    #[error("No pending confirmation for account {0}")]
    NothingToNotify(AccountId),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
