//! Account model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::token::ConfirmationToken;

/// Unique identifier for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(pub i64);

impl AccountId {
    /// Create a new account ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where an account stands in the confirmation lifecycle.
///
/// A confirmed account never carries a token, and an issue time exists
/// only alongside a token.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfirmationState {
    /// No token has been issued and the account is not confirmed.
    #[default]
    Unconfirmed,
    /// A token has been issued and awaits redemption.
    Pending {
        /// The single-use secret.
        token: ConfirmationToken,
        /// When the token was issued.
        issued_at: DateTime<Utc>,
    },
    /// The account is permanently confirmed.
    Confirmed {
        /// When the confirmation happened.
        confirmed_at: DateTime<Utc>,
    },
}

impl ConfirmationState {
    /// Short label used in logs and status output.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Unconfirmed => "unconfirmed",
            Self::Pending { .. } => "pending",
            Self::Confirmed { .. } => "confirmed",
        }
    }
}

/// A registered account as seen by the confirmation lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Account {
    /// Unique identifier (None for unsaved accounts).
    pub id: Option<AccountId>,
    /// Delivery address for confirmation messages.
    pub email: String,
    /// Confirmation state.
    pub confirmation: ConfirmationState,
}

impl Account {
    /// Create an unsaved, unconfirmed account for the given address.
    #[must_use]
    pub fn with_email(email: &str) -> Self {
        Self {
            email: email.to_string(),
            ..Default::default()
        }
    }

    /// The pending confirmation token, if any.
    #[must_use]
    pub fn confirmation_token(&self) -> Option<&ConfirmationToken> {
        match &self.confirmation {
            ConfirmationState::Pending { token, .. } => Some(token),
            _ => None,
        }
    }

    /// When the pending token was issued, if any.
    #[must_use]
    pub fn confirmation_issued_at(&self) -> Option<DateTime<Utc>> {
        match self.confirmation {
            ConfirmationState::Pending { issued_at, .. } => Some(issued_at),
            _ => None,
        }
    }

    /// When the account was confirmed, if it has been.
    #[must_use]
    pub fn confirmed_at(&self) -> Option<DateTime<Utc>> {
        match self.confirmation {
            ConfirmationState::Confirmed { confirmed_at } => Some(confirmed_at),
            _ => None,
        }
    }

    /// Whether the account has been confirmed.
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.confirmed_at().is_some()
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

    mod account_id_tests {
        use super::*;

        #[test]
        fn new() {
            let id = AccountId::new(42);
            assert_eq!(id.0, 42);
        }

        #[test]
        fn display() {
            let id = AccountId::new(123);
            assert_eq!(format!("{id}"), "123");
        }
    }

    mod state_tests {
        use super::*;

        #[test]
        fn default_is_unconfirmed() {
            assert_eq!(ConfirmationState::default(), ConfirmationState::Unconfirmed);
        }

        #[test]
        fn labels() {
            assert_eq!(ConfirmationState::Unconfirmed.label(), "unconfirmed");
            assert_eq!(
                ConfirmationState::Confirmed { confirmed_at: at(0) }.label(),
                "confirmed"
            );
        }
    }

    mod account_tests {
        use super::*;

        #[test]
        fn with_email_is_unsaved_and_unconfirmed() {
            let account = Account::with_email("alice@example.com");
            assert!(account.id.is_none());
            assert_eq!(account.email, "alice@example.com");
            assert!(account.confirmation_token().is_none());
            assert!(account.confirmation_issued_at().is_none());
            assert!(account.confirmed_at().is_none());
            assert!(!account.is_confirmed());
        }

        #[test]
        fn pending_exposes_token_and_issue_time_together() {
            let mut account = Account::with_email("alice@example.com");
            account.confirmation = ConfirmationState::Pending {
                token: ConfirmationToken::new("abc123"),
                issued_at: at(10),
            };
            assert_eq!(account.confirmation_token().unwrap().expose(), "abc123");
            assert_eq!(account.confirmation_issued_at(), Some(at(10)));
            assert!(!account.is_confirmed());
        }

        #[test]
        fn confirmed_has_no_token() {
            let mut account = Account::with_email("alice@example.com");
            account.confirmation = ConfirmationState::Confirmed { confirmed_at: at(86400) };
            assert!(account.confirmation_token().is_none());
            assert!(account.confirmation_issued_at().is_none());
            assert_eq!(account.confirmed_at(), Some(at(86400)));
            assert!(account.is_confirmed());
        }
    }
}
