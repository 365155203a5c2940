//! # confirmable-core
//!
//! Account confirmation for registration flows.
//!
//! This crate provides:
//! - Account model with a structural confirmation state
//! - Confirmation token issue, expiry and single-use redemption
//! - Account storage (in-memory and `SQLite`) with an atomic
//!   compare-and-swap for concurrent confirmations
//! - Confirmation mail composition and delivery
//! - Injectable clock and CSPRNG token source for deterministic tests
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use confirmable_core::{
//!     Account, ConfirmOutcome, ConfirmationConfig, ConfirmationManager, MemoryAccountStore,
//!     OsRandomSource, SystemClock, TracingNotifier,
//! };
//!
//! # async fn run() -> confirmable_core::Result<()> {
//! let manager = ConfirmationManager::new(
//!     Arc::new(MemoryAccountStore::new()),
//!     Arc::new(TracingNotifier),
//!     Arc::new(SystemClock),
//!     Arc::new(OsRandomSource),
//!     ConfirmationConfig::default(),
//! )?;
//!
//! let mut account = Account::with_email("alice@example.com");
//! let issued = manager.register(&mut account).await?;
//!
//! let outcome = manager.confirm(&mut account, issued.token.expose()).await?;
//! assert_eq!(outcome, ConfirmOutcome::Confirmed);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod account;
pub mod config;
mod error;
pub mod manager;
pub mod notify;
pub mod store;
pub mod time;
pub mod token;

pub use account::{Account, AccountId, ConfirmationState, ConfirmationToken};
pub use config::{ConfirmationConfig, MailSettings};
pub use error::{Error, Result};
pub use manager::{ConfirmOutcome, ConfirmationManager, IssueOutcome, IssuedToken};
pub use notify::{
    ConfirmationMessage, ConfirmationNotice, HttpMailNotifier, Notifier, NotifyError,
    TracingNotifier,
};
pub use store::{AccountStore, MemoryAccountStore, SqliteAccountStore};
pub use time::{Clock, MockClock, SystemClock};
pub use token::{OsRandomSource, RandomSource, TOKEN_BYTES};
