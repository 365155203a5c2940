//! Delivery of confirmation messages.
//!
//! The lifecycle hands a [`ConfirmationNotice`] to a [`Notifier`] and does
//! not care how the message reaches the user. Formatting lives in
//! [`ConfirmationMessage`]; retries, if any, belong to the notifier.

mod http;
mod message;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::account::{AccountId, ConfirmationToken};

pub use http::HttpMailNotifier;
pub use message::ConfirmationMessage;

/// Errors that can occur while delivering a confirmation.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// HTTP transport failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The mail service refused the message.
    #[error("Send rejected (status={status}): {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The confirmation link could not be built.
    #[error("Invalid confirmation link: {0}")]
    InvalidLink(#[from] url::ParseError),

    /// Invalid address.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

/// Everything a notifier needs to build a confirmation link or code.
#[derive(Debug, Clone)]
pub struct ConfirmationNotice {
    /// Account being confirmed.
    pub account_id: AccountId,
    /// Delivery address.
    pub email: String,
    /// The token to redeem.
    pub token: ConfirmationToken,
    /// When the token was issued.
    pub issued_at: DateTime<Utc>,
    /// Last instant at which the token is still accepted.
    pub expires_at: DateTime<Utc>,
}

/// Sends confirmation messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Dispatches one confirmation message.
    async fn send_confirmation(&self, notice: &ConfirmationNotice) -> Result<(), NotifyError>;
}

/// Notifier for development setups: logs the confirmation instead of mailing it.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send_confirmation(&self, notice: &ConfirmationNotice) -> Result<(), NotifyError> {
        info!(
            account = %notice.account_id,
            email = %notice.email,
            token = notice.token.expose(),
            expires_at = %notice.expires_at,
            "Confirmation token issued (not mailed)"
        );
        Ok(())
    }
}
