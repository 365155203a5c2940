//! Confirmation lifecycle.
//!
//! [`ConfirmationManager`] issues tokens at registration, hands them to a
//! [`Notifier`], and later redeems them. Redemption follows a small state
//! machine:
//!
//! ```text
//! Unconfirmed --issue--> Pending --confirm (match, in window)--> Confirmed
//!                          |  ^
//!                          +--+ re-issue (old token invalid)
//! ```
//!
//! `Confirmed` is terminal. The final transition is written with
//! [`AccountStore::compare_and_swap`], so two racing redemptions of the same
//! token cannot both succeed.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::account::{Account, AccountId, ConfirmationState, ConfirmationToken};
use crate::config::ConfirmationConfig;
use crate::notify::{ConfirmationNotice, Notifier};
use crate::store::AccountStore;
use crate::time::Clock;
use crate::token::RandomSource;
use crate::{Error, Result};

/// Result of redeeming a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The token matched within its window; the account is now confirmed.
    Confirmed,
    /// The account was already confirmed. Nothing changed.
    AlreadyConfirmed,
    /// The token matched but its window has passed. The token stays pending.
    Expired,
    /// No pending token, unknown account, or mismatch. Deliberately
    /// indistinguishable.
    Invalid,
}

impl ConfirmOutcome {
    /// Whether the account ends up confirmed.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Confirmed | Self::AlreadyConfirmed)
    }
}

/// A freshly issued token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    /// The secret to deliver.
    pub token: ConfirmationToken,
    /// When it was issued.
    pub issued_at: DateTime<Utc>,
    /// Last instant at which it is still accepted.
    pub expires_at: DateTime<Utc>,
}

/// Result of asking for a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueOutcome {
    /// A new token replaced any pending one.
    Issued(IssuedToken),
    /// The account is confirmed; nothing was issued.
    AlreadyConfirmed {
        /// When the account was confirmed.
        confirmed_at: DateTime<Utc>,
    },
}

/// Issues, delivers and redeems confirmation tokens.
pub struct ConfirmationManager {
    store: Arc<dyn AccountStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    config: ConfirmationConfig,
}

impl ConfirmationManager {
    /// Creates a manager from its collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn new(
        store: Arc<dyn AccountStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
        config: ConfirmationConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            notifier,
            clock,
            random,
            config,
        })
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &ConfirmationConfig {
        &self.config
    }

    /// The window during which an issued token can be redeemed.
    #[must_use]
    pub fn expiry_window(&self) -> Duration {
        self.config.expiry_window()
    }

    /// Generates a token and marks the account pending.
    ///
    /// Any previously pending token is overwritten and stops working once the
    /// account is saved. Confirmed accounts are left alone. Nothing is
    /// persisted here.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Random`] if no token could be generated.
    pub fn issue_token(&self, account: &mut Account) -> Result<IssueOutcome> {
        if let Some(confirmed_at) = account.confirmed_at() {
            return Ok(IssueOutcome::AlreadyConfirmed { confirmed_at });
        }

        let token = self.random.generate_token()?;
        let issued_at = self.clock.now();
        account.confirmation = ConfirmationState::Pending {
            token: token.clone(),
            issued_at,
        };

        debug!(email = %account.email, %issued_at, "Issued confirmation token");
        Ok(IssueOutcome::Issued(IssuedToken {
            token,
            issued_at,
            expires_at: issued_at + self.expiry_window(),
        }))
    }

    /// Sends the pending token to the account's address.
    ///
    /// A delivery failure is reported and the token stays valid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsaved`] for an account without identity,
    /// [`Error::NothingToNotify`] if no token is pending, and
    /// [`Error::Notify`] if delivery failed.
    pub async fn notify(&self, account: &Account) -> Result<()> {
        let account_id = account
            .id
            .ok_or_else(|| Error::Unsaved(account.email.clone()))?;
        let ConfirmationState::Pending { token, issued_at } = &account.confirmation else {
            return Err(Error::NothingToNotify(account_id));
        };

        let notice = ConfirmationNotice {
            account_id,
            email: account.email.clone(),
            token: token.clone(),
            issued_at: *issued_at,
            expires_at: *issued_at + self.expiry_window(),
        };

        if let Err(e) = self.notifier.send_confirmation(&notice).await {
            warn!(account = %account_id, "Confirmation delivery failed: {e}");
            return Err(e.into());
        }
        debug!(account = %account_id, "Confirmation delivered");
        Ok(())
    }

    /// Registration flow: issue a token, save the account, send the token.
    ///
    /// If delivery fails the account is still saved with its pending token,
    /// and the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyConfirmed`] for a confirmed account (including
    /// one confirmed concurrently), or an error if token generation, storage
    /// or delivery fails.
    pub async fn register(&self, account: &mut Account) -> Result<IssuedToken> {
        let issued = match self.issue_token(account)? {
            IssueOutcome::Issued(issued) => issued,
            IssueOutcome::AlreadyConfirmed { .. } => {
                return Err(Error::AlreadyConfirmed(account.email.clone()));
            }
        };
        if self.persist_issued(account, &issued).await?.is_some() {
            return Err(Error::AlreadyConfirmed(account.email.clone()));
        }
        info!(
            account = ?account.id,
            email = %account.email,
            "Registered account pending confirmation"
        );
        self.notify(account).await?;
        Ok(issued)
    }

    /// Re-issues a token for an existing address and sends it.
    ///
    /// The previous token stops working as soon as the new one is saved. A
    /// confirmation that lands between the lookup and the write wins, and
    /// the result is [`IssueOutcome::AlreadyConfirmed`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::AccountNotFound`] for an unknown address, or an
    /// error if generation, storage or delivery fails.
    pub async fn resend(&self, email: &str) -> Result<IssueOutcome> {
        let mut account = self
            .store
            .find_by_email(email)
            .await?
            .ok_or_else(|| Error::AccountNotFound(email.to_string()))?;

        let outcome = self.issue_token(&mut account)?;
        if let IssueOutcome::Issued(issued) = &outcome {
            if let Some(confirmed_at) = self.persist_issued(&mut account, issued).await? {
                return Ok(IssueOutcome::AlreadyConfirmed { confirmed_at });
            }
            info!(account = ?account.id, "Re-issued confirmation token");
            self.notify(&account).await?;
        }
        Ok(outcome)
    }

    /// Writes a freshly issued token.
    ///
    /// New accounts are inserted. Existing ones go through
    /// [`AccountStore::reissue`]; if the stored account turns out to be
    /// confirmed, `account` is replaced by the stored record and its
    /// confirmation time is returned.
    async fn persist_issued(
        &self,
        account: &mut Account,
        issued: &IssuedToken,
    ) -> Result<Option<DateTime<Utc>>> {
        let Some(id) = account.id else {
            self.store.save(account).await?;
            return Ok(None);
        };

        if self
            .store
            .reissue(id, &issued.token, issued.issued_at)
            .await?
        {
            return Ok(None);
        }

        let current = self
            .store
            .load(id)
            .await?
            .ok_or_else(|| Error::AccountNotFound(id.to_string()))?;
        let Some(confirmed_at) = current.confirmed_at() else {
            return Err(Error::AccountNotFound(id.to_string()));
        };
        info!(account = %id, "Account confirmed before the new token was stored");
        *account = current;
        Ok(Some(confirmed_at))
    }

    /// Redeems a submitted token against an account.
    ///
    /// The decision is made against the stored record, not the caller's
    /// copy; `account` is replaced by the stored state afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error only for storage failures; every expected result is
    /// a [`ConfirmOutcome`].
    pub async fn confirm(&self, account: &mut Account, submitted: &str) -> Result<ConfirmOutcome> {
        let Some(account_id) = account.id else {
            return Ok(ConfirmOutcome::Invalid);
        };
        let Some(current) = self.store.load(account_id).await? else {
            return Ok(ConfirmOutcome::Invalid);
        };
        *account = current;
        self.redeem(account_id, account, submitted).await
    }

    /// Loads an account and redeems a token against it.
    ///
    /// An unknown account yields [`ConfirmOutcome::Invalid`], the same as a
    /// wrong token.
    ///
    /// # Errors
    ///
    /// Returns an error only for storage failures.
    pub async fn confirm_by_id(&self, id: AccountId, submitted: &str) -> Result<ConfirmOutcome> {
        match self.store.load(id).await? {
            Some(mut account) => self.redeem(id, &mut account, submitted).await,
            None => Ok(ConfirmOutcome::Invalid),
        }
    }

    /// Redemption against a freshly loaded record.
    async fn redeem(
        &self,
        account_id: AccountId,
        account: &mut Account,
        submitted: &str,
    ) -> Result<ConfirmOutcome> {
        let (token, issued_at) = match &account.confirmation {
            ConfirmationState::Confirmed { .. } => return Ok(ConfirmOutcome::AlreadyConfirmed),
            ConfirmationState::Unconfirmed => return Ok(ConfirmOutcome::Invalid),
            ConfirmationState::Pending { token, issued_at } => (token.clone(), *issued_at),
        };

        if !token.matches(submitted) {
            debug!(account = %account_id, "Confirmation token mismatch");
            return Ok(ConfirmOutcome::Invalid);
        }

        let now = self.clock.now();
        if issued_at + self.expiry_window() < now {
            debug!(account = %account_id, %issued_at, "Confirmation token expired");
            return Ok(ConfirmOutcome::Expired);
        }

        let confirmed = ConfirmationState::Confirmed { confirmed_at: now };
        if self
            .store
            .compare_and_swap(account_id, &token, confirmed.clone())
            .await?
        {
            account.confirmation = confirmed;
            info!(account = %account_id, "Account confirmed");
            return Ok(ConfirmOutcome::Confirmed);
        }

        // Someone else changed the record between our read and the swap.
        let Some(current) = self.store.load(account_id).await? else {
            return Ok(ConfirmOutcome::Invalid);
        };
        let outcome = if current.is_confirmed() {
            ConfirmOutcome::AlreadyConfirmed
        } else {
            ConfirmOutcome::Invalid
        };
        warn!(account = %account_id, ?outcome, "Lost confirmation race");
        *account = current;
        Ok(outcome)
    }

    /// Whether the account is confirmed.
    #[must_use]
    pub fn is_confirmed(&self, account: &Account) -> bool {
        account.is_confirmed()
    }

    /// Whether the account may sign in under the current policy.
    #[must_use]
    pub fn can_sign_in(&self, account: &Account) -> bool {
        self.config.allow_unconfirmed_login || account.is_confirmed()
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
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::notify::NotifyError;
    use crate::store::MemoryAccountStore;
    use crate::time::MockClock;

    /// Deterministic token source: "token-1", "token-2", ...
    #[derive(Default)]
    struct SequentialTokens(AtomicU64);

    impl RandomSource for SequentialTokens {
        fn generate_token(&self) -> Result<ConfirmationToken> {
            let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(ConfirmationToken::new(format!("token-{n}")))
        }
    }

    struct BrokenRandom;

    impl RandomSource for BrokenRandom {
        fn generate_token(&self) -> Result<ConfirmationToken> {
            Err(Error::Random("entropy pool unavailable".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<ConfirmationNotice>>,
        fail: bool,
    }

    impl RecordingNotifier {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        fn sent(&self) -> Vec<ConfirmationNotice> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send_confirmation(&self, notice: &ConfirmationNotice) -> std::result::Result<(), NotifyError> {
            self.sent.lock().unwrap().push(notice.clone());
            if self.fail {
                return Err(NotifyError::Rejected {
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            Ok(())
        }
    }

    /// Store that lets a confirmation land right after every email lookup,
    /// between a caller's read and its write.
    struct ConfirmsAfterLookup {
        inner: MemoryAccountStore,
        confirmed_at: DateTime<Utc>,
    }

    #[async_trait]
    impl AccountStore for ConfirmsAfterLookup {
        async fn load(&self, id: AccountId) -> Result<Option<Account>> {
            self.inner.load(id).await
        }

        async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
            let found = self.inner.find_by_email(email).await?;
            if let Some(account) = &found {
                if let (Some(id), Some(token)) = (account.id, account.confirmation_token()) {
                    let confirmed = ConfirmationState::Confirmed {
                        confirmed_at: self.confirmed_at,
                    };
                    self.inner.compare_and_swap(id, token, confirmed).await?;
                }
            }
            Ok(found)
        }

        async fn save(&self, account: &mut Account) -> Result<()> {
            self.inner.save(account).await
        }

        async fn reissue(
            &self,
            id: AccountId,
            token: &ConfirmationToken,
            issued_at: DateTime<Utc>,
        ) -> Result<bool> {
            self.inner.reissue(id, token, issued_at).await
        }

        async fn compare_and_swap(
            &self,
            id: AccountId,
            expected: &ConfirmationToken,
            new_state: ConfirmationState,
        ) -> Result<bool> {
            self.inner.compare_and_swap(id, expected, new_state).await
        }
    }

    struct Harness {
        manager: ConfirmationManager,
        store: Arc<MemoryAccountStore>,
        notifier: Arc<RecordingNotifier>,
        clock: Arc<MockClock>,
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn harness_with(notifier: RecordingNotifier, config: ConfirmationConfig) -> Harness {
        let store = Arc::new(MemoryAccountStore::new());
        let notifier = Arc::new(notifier);
        let clock = MockClock::shared(at(0));
        let manager = ConfirmationManager::new(
            store.clone(),
            notifier.clone(),
            clock.clone(),
            Arc::new(SequentialTokens::default()),
            config,
        )
        .unwrap();
        Harness {
            manager,
            store,
            notifier,
            clock,
        }
    }

    fn harness() -> Harness {
        harness_with(RecordingNotifier::default(), ConfirmationConfig::default())
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ConfirmationConfig {
            confirm_within_secs: 0,
            ..Default::default()
        };
        let result = ConfirmationManager::new(
            Arc::new(MemoryAccountStore::new()),
            Arc::new(RecordingNotifier::default()),
            Arc::new(MockClock::new()),
            Arc::new(SequentialTokens::default()),
            config,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_issue_token_sets_pending_state() {
        let h = harness();
        let mut account = Account::with_email("alice@example.com");

        let IssueOutcome::Issued(issued) = h.manager.issue_token(&mut account).unwrap() else {
            panic!("expected a token");
        };
        assert_eq!(issued.token.expose(), "token-1");
        assert_eq!(issued.issued_at, at(0));
        assert_eq!(issued.expires_at, at(86400));
        assert_eq!(account.confirmation_token(), Some(&issued.token));
        assert_eq!(account.confirmation_issued_at(), Some(at(0)));
    }

    #[test]
    fn test_issue_token_on_confirmed_account_is_noop() {
        let h = harness();
        let mut account = Account::with_email("alice@example.com");
        account.confirmation = ConfirmationState::Confirmed {
            confirmed_at: at(5),
        };

        let outcome = h.manager.issue_token(&mut account).unwrap();
        assert_eq!(
            outcome,
            IssueOutcome::AlreadyConfirmed {
                confirmed_at: at(5)
            }
        );
        assert_eq!(account.confirmed_at(), Some(at(5)));
    }

    #[test]
    fn test_issue_token_surfaces_rng_failure() {
        let manager = ConfirmationManager::new(
            Arc::new(MemoryAccountStore::new()),
            Arc::new(RecordingNotifier::default()),
            Arc::new(MockClock::new()),
            Arc::new(BrokenRandom),
            ConfirmationConfig::default(),
        )
        .unwrap();
        let mut account = Account::with_email("alice@example.com");

        let result = manager.issue_token(&mut account);
        assert!(matches!(result, Err(Error::Random(_))));
        assert_eq!(account.confirmation, ConfirmationState::Unconfirmed);
    }

    #[tokio::test]
    async fn test_register_saves_and_notifies() {
        let h = harness();
        let mut account = Account::with_email("alice@example.com");

        let issued = h.manager.register(&mut account).await.unwrap();

        let id = account.id.unwrap();
        let stored = h.store.load(id).await.unwrap().unwrap();
        assert_eq!(stored.confirmation_token(), Some(&issued.token));

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].account_id, id);
        assert_eq!(sent[0].email, "alice@example.com");
        assert_eq!(sent[0].token, issued.token);
        assert_eq!(sent[0].expires_at, at(86400));
    }

    #[tokio::test]
    async fn test_register_notify_failure_keeps_token() {
        let h = harness_with(RecordingNotifier::failing(), ConfirmationConfig::default());
        let mut account = Account::with_email("alice@example.com");

        let result = h.manager.register(&mut account).await;
        assert!(matches!(result, Err(Error::Notify(_))));
        // Exactly one attempt, no retry.
        assert_eq!(h.notifier.sent().len(), 1);

        let outcome = h.manager.confirm(&mut account, "token-1").await.unwrap();
        assert_eq!(outcome, ConfirmOutcome::Confirmed);
    }

    #[tokio::test]
    async fn test_notify_requires_saved_account() {
        let h = harness();
        let mut account = Account::with_email("alice@example.com");
        h.manager.issue_token(&mut account).unwrap();

        let result = h.manager.notify(&account).await;
        assert!(matches!(result, Err(Error::Unsaved(_))));
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_notify_without_pending_token() {
        let h = harness();
        let mut account = Account::with_email("alice@example.com");
        h.store.save(&mut account).await.unwrap();

        let result = h.manager.notify(&account).await;
        assert!(matches!(result, Err(Error::NothingToNotify(_))));
    }

    #[tokio::test]
    async fn test_confirm_without_token_is_invalid() {
        let h = harness();
        let mut account = Account::with_email("alice@example.com");
        h.store.save(&mut account).await.unwrap();

        let outcome = h.manager.confirm(&mut account, "anything").await.unwrap();
        assert_eq!(outcome, ConfirmOutcome::Invalid);
    }

    #[tokio::test]
    async fn test_confirm_wrong_token_is_invalid_and_keeps_state() {
        let h = harness();
        let mut account = Account::with_email("alice@example.com");
        h.manager.register(&mut account).await.unwrap();
        let before = account.clone();

        let outcome = h.manager.confirm(&mut account, "token-999").await.unwrap();
        assert_eq!(outcome, ConfirmOutcome::Invalid);
        assert_eq!(account, before);
        assert_eq!(h.store.load(account.id.unwrap()).await.unwrap(), Some(before));
    }

    #[tokio::test]
    async fn test_confirm_unsaved_account_is_invalid() {
        let h = harness();
        let mut account = Account::with_email("alice@example.com");
        h.manager.issue_token(&mut account).unwrap();

        let outcome = h.manager.confirm(&mut account, "token-1").await.unwrap();
        assert_eq!(outcome, ConfirmOutcome::Invalid);
    }

    #[tokio::test]
    async fn test_expired_token_stays_pending() {
        let h = harness();
        let mut account = Account::with_email("alice@example.com");
        h.manager.register(&mut account).await.unwrap();

        h.clock.set(at(86401));
        let outcome = h.manager.confirm(&mut account, "token-1").await.unwrap();
        assert_eq!(outcome, ConfirmOutcome::Expired);

        let stored = h.store.load(account.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(stored.confirmation_token().unwrap().expose(), "token-1");
        assert!(!stored.is_confirmed());
    }

    #[tokio::test]
    async fn test_custom_window() {
        let config = ConfirmationConfig {
            confirm_within_secs: 60,
            ..Default::default()
        };
        let h = harness_with(RecordingNotifier::default(), config);
        let mut account = Account::with_email("alice@example.com");
        h.manager.register(&mut account).await.unwrap();

        h.clock.set(at(61));
        let outcome = h.manager.confirm(&mut account, "token-1").await.unwrap();
        assert_eq!(outcome, ConfirmOutcome::Expired);

        h.clock.set(at(60));
        let outcome = h.manager.confirm(&mut account, "token-1").await.unwrap();
        assert_eq!(outcome, ConfirmOutcome::Confirmed);
    }

    #[tokio::test]
    async fn test_resend_replaces_token() {
        let h = harness();
        let mut account = Account::with_email("alice@example.com");
        h.manager.register(&mut account).await.unwrap();

        h.clock.set(at(100));
        let IssueOutcome::Issued(issued) = h.manager.resend("alice@example.com").await.unwrap()
        else {
            panic!("expected a new token");
        };
        assert_eq!(issued.token.expose(), "token-2");
        assert_eq!(issued.issued_at, at(100));
        assert_eq!(h.notifier.sent().len(), 2);

        let id = account.id.unwrap();
        assert_eq!(
            h.manager.confirm_by_id(id, "token-1").await.unwrap(),
            ConfirmOutcome::Invalid
        );
        assert_eq!(
            h.manager.confirm_by_id(id, "token-2").await.unwrap(),
            ConfirmOutcome::Confirmed
        );
    }

    #[tokio::test]
    async fn test_resend_unknown_email() {
        let h = harness();
        let result = h.manager.resend("nobody@example.com").await;
        assert!(matches!(result, Err(Error::AccountNotFound(_))));
    }

    #[tokio::test]
    async fn test_resend_confirmed_account_sends_nothing() {
        let h = harness();
        let mut account = Account::with_email("alice@example.com");
        h.manager.register(&mut account).await.unwrap();
        h.manager.confirm(&mut account, "token-1").await.unwrap();

        let outcome = h.manager.resend("alice@example.com").await.unwrap();
        assert_eq!(
            outcome,
            IssueOutcome::AlreadyConfirmed {
                confirmed_at: at(0)
            }
        );
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_register_confirmed_account_rejected() {
        let h = harness();
        let mut account = Account::with_email("alice@example.com");
        account.confirmation = ConfirmationState::Confirmed {
            confirmed_at: at(0),
        };
        let result = h.manager.register(&mut account).await;
        assert!(matches!(result, Err(Error::AlreadyConfirmed(_))));
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_stale_copy_learns_of_confirmation() {
        let h = harness();
        let mut account = Account::with_email("alice@example.com");
        h.manager.register(&mut account).await.unwrap();
        let mut stale = account.clone();

        assert_eq!(
            h.manager.confirm(&mut account, "token-1").await.unwrap(),
            ConfirmOutcome::Confirmed
        );
        assert_eq!(
            h.manager.confirm(&mut stale, "token-1").await.unwrap(),
            ConfirmOutcome::AlreadyConfirmed
        );
        assert!(stale.is_confirmed());
    }

    #[tokio::test]
    async fn test_stale_copy_after_reissue_is_invalid() {
        let h = harness();
        let mut account = Account::with_email("alice@example.com");
        h.manager.register(&mut account).await.unwrap();
        let mut stale = account.clone();

        h.manager.resend("alice@example.com").await.unwrap();

        // The stale copy still carries token-1 and matches it locally, but
        // the store has moved on.
        let outcome = h.manager.confirm(&mut stale, "token-1").await.unwrap();
        assert_eq!(outcome, ConfirmOutcome::Invalid);
        assert_eq!(stale.confirmation_token().unwrap().expose(), "token-2");
    }

    #[tokio::test]
    async fn test_stale_copy_after_reissue_and_window_is_invalid() {
        let h = harness();
        let mut account = Account::with_email("alice@example.com");
        h.manager.register(&mut account).await.unwrap();
        let mut stale = account.clone();

        h.manager.resend("alice@example.com").await.unwrap();
        h.clock.set(at(86401));

        // Old token must not be reported as merely expired.
        let outcome = h.manager.confirm(&mut stale, "token-1").await.unwrap();
        assert_eq!(outcome, ConfirmOutcome::Invalid);
    }

    #[tokio::test]
    async fn test_stale_copy_of_account_confirmed_elsewhere() {
        let h = harness();
        let mut account = Account::with_email("alice@example.com");
        h.manager.register(&mut account).await.unwrap();
        let mut stale = account.clone();

        h.manager.confirm(&mut account, "token-1").await.unwrap();
        h.clock.set(at(200_000));

        let outcome = h.manager.confirm(&mut stale, "wrong").await.unwrap();
        assert_eq!(outcome, ConfirmOutcome::AlreadyConfirmed);
        assert_eq!(stale.confirmed_at(), Some(at(0)));
    }

    #[tokio::test]
    async fn test_resend_does_not_reopen_concurrent_confirmation() {
        let store = Arc::new(ConfirmsAfterLookup {
            inner: MemoryAccountStore::new(),
            confirmed_at: at(50),
        });
        let notifier = Arc::new(RecordingNotifier::default());
        let manager = ConfirmationManager::new(
            store.clone(),
            notifier.clone(),
            MockClock::shared(at(0)),
            Arc::new(SequentialTokens::default()),
            ConfirmationConfig::default(),
        )
        .unwrap();

        let mut account = Account::with_email("alice@example.com");
        manager.register(&mut account).await.unwrap();
        let id = account.id.unwrap();

        let outcome = manager.resend("alice@example.com").await.unwrap();
        assert_eq!(
            outcome,
            IssueOutcome::AlreadyConfirmed {
                confirmed_at: at(50)
            }
        );

        let stored = store.load(id).await.unwrap().unwrap();
        assert!(stored.is_confirmed());
        assert_eq!(stored.confirmed_at(), Some(at(50)));
        assert!(stored.confirmation_token().is_none());
        // Only the registration mail went out.
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_register_stale_copy_of_confirmed_account_rejected() {
        let h = harness();
        let mut account = Account::with_email("alice@example.com");
        h.manager.register(&mut account).await.unwrap();
        let mut stale = account.clone();
        h.manager.confirm(&mut account, "token-1").await.unwrap();

        let result = h.manager.register(&mut stale).await;
        assert!(matches!(result, Err(Error::AlreadyConfirmed(_))));
        assert!(stale.is_confirmed());
        assert!(h.store.load(account.id.unwrap()).await.unwrap().unwrap().is_confirmed());
    }

    #[tokio::test]
    async fn test_confirm_by_unknown_id_is_invalid() {
        let h = harness();
        let outcome = h
            .manager
            .confirm_by_id(AccountId::new(404), "token-1")
            .await
            .unwrap();
        assert_eq!(outcome, ConfirmOutcome::Invalid);
    }

    #[tokio::test]
    async fn test_can_sign_in_policy() {
        let h = harness();
        let mut account = Account::with_email("alice@example.com");
        h.manager.register(&mut account).await.unwrap();
        assert!(!h.manager.can_sign_in(&account));
        assert!(!h.manager.is_confirmed(&account));

        h.manager.confirm(&mut account, "token-1").await.unwrap();
        assert!(h.manager.can_sign_in(&account));
        assert!(h.manager.is_confirmed(&account));

        let relaxed = harness_with(
            RecordingNotifier::default(),
            ConfirmationConfig {
                allow_unconfirmed_login: true,
                ..Default::default()
            },
        );
        let unconfirmed = Account::with_email("bob@example.com");
        assert!(relaxed.manager.can_sign_in(&unconfirmed));
    }

    #[test]
    fn test_outcome_is_success() {
        assert!(ConfirmOutcome::Confirmed.is_success());
        assert!(ConfirmOutcome::AlreadyConfirmed.is_success());
        assert!(!ConfirmOutcome::Expired.is_success());
        assert!(!ConfirmOutcome::Invalid.is_success());
    }
}
