//! Integration tests for the confirmation lifecycle.
//!
//! These drive `ConfirmationManager` end to end against both store
//! implementations, with a mock clock and a scripted token source.

#![allow(clippy::unwrap_used, clippy::unreadable_literal)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;

use confirmable_core::{
    Account, AccountId, AccountStore, ConfirmOutcome, ConfirmationConfig, ConfirmationManager,
    ConfirmationNotice, ConfirmationState, ConfirmationToken, IssueOutcome, MemoryAccountStore,
    MockClock, Notifier, NotifyError, OsRandomSource, RandomSource, SqliteAccountStore,
};

/// Token source that hands out a fixed script of tokens.
struct ScriptedTokens(Mutex<VecDeque<String>>);

impl ScriptedTokens {
    fn new(tokens: &[&str]) -> Self {
        Self(Mutex::new(tokens.iter().map(ToString::to_string).collect()))
    }
}

impl RandomSource for ScriptedTokens {
    fn generate_token(&self) -> confirmable_core::Result<ConfirmationToken> {
        let next = self.0.lock().unwrap().pop_front();
        next.map(ConfirmationToken::new)
            .ok_or_else(|| confirmable_core::Error::Random("script exhausted".to_string()))
    }
}

/// Notifier that records what it was asked to send.
#[derive(Default)]
struct Outbox(Mutex<Vec<ConfirmationNotice>>);

impl Outbox {
    fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for Outbox {
    async fn send_confirmation(&self, notice: &ConfirmationNotice) -> Result<(), NotifyError> {
        self.0.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

fn manager(
    store: Arc<dyn AccountStore>,
    clock: Arc<MockClock>,
    random: Arc<dyn RandomSource>,
    outbox: Arc<Outbox>,
    window_secs: u64,
) -> ConfirmationManager {
    let config = ConfirmationConfig {
        confirm_within_secs: window_secs,
        ..Default::default()
    };
    ConfirmationManager::new(store, outbox, clock, random, config).unwrap()
}

async fn stores() -> Vec<(&'static str, Arc<dyn AccountStore>)> {
    let memory: Arc<dyn AccountStore> = Arc::new(MemoryAccountStore::new());
    let sqlite: Arc<dyn AccountStore> = Arc::new(SqliteAccountStore::in_memory().await.unwrap());
    vec![("memory", memory), ("sqlite", sqlite)]
}

#[tokio::test]
async fn alice_and_bob_scenario() {
    for (name, store) in stores().await {
        let clock = MockClock::shared(at(0));
        let outbox = Arc::new(Outbox::default());
        let random = Arc::new(ScriptedTokens::new(&["abc123alice", "def456bob"]));
        let manager = manager(store.clone(), clock.clone(), random, outbox.clone(), 86400);

        let mut alice = Account::with_email("alice@example.com");
        let alice_token = manager.register(&mut alice).await.unwrap().token;
        let mut bob = Account::with_email("bob@example.com");
        let bob_token = manager.register(&mut bob).await.unwrap().token;
        assert_eq!(outbox.count(), 2, "{name}");

        clock.set(at(86400));
        let outcome = manager
            .confirm(&mut alice, alice_token.expose())
            .await
            .unwrap();
        assert_eq!(outcome, ConfirmOutcome::Confirmed, "{name}");
        assert_eq!(alice.confirmed_at(), Some(at(86400)), "{name}");

        clock.set(at(90000));
        let outcome = manager
            .confirm(&mut alice, alice_token.expose())
            .await
            .unwrap();
        assert_eq!(outcome, ConfirmOutcome::AlreadyConfirmed, "{name}");
        assert_eq!(alice.confirmed_at(), Some(at(86400)), "{name}");

        let outcome = manager
            .confirm_by_id(bob.id.unwrap(), bob_token.expose())
            .await
            .unwrap();
        assert_eq!(outcome, ConfirmOutcome::Expired, "{name}");

        let stored_alice = store.load(alice.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(stored_alice.confirmed_at(), Some(at(86400)), "{name}");
        assert!(stored_alice.confirmation_token().is_none(), "{name}");

        let stored_bob = store.load(bob.id.unwrap()).await.unwrap().unwrap();
        assert!(!stored_bob.is_confirmed(), "{name}");
        assert!(stored_bob.confirmation_token().is_some(), "{name}");
    }
}

#[tokio::test]
async fn expiry_boundary_is_inclusive() {
    for (name, store) in stores().await {
        let clock = MockClock::shared(at(1_000));
        let random = Arc::new(ScriptedTokens::new(&["edge", "late"]));
        let manager = manager(store, clock.clone(), random, Arc::default(), 3600);

        let mut edge = Account::with_email("edge@example.com");
        manager.register(&mut edge).await.unwrap();
        let mut late = Account::with_email("late@example.com");
        manager.register(&mut late).await.unwrap();

        clock.set(at(1_000 + 3600 + 1));
        assert_eq!(
            manager.confirm(&mut late, "late").await.unwrap(),
            ConfirmOutcome::Expired,
            "{name}"
        );

        clock.set(at(1_000 + 3600));
        assert_eq!(
            manager.confirm(&mut edge, "edge").await.unwrap(),
            ConfirmOutcome::Confirmed,
            "{name}"
        );
    }
}

#[tokio::test]
async fn reissue_invalidates_previous_token() {
    for (name, store) in stores().await {
        let clock = MockClock::shared(at(0));
        let random = Arc::new(ScriptedTokens::new(&["first", "second"]));
        let manager = manager(store, clock.clone(), random, Arc::default(), 86400);

        let mut account = Account::with_email("carol@example.com");
        manager.register(&mut account).await.unwrap();
        manager.resend("carol@example.com").await.unwrap();
        let id = account.id.unwrap();

        assert_eq!(
            manager.confirm_by_id(id, "first").await.unwrap(),
            ConfirmOutcome::Invalid,
            "{name}"
        );
        assert_eq!(
            manager.confirm_by_id(id, "second").await.unwrap(),
            ConfirmOutcome::Confirmed,
            "{name}"
        );
    }
}

#[tokio::test]
async fn stale_copies_are_judged_by_stored_state() {
    for (name, store) in stores().await {
        let clock = MockClock::shared(at(0));
        let random = Arc::new(ScriptedTokens::new(&["old", "new", "bob"]));
        let manager = manager(store.clone(), clock.clone(), random, Arc::default(), 86400);

        let mut alice = Account::with_email("alice@example.com");
        manager.register(&mut alice).await.unwrap();
        let mut stale_alice = alice.clone();
        manager.resend("alice@example.com").await.unwrap();

        let mut bob = Account::with_email("bob@example.com");
        manager.register(&mut bob).await.unwrap();
        let mut stale_bob = bob.clone();
        manager.confirm(&mut bob, "bob").await.unwrap();

        clock.set(at(86401));
        assert_eq!(
            manager.confirm(&mut stale_alice, "old").await.unwrap(),
            ConfirmOutcome::Invalid,
            "{name}"
        );
        assert_eq!(
            manager.confirm(&mut stale_bob, "bob").await.unwrap(),
            ConfirmOutcome::AlreadyConfirmed,
            "{name}"
        );

        // A late resend must not reopen the confirmed account.
        let outcome = manager.resend("bob@example.com").await.unwrap();
        assert!(
            matches!(outcome, IssueOutcome::AlreadyConfirmed { confirmed_at } if confirmed_at == at(0)),
            "{name}: {outcome:?}"
        );
        let stored_bob = store.load(bob.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(stored_bob.confirmed_at(), Some(at(0)), "{name}");
    }
}

#[tokio::test]
async fn invalid_results_do_not_reveal_account_state() {
    for (name, store) in stores().await {
        let clock = MockClock::shared(at(0));
        let random = Arc::new(ScriptedTokens::new(&["pending-token"]));
        let manager = manager(store.clone(), clock, random, Arc::default(), 86400);

        let mut pending = Account::with_email("pending@example.com");
        manager.register(&mut pending).await.unwrap();

        let mut idle = Account::with_email("idle@example.com");
        store.save(&mut idle).await.unwrap();

        let guesses = [
            manager
                .confirm_by_id(pending.id.unwrap(), "guess")
                .await
                .unwrap(),
            manager.confirm_by_id(idle.id.unwrap(), "guess").await.unwrap(),
            manager
                .confirm_by_id(AccountId::new(9999), "guess")
                .await
                .unwrap(),
        ];
        assert!(
            guesses.iter().all(|o| *o == ConfirmOutcome::Invalid),
            "{name}: {guesses:?}"
        );
    }
}

#[tokio::test]
async fn generated_tokens_confirm_end_to_end() {
    let store: Arc<dyn AccountStore> = Arc::new(SqliteAccountStore::in_memory().await.unwrap());
    let clock = MockClock::shared(Utc::now());
    let outbox = Arc::new(Outbox::default());
    let manager = manager(
        store,
        clock.clone(),
        Arc::new(OsRandomSource),
        outbox.clone(),
        86400,
    );

    let mut account = Account::with_email("dave@example.com");
    let issued = manager.register(&mut account).await.unwrap();
    assert_eq!(issued.token.expose().len(), 43);

    let sent = outbox.0.lock().unwrap()[0].token.clone();
    assert_eq!(sent, issued.token);

    clock.advance(Duration::hours(1));
    let outcome = manager.confirm(&mut account, sent.expose()).await.unwrap();
    assert_eq!(outcome, ConfirmOutcome::Confirmed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_confirmations_succeed_exactly_once() {
    for (name, store) in stores().await {
        let clock = MockClock::shared(at(0));
        let tokens: Vec<String> = (0..25).map(|i| format!("race-{i}")).collect();
        let token_refs: Vec<&str> = tokens.iter().map(String::as_str).collect();
        let random = Arc::new(ScriptedTokens::new(&token_refs));
        let manager = Arc::new(manager(store, clock, random, Arc::default(), 86400));

        for (round, token) in tokens.iter().enumerate() {
            let mut account = Account::with_email(&format!("racer{round}@example.com"));
            manager.register(&mut account).await.unwrap();

            let mut handles = Vec::new();
            for _ in 0..2 {
                let manager = Arc::clone(&manager);
                let mut snapshot = account.clone();
                let token = token.clone();
                handles.push(tokio::spawn(async move {
                    manager.confirm(&mut snapshot, &token).await.unwrap()
                }));
            }

            let mut outcomes = Vec::new();
            for handle in handles {
                outcomes.push(handle.await.unwrap());
            }

            let confirmed = outcomes
                .iter()
                .filter(|o| **o == ConfirmOutcome::Confirmed)
                .count();
            let already = outcomes
                .iter()
                .filter(|o| **o == ConfirmOutcome::AlreadyConfirmed)
                .count();
            assert_eq!((confirmed, already), (1, 1), "{name} round {round}: {outcomes:?}");
        }
    }
}

fn arb_state() -> impl Strategy<Value = ConfirmationState> {
    prop_oneof![
        Just(ConfirmationState::Unconfirmed),
        ("[A-Za-z0-9_-]{1,43}", 0i64..4_000_000_000).prop_map(|(token, secs)| {
            ConfirmationState::Pending {
                token: ConfirmationToken::new(token),
                issued_at: at(secs),
            }
        }),
        (0i64..4_000_000_000).prop_map(|secs| ConfirmationState::Confirmed {
            confirmed_at: at(secs)
        }),
    ]
}

proptest! {
    #[test]
    fn is_confirmed_iff_confirmed_at_present(state in arb_state()) {
        let account = Account {
            id: Some(AccountId::new(1)),
            email: "p@example.com".to_string(),
            confirmation: state,
        };
        prop_assert_eq!(account.is_confirmed(), account.confirmed_at().is_some());
        prop_assert!(!(account.is_confirmed() && account.confirmation_token().is_some()));
        prop_assert_eq!(
            account.confirmation_token().is_some(),
            account.confirmation_issued_at().is_some()
        );
    }

    #[test]
    fn confirmation_succeeds_iff_within_window(
        window in 1u64..=864_000,
        elapsed in 0i64..=1_728_000,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let outcome = runtime.block_on(async {
            let clock = MockClock::shared(at(0));
            let random = Arc::new(ScriptedTokens::new(&["prop"]));
            let manager = manager(
                Arc::new(MemoryAccountStore::new()),
                clock.clone(),
                random,
                Arc::default(),
                window,
            );
            let mut account = Account::with_email("p@example.com");
            manager.register(&mut account).await.unwrap();
            clock.set(at(elapsed));
            manager.confirm(&mut account, "prop").await.unwrap()
        });

        let expected = if elapsed <= i64::try_from(window).unwrap() {
            ConfirmOutcome::Confirmed
        } else {
            ConfirmOutcome::Expired
        };
        prop_assert_eq!(outcome, expected);
    }
}
