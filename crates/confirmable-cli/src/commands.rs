//! Subcommand execution.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use confirmable_core::{
    Account, AccountId, AccountStore, ConfirmOutcome, ConfirmationConfig, ConfirmationManager,
    ConfirmationState, HttpMailNotifier, IssueOutcome, Notifier, OsRandomSource,
    SqliteAccountStore, SystemClock, TracingNotifier,
};
use tracing::info;

use crate::cli::{Cli, Command};

/// Runs the parsed command line.
pub async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config_path = cli.config_path();
    let database_path = cli.database_path();
    let api_key = cli.mail_api_key;

    match cli.command {
        Command::InitConfig { force } => init_config(&config_path, force)?,
        Command::Register { email } => {
            let (_, manager) = open(&config_path, &database_path, api_key).await?;
            let mut account = Account::with_email(&email);
            let issued = manager.register(&mut account).await?;
            println!(
                "registered {email} (id {}); token valid until {}",
                display_id(&account),
                issued.expires_at
            );
        }
        Command::Resend { email } => {
            let (_, manager) = open(&config_path, &database_path, api_key).await?;
            match manager.resend(&email).await? {
                IssueOutcome::Issued(issued) => {
                    println!("sent a new token to {email}; valid until {}", issued.expires_at);
                }
                IssueOutcome::AlreadyConfirmed { confirmed_at } => {
                    println!("{email} was already confirmed at {confirmed_at}");
                }
            }
        }
        Command::Confirm { id, token } => {
            let (_, manager) = open(&config_path, &database_path, api_key).await?;
            let outcome = manager.confirm_by_id(AccountId::new(id), &token).await?;
            println!("{}", describe(outcome));
            if !outcome.is_success() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Status { email } => {
            let (store, manager) = open(&config_path, &database_path, api_key).await?;
            let Some(account) = store.find_by_email(&email).await? else {
                bail!("no account registered for {email}");
            };
            println!("{}", status_line(&account, manager.can_sign_in(&account)));
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Loads settings, opens the account database and wires the manager.
async fn open(
    config_path: &Path,
    database_path: &Path,
    api_key: Option<String>,
) -> anyhow::Result<(Arc<SqliteAccountStore>, ConfirmationManager)> {
    let mut config = ConfirmationConfig::load(config_path)
        .with_context(|| format!("loading settings from {}", config_path.display()))?;
    if api_key.is_some() {
        config.mail.api_key = api_key;
    }

    let store = Arc::new(open_store(database_path).await?);
    let manager = build_manager(store.clone(), config)?;
    Ok((store, manager))
}

fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    ConfirmationConfig::default()
        .save(path)
        .with_context(|| format!("writing {}", path.display()))?;
    info!("Wrote default settings to {}", path.display());
    println!("wrote {}", path.display());
    Ok(())
}

async fn open_store(path: &Path) -> anyhow::Result<SqliteAccountStore> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let path_str = path
        .to_str()
        .with_context(|| format!("database path is not UTF-8: {}", path.display()))?;
    SqliteAccountStore::new(path_str)
        .await
        .with_context(|| format!("opening database {}", path.display()))
}

fn build_manager(
    store: Arc<dyn AccountStore>,
    config: ConfirmationConfig,
) -> anyhow::Result<ConfirmationManager> {
    let notifier: Arc<dyn Notifier> = match config.mail.api_key.as_deref() {
        Some(key) if !key.trim().is_empty() => {
            Arc::new(HttpMailNotifier::new(key, config.mail.clone()))
        }
        _ => {
            info!("No mail API key configured; confirmation links will be logged");
            Arc::new(TracingNotifier)
        }
    };

    let manager = ConfirmationManager::new(
        store,
        notifier,
        Arc::new(SystemClock),
        Arc::new(OsRandomSource),
        config,
    )?;
    Ok(manager)
}

fn display_id(account: &Account) -> String {
    account
        .id
        .map_or_else(|| "unsaved".to_string(), |id| id.to_string())
}

const fn describe(outcome: ConfirmOutcome) -> &'static str {
    match outcome {
        ConfirmOutcome::Confirmed => "confirmed",
        ConfirmOutcome::AlreadyConfirmed => "already confirmed",
        ConfirmOutcome::Expired => "token expired; request a new one with `resend`",
        ConfirmOutcome::Invalid => "invalid token",
    }
}

fn status_line(account: &Account, can_sign_in: bool) -> String {
    let detail = match &account.confirmation {
        ConfirmationState::Unconfirmed => String::new(),
        ConfirmationState::Pending { issued_at, .. } => format!(" (token issued {issued_at})"),
        ConfirmationState::Confirmed { confirmed_at } => format!(" (at {confirmed_at})"),
    };
    format!(
        "{} [id {}]: {}{detail}; sign-in {}",
        account.email,
        display_id(account),
        account.confirmation.label(),
        if can_sign_in { "allowed" } else { "blocked" }
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::DateTime;
    use confirmable_core::ConfirmationToken;

    use super::*;

    #[test]
    fn test_describe_outcomes() {
        assert_eq!(describe(ConfirmOutcome::Confirmed), "confirmed");
        assert_eq!(describe(ConfirmOutcome::Invalid), "invalid token");
    }

    #[test]
    fn test_status_line_never_prints_token() {
        let account = Account {
            id: Some(AccountId::new(3)),
            email: "alice@example.com".to_string(),
            confirmation: ConfirmationState::Pending {
                token: ConfirmationToken::new("secret-token"),
                issued_at: DateTime::from_timestamp(0, 0).unwrap(),
            },
        };
        let line = status_line(&account, false);
        assert!(line.starts_with("alice@example.com [id 3]: pending"));
        assert!(line.ends_with("sign-in blocked"));
        assert!(!line.contains("secret-token"));
    }

    #[test]
    fn test_init_config_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        init_config(&path, false).unwrap();
        assert!(init_config(&path, false).is_err());
        init_config(&path, true).unwrap();
    }

    #[tokio::test]
    async fn test_open_creates_database_without_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("missing").join("config.json");
        let database_path = dir.path().join("data").join("accounts.db");

        let (store, manager) = open(&config_path, &database_path, Some("key".to_string()))
            .await
            .unwrap();
        assert!(database_path.exists());
        assert!(!config_path.exists());
        assert_eq!(manager.config().mail.api_key.as_deref(), Some("key"));
        assert!(store.find_by_email("alice@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_register_then_status_against_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn AccountStore> =
            Arc::new(open_store(&dir.path().join("db").join("accounts.db")).await.unwrap());
        let manager = build_manager(store.clone(), ConfirmationConfig::default()).unwrap();

        let mut account = Account::with_email("alice@example.com");
        let issued = manager.register(&mut account).await.unwrap();

        let outcome = manager
            .confirm_by_id(account.id.unwrap(), issued.token.expose())
            .await
            .unwrap();
        assert_eq!(outcome, ConfirmOutcome::Confirmed);

        let stored = store.find_by_email("alice@example.com").await.unwrap().unwrap();
        assert!(status_line(&stored, manager.can_sign_in(&stored)).contains("confirmed"));
    }
}
