//! Command line arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Manage account confirmations from the command line.
#[derive(Debug, Parser)]
#[command(name = "confirmable", version, about)]
pub struct Cli {
    /// Path to the JSON settings file.
    #[arg(long, env = "CONFIRMABLE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Path to the `SQLite` account database.
    #[arg(long, env = "CONFIRMABLE_DATABASE", global = true)]
    pub database: Option<PathBuf>,

    /// API key for the transactional mail service. Without one, links are logged.
    #[arg(long, env = "CONFIRMABLE_MAIL_API_KEY", global = true, hide_env_values = true)]
    pub mail_api_key: Option<String>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Register an address and send its confirmation.
    Register {
        /// Address to register.
        email: String,
    },
    /// Issue a fresh token for a registered address and send it.
    Resend {
        /// Registered address.
        email: String,
    },
    /// Redeem a token.
    Confirm {
        /// Account id from the confirmation link.
        id: i64,
        /// Token from the confirmation link.
        token: String,
    },
    /// Show the confirmation state of an address.
    Status {
        /// Registered address.
        email: String,
    },
    /// Write the default settings file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    /// Settings path, falling back to the per-user config directory.
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("confirmable")
                .join("config.json")
        })
    }

    /// Database path, falling back to the per-user data directory.
    pub fn database_path(&self) -> PathBuf {
        self.database.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("confirmable")
                .join("accounts.db")
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_confirm() {
        let cli = Cli::try_parse_from(["confirmable", "confirm", "7", "abc123"]).unwrap();
        match cli.command {
            Command::Confirm { id, token } => {
                assert_eq!(id, 7);
                assert_eq!(token, "abc123");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_paths_after_subcommand() {
        let cli = Cli::try_parse_from([
            "confirmable",
            "status",
            "alice@example.com",
            "--database",
            "/tmp/accounts.db",
        ])
        .unwrap();
        assert_eq!(cli.database_path(), PathBuf::from("/tmp/accounts.db"));
    }

    #[test]
    fn test_default_config_path() {
        let cli = Cli::try_parse_from(["confirmable", "init-config"]).unwrap();
        if cli.config.is_none() {
            assert!(cli.config_path().ends_with("confirmable/config.json"));
        }
    }
}
