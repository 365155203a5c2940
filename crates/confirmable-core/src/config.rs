//! Confirmation settings.
//!
//! Settings persist as JSON. Every field has a default, so an empty object
//! (or no file at all) yields a working development configuration.

use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Default confirmation window: 24 hours.
pub const DEFAULT_CONFIRM_WITHIN_SECS: u64 = 86_400;

/// Longest accepted confirmation window: ten years.
const MAX_CONFIRM_WITHIN_SECS: u64 = 10 * 365 * 86_400;

/// Lifecycle settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    /// Seconds after issue during which a token can be redeemed.
    pub confirm_within_secs: u64,
    /// Whether accounts may sign in before confirming.
    pub allow_unconfirmed_login: bool,
    /// Outbound mail settings.
    pub mail: MailSettings,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            confirm_within_secs: DEFAULT_CONFIRM_WITHIN_SECS,
            allow_unconfirmed_login: false,
            mail: MailSettings::default(),
        }
    }
}

/// Settings for composing and delivering confirmation mail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailSettings {
    /// Sender address.
    pub sender_email: String,
    /// Optional sender display name.
    pub sender_name: Option<String>,
    /// Subject line.
    pub subject: String,
    /// Page that redeems tokens; `id` and `token` are appended as query parameters.
    pub confirm_url: String,
    /// Transactional mail API endpoint.
    pub api_url: String,
    /// Transactional mail API key. Leave unset to log links instead of sending.
    pub api_key: Option<String>,
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            sender_email: "noreply@localhost".to_string(),
            sender_name: None,
            subject: "Account confirmation".to_string(),
            confirm_url: "http://localhost:8080/user/confirm".to_string(),
            api_url: "https://api.brevo.com/v3/smtp/email".to_string(),
            api_key: None,
        }
    }
}

impl ConfirmationConfig {
    /// Loads settings from a JSON file.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON,
    /// or fails [`validate`](Self::validate).
    pub fn load(path: &Path) -> Result<Self> {
        let config = match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str::<Self>(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No config at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => return Err(e.into()),
        };
        config.validate()?;
        Ok(config)
    }

    /// Writes settings to a JSON file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Checks that the settings are usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.confirm_within_secs == 0 {
            return Err(Error::Config(
                "confirm_within_secs must be at least 1".to_string(),
            ));
        }
        if self.confirm_within_secs > MAX_CONFIRM_WITHIN_SECS {
            return Err(Error::Config(format!(
                "confirm_within_secs must not exceed {MAX_CONFIRM_WITHIN_SECS}"
            )));
        }
        if self.mail.sender_email.trim().is_empty() {
            return Err(Error::Config("mail.sender_email is required".to_string()));
        }
        Url::parse(&self.mail.confirm_url)
            .map_err(|e| Error::Config(format!("mail.confirm_url: {e}")))?;
        Url::parse(&self.mail.api_url).map_err(|e| Error::Config(format!("mail.api_url: {e}")))?;
        Ok(())
    }

    /// The confirmation window as a duration.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn expiry_window(&self) -> Duration {
        // Bounded by `validate`, so the cast cannot wrap.
        Duration::seconds(self.confirm_within_secs.min(MAX_CONFIRM_WITHIN_SECS) as i64)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConfirmationConfig::default();
        assert_eq!(config.confirm_within_secs, 86_400);
        assert!(!config.allow_unconfirmed_login);
        assert_eq!(config.mail.subject, "Account confirmation");
        assert_eq!(config.expiry_window(), Duration::hours(24));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: ConfirmationConfig =
            serde_json::from_str(r#"{"confirm_within_secs": 3600}"#).unwrap();
        assert_eq!(config.expiry_window(), Duration::hours(1));
        assert_eq!(config.mail, MailSettings::default());
    }

    #[test]
    fn test_zero_window_rejected() {
        let config = ConfirmationConfig {
            confirm_within_secs: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_huge_window_rejected() {
        let config = ConfirmationConfig {
            confirm_within_secs: u64::MAX,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_bad_confirm_url_rejected() {
        let mut config = ConfirmationConfig::default();
        config.mail.confirm_url = "not a url".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfirmationConfig::load(&dir.path().join("missing.json")).unwrap();
        assert_eq!(config, ConfirmationConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = ConfirmationConfig {
            confirm_within_secs: 600,
            allow_unconfirmed_login: true,
            ..Default::default()
        };
        config.mail.sender_email = "admin@example.com".to_string();
        config.save(&path).unwrap();

        let loaded = ConfirmationConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_json_is_serde_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(
            ConfirmationConfig::load(&path),
            Err(Error::Serde(_))
        ));
    }
}
