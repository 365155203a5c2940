//! Delivery through a transactional mail HTTP API.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use super::{ConfirmationMessage, ConfirmationNotice, Notifier, NotifyError};
use crate::config::MailSettings;

const USER_AGENT: &str = concat!("confirmable/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmailAddress<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendEmailBody<'a> {
    sender: EmailAddress<'a>,
    to: Vec<EmailAddress<'a>>,
    subject: &'a str,
    html_content: &'a str,
    text_content: &'a str,
}

impl<'a> From<&'a ConfirmationMessage> for SendEmailBody<'a> {
    fn from(message: &'a ConfirmationMessage) -> Self {
        Self {
            sender: EmailAddress {
                email: &message.from,
                name: message.from_name.as_deref(),
            },
            to: vec![EmailAddress {
                email: &message.to,
                name: None,
            }],
            subject: &message.subject,
            html_content: &message.html_body,
            text_content: &message.text_body,
        }
    }
}

/// Notifier that posts confirmation mail to a Brevo-compatible HTTP API.
///
/// Each call makes exactly one request; failures are returned, not retried.
#[derive(Debug, Clone)]
pub struct HttpMailNotifier {
    client: reqwest::Client,
    api_key: String,
    mail: MailSettings,
}

impl HttpMailNotifier {
    /// Creates a notifier with its own HTTP client.
    #[must_use]
    pub fn new(api_key: impl Into<String>, mail: MailSettings) -> Self {
        Self::with_client(reqwest::Client::new(), api_key, mail)
    }

    /// Creates a notifier that reuses an existing HTTP client.
    #[must_use]
    pub fn with_client(
        client: reqwest::Client,
        api_key: impl Into<String>,
        mail: MailSettings,
    ) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            mail,
        }
    }
}

#[async_trait]
impl Notifier for HttpMailNotifier {
    async fn send_confirmation(&self, notice: &ConfirmationNotice) -> Result<(), NotifyError> {
        let message = ConfirmationMessage::compose(notice, &self.mail)?;
        let body = SendEmailBody::from(&message);

        let response = self
            .client
            .post(&self.mail.api_url)
            .header("api-key", &self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(account = %notice.account_id, "Confirmation mail accepted");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(NotifyError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
