//! Confirmation message composition.

use url::Url;

use super::{ConfirmationNotice, NotifyError};
use crate::config::MailSettings;

/// A confirmation email ready to hand to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationMessage {
    /// Sender address.
    pub from: String,
    /// Sender display name.
    pub from_name: Option<String>,
    /// Recipient address.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// Link that redeems the token.
    pub link: Url,
    /// Plain text body.
    pub text_body: String,
    /// HTML body.
    pub html_body: String,
}

impl ConfirmationMessage {
    /// Builds the message for a notice using the configured mail settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the recipient address is unusable or the
    /// confirmation URL does not parse.
    pub fn compose(notice: &ConfirmationNotice, mail: &MailSettings) -> Result<Self, NotifyError> {
        if !is_deliverable(&notice.email) {
            return Err(NotifyError::InvalidAddress(notice.email.clone()));
        }
        if !is_deliverable(&mail.sender_email) {
            return Err(NotifyError::InvalidAddress(mail.sender_email.clone()));
        }

        let mut link = Url::parse(&mail.confirm_url)?;
        link.query_pairs_mut()
            .append_pair("id", &notice.account_id.to_string())
            .append_pair("token", notice.token.expose());

        let expires = notice.expires_at.format("%Y-%m-%d %H:%M UTC");

        let text_body = format!(
            "Hello,\r\n\r\n\
             Thank you for registering. Please confirm your account by opening the link below:\r\n\r\n\
             {link}\r\n\r\n\
             The link is valid until {expires}.\r\n\r\n\
             If you did not create an account, you can ignore this message.\r\n"
        );

        let href = escape_html(link.as_str());
        let html_body = format!(
            "<p>Hello,</p>\
             <p>Thank you for registering. Please confirm your account by clicking the link below:</p>\
             <p><a href=\"{href}\">{href}</a></p>\
             <p>The link is valid until {expires}.</p>\
             <p>If you did not create an account, you can ignore this message.</p>"
        );

        Ok(Self {
            from: mail.sender_email.clone(),
            from_name: mail.sender_name.clone(),
            to: notice.email.clone(),
            subject: mail.subject.clone(),
            link,
            text_body,
            html_body,
        })
    }
}

/// Minimal shape check: exactly one `@` with text on both sides.
fn is_deliverable(address: &str) -> bool {
    let address = address.trim();
    let mut parts = address.split('@');
    matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(local), Some(domain), None) if !local.is_empty() && !domain.is_empty()
    )
}

fn escape_html(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
