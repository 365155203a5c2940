//! Confirmation token generation and comparison.
//!
//! Tokens are 256 bits drawn from the operating system CSPRNG and encoded
//! as URL-safe base64 without padding, so they can travel in a link.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;

use crate::{Error, Result};

/// Number of random bytes in a generated token.
pub const TOKEN_BYTES: usize = 32;

/// A single-use confirmation secret.
///
/// Equality is constant-time and `Debug` never prints the value.
#[derive(Clone)]
pub struct ConfirmationToken(String);

impl ConfirmationToken {
    /// Wraps an existing token value, e.g. one loaded from storage.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw token for embedding in a link or persisting.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Compares a submitted value against this token in constant time.
    #[must_use]
    pub fn matches(&self, submitted: &str) -> bool {
        self.0.as_bytes().ct_eq(submitted.as_bytes()).into()
    }
}

impl PartialEq for ConfirmationToken {
    fn eq(&self, other: &Self) -> bool {
        self.matches(&other.0)
    }
}

impl Eq for ConfirmationToken {}

impl std::fmt::Debug for ConfirmationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ConfirmationToken(<redacted>)")
    }
}

/// Source of unguessable confirmation tokens.
///
/// Implementations must be backed by a cryptographically secure generator.
pub trait RandomSource: Send + Sync {
    /// Generates a fresh token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Random`] if the generator is unavailable.
    fn generate_token(&self) -> Result<ConfirmationToken>;
}

/// Token source backed by the operating system's CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandomSource;

impl RandomSource for OsRandomSource {
    fn generate_token(&self) -> Result<ConfirmationToken> {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| Error::Random(e.to_string()))?;
        Ok(ConfirmationToken(URL_SAFE_NO_PAD.encode(bytes)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_token_length() {
        let token = OsRandomSource.generate_token().unwrap();
        // 32 bytes of base64 without padding
        assert_eq!(token.expose().len(), 43);
    }

    #[test]
    fn test_token_is_url_safe() {
        let token = OsRandomSource.generate_token().unwrap();
        assert!(
            token
                .expose()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn test_multiple_generations_unique() {
        let first = OsRandomSource.generate_token().unwrap();
        let second = OsRandomSource.generate_token().unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_matches() {
        let token = ConfirmationToken::new("abc123");
        assert!(token.matches("abc123"));
        assert!(!token.matches("abc124"));
        assert!(!token.matches("abc12"));
        assert!(!token.matches(""));
    }

    #[test]
    fn test_debug_redacts() {
        let token = ConfirmationToken::new("super-secret");
        let rendered = format!("{token:?}");
        assert!(!rendered.contains("super-secret"));
    }
}
