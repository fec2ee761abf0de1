//! Bearer credentials minted by an external identity helper.
//!
//! A [`CredentialSource`] is the only place credentials come from. Minting is
//! expensive (a process spawn plus whatever network round trip the helper
//! performs), so callers are expected to go through
//! [`TokenCache`](crate::cache::TokenCache) instead of calling
//! [`CredentialSource::mint`] per request.
//!
//! # Usage
//!
//! ```no_run
//! use authproxy::config::HelperConfig;
//! use authproxy::credentials::{CredentialSource, HelperCommandSource};
//!
//! # async fn run() -> Result<(), authproxy::credentials::MintError> {
//! let source = HelperCommandSource::from_config(&HelperConfig::default());
//! let token = source.mint().await?;
//! println!("token expires at {}", token.expiry());
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderValue};
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

mod helper;

#[cfg(test)]
mod tests;

pub use helper::{parse_helper_output, HelperCommandSource};

/// Token type used when the helper does not report one.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// A bearer credential with an absolute expiry.
///
/// Immutable once minted. The access token is wrapped in [`SecretString`] so it
/// never shows up in `Debug` output or logs.
#[derive(Debug)]
pub struct Token {
    token_type: String,
    access_token: SecretString,
    expiry: DateTime<Utc>,
}

impl Token {
    pub fn new(
        token_type: impl Into<String>,
        access_token: impl Into<String>,
        expiry: DateTime<Utc>,
    ) -> Self {
        Self {
            token_type: token_type.into(),
            access_token: SecretString::from(access_token.into()),
            expiry,
        }
    }

    /// Authorization scheme, normalised the way OAuth2 clients present it.
    ///
    /// Empty defaults to `Bearer`; `bearer`, `mac` and `basic` are canonicalised
    /// regardless of case. Anything else is returned as reported.
    pub fn token_type(&self) -> &str {
        if self.token_type.is_empty() {
            return DEFAULT_TOKEN_TYPE;
        }
        if self.token_type.eq_ignore_ascii_case("bearer") {
            "Bearer"
        } else if self.token_type.eq_ignore_ascii_case("mac") {
            "MAC"
        } else if self.token_type.eq_ignore_ascii_case("basic") {
            "Basic"
        } else {
            &self.token_type
        }
    }

    pub fn access_token(&self) -> &str {
        self.access_token.expose_secret()
    }

    pub fn expiry(&self) -> DateTime<Utc> {
        self.expiry
    }

    /// True if the token is still usable at `now` with `skew` to spare.
    pub fn is_valid_at(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        now.checked_add_signed(skew).is_some_and(|deadline| deadline < self.expiry)
    }

    /// `"<token_type> <access_token>"`, the value of the Authorization header.
    pub fn authorization_value(&self) -> String {
        format!("{} {}", self.token_type(), self.access_token())
    }

    /// Set the Authorization header, replacing any value already present.
    pub fn set_auth_header(&self, headers: &mut HeaderMap) -> Result<(), MintError> {
        let mut value = HeaderValue::from_str(&self.authorization_value())
            .map_err(|_| MintError::Malformed("access token is not a valid header value".into()))?;
        value.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, value);
        Ok(())
    }
}

/// Failure to obtain a credential from the identity helper.
///
/// Cloneable so that every caller coalesced onto one mint observes the same
/// error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MintError {
    /// Helper could not be started (not installed, not executable, ...)
    #[error("running the identity helper: {0}")]
    Spawn(String),

    /// Helper ran but exited unsuccessfully
    #[error("identity helper exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },

    /// Helper output was not the expected JSON document
    #[error("parsing the identity helper output: {0}")]
    Malformed(String),

    /// `credential.token_expiry` was not an RFC 3339 timestamp
    #[error("failure parsing the token expiry time: {0}")]
    Expiry(String),

    /// Helper did not finish within the configured mint timeout
    #[error("identity helper did not respond within {0:?}")]
    Timeout(std::time::Duration),

    /// Mint task was cancelled or panicked before producing a result
    #[error("credential mint aborted: {0}")]
    Aborted(String),
}

/// Anything that can mint a fresh [`Token`].
///
/// Implementations must not cache: reuse is the job of
/// [`TokenCache`](crate::cache::TokenCache). A failed mint must leave no
/// partial state behind.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn mint(&self) -> Result<Token, MintError>;
}
