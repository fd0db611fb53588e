//! OAuth2 token entity and lifecycle predicates
//!
//! A `Token` is created either by decoding a token endpoint response or by
//! loading it from a `TokenStore`. It is replaced wholesale on every
//! successful exchange and never patched field by field.
//!
//! `expires_at` is a unix timestamp in milliseconds, computed at receipt time
//! from the endpoint's `expires_in` (seconds delta). It is never read from the
//! token endpoint itself, only from the store.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A token is treated as expired this long before its actual expiry.
pub const EXPIRY_MARGIN_MILLIS: u64 = 60_000;

/// Bearer token state for one (api, client) pair.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Seconds until expiry, as reported by the token endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    /// Absolute expiry as unix timestamp in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

/// Body of a successful token endpoint response.
///
/// Every field is optional: some providers omit the refresh token on refresh,
/// others omit `expires_in` for non-expiring tokens.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Error body returned by the token endpoint on non-2xx responses.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ApiError {
    #[serde(default)]
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

/// Secret-free view of a token for logs and operator output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenSummary {
    pub has_access_token: bool,
    pub has_refresh_token: bool,
    pub token_type: Option<String>,
    pub scope: Option<String>,
    pub expires_at: Option<u64>,
}

impl Token {
    /// Build a token from an endpoint response received at `now_millis`.
    pub fn from_response(response: TokenResponse, now_millis: u64) -> Self {
        let expires_at = response
            .expires_in
            .map(|secs| now_millis.saturating_add_signed(secs.saturating_mul(1000)));
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            token_type: response.token_type,
            scope: response.scope,
            expires_in: response.expires_in,
            expires_at,
        }
    }

    /// Non-empty access token present.
    pub fn has_access_token(&self) -> bool {
        self.access_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// A token is usable if it carries an access token, or a refresh token
    /// that can be turned into one.
    pub fn usable(&self) -> bool {
        self.has_access_token() || self.refreshable()
    }

    /// Absent and empty refresh tokens both fail.
    pub fn refreshable(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Whether the token is within `EXPIRY_MARGIN_MILLIS` of expiring.
    ///
    /// Errors if the token is not usable. A token without `expires_at` never
    /// expires by this check.
    pub fn is_expired(&self) -> Result<bool> {
        self.is_expired_at(now_millis())
    }

    pub fn is_expired_at(&self, now_millis: u64) -> Result<bool> {
        if !self.usable() {
            return Err(Error::InvalidToken(
                "token has neither access token nor refresh token".into(),
            ));
        }
        Ok(match self.expires_at {
            Some(expires_at) => expires_at.saturating_sub(EXPIRY_MARGIN_MILLIS) < now_millis,
            None => false,
        })
    }

    pub fn summary(&self) -> TokenSummary {
        TokenSummary {
            has_access_token: self.has_access_token(),
            has_refresh_token: self.refreshable(),
            token_type: self.token_type.clone(),
            scope: self.scope.clone(),
            expires_at: self.expires_at,
        }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("Token")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_in", &self.expires_in)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// `usable` for a possibly absent token.
pub fn is_usable(token: Option<&Token>) -> bool {
    token.is_some_and(Token::usable)
}

/// `refreshable` for a possibly absent token.
pub fn is_refreshable(token: Option<&Token>) -> bool {
    token.is_some_and(Token::refreshable)
}

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
