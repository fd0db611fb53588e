//! OAuth2 bearer-token lifecycle
//!
//! Keeps one token per (api, client) pair usable: checks expiry, refreshes
//! through the token endpoint, falls back to interactive authorization when
//! the refresh token is missing or rejected, and persists every new token
//! through a `TokenStore`.
//!
//! Token flow:
//! 1. `CredentialClient::load_from_store()` seeds the token at startup
//! 2. `CredentialClient::validate_token()` runs before each authenticated call
//! 3. Expired tokens are refreshed via `refresh_token` grant and saved
//! 4. Missing/rejected refresh tokens trigger the `Authorizer`, whose code is
//!    exchanged via `authorization_code` grant and saved

pub mod alert;
pub mod authorize;
pub mod client;
pub mod error;
pub mod exchange;
pub mod store;
pub mod token;
mod validate;

#[cfg(test)]
mod testing;

pub use alert::{AlertSink, LogAlertSink};
pub use authorize::{
    Authorizer, DEFAULT_CALLBACK_ADDR, DEFAULT_CALLBACK_PATH, LocalRedirectAuthorizer,
    PendingAuthorization, build_authorization_url,
};
pub use client::{ClientConfig, CredentialClient, CredentialClientBuilder, RefreshLock, new_refresh_lock};
pub use error::{Error, Result};
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use token::{ApiError, Token, TokenResponse, TokenSummary, is_refreshable, is_usable};
