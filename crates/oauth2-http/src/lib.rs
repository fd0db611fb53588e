//! Authenticated HTTP request pipeline
//!
//! `AuthenticatedClient` sends JSON requests to an external API, attaching a
//! bearer token obtained from a `TokenSource` (normally a
//! `oauth2_token::CredentialClient`, which validates and refreshes the token
//! first). Failures come back as `Error` values carrying request and
//! response snapshots.

pub mod error;
pub mod pipeline;
pub mod request;
pub mod retry;
pub mod source;

#[cfg(test)]
mod testing;

pub use error::{Error, RequestSnapshot, ResponseSnapshot, Result, ServerStatusError};
pub use pipeline::{ApiResponse, AuthenticatedClient};
pub use request::RequestConfig;
pub use retry::{DEFAULT_RETRY_STATUSES, RetryPolicy};
pub use source::{StaticToken, TokenFuture, TokenSource};
