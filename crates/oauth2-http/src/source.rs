//! Where the pipeline gets access tokens from

use std::future::Future;
use std::pin::Pin;

use common::Secret;
use oauth2_token::CredentialClient;

/// Boxed future returned by `TokenSource::access_token`.
pub type TokenFuture<'a> =
    Pin<Box<dyn Future<Output = oauth2_token::Result<Option<String>>> + Send + 'a>>;

/// Supplier of bearer tokens for outgoing requests.
///
/// `Ok(None)` means validation passed but there is no access token to send.
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility.
pub trait TokenSource: Send + Sync {
    fn access_token(&self) -> TokenFuture<'_>;
}

impl TokenSource for CredentialClient {
    fn access_token(&self) -> TokenFuture<'_> {
        Box::pin(async move {
            let token = self.validate_token().await?;
            Ok(token.access_token.filter(|t| !t.is_empty()))
        })
    }
}

/// Fixed token, or none at all for unauthenticated APIs.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<Secret<String>>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(Secret::new(token.into())))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

impl TokenSource for StaticToken {
    fn access_token(&self) -> TokenFuture<'_> {
        let token = self.0.as_ref().map(|t| t.expose().clone());
        Box::pin(async move { Ok(token) })
    }
}
