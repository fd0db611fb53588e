//! Token refresh orchestration
//!
//! `validate_token` guarantees a usable, non-expired access token before an
//! authenticated call. Everything runs under the client's refresh lock, so
//! concurrent callers queue behind one refresh instead of racing; a caller
//! that waited re-inspects the token and finds it already fresh.
//!
//! Sequence:
//! 1. Unusable token → reload from the store and refresh with the stored
//!    refresh token. No refresh token, or a failed exchange → interactive
//!    authorization.
//! 2. Still unusable → alert (live only) and interactive authorization.
//! 3. Usable but expired, or holding only a refresh token → reload and
//!    refresh. Failures surface as `TokenExpiredRefreshFailed`, except a
//!    rejected refresh token, which needs interactive authorization.

use tracing::{debug, info, instrument, warn};

use crate::authorize::build_authorization_url;
use crate::client::CredentialClient;
use crate::error::{Error, Result};
use crate::exchange::{GRANT_AUTHORIZATION_CODE, GRANT_REFRESH_TOKEN};
use crate::token::{Token, is_usable};

const MISSING_REFRESH_TOKEN_ALERT: &str =
    "refresh token not found or empty, login needed to retrieve a new one";

/// Result of a store-backed refresh attempt.
enum Refresh {
    /// Current token is now usable and fresh
    Done,
    /// No refresh token to exchange
    NotRefreshable,
    Failed(Error),
}

/// Fires the live-mode alert at most once per validation.
struct Alerts<'a> {
    client: &'a CredentialClient,
    fired: bool,
}

impl Alerts<'_> {
    fn fire(&mut self, message: &str) {
        if self.fired || !self.client.config.live {
            return;
        }
        self.fired = true;
        self.client
            .alerts
            .notify(&format!("{}: {message}", self.client.config.api_name));
    }
}

impl CredentialClient {
    /// Ensure the current token is usable and not expired, refreshing or
    /// re-authorizing as needed. Returns a snapshot of the validated token.
    #[instrument(skip_all, fields(api = %self.config.api_name, client_id = %self.config.client_id))]
    pub async fn validate_token(&self) -> Result<Token> {
        let _guard = self.refresh_lock.lock().await;
        let mut alerts = Alerts {
            client: self,
            fired: false,
        };

        if !is_usable(self.token().await.as_ref()) {
            debug!("token not usable, refreshing from store");
            match self.refresh_from_store().await {
                Refresh::Done => {}
                Refresh::NotRefreshable => {
                    alerts.fire(MISSING_REFRESH_TOKEN_ALERT);
                    self.authorize_interactively().await?;
                }
                Refresh::Failed(e) => self.recover_from_failed_refresh(e, &mut alerts).await?,
            }

            if !is_usable(self.token().await.as_ref()) {
                alerts.fire(MISSING_REFRESH_TOKEN_ALERT);
                self.authorize_interactively().await?;
            }
        }

        let token = self.usable_token().await?;
        if token.is_expired()? || !token.has_access_token() {
            debug!(expires_at = ?token.expires_at, "token expired or missing access token, refreshing");
            match self.refresh_from_store().await {
                Refresh::Done => {}
                Refresh::NotRefreshable => {
                    alerts.fire(MISSING_REFRESH_TOKEN_ALERT);
                    self.authorize_interactively().await?;
                }
                Refresh::Failed(e) if e.is_rejected() => {
                    self.recover_from_failed_refresh(e, &mut alerts).await?;
                }
                Refresh::Failed(e @ Error::Persistence(_)) => return Err(e),
                Refresh::Failed(e) => return Err(Error::TokenExpiredRefreshFailed(Box::new(e))),
            }
        }

        let token = self.usable_token().await?;
        if token.is_expired()? || !token.has_access_token() {
            return Err(Error::TokenUnusable(
                "token endpoint returned an expired token or no access token".into(),
            ));
        }
        Ok(token)
    }

    /// Reload from the store, then exchange its refresh token.
    ///
    /// A stored token that is already fresh (another process refreshed it)
    /// is adopted without an exchange.
    async fn refresh_from_store(&self) -> Refresh {
        if let Err(e) = self.reload_from_store().await {
            return Refresh::Failed(e);
        }
        let Some(current) = self.token().await else {
            return Refresh::NotRefreshable;
        };

        if current.has_access_token() && matches!(current.is_expired(), Ok(false)) {
            info!("stored token is fresh, skipping exchange");
            return Refresh::Done;
        }

        let Some(refresh_token) = current.refresh_token.as_deref().filter(|t| !t.is_empty())
        else {
            return Refresh::NotRefreshable;
        };

        match self
            .get_token(self.refresh_exchange_url(refresh_token), GRANT_REFRESH_TOKEN)
            .await
        {
            Ok(_) => Refresh::Done,
            Err(e) => Refresh::Failed(e),
        }
    }

    /// Persistence failures surface; anything else falls back to the operator.
    async fn recover_from_failed_refresh(&self, e: Error, alerts: &mut Alerts<'_>) -> Result<()> {
        if let Error::Persistence(_) = e {
            return Err(e);
        }
        if e.is_rejected() {
            alerts.fire(&format!(
                "refresh token not valid, login needed to retrieve a new one: {e}"
            ));
        } else {
            warn!(error = %e, "refresh failed, falling back to interactive authorization");
        }
        self.authorize_interactively().await
    }

    /// Run the interactive flow and exchange the returned code.
    async fn authorize_interactively(&self) -> Result<()> {
        let url = build_authorization_url(&self.config);
        warn!("interactive authorization required");
        let code = self.authorizer.authorize(&url).await?;
        self.get_token(self.code_exchange_url(&code), GRANT_AUTHORIZATION_CODE)
            .await?;
        Ok(())
    }

    async fn usable_token(&self) -> Result<Token> {
        self.token()
            .await
            .filter(Token::usable)
            .ok_or_else(|| Error::TokenUnusable("no usable token after re-authorization".into()))
    }
}
