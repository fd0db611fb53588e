//! Token endpoint exchange
//!
//! Both grants go to the configured token URL with the configured HTTP
//! method; all parameters travel in the query string:
//! 1. `authorization_code`: completes interactive authorization
//! 2. `refresh_token`: renews an expired or missing access token
//!
//! A successful response replaces the client's token wholesale and is
//! persisted before the in-memory token changes. A 401 means the refresh
//! token is dead: the local token is cleared and the stored one purged so no
//! other process keeps retrying it.

use reqwest::header::ACCEPT;
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::client::CredentialClient;
use crate::error::{Error, Result};
use crate::token::{ApiError, Token, TokenResponse, now_millis};

pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";

impl CredentialClient {
    /// Token endpoint URL for the authorization-code grant.
    pub fn code_exchange_url(&self, code: &str) -> Url {
        let config = &self.config;
        let mut url = config.token_url.clone();
        url.query_pairs_mut()
            .append_pair("code", code)
            .append_pair("redirect_uri", &config.redirect_url)
            .append_pair("client_id", &config.client_id)
            .append_pair("client_secret", config.client_secret.expose())
            .append_pair("scope", &config.scope)
            .append_pair("grant_type", GRANT_AUTHORIZATION_CODE);
        url
    }

    /// Token endpoint URL for the refresh-token grant.
    pub fn refresh_exchange_url(&self, refresh_token: &str) -> Url {
        let config = &self.config;
        let mut url = config.token_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &config.client_id)
            .append_pair("client_secret", config.client_secret.expose())
            .append_pair("refresh_token", refresh_token)
            .append_pair("scope", &config.scope)
            .append_pair("grant_type", GRANT_REFRESH_TOKEN)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");
        url
    }

    /// Exchange an authorization code obtained out of band.
    ///
    /// Runs under the refresh lock like every other token write.
    pub async fn authorize_with_code(&self, code: &str) -> Result<Token> {
        let _guard = self.refresh_lock.lock().await;
        self.get_token(self.code_exchange_url(code), GRANT_AUTHORIZATION_CODE)
            .await
    }

    /// Call the token endpoint and install the returned token.
    ///
    /// Callers must hold the refresh lock.
    #[instrument(
        skip_all,
        fields(
            api = %self.config.api_name,
            client_id = %self.config.client_id,
            grant_type = grant_type,
            exchange_id = %Uuid::new_v4(),
        )
    )]
    pub(crate) async fn get_token(&self, url: Url, grant_type: &'static str) -> Result<Token> {
        let result = self.exchange(url, grant_type).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(Error::AuthExchangeRejected { .. }) => "rejected",
            Err(_) => "error",
        };
        metrics::counter!(
            "oauth2_token_exchanges_total",
            "api" => self.config.api_name.clone(),
            "grant_type" => grant_type,
            "outcome" => outcome,
        )
        .increment(1);
        result
    }

    async fn exchange(&self, url: Url, grant_type: &'static str) -> Result<Token> {
        let response = self
            .http
            .request(self.config.token_method.clone(), url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| Error::Http(format!("token endpoint request failed: {e}")))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Http(format!("reading token endpoint response: {e}")))?;

        if !status.is_success() {
            let api_error = serde_json::from_slice::<ApiError>(&body).unwrap_or_else(|_| ApiError {
                error: String::from_utf8_lossy(&body).trim().to_string(),
                error_description: None,
            });

            if status.as_u16() == 401 {
                // Only a rejected refresh token is dead; a bad code leaves the stored token alone
                if grant_type == GRANT_REFRESH_TOKEN {
                    warn!(
                        status = status.as_u16(),
                        error = %api_error.error,
                        "token endpoint rejected refresh token, clearing token"
                    );
                    self.purge_token().await;
                } else {
                    warn!(
                        status = status.as_u16(),
                        error = %api_error.error,
                        "token endpoint rejected authorization code"
                    );
                }
                return Err(Error::AuthExchangeRejected {
                    status: status.as_u16(),
                    error: api_error.error,
                    description: api_error.error_description,
                });
            }

            warn!(status = status.as_u16(), error = %api_error.error, "token exchange failed");
            let mut message = format!("token endpoint returned {status}: {}", api_error.error);
            if let Some(description) = api_error.error_description {
                message.push_str(", ");
                message.push_str(&description);
            }
            return Err(Error::TokenExchange(message));
        }

        let token_response: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| Error::Serialization(format!("invalid token response: {e}")))?;
        let token = Token::from_response(token_response, now_millis());

        self.store
            .save(&self.config.api_name, &self.config.client_id, &token)
            .await
            .map_err(|e| match e {
                Error::Persistence(_) => e,
                other => Error::Persistence(other.to_string()),
            })?;
        self.set_token(Some(token.clone())).await;

        info!(
            has_refresh_token = token.refreshable(),
            expires_at = ?token.expires_at,
            "token exchange succeeded"
        );
        Ok(token)
    }

    /// Drop the rejected token locally and in the store.
    async fn purge_token(&self) {
        self.set_token(None).await;
        match self
            .store
            .save(&self.config.api_name, &self.config.client_id, &Token::default())
            .await
        {
            Ok(()) => debug!("purged stored token"),
            Err(e) => warn!(error = %e, "failed to purge stored token"),
        }
    }
}
