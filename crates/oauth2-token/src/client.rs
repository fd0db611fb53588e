//! Credential client: static OAuth2 configuration plus the current token
//!
//! One `CredentialClient` exists per external API integration. The current
//! token is read freely but only written inside the refresh critical section
//! (`validate_token`, `authorize_with_code`, `load_from_store`), all of which
//! hold the client's `RefreshLock`.
//!
//! Each client gets its own lock unless a shared handle is passed to the
//! builder. Sharing one handle across clients serializes their refreshes,
//! which is what you want when they draw on the same refresh-token family.

use std::sync::Arc;

use common::Secret;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use url::Url;

use crate::alert::{AlertSink, LogAlertSink};
use crate::authorize::{Authorizer, LocalRedirectAuthorizer};
use crate::error::Result;
use crate::store::TokenStore;
use crate::token::Token;

/// Handle serializing refresh and interactive authorization sequences.
pub type RefreshLock = Arc<Mutex<()>>;

/// Create a fresh, unshared refresh lock.
pub fn new_refresh_lock() -> RefreshLock {
    Arc::new(Mutex::new(()))
}

/// Static OAuth2 configuration for one API integration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Name of the external API, first half of the store key
    pub api_name: String,
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub scope: String,
    pub redirect_url: String,
    pub authorize_url: Url,
    pub token_url: Url,
    /// HTTP method used for token endpoint calls
    pub token_method: reqwest::Method,
    /// Live clients raise alerts when re-authorization is needed
    pub live: bool,
}

/// OAuth2 client owning the current token for one (api, client) pair.
pub struct CredentialClient {
    pub(crate) config: ClientConfig,
    token: RwLock<Option<Token>>,
    pub(crate) refresh_lock: RefreshLock,
    pub(crate) store: Arc<dyn TokenStore>,
    pub(crate) alerts: Arc<dyn AlertSink>,
    pub(crate) authorizer: Arc<dyn Authorizer>,
    pub(crate) http: reqwest::Client,
}

/// Builder for `CredentialClient`; only config and store are required.
pub struct CredentialClientBuilder {
    config: ClientConfig,
    store: Arc<dyn TokenStore>,
    token: Option<Token>,
    refresh_lock: Option<RefreshLock>,
    alerts: Option<Arc<dyn AlertSink>>,
    authorizer: Option<Arc<dyn Authorizer>>,
    http: Option<reqwest::Client>,
}

impl CredentialClientBuilder {
    /// Share a refresh lock with other clients.
    pub fn refresh_lock(mut self, lock: RefreshLock) -> Self {
        self.refresh_lock = Some(lock);
        self
    }

    pub fn alert_sink(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    /// Start with an in-memory token instead of an empty slot.
    pub fn token(mut self, token: Token) -> Self {
        self.token = Some(token);
        self
    }

    pub fn build(self) -> CredentialClient {
        CredentialClient {
            config: self.config,
            token: RwLock::new(self.token),
            refresh_lock: self.refresh_lock.unwrap_or_else(new_refresh_lock),
            store: self.store,
            alerts: self.alerts.unwrap_or_else(|| Arc::new(LogAlertSink)),
            authorizer: self
                .authorizer
                .unwrap_or_else(|| Arc::new(LocalRedirectAuthorizer::default())),
            http: self.http.unwrap_or_default(),
        }
    }
}

impl CredentialClient {
    pub fn builder(config: ClientConfig, store: Arc<dyn TokenStore>) -> CredentialClientBuilder {
        CredentialClientBuilder {
            config,
            store,
            token: None,
            refresh_lock: None,
            alerts: None,
            authorizer: None,
            http: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn api_name(&self) -> &str {
        &self.config.api_name
    }

    /// The refresh lock handle, for sharing with clients built later.
    pub fn refresh_lock(&self) -> RefreshLock {
        self.refresh_lock.clone()
    }

    /// Snapshot of the current token.
    pub async fn token(&self) -> Option<Token> {
        self.token.read().await.clone()
    }

    /// Seed the current token from the store, e.g. at startup.
    ///
    /// Leaves the current token untouched when the store has no entry.
    pub async fn load_from_store(&self) -> Result<Option<Token>> {
        let _guard = self.refresh_lock.lock().await;
        self.reload_from_store().await
    }

    /// Reload from the store; callers must hold the refresh lock.
    pub(crate) async fn reload_from_store(&self) -> Result<Option<Token>> {
        let stored = self
            .store
            .load(&self.config.api_name, &self.config.client_id)
            .await?;
        match &stored {
            Some(token) => {
                debug!(
                    api = %self.config.api_name,
                    client_id = %self.config.client_id,
                    usable = token.usable(),
                    "reloaded token from store"
                );
                self.set_token(Some(token.clone())).await;
            }
            None => {
                info!(
                    api = %self.config.api_name,
                    client_id = %self.config.client_id,
                    "no stored token"
                );
            }
        }
        Ok(stored)
    }

    /// Replace the current token; callers must hold the refresh lock.
    pub(crate) async fn set_token(&self, token: Option<Token>) {
        *self.token.write().await = token;
    }
}
