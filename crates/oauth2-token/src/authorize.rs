//! Interactive authorization-code fallback
//!
//! When no refresh token is available, or the token endpoint rejects it, the
//! operator has to authorize again in a browser. The `Authorizer` receives the
//! authorization URL and resolves with the code the provider hands back.
//!
//! `LocalRedirectAuthorizer` serves the redirect URI itself: it binds a local
//! listener, prints the URL, and waits for exactly one redirect carrying a
//! `code` query parameter. The wait is a plain future (`PendingAuthorization`)
//! so callers can apply their own timeout or drop it to cancel. The listener
//! shuts down once the code has arrived.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tracing::{info, warn};
use url::Url;

use crate::client::ClientConfig;
use crate::error::{Error, Result};

/// Default listen address of the local redirect endpoint.
pub const DEFAULT_CALLBACK_ADDR: &str = "127.0.0.1:8080";

/// Default path of the local redirect endpoint.
pub const DEFAULT_CALLBACK_PATH: &str = "/oauth/redirect";

/// Boxed future resolving to an authorization code.
pub type AuthorizeFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

/// Obtains an authorization code from a human operator.
pub trait Authorizer: Send + Sync {
    /// Present `authorization_url` and resolve with the returned code.
    fn authorize<'a>(&'a self, authorization_url: &'a Url) -> AuthorizeFuture<'a>;
}

/// Build the URL the operator visits to grant offline access.
pub fn build_authorization_url(config: &ClientConfig) -> Url {
    let mut url = config.authorize_url.clone();
    url.query_pairs_mut()
        .append_pair("client_id", &config.client_id)
        .append_pair("response_type", "code")
        .append_pair("redirect_uri", &config.redirect_url)
        .append_pair("scope", &config.scope)
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent");
    url
}

/// Authorizer that receives the redirect on a local HTTP endpoint.
#[derive(Debug, Clone)]
pub struct LocalRedirectAuthorizer {
    listen_addr: SocketAddr,
    path: String,
    timeout: Option<Duration>,
    success_redirect: Option<String>,
}

impl Default for LocalRedirectAuthorizer {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            path: DEFAULT_CALLBACK_PATH.to_string(),
            timeout: None,
            success_redirect: None,
        }
    }
}

impl LocalRedirectAuthorizer {
    pub fn new(listen_addr: SocketAddr, path: impl Into<String>) -> Self {
        Self {
            listen_addr,
            path: path.into(),
            ..Self::default()
        }
    }

    /// Give up waiting for the operator after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// `Location` sent with the 302 once the code has been received.
    pub fn with_success_redirect(mut self, location: impl Into<String>) -> Self {
        self.success_redirect = Some(location.into());
        self
    }

    /// Bind the redirect endpoint and start awaiting the authorization code.
    pub async fn listen(&self) -> Result<PendingAuthorization> {
        let listener = TcpListener::bind(self.listen_addr).await.map_err(|e| {
            Error::Authorization(format!("binding redirect endpoint {}: {e}", self.listen_addr))
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::Authorization(format!("reading redirect endpoint address: {e}")))?;

        let (code_tx, code_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let state = CallbackState {
            sender: Arc::new(Mutex::new(Some(code_tx))),
            success_redirect: self.success_redirect.clone(),
        };
        let router = Router::new()
            .route(&self.path, get(handle_redirect))
            .with_state(state);

        tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                warn!(error = %e, "redirect endpoint stopped with error");
            }
        });

        info!(addr = %local_addr, path = %self.path, "awaiting authorization code");
        Ok(PendingAuthorization {
            local_addr,
            code_rx,
            shutdown_tx: Some(shutdown_tx),
        })
    }
}

impl Authorizer for LocalRedirectAuthorizer {
    fn authorize<'a>(&'a self, authorization_url: &'a Url) -> AuthorizeFuture<'a> {
        Box::pin(async move {
            // Endpoint must be up before the operator is sent to the provider
            let pending = self.listen().await?;

            info!(authorization_url = %authorization_url, "interactive authorization required");
            eprintln!("Go to this URL to authorize access:\n\n{authorization_url}\n");

            match self.timeout {
                Some(timeout) => tokio::time::timeout(timeout, pending.code())
                    .await
                    .map_err(|_| {
                        Error::Authorization(format!(
                            "no authorization code received within {}s",
                            timeout.as_secs()
                        ))
                    })?,
                None => pending.code().await,
            }
        })
    }
}

/// State "awaiting authorization code".
///
/// Dropping it shuts the redirect endpoint down.
pub struct PendingAuthorization {
    local_addr: SocketAddr,
    code_rx: oneshot::Receiver<Result<String>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl PendingAuthorization {
    /// Address the redirect endpoint is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the redirect and return its authorization code.
    pub async fn code(mut self) -> Result<String> {
        let received = (&mut self.code_rx).await;
        match received {
            Ok(result) => result,
            Err(_) => Err(Error::Authorization(
                "redirect endpoint closed before a code arrived".into(),
            )),
        }
    }
}

impl Drop for PendingAuthorization {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[derive(Clone)]
struct CallbackState {
    sender: Arc<Mutex<Option<oneshot::Sender<Result<String>>>>>,
    success_redirect: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RedirectParams {
    code: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

async fn handle_redirect(
    State(state): State<CallbackState>,
    query: std::result::Result<Query<RedirectParams>, QueryRejection>,
) -> Response {
    let params = match query {
        Ok(Query(params)) => params,
        Err(e) => {
            warn!(error = %e, "could not parse redirect query");
            return (StatusCode::BAD_REQUEST, "could not parse query").into_response();
        }
    };

    if let Some(error) = params.error {
        let description = params.error_description.unwrap_or_default();
        warn!(error = %error, description = %description, "provider returned authorization error");
        if let Some(tx) = state.sender.lock().await.take() {
            let _ = tx.send(Err(Error::Authorization(format!(
                "provider returned {error}: {description}"
            ))));
        }
        return (StatusCode::BAD_REQUEST, "authorization failed").into_response();
    }

    let Some(code) = params.code.filter(|c| !c.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing authorization code").into_response();
    };

    let Some(tx) = state.sender.lock().await.take() else {
        return (StatusCode::CONFLICT, "authorization already completed").into_response();
    };
    let _ = tx.send(Ok(code));
    info!("authorization code received");

    let mut response = StatusCode::FOUND.into_response();
    if let Some(location) = state
        .success_redirect
        .as_deref()
        .and_then(|l| HeaderValue::from_str(l).ok())
    {
        response.headers_mut().insert(header::LOCATION, location);
    }
    response
}
