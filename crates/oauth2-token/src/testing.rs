//! Test fixtures: a local token endpoint and a scripted authorizer

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use tokio::net::TcpListener;
use url::Url;

use crate::authorize::{AuthorizeFuture, Authorizer};
use crate::client::{ClientConfig, CredentialClient};
use crate::error::Error;
use crate::store::TokenStore;

pub fn test_config(token_url: &str) -> ClientConfig {
    ClientConfig {
        api_name: "exact".into(),
        client_id: "client-1".into(),
        client_secret: "client-secret".into(),
        scope: "read write".into(),
        redirect_url: "http://localhost:8080/oauth/redirect".into(),
        authorize_url: Url::parse("https://auth.example.com/authorize").unwrap(),
        token_url: Url::parse(token_url).unwrap(),
        token_method: reqwest::Method::POST,
        live: false,
    }
}

/// Client with an authorizer that fails, so unexpected fallbacks surface.
pub fn test_client(config: ClientConfig, store: Arc<dyn TokenStore>) -> CredentialClient {
    CredentialClient::builder(config, store)
        .authorizer(Arc::new(ScriptedAuthorizer::failing()))
        .build()
}

#[derive(Debug, Clone)]
pub struct Hit {
    pub method: String,
    pub params: HashMap<String, String>,
}

#[derive(Clone, Default)]
struct EndpointState {
    hits: Arc<Mutex<Vec<Hit>>>,
    responses: Arc<Mutex<VecDeque<(u16, String)>>>,
    delay: Arc<Mutex<Duration>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

/// Token endpoint on 127.0.0.1 replaying queued responses in order.
pub struct MockTokenEndpoint {
    pub url: Url,
    state: EndpointState,
}

impl MockTokenEndpoint {
    pub async fn start() -> Self {
        let state = EndpointState::default();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = Router::new()
            .route("/token", any(handle_token))
            .with_state(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Self {
            url: Url::parse(&format!("http://{addr}/token")).unwrap(),
            state,
        }
    }

    /// Queue the next response.
    pub fn respond(&self, status: u16, body: &str) {
        self.state
            .responses
            .lock()
            .unwrap()
            .push_back((status, body.to_string()));
    }

    /// Delay every response, to widen race windows.
    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = delay;
    }

    pub fn hits(&self) -> Vec<Hit> {
        self.state.hits.lock().unwrap().clone()
    }

    /// Most requests the endpoint was handling at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}

async fn handle_token(
    State(state): State<EndpointState>,
    method: Method,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.hits.lock().unwrap().push(Hit {
        method: method.to_string(),
        params,
    });
    let current = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_in_flight.fetch_max(current, Ordering::SeqCst);
    let delay = *state.delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    state.in_flight.fetch_sub(1, Ordering::SeqCst);
    let next = state.responses.lock().unwrap().pop_front();
    let (status, body) = next.unwrap_or((500, r#"{"error":"no_response_queued"}"#.into()));
    (
        StatusCode::from_u16(status).unwrap(),
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}

/// Authorizer that answers with a fixed code, or fails, and counts calls.
pub struct ScriptedAuthorizer {
    code: Option<String>,
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl ScriptedAuthorizer {
    pub fn with_code(code: &str) -> Self {
        Self {
            code: Some(code.to_string()),
            calls: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            code: None,
            calls: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

impl Authorizer for ScriptedAuthorizer {
    fn authorize<'a>(&'a self, authorization_url: &'a Url) -> AuthorizeFuture<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls
            .lock()
            .unwrap()
            .push(authorization_url.to_string());
        let result = self
            .code
            .clone()
            .ok_or_else(|| Error::Authorization("no operator available".into()));
        Box::pin(async move { result })
    }
}
