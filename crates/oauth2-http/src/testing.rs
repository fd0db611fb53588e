//! Test fixtures: a local API server that records what it receives

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use oauth2_token::ClientConfig;
use tokio::net::TcpListener;
use url::Url;

/// Credential config whose token endpoint is unreachable.
pub fn token_client_config() -> ClientConfig {
    ClientConfig {
        api_name: "exact".into(),
        client_id: "client-1".into(),
        client_secret: "client-secret".into(),
        scope: "read".into(),
        redirect_url: "http://localhost:8080/oauth/redirect".into(),
        authorize_url: Url::parse("https://auth.example.com/authorize").unwrap(),
        token_url: Url::parse("http://127.0.0.1:1/token").unwrap(),
        token_method: reqwest::Method::POST,
        live: false,
    }
}

#[derive(Debug, Clone)]
pub struct ApiHit {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Clone, Default)]
struct ApiState {
    hits: Arc<Mutex<Vec<ApiHit>>>,
    responses: Arc<Mutex<VecDeque<(u16, String)>>>,
}

/// API server on 127.0.0.1 replaying queued responses, then `200 {"ok":true}`.
pub struct MockApi {
    base: String,
    state: ApiState,
}

impl MockApi {
    pub async fn start() -> Self {
        let state = ApiState::default();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = Router::new().fallback(record).with_state(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Self {
            base: format!("http://{addr}"),
            state,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    pub fn respond(&self, status: u16, body: &str) {
        self.state
            .responses
            .lock()
            .unwrap()
            .push_back((status, body.to_string()));
    }

    pub fn hits(&self) -> Vec<ApiHit> {
        self.state.hits.lock().unwrap().clone()
    }
}

async fn record(
    State(state): State<ApiState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    request: Request,
) -> Response {
    let body = axum::body::to_bytes(request.into_body(), 1024 * 1024)
        .await
        .unwrap();
    state.hits.lock().unwrap().push(ApiHit {
        method,
        path: uri.path().to_string(),
        headers,
        body,
    });
    let next = state.responses.lock().unwrap().pop_front();
    let (status, body) = next.unwrap_or((200, r#"{"ok":true}"#.into()));
    (
        StatusCode::from_u16(status).unwrap(),
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}
