//! Authenticated request pipeline
//!
//! Builds the request from a `RequestConfig`, attaches a bearer token from
//! the `TokenSource`, sends it with bounded retries and turns the outcome
//! into an `ApiResponse` or a snapshot-carrying `Error`.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, instrument, warn};
use url::Url;

use crate::error::{Error, RequestSnapshot, ResponseSnapshot, Result, ServerStatusError};
use crate::request::RequestConfig;
use crate::retry::RetryPolicy;
use crate::source::TokenSource;

const APPLICATION_JSON: &str = "application/json";

/// Successful (2xx) response together with the request that produced it.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    request: RequestSnapshot,
    response: ResponseSnapshot,
}

impl ApiResponse {
    pub fn status(&self) -> StatusCode {
        self.response.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.response.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.response.body
    }

    pub fn request(&self) -> &RequestSnapshot {
        &self.request
    }

    pub fn response(&self) -> &ResponseSnapshot {
        &self.response
    }

    /// Decode the body into a response model.
    pub fn json<R: DeserializeOwned>(&self) -> Result<R> {
        serde_json::from_slice(&self.response.body).map_err(|e| Error::Serialization {
            message: format!("response body: {e}"),
            request: Some(Box::new(self.request.clone())),
            response: Some(Box::new(self.response.clone())),
        })
    }
}

/// HTTP client that authenticates requests against one token source.
pub struct AuthenticatedClient {
    http: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
    retry: RetryPolicy,
    timeout: Option<Duration>,
}

impl AuthenticatedClient {
    pub fn new(tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            http: reqwest::Client::new(),
            tokens,
            retry: RetryPolicy::default(),
            timeout: None,
        }
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub async fn get(&self, config: RequestConfig) -> Result<ApiResponse> {
        self.http(Method::GET, config).await
    }

    pub async fn post(&self, config: RequestConfig) -> Result<ApiResponse> {
        self.http(Method::POST, config).await
    }

    pub async fn put(&self, config: RequestConfig) -> Result<ApiResponse> {
        self.http(Method::PUT, config).await
    }

    pub async fn patch(&self, config: RequestConfig) -> Result<ApiResponse> {
        self.http(Method::PATCH, config).await
    }

    pub async fn delete(&self, config: RequestConfig) -> Result<ApiResponse> {
        self.http(Method::DELETE, config).await
    }

    /// Send and decode the success body into `R`.
    pub async fn http_json<R: DeserializeOwned>(
        &self,
        method: Method,
        config: RequestConfig,
    ) -> Result<R> {
        self.http(method, config).await?.json()
    }

    /// Send a request with any method.
    #[instrument(skip_all, fields(method = %method, url = %config.url))]
    pub async fn http(&self, method: Method, config: RequestConfig) -> Result<ApiResponse> {
        if config.url.is_empty() {
            return Err(Error::Config("request url is empty".into()));
        }
        let url = Url::parse(&config.url)
            .map_err(|e| Error::Config(format!("invalid url {:?}: {e}", config.url)))?;

        let body = encode_body(&config)?;
        let mut headers = assemble_headers(body.is_some(), &config.headers);

        if config.skip_access_token {
            debug!("skipping access token");
        } else {
            let bearer = self.bearer(&method, &url, &headers).await?;
            headers.insert(AUTHORIZATION, bearer);
        }

        let request = RequestSnapshot::new(&method, &url, &headers);
        let response = self.send(&method, &url, &headers, body, &request).await?;

        metrics::counter!(
            "oauth2_http_requests_total",
            "method" => method.to_string(),
            "status" => response.status.as_u16().to_string()
        )
        .increment(1);

        if !response.status.is_success() {
            let error_body = config
                .decode_error_body
                .then(|| decode_error_body(&response))
                .flatten();
            warn!(status = %response.status, "request returned error status");
            return Err(Error::ServerStatus(Box::new(ServerStatusError {
                request,
                response,
                error_body,
            })));
        }

        debug!(status = %response.status, "request succeeded");
        Ok(ApiResponse { request, response })
    }

    async fn bearer(&self, method: &Method, url: &Url, headers: &HeaderMap) -> Result<HeaderValue> {
        let snapshot = || Box::new(RequestSnapshot::new(method, url, headers));
        let token = match self.tokens.access_token().await {
            Ok(Some(token)) => token,
            Ok(None) => {
                return Err(Error::TokenUnavailable {
                    message: "no access token after validation".into(),
                    request: snapshot(),
                });
            }
            Err(source) => {
                return Err(Error::Token {
                    source,
                    request: snapshot(),
                });
            }
        };

        let mut value =
            HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| Error::TokenUnavailable {
                message: "access token is not a valid header value".into(),
                request: snapshot(),
            })?;
        value.set_sensitive(true);
        Ok(value)
    }

    /// Send with retries on transport errors and retryable statuses.
    async fn send(
        &self,
        method: &Method,
        url: &Url,
        headers: &HeaderMap,
        body: Option<Bytes>,
        request: &RequestSnapshot,
    ) -> Result<ResponseSnapshot> {
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let retries_left = attempt < max_attempts;

            let mut builder = self
                .http
                .request(method.clone(), url.clone())
                .headers(headers.clone());
            if let Some(body) = &body {
                builder = builder.body(body.clone());
            }
            if let Some(timeout) = self.timeout {
                builder = builder.timeout(timeout);
            }

            match read_response(builder).await {
                Ok(response) if retries_left && self.retry.retries_status(response.status) => {
                    warn!(attempt, status = %response.status, "retrying after retryable status");
                    metrics::counter!("oauth2_http_retries_total", "reason" => "status")
                        .increment(1);
                }
                Ok(response) => return Ok(response),
                Err(e) if retries_left && self.retry.retries_error(&e) => {
                    warn!(attempt, error = %e, "retrying after transport error");
                    metrics::counter!("oauth2_http_retries_total", "reason" => "transport")
                        .increment(1);
                }
                Err(e) => {
                    error!(attempts = attempt, error = %e, "request failed");
                    metrics::counter!(
                        "oauth2_http_requests_total",
                        "method" => method.to_string(),
                        "status" => "transport_error"
                    )
                    .increment(1);
                    return Err(Error::Transport {
                        message: e.to_string(),
                        attempts: attempt,
                        request: Box::new(request.clone()),
                    });
                }
            }

            tokio::time::sleep(self.retry.delay).await;
        }
    }
}

async fn read_response(builder: reqwest::RequestBuilder) -> reqwest::Result<ResponseSnapshot> {
    let response = builder.send().await?;
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?;
    Ok(ResponseSnapshot {
        status,
        headers,
        body,
    })
}

/// Defaults first, then caller overrides replace every value of their name.
fn assemble_headers(has_body: bool, overrides: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(APPLICATION_JSON));
    if has_body {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
    }

    for name in overrides.keys() {
        headers.remove(name);
        for value in overrides.get_all(name) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

fn encode_body(config: &RequestConfig) -> Result<Option<Bytes>> {
    if !config.has_body() {
        return Ok(None);
    }
    let Some(body) = &config.body else {
        return Ok(None);
    };

    if config.form_urlencoded {
        return form_encode(body).map(|form| Some(Bytes::from(form)));
    }
    serde_json::to_vec(body)
        .map(|json| Some(Bytes::from(json)))
        .map_err(|e| Error::serialization(format!("request body: {e}")))
}

/// Flatten an object's top-level fields into form text.
///
/// Scalars are written as text, arrays repeat the key per element and nulls
/// are omitted. Nested objects cannot be represented.
fn form_encode(body: &Value) -> Result<String> {
    let Value::Object(fields) = body else {
        return Err(Error::Config(
            "form-urlencoded body must be an object".into(),
        ));
    };

    let mut form = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in fields {
        match value {
            Value::Array(items) => {
                for item in items {
                    if let Some(text) = form_scalar(key, item)? {
                        form.append_pair(key, &text);
                    }
                }
            }
            other => {
                if let Some(text) = form_scalar(key, other)? {
                    form.append_pair(key, &text);
                }
            }
        }
    }
    Ok(form.finish())
}

fn form_scalar(key: &str, value: &Value) -> Result<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Array(_) | Value::Object(_) => Err(Error::Config(format!(
            "form field {key:?} is nested and cannot be form-encoded"
        ))),
    }
}

/// Best-effort decode; failure is logged and yields no body.
fn decode_error_body(response: &ResponseSnapshot) -> Option<Value> {
    match serde_json::from_slice(&response.body) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(status = %response.status, error = %e, "failed to decode error body");
            None
        }
    }
}
