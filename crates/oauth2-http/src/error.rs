//! Error types for authenticated requests
//!
//! Every error raised after the request has been assembled carries a
//! snapshot of it, and of the response when one arrived, so callers can log
//! or inspect exactly what went over the wire. Snapshots never contain the
//! bearer token.

use std::borrow::Cow;
use std::fmt;

use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;

/// What was sent, with the Authorization value redacted.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
}

impl RequestSnapshot {
    pub(crate) fn new(method: &Method, url: &url::Url, headers: &HeaderMap) -> Self {
        let mut headers = headers.clone();
        if headers.contains_key(AUTHORIZATION) {
            headers.insert(AUTHORIZATION, HeaderValue::from_static("[REDACTED]"));
        }
        Self {
            method: method.clone(),
            url: url.to_string(),
            headers,
        }
    }
}

/// What came back.
#[derive(Debug, Clone)]
pub struct ResponseSnapshot {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ResponseSnapshot {
    /// Body as text, lossy.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Response with a status outside 200..=299.
#[derive(Debug)]
pub struct ServerStatusError {
    pub request: RequestSnapshot,
    pub response: ResponseSnapshot,
    /// Error body, when decoding was requested and succeeded
    pub error_body: Option<serde_json::Value>,
}

impl ServerStatusError {
    pub fn status(&self) -> StatusCode {
        self.response.status
    }

    /// Decoded error body as a caller-supplied model.
    pub fn error_model<E: DeserializeOwned>(&self) -> Option<E> {
        self.error_body
            .clone()
            .and_then(|value| serde_json::from_value(value).ok())
    }
}

impl fmt::Display for ServerStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "server returned {} for {} {}",
            self.response.status, self.request.method, self.request.url
        )
    }
}

/// Errors from the authenticated request pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid request config: {0}")]
    Config(String),

    #[error("serialization failed: {message}")]
    Serialization {
        message: String,
        request: Option<Box<RequestSnapshot>>,
        response: Option<Box<ResponseSnapshot>>,
    },

    #[error("transport error after {attempts} attempt(s): {message}")]
    Transport {
        message: String,
        attempts: u32,
        request: Box<RequestSnapshot>,
    },

    #[error("{0}")]
    ServerStatus(Box<ServerStatusError>),

    #[error("token unavailable: {message}")]
    TokenUnavailable {
        message: String,
        request: Box<RequestSnapshot>,
    },

    #[error("token validation failed: {source}")]
    Token {
        #[source]
        source: oauth2_token::Error,
        request: Box<RequestSnapshot>,
    },
}

impl Error {
    pub(crate) fn serialization(message: impl Into<String>) -> Self {
        Error::Serialization {
            message: message.into(),
            request: None,
            response: None,
        }
    }

    /// The request this error belongs to, when one had been assembled.
    pub fn request(&self) -> Option<&RequestSnapshot> {
        match self {
            Error::Config(_) => None,
            Error::Serialization { request, .. } => request.as_deref(),
            Error::Transport { request, .. }
            | Error::TokenUnavailable { request, .. }
            | Error::Token { request, .. } => Some(request),
            Error::ServerStatus(e) => Some(&e.request),
        }
    }

    /// The response this error belongs to, when one arrived.
    pub fn response(&self) -> Option<&ResponseSnapshot> {
        match self {
            Error::Serialization { response, .. } => response.as_deref(),
            Error::ServerStatus(e) => Some(&e.response),
            _ => None,
        }
    }

    /// HTTP status of the response, when one arrived.
    pub fn status(&self) -> Option<StatusCode> {
        self.response().map(|r| r.status)
    }
}

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;
