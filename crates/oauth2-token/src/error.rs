//! Error types for token lifecycle operations

/// Errors from token validation, exchange, storage and authorization.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("no usable token after refresh and re-authorization: {0}")]
    TokenUnusable(String),

    #[error("token expired and refresh failed: {0}")]
    TokenExpiredRefreshFailed(#[source] Box<Error>),

    #[error("token endpoint rejected credentials ({status}): {error}{}", suffix(.description))]
    AuthExchangeRejected {
        status: u16,
        error: String,
        description: Option<String>,
    },

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token persistence failed: {0}")]
    Persistence(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("invalid client configuration: {0}")]
    Config(String),

    #[error("interactive authorization failed: {0}")]
    Authorization(String),
}

impl Error {
    /// True when the token endpoint refused the refresh token outright.
    pub fn is_rejected(&self) -> bool {
        match self {
            Error::AuthExchangeRejected { .. } => true,
            Error::TokenExpiredRefreshFailed(inner) => inner.is_rejected(),
            _ => false,
        }
    }
}

fn suffix(description: &Option<String>) -> String {
    description
        .as_deref()
        .map(|d| format!(", {d}"))
        .unwrap_or_default()
}

/// Result alias for token operations.
pub type Result<T> = std::result::Result<T, Error>;
