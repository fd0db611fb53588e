//! Configuration error types shared by the libraries and the CLI

use thiserror::Error;

/// Configuration and startup errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("missing client secret for api {api}: set {env_var} or client_secret_file")]
    MissingSecret { api: String, env_var: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;
