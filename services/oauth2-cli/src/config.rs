//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Client secrets are loaded from `OAUTH2_<API>_CLIENT_SECRET` or
//! `client_secret_file`, never stored in the TOML directly.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Secret;
use oauth2_http::RetryPolicy;
use oauth2_token::{ClientConfig, DEFAULT_CALLBACK_PATH, LocalRedirectAuthorizer};
use serde::Deserialize;
use url::Url;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Serialize refreshes across every configured API
    #[serde(default)]
    pub shared_refresh_lock: bool,
    pub store: StoreConfig,
    #[serde(default)]
    pub callback: CallbackConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    pub apis: Vec<ApiConfig>,
}

/// Token store settings
#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    pub path: PathBuf,
}

/// Local redirect endpoint for interactive authorization
#[derive(Debug, Deserialize)]
pub struct CallbackConfig {
    #[serde(default = "default_callback_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default = "default_callback_path")]
    pub path: String,
    /// Give up waiting for the operator after this many seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Where to send the operator's browser once the code has arrived
    #[serde(default)]
    pub success_redirect: Option<String>,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_callback_addr(),
            path: default_callback_path(),
            timeout_secs: None,
            success_redirect: None,
        }
    }
}

/// Request pipeline retry and timeout settings
#[derive(Debug, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_retry_statuses")]
    pub retry_statuses: Vec<u16>,
    /// Per-attempt timeout
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            delay_ms: default_delay_ms(),
            retry_statuses: default_retry_statuses(),
            timeout_secs: default_timeout(),
        }
    }
}

/// One external API integration
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    pub name: String,
    pub client_id: String,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    /// Path to a file containing the client secret
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    #[serde(default)]
    pub scope: String,
    pub redirect_url: String,
    pub authorize_url: String,
    pub token_url: String,
    #[serde(default = "default_token_method")]
    pub token_method: String,
    /// Raise alerts when re-authorization is needed
    #[serde(default)]
    pub live: bool,
}

fn default_callback_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_callback_path() -> String {
    DEFAULT_CALLBACK_PATH.to_string()
}

fn default_max_retries() -> u32 {
    2
}

fn default_delay_ms() -> u64 {
    100
}

fn default_retry_statuses() -> Vec<u16> {
    oauth2_http::DEFAULT_RETRY_STATUSES.to_vec()
}

fn default_timeout() -> u64 {
    30
}

fn default_token_method() -> String {
    "POST".to_string()
}

/// Env var holding the client secret for `api`, e.g. `OAUTH2_EXACT_ONLINE_CLIENT_SECRET`.
pub fn secret_env_var(api: &str) -> String {
    let name: String = api
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("OAUTH2_{name}_CLIENT_SECRET")
}

fn parse_url(api: &str, field: &str, value: &str) -> common::Result<Url> {
    Url::parse(value).map_err(|e| {
        common::Error::Config(format!("api {api}: {field} is not a valid URL ({value}): {e}"))
    })
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Client secret resolution order per API:
    /// 1. OAUTH2_<API>_CLIENT_SECRET env var
    /// 2. client_secret_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if config.apis.is_empty() {
            return Err(common::Error::Config(
                "at least one [[apis]] entry is required".into(),
            ));
        }

        if !config.callback.path.starts_with('/') {
            return Err(common::Error::Config(format!(
                "callback path must start with /, got: {}",
                config.callback.path
            )));
        }

        if config.retry.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        let mut names = HashSet::new();
        for api in &mut config.apis {
            if api.name.trim().is_empty() {
                return Err(common::Error::Config("api name must not be empty".into()));
            }
            if !names.insert(api.name.clone()) {
                return Err(common::Error::Config(format!(
                    "duplicate api name: {}",
                    api.name
                )));
            }
            if api.client_id.trim().is_empty() {
                return Err(common::Error::Config(format!(
                    "api {}: client_id must not be empty",
                    api.name
                )));
            }
            parse_url(&api.name, "authorize_url", &api.authorize_url)?;
            parse_url(&api.name, "token_url", &api.token_url)?;
            reqwest::Method::from_bytes(api.token_method.as_bytes()).map_err(|_| {
                common::Error::Config(format!(
                    "api {}: invalid token_method {}",
                    api.name, api.token_method
                ))
            })?;

            let env_var = secret_env_var(&api.name);
            if let Ok(secret) = std::env::var(&env_var) {
                api.client_secret = Some(Secret::new(secret));
            } else if let Some(ref secret_file) = api.client_secret_file {
                let secret = std::fs::read_to_string(secret_file).map_err(|e| {
                    common::Error::Config(format!(
                        "failed to read client_secret_file {}: {e}",
                        secret_file.display()
                    ))
                })?;
                let secret = secret.trim().to_owned();
                if !secret.is_empty() {
                    api.client_secret = Some(Secret::new(secret));
                }
            }
            if api.client_secret.as_ref().is_none_or(|s| s.is_blank()) {
                return Err(common::Error::MissingSecret {
                    api: api.name.clone(),
                    env_var,
                });
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("oauth2-tokens.toml")
    }

    pub fn api(&self, name: &str) -> Option<&ApiConfig> {
        self.apis.iter().find(|api| api.name == name)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            delay: Duration::from_millis(self.retry.delay_ms),
            retry_statuses: self.retry.retry_statuses.clone(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.retry.timeout_secs)
    }

    pub fn authorizer(&self) -> LocalRedirectAuthorizer {
        let mut authorizer =
            LocalRedirectAuthorizer::new(self.callback.listen_addr, self.callback.path.clone());
        if let Some(secs) = self.callback.timeout_secs {
            authorizer = authorizer.with_timeout(Duration::from_secs(secs));
        }
        if let Some(ref location) = self.callback.success_redirect {
            authorizer = authorizer.with_success_redirect(location.clone());
        }
        authorizer
    }
}

impl ApiConfig {
    /// Client configuration for the token library; `load` has validated it.
    pub fn client_config(&self) -> common::Result<ClientConfig> {
        let client_secret = self.client_secret.clone().ok_or_else(|| {
            common::Error::MissingSecret {
                api: self.name.clone(),
                env_var: secret_env_var(&self.name),
            }
        })?;
        let token_method = reqwest::Method::from_bytes(self.token_method.as_bytes())
            .map_err(|_| {
                common::Error::Config(format!(
                    "api {}: invalid token_method {}",
                    self.name, self.token_method
                ))
            })?;
        Ok(ClientConfig {
            api_name: self.name.clone(),
            client_id: self.client_id.clone(),
            client_secret,
            scope: self.scope.clone(),
            redirect_url: self.redirect_url.clone(),
            authorize_url: parse_url(&self.name, "authorize_url", &self.authorize_url)?,
            token_url: parse_url(&self.name, "token_url", &self.token_url)?,
            token_method,
            live: self.live,
        })
    }
}
