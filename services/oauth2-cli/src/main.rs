//! OAuth2 token CLI
//!
//! Operator tool over the credential library:
//! 1. `authorize <api>` runs the interactive authorization flow
//! 2. `validate <api>` validates the stored token, refreshing when needed
//! 3. `request <api> <METHOD> <url>` sends an authenticated request

mod config;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use oauth2_http::{AuthenticatedClient, RequestConfig};
use oauth2_token::{
    Authorizer, CredentialClient, FileTokenStore, RefreshLock, TokenStore,
    build_authorization_url, new_refresh_lock,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

const USAGE: &str = "usage: oauth2-cli [--config <path>] <command>

commands:
  authorize <api>
  validate <api>
  request <api> <METHOD> <url> [--skip-token] [--body <json>]";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Authorize {
        api: String,
    },
    Validate {
        api: String,
    },
    Request {
        api: String,
        method: String,
        url: String,
        skip_token: bool,
        body: Option<String>,
    },
}

impl Command {
    fn api(&self) -> &str {
        match self {
            Command::Authorize { api } | Command::Validate { api } | Command::Request { api, .. } => {
                api
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Cli {
    config: Option<String>,
    command: Command,
}

/// Parse arguments after the program name.
fn parse_args(args: &[String]) -> Result<Cli> {
    let mut config = None;
    let mut skip_token = false;
    let mut body = None;
    let mut positional = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                config = Some(iter.next().context("--config needs a path")?.clone());
            }
            "--body" => {
                body = Some(iter.next().context("--body needs a JSON value")?.clone());
            }
            "--skip-token" => skip_token = true,
            flag if flag.starts_with("--") => bail!("unknown flag {flag}\n{USAGE}"),
            _ => positional.push(arg.clone()),
        }
    }

    let command = match positional.as_slice() {
        [cmd, api] if cmd == "authorize" => Command::Authorize { api: api.clone() },
        [cmd, api] if cmd == "validate" => Command::Validate { api: api.clone() },
        [cmd, api, method, url] if cmd == "request" => Command::Request {
            api: api.clone(),
            method: method.to_ascii_uppercase(),
            url: url.clone(),
            skip_token,
            body,
        },
        _ => bail!("{USAGE}"),
    };
    Ok(Cli { config, command })
}

/// Build one client per configured API, sharing the refresh lock when asked.
fn build_clients(
    config: &Config,
    store: Arc<dyn TokenStore>,
    authorizer: Arc<dyn Authorizer>,
    http: reqwest::Client,
) -> Result<HashMap<String, Arc<CredentialClient>>> {
    let shared: Option<RefreshLock> = config.shared_refresh_lock.then(new_refresh_lock);
    let mut clients = HashMap::new();
    for api in &config.apis {
        let mut builder = CredentialClient::builder(api.client_config()?, store.clone())
            .authorizer(authorizer.clone())
            .http_client(http.clone());
        if let Some(ref lock) = shared {
            builder = builder.refresh_lock(lock.clone());
        }
        clients.insert(api.name.clone(), Arc::new(builder.build()));
    }
    Ok(clients)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries command output
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_args(&args)?;

    let config_path = Config::resolve_path(cli.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        apis = config.apis.len(),
        store = %config.store.path.display(),
        shared_refresh_lock = config.shared_refresh_lock,
        "configuration loaded"
    );

    let store = FileTokenStore::open(config.store.path.clone())
        .await
        .with_context(|| format!("failed to open token store {}", config.store.path.display()))?;
    let store: Arc<dyn TokenStore> = Arc::new(store);
    let authorizer: Arc<dyn Authorizer> = Arc::new(config.authorizer());
    let http = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()
        .context("failed to build HTTP client")?;

    let clients = build_clients(&config, store, authorizer.clone(), http.clone())?;
    let api = cli.command.api();
    let client = clients
        .get(api)
        .with_context(|| format!("api {api} is not configured"))?
        .clone();

    match cli.command {
        Command::Authorize { .. } => {
            let url = build_authorization_url(client.config());
            let code = authorizer
                .authorize(&url)
                .await
                .context("interactive authorization failed")?;
            let token = client
                .authorize_with_code(&code)
                .await
                .context("authorization code exchange failed")?;
            println!("{}", serde_json::to_string_pretty(&token.summary())?);
        }
        Command::Validate { .. } => {
            client
                .load_from_store()
                .await
                .context("failed to load stored token")?;
            let token = client
                .validate_token()
                .await
                .context("token validation failed")?;
            println!("{}", serde_json::to_string_pretty(&token.summary())?);
        }
        Command::Request {
            method,
            url,
            skip_token,
            body,
            ..
        } => {
            let method = reqwest::Method::from_bytes(method.as_bytes())
                .with_context(|| format!("invalid method {method}"))?;
            let mut request = RequestConfig::new(url).decode_error_body();
            if skip_token {
                request = request.skip_access_token();
            }
            if let Some(body) = body {
                let body: serde_json::Value =
                    serde_json::from_str(&body).context("--body is not valid JSON")?;
                request = request.body(&body)?;
            }

            client
                .load_from_store()
                .await
                .context("failed to load stored token")?;
            let pipeline = AuthenticatedClient::new(client)
                .with_http_client(http)
                .with_retry_policy(config.retry_policy())
                .with_timeout(config.request_timeout());

            match pipeline.http(method, request).await {
                Ok(response) => println!("{}", response.response().text()),
                Err(oauth2_http::Error::ServerStatus(e)) => {
                    warn!(status = %e.status(), "request failed");
                    println!("{}", e.response.text());
                    bail!("{e}");
                }
                Err(e) => return Err(e).context("request failed"),
            }
        }
    }

    Ok(())
}
