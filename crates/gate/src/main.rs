// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use authgate::clock::{Clock, SystemClock};
use authgate::config::GatewayConfig;
use authgate::credential::oauth::OAuthClient;
use authgate::executor::ApiRequest;
use authgate::Gateway;

#[derive(Debug, Parser)]
#[command(name = "authgate", version, about = "OAuth2 API gateway with a shared, self-healing credential")]
struct Cli {
    #[command(flatten)]
    config: GatewayConfig,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the stored credential's expiry state as JSON
    Status,
    /// Print the authorization URL to open in a browser
    AuthorizeUrl,
    /// Authorize interactively (or with a code) and store the credential
    Authorize {
        /// Authorization code or full redirect URL; prompts on stdin when omitted
        #[arg(long)]
        code: Option<String>,
    },
    /// Refresh the stored credential now, regardless of expiry
    Refresh,
    /// Issue an authenticated GET and print the response body
    Get {
        /// Path relative to --api-base-url, or an absolute URL
        path: String,
        /// Query parameter as key=value (repeatable)
        #[arg(long = "query", value_parser = parse_key_val)]
        query: Vec<(String, String)>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let validated = match cli.command {
        Command::Status => Ok(()),
        Command::Get { .. } => cli.config.validate_api(),
        _ => cli.config.validate(),
    };
    if let Err(e) = validated {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    init_tracing(&cli.config);
    authgate::executor::transport::ensure_crypto();

    if let Err(e) = run(cli).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(config: &GatewayConfig) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    match config.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.config;
    match cli.command {
        Command::Status => status(&config).await,
        Command::AuthorizeUrl => {
            let oauth = OAuthClient::new(config.oauth_settings(), Arc::new(SystemClock));
            let url = oauth
                .authorize_url()
                .ok_or_else(|| anyhow::anyhow!("--authorize-url is required"))?;
            println!("{url}");
            Ok(())
        }
        Command::Authorize { code } => {
            let gateway = Gateway::from_config(&config)?;
            let bundle = match code {
                Some(input) => {
                    let code = authgate::credential::reauth::extract_code(&input)?;
                    gateway.lifecycle().exchange_code(&code).await.context("code exchange")?
                }
                None => {
                    gateway.gate().operator_reauthorize().await?;
                    gateway
                        .lifecycle()
                        .snapshot()
                        .ok_or_else(|| anyhow::anyhow!("authorization produced no credential"))?
                }
            };
            info!(expires_at = %bundle.expires_at, "authorized");
            println!("authorized, token expires at {}", bundle.expires_at);
            Ok(())
        }
        Command::Refresh => {
            let store = config.build_store();
            let stored = store
                .load()
                .await
                .context("load stored credential")?
                .ok_or_else(|| anyhow::anyhow!("no stored credential, run `authgate authorize`"))?;
            let gateway = Gateway::from_config(&config)?;
            let fresh = gateway
                .lifecycle()
                .force_refresh(&stored.access_token)
                .await
                .context("refresh grant")?;
            println!("refreshed, token expires at {}", fresh.expires_at);
            Ok(())
        }
        Command::Get { path, query } => {
            let gateway = Gateway::from_config(&config)?;
            let mut request = ApiRequest::get(path.clone());
            for (key, value) in query {
                request = request.query(key, value);
            }
            let response =
                gateway.execute(&request, "cli_get").await.with_context(|| format!("GET {path}"))?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&response.body)?;
            if !response.body.ends_with(b"\n") {
                writeln!(stdout)?;
            }
            Ok(())
        }
    }
}

async fn status(config: &GatewayConfig) -> anyhow::Result<()> {
    let store = config.build_store();
    let now = SystemClock.now();
    let report = match store.load().await.context("load stored credential")? {
        Some(bundle) => serde_json::json!({
            "key": store.key(),
            "backends": store.backends(),
            "present": true,
            "token_type": bundle.token_type,
            "scope": bundle.scope,
            "issued_at": bundle.issued_at.to_string(),
            "expires_at": bundle.expires_at.to_string(),
            "expires_in_secs": bundle.expires_in_secs(now),
            "fresh": bundle.is_fresh(now, config.refresh_buffer()),
            "has_refresh_token": bundle.has_refresh_token(),
        }),
        None => serde_json::json!({
            "key": store.key(),
            "backends": store.backends(),
            "present": false,
        }),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s.split_once('=').ok_or_else(|| format!("expected key=value, got `{s}`"))?;
    Ok((key.to_owned(), value.to_owned()))
}
