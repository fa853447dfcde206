//! OAuth CLI
//!
//! Command-line front end for `oauth-client`:
//! - `login`: reuse the stored credential or run the browser login
//! - `logout`: revoke and forget the stored credential
//! - `status`: show what is stored
//! - `header`: print the Authorization header for scripts

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use oauth_client::{
    AuthHeaders, AuthorizationFlow, ClientConfig, Error, TokenLifecycle, TokenStore,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[derive(Debug, Parser)]
#[command(name = "oauth-cli", version, about = "Log in to an OAuth2 service from the command line")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Log in, reusing the stored credential when it is still valid
    Login {
        /// Paste the authorization code instead of using a local redirect
        #[arg(long)]
        manual: bool,
        /// Seconds to wait for the browser redirect
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Revoke the access token and delete the stored credential
    Logout,
    /// Show the stored credential
    Status,
    /// Print the Authorization header for the stored credential
    Header,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config_path = Config::resolve_path(cli.config.as_deref());
    debug!(path = %config_path.display(), "loading configuration");
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    let client = config
        .client_config()
        .context("invalid [client] configuration")?;

    let store = match &config.storage.dir {
        Some(dir) => TokenStore::new(dir),
        None => TokenStore::with_default_root().context("locating token storage")?,
    };
    info!(
        host = client.host(),
        client_id = client.client_id(),
        store = %store.root().display(),
        "configuration loaded"
    );

    let http = reqwest::Client::new();
    let lifecycle = TokenLifecycle::new(store, http.clone());

    match cli.command {
        Command::Login {
            manual,
            timeout_secs,
        } => {
            if let Some(0) = timeout_secs {
                bail!("--timeout-secs must be greater than 0");
            }
            if restore_for_login(&lifecycle, &client).await?.is_some() {
                println!("Already logged in.");
                return Ok(());
            }
            let flow = AuthorizationFlow::new(http);
            let mode = config.redirect_mode(manual, timeout_secs);
            lifecycle
                .login(&client, &flow, mode)
                .await
                .context("login failed")?;
            println!("Success!");
        }
        Command::Logout => {
            lifecycle.logout(&client).await.context("logout failed")?;
            println!("Logged out.");
        }
        Command::Status => print_status(&lifecycle, &client).await?,
        Command::Header => {
            let headers = restore(&lifecycle, &client)
                .await
                .context("restoring stored credential")?;
            let Some(headers) = headers else {
                bail!("not logged in; run `oauth-cli login` first");
            };
            for (name, value) in &headers {
                println!("{name}: {value}");
            }
        }
    }

    Ok(())
}

/// Restore, treating an unreadable token file as logged out.
async fn restore(
    lifecycle: &TokenLifecycle,
    client: &ClientConfig,
) -> oauth_client::Result<Option<AuthHeaders>> {
    match lifecycle.restore(client).await {
        Err(Error::CorruptTokenFile { path, reason }) => {
            warn!(path = %path.display(), %reason, "ignoring unreadable token file");
            Ok(None)
        }
        other => other,
    }
}

/// Like `restore`, but a failed refresh just means logging in again.
async fn restore_for_login(
    lifecycle: &TokenLifecycle,
    client: &ClientConfig,
) -> Result<Option<AuthHeaders>> {
    match restore(lifecycle, client).await {
        Err(Error::RefreshFailed(reason)) => {
            warn!(%reason, "stored credential could not be refreshed, logging in again");
            Ok(None)
        }
        other => other.context("restoring stored credential"),
    }
}

async fn print_status(lifecycle: &TokenLifecycle, client: &ClientConfig) -> Result<()> {
    let credential = match lifecycle.current(client).await {
        Ok(credential) => credential,
        Err(Error::CorruptTokenFile { path, reason }) => {
            println!("Token file {} is unreadable: {reason}", path.display());
            return Ok(());
        }
        Err(e) => return Err(e).context("reading stored credential"),
    };

    let Some(credential) = credential else {
        println!("Not logged in to {}.", client.host());
        return Ok(());
    };

    let now = oauth_client::unix_now();

    println!("Logged in to {} (client {}).", client.host(), client.client_id());
    println!("  token type:  {}", credential.token_type);
    match credential.expires_at {
        Some(at) if credential.is_expired(now) => println!("  expires:     expired (at {at})"),
        Some(at) => println!("  expires:     in {}s (at {at})", at.saturating_sub(now)),
        None => println!("  expires:     never"),
    }
    println!("  refreshable: {}", if credential.can_refresh() { "yes" } else { "no" });
    if credential.scope.is_empty() {
        println!("  scope:       (none)");
    } else {
        println!("  scope:       {}", credential.scope);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_login_flags() {
        let cli = Cli::parse_from([
            "oauth-cli",
            "--config",
            "/etc/oauth.toml",
            "login",
            "--manual",
            "--timeout-secs",
            "30",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/oauth.toml")));
        assert!(!cli.log_json);
        match cli.command {
            Command::Login {
                manual,
                timeout_secs,
            } => {
                assert!(manual);
                assert_eq!(timeout_secs, Some(30));
            }
            other => panic!("expected login, got {other:?}"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["oauth-cli", "header", "--log-json"]);
        assert!(cli.log_json);
        assert!(matches!(cli.command, Command::Header));
    }
}
