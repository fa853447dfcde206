//! Configuration types and loading
//!
//! Config file precedence: `--config` flag > OAUTH_CLI_CONFIG env var >
//! `oauth-cli.toml` in the working directory. After parsing, OAUTH_BASE_URL
//! and OAUTH_CLIENT_ID override the file's values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use oauth_client::{ClientConfig, RedirectMode};
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub client: ClientSection,
    #[serde(default)]
    pub login: LoginSection,
    #[serde(default)]
    pub storage: StorageSection,
}

/// The OAuth client this program logs in as
#[derive(Debug, Deserialize)]
pub struct ClientSection {
    pub app_id: String,
    pub base_url: String,
    pub client_id: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Fixed redirect URI registered with the server
    #[serde(default)]
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginMode {
    #[default]
    Loopback,
    Manual,
}

#[derive(Debug, Deserialize)]
pub struct LoginSection {
    #[serde(default)]
    pub mode: LoginMode,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for LoginSection {
    fn default() -> Self {
        Self {
            mode: LoginMode::default(),
            timeout_secs: default_timeout(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StorageSection {
    /// Root directory for token files; defaults to the user data directory
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_timeout() -> u64 {
    300
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| common::Error::io(path, e))?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(base_url) = std::env::var("OAUTH_BASE_URL") {
            config.client.base_url = base_url;
        }
        if let Ok(client_id) = std::env::var("OAUTH_CLIENT_ID") {
            config.client.client_id = client_id;
        }

        if !config.client.base_url.starts_with("http://")
            && !config.client.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                config.client.base_url
            )));
        }

        if config.login.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or OAUTH_CLI_CONFIG env var.
    pub fn resolve_path(cli_path: Option<&Path>) -> PathBuf {
        if let Some(p) = cli_path {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("OAUTH_CLI_CONFIG") {
            return PathBuf::from(p);
        }
        PathBuf::from("oauth-cli.toml")
    }

    /// Validated client configuration for the library.
    pub fn client_config(&self) -> oauth_client::Result<ClientConfig> {
        let client = &self.client;
        let config = ClientConfig::new(
            client.app_id.as_str(),
            &client.base_url,
            client.client_id.as_str(),
            client.scopes.iter().map(String::as_str),
        )?;
        match &client.redirect_uri {
            Some(uri) => config.with_redirect_uri(uri.as_str()),
            None => Ok(config),
        }
    }

    /// Redirect mode, with command-line overrides applied.
    pub fn redirect_mode(&self, force_manual: bool, timeout_secs: Option<u64>) -> RedirectMode {
        if force_manual || self.login.mode == LoginMode::Manual {
            return RedirectMode::Manual;
        }
        RedirectMode::Loopback {
            timeout: Duration::from_secs(timeout_secs.unwrap_or(self.login.timeout_secs)),
        }
    }
}
