//! Client configuration
//!
//! `ClientConfig` is built once, validated, and then passed by reference into
//! every flow and lifecycle operation. Nothing in this crate keeps a global
//! or hidden copy of it.

use std::collections::BTreeSet;

use url::Url;

use crate::constants::{AUTHORIZE_PATH, REVOKE_PATH, TOKEN_PATH};
use crate::error::{Error, Result};

/// Immutable description of the public OAuth client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    base_url: String,
    host: String,
    client_id: String,
    scopes: Vec<String>,
    redirect_uri: Option<String>,
    app_id: String,
}

impl ClientConfig {
    /// Validate and build a configuration.
    ///
    /// Trailing slashes on `base_url` are stripped. Scopes keep their first
    /// occurrence order (used when building the authorization URL) with
    /// duplicates removed.
    pub fn new(
        app_id: impl Into<String>,
        base_url: &str,
        client_id: impl Into<String>,
        scopes: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self> {
        let app_id = app_id.into();
        if app_id.trim().is_empty() {
            return Err(Error::InvalidConfig("app_id must not be empty".into()));
        }

        let base_url = base_url.trim().trim_end_matches('/').to_string();
        let parsed = Url::parse(&base_url)
            .map_err(|e| Error::InvalidConfig(format!("base_url {base_url:?}: {e}")))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(Error::InvalidConfig(format!(
                "base_url must start with http:// or https://, got: {base_url}"
            )));
        }
        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::InvalidConfig(format!("base_url has no host: {base_url}")))?
            .to_string();

        let client_id = client_id.into();
        if client_id.trim().is_empty() {
            return Err(Error::InvalidConfig("client_id must not be empty".into()));
        }

        let mut seen = BTreeSet::new();
        let mut ordered = Vec::new();
        for scope in scopes {
            let scope = scope.into();
            if scope.is_empty() || scope.chars().any(char::is_whitespace) {
                return Err(Error::InvalidConfig(format!(
                    "scope must be a non-empty token without whitespace, got: {scope:?}"
                )));
            }
            if seen.insert(scope.clone()) {
                ordered.push(scope);
            }
        }

        Ok(Self {
            base_url,
            host,
            client_id,
            scopes: ordered,
            redirect_uri: None,
            app_id,
        })
    }

    /// Use a fixed redirect URI instead of the loopback URL or the
    /// out-of-band sentinel.
    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Result<Self> {
        let redirect_uri = redirect_uri.into();
        Url::parse(&redirect_uri)
            .map_err(|e| Error::InvalidConfig(format!("redirect_uri {redirect_uri:?}: {e}")))?;
        self.redirect_uri = Some(redirect_uri);
        Ok(self)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Hostname of the authorization server, used to namespace stored tokens.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn redirect_uri(&self) -> Option<&str> {
        self.redirect_uri.as_deref()
    }

    /// Requested scopes in configuration order.
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Requested scopes as a set, for order-insensitive comparison.
    pub fn scope_set(&self) -> BTreeSet<String> {
        self.scopes.iter().cloned().collect()
    }

    /// Space-delimited scope parameter value.
    pub fn scope_param(&self) -> String {
        self.scopes.join(" ")
    }

    pub fn authorize_endpoint(&self) -> String {
        format!("{}{AUTHORIZE_PATH}", self.base_url)
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}{TOKEN_PATH}", self.base_url)
    }

    pub fn revocation_endpoint(&self) -> String {
        format!("{}{REVOKE_PATH}", self.base_url)
    }
}
