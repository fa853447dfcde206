//! Token endpoint and revocation endpoint calls
//!
//! Three interactions with the authorization server, all form-encoded POSTs:
//! 1. Authorization code exchange (end of the login flow)
//! 2. Token refresh (on restore, when the access token has expired)
//! 3. Revocation (on logout)
//!
//! This is a public client: no client secret is ever sent.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{Error, Result};

/// Response from the token endpoint for both exchange and refresh.
///
/// `expires_in` is a delta in seconds from the response time; some servers
/// report an absolute `expires_at` instead.
#[derive(Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub expires_at: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Absolute expiry in unix seconds, if the server reported a lifetime.
    pub fn expiry(&self, now: u64) -> Option<u64> {
        self.expires_in
            .map(|secs| now.saturating_add(secs))
            .or(self.expires_at)
    }
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token_type", &self.token_type)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// RFC 6749 section 5.2 error body.
#[derive(Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Render a failed token endpoint response for an error message, preferring
/// the server's `error` / `error_description` over the raw body.
fn describe_failure(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<OAuthErrorBody>(body) {
        Ok(OAuthErrorBody {
            error,
            error_description: Some(description),
        }) => format!("{status}: {error} ({description})"),
        Ok(OAuthErrorBody { error, .. }) => format!("{status}: {error}"),
        Err(_) if body.trim().is_empty() => format!("{status}"),
        Err(_) => format!("{status}: {}", body.trim()),
    }
}

/// Exchange an authorization code for tokens.
///
/// The verifier proves we are the party that sent the matching challenge in
/// the authorization URL.
pub async fn exchange_code(
    client: &reqwest::Client,
    config: &ClientConfig,
    code: &str,
    redirect_uri: &str,
    verifier: &str,
) -> Result<TokenResponse> {
    debug!(endpoint = %config.token_endpoint(), "exchanging authorization code");
    let response = client
        .post(config.token_endpoint())
        .form(&[
            ("grant_type", "authorization_code"),
            ("client_id", config.client_id()),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("code_verifier", verifier),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token exchange request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::TokenExchangeFailed(describe_failure(status, &body)));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchangeFailed(format!("invalid token response: {e}")))
}

/// Obtain a new access token with a refresh token.
///
/// Every failure, transport errors included, is `RefreshFailed`: the caller's
/// only recovery is a fresh login.
pub async fn refresh_token(
    client: &reqwest::Client,
    config: &ClientConfig,
    refresh: &str,
) -> Result<TokenResponse> {
    debug!(endpoint = %config.token_endpoint(), "refreshing access token");
    let response = client
        .post(config.token_endpoint())
        .form(&[
            ("grant_type", "refresh_token"),
            ("client_id", config.client_id()),
            ("refresh_token", refresh),
        ])
        .send()
        .await
        .map_err(|e| Error::RefreshFailed(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::RefreshFailed(describe_failure(status, &body)));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::RefreshFailed(format!("invalid refresh response: {e}")))
}

/// Ask the server to revoke an access token.
pub async fn revoke_token(
    client: &reqwest::Client,
    config: &ClientConfig,
    access_token: &str,
) -> Result<()> {
    debug!(endpoint = %config.revocation_endpoint(), "revoking access token");
    let response = client
        .post(config.revocation_endpoint())
        .form(&[
            ("token", access_token),
            ("token_type_hint", "access_token"),
            ("client_id", config.client_id()),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("revocation request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Http(format!(
            "revocation endpoint returned {}",
            describe_failure(status, &body)
        )));
    }
    Ok(())
}
