//! Authorization code flow with PKCE
//!
//! One login attempt walks through these phases:
//!
//! ```text
//! Idle -> BuildingRequest -> AwaitingUserRedirect -> ExchangingCode -> Complete
//!                                                                    \-> Failed
//! ```
//!
//! Two ways to get the authorization result back:
//! - loopback: a one-shot listener on 127.0.0.1 receives the browser redirect,
//!   bounded by a timeout, and the returned `state` must match ours.
//! - manual: the server shows the code (out-of-band redirect URI) and the user
//!   pastes it. There is no state to check and no timeout; the prompt blocks
//!   until the user answers.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;

use crate::browser::{BrowserLauncher, CodePrompt, StdinPrompt, SystemBrowser};
use crate::config::ClientConfig;
use crate::constants::{DEFAULT_REDIRECT_TIMEOUT, OOB_REDIRECT_URI};
use crate::credential::{Credential, unix_now};
use crate::error::{Error, Result};
use crate::pkce::{PkceChallenge, generate_state};
use crate::redirect::LoopbackListener;
use crate::token;

/// How the authorization result reaches us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectMode {
    /// Capture the redirect on a loopback listener, waiting at most `timeout`.
    Loopback { timeout: Duration },
    /// The user pastes the code shown by the server.
    Manual,
}

impl Default for RedirectMode {
    fn default() -> Self {
        Self::Loopback {
            timeout: DEFAULT_REDIRECT_TIMEOUT,
        }
    }
}

/// Phase of a login attempt, reported in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowPhase {
    Idle,
    BuildingRequest,
    AwaitingUserRedirect,
    ExchangingCode,
    Complete,
    Failed,
}

impl fmt::Display for FlowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FlowPhase::Idle => "idle",
            FlowPhase::BuildingRequest => "building_request",
            FlowPhase::AwaitingUserRedirect => "awaiting_user_redirect",
            FlowPhase::ExchangingCode => "exchanging_code",
            FlowPhase::Complete => "complete",
            FlowPhase::Failed => "failed",
        };
        f.write_str(label)
    }
}

fn advance(phase: &mut FlowPhase, next: FlowPhase) {
    debug!(from = %phase, to = %next, "login phase");
    *phase = next;
}

/// Drives login attempts. Holds only collaborators; all per-attempt state
/// (verifier, state token, listener) lives inside `login`.
#[derive(Clone)]
pub struct AuthorizationFlow {
    http: reqwest::Client,
    browser: Arc<dyn BrowserLauncher>,
    prompt: Arc<dyn CodePrompt>,
}

impl AuthorizationFlow {
    /// Flow using the system browser and a stdin prompt.
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            browser: Arc::new(SystemBrowser),
            prompt: Arc::new(StdinPrompt),
        }
    }

    pub fn with_browser(mut self, browser: impl BrowserLauncher + 'static) -> Self {
        self.browser = Arc::new(browser);
        self
    }

    pub fn with_prompt(mut self, prompt: impl CodePrompt + 'static) -> Self {
        self.prompt = Arc::new(prompt);
        self
    }

    /// Run one login attempt and return the new credential.
    ///
    /// Nothing is persisted here; see `TokenLifecycle::login`.
    pub async fn login(&self, config: &ClientConfig, mode: RedirectMode) -> Result<Credential> {
        let mut phase = FlowPhase::Idle;
        match self.run(config, mode, &mut phase).await {
            Ok(credential) => {
                advance(&mut phase, FlowPhase::Complete);
                info!(
                    host = config.host(),
                    scope = %credential.scope,
                    refreshable = credential.can_refresh(),
                    "login complete"
                );
                Ok(credential)
            }
            Err(e) => {
                warn!(phase = %phase, error = %e, "login failed");
                advance(&mut phase, FlowPhase::Failed);
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        config: &ClientConfig,
        mode: RedirectMode,
        phase: &mut FlowPhase,
    ) -> Result<Credential> {
        advance(phase, FlowPhase::BuildingRequest);
        let pkce = PkceChallenge::generate();
        let state = generate_state();

        let listener = match mode {
            RedirectMode::Loopback { .. } => {
                Some(LoopbackListener::bind(loopback_port(config)?).await?)
            }
            RedirectMode::Manual => None,
        };
        let redirect_uri = match (&listener, config.redirect_uri()) {
            (_, Some(fixed)) => fixed.to_string(),
            (Some(listener), None) => listener.redirect_uri(),
            (None, None) => OOB_REDIRECT_URI.to_string(),
        };
        let url = build_authorization_url(config, &pkce, &state, &redirect_uri)?;

        advance(phase, FlowPhase::AwaitingUserRedirect);
        let code = match (listener, mode) {
            (Some(listener), RedirectMode::Loopback { timeout }) => {
                // Listen before the browser can possibly redirect
                let pending = listener.spawn();
                debug!(port = pending.port(), "waiting for authorization redirect");
                self.launch_browser(&url);
                let result = pending.wait(timeout).await?;
                verify_state(&state, result.state.as_deref())?;
                result.code
            }
            _ => {
                self.launch_browser(&url);
                self.prompt_for_code(&url).await?
            }
        };

        advance(phase, FlowPhase::ExchangingCode);
        let response =
            token::exchange_code(&self.http, config, &code, &redirect_uri, pkce.verifier())
                .await?;
        Ok(Credential::from_token_response(
            response,
            config.scopes().iter().cloned().collect(),
            unix_now(),
        ))
    }

    fn launch_browser(&self, url: &str) {
        match self.browser.open(url) {
            Ok(()) => debug!("browser launched"),
            Err(e) => warn!(%url, error = %e, "could not open a browser, open the URL manually"),
        }
    }

    async fn prompt_for_code(&self, url: &str) -> Result<String> {
        let prompt = self.prompt.clone();
        let url = url.to_string();
        let code = tokio::task::spawn_blocking(move || prompt.read_code(&url))
            .await
            .map_err(|e| Error::Io(format!("code prompt task failed: {e}")))?
            .map_err(|e| Error::Io(format!("reading authorization code: {e}")))?;

        let code = code.trim();
        if code.is_empty() {
            return Err(Error::MalformedRedirect(
                "no authorization code entered".into(),
            ));
        }
        Ok(code.to_string())
    }
}

/// Port the loopback listener binds: the one in a fixed loopback redirect
/// URI, otherwise 0 (OS-assigned).
fn loopback_port(config: &ClientConfig) -> Result<u16> {
    let Some(fixed) = config.redirect_uri() else {
        return Ok(0);
    };
    let url = Url::parse(fixed)
        .map_err(|e| Error::InvalidConfig(format!("redirect_uri {fixed:?}: {e}")))?;
    let loopback_host = matches!(url.host_str(), Some("127.0.0.1" | "localhost"));
    match (url.scheme(), loopback_host, url.port()) {
        ("http", true, Some(port)) => Ok(port),
        _ => Err(Error::InvalidConfig(format!(
            "redirect_uri {fixed} is not an http loopback URL with an explicit port; \
             use manual code entry for other redirect URIs"
        ))),
    }
}

/// Fail closed unless the redirect echoed exactly the state we sent.
fn verify_state(expected: &str, returned: Option<&str>) -> Result<()> {
    if returned == Some(expected) {
        return Ok(());
    }
    warn!(
        state_present = returned.is_some(),
        "redirect state does not match this login attempt"
    );
    Err(Error::StateMismatch)
}

/// Build the authorization URL for one attempt.
pub fn build_authorization_url(
    config: &ClientConfig,
    pkce: &PkceChallenge,
    state: &str,
    redirect_uri: &str,
) -> Result<String> {
    let mut url = Url::parse(&config.authorize_endpoint())
        .map_err(|e| Error::InvalidConfig(format!("authorization endpoint: {e}")))?;
    url.query_pairs_mut()
        .append_pair("client_id", config.client_id())
        .append_pair("response_type", "code")
        .append_pair("scope", &config.scope_param())
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("code_challenge", pkce.challenge())
        .append_pair("code_challenge_method", pkce.method())
        .append_pair("state", state);
    Ok(url.into())
}
