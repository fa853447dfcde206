//! OAuth2 authorization-code client with PKCE for command-line programs
//!
//! Logs a user in through their browser, persists the resulting credential
//! per (application, host, client id), and turns it into request headers on
//! later runs. Usable on its own; the `oauth-cli` binary is a thin wrapper.
//!
//! Credential flow:
//! 1. `TokenLifecycle::restore()` loads the stored credential, refreshing it
//!    with `token::refresh_token()` if it has expired
//! 2. If that yields nothing, `TokenLifecycle::login()` runs an
//!    `AuthorizationFlow`: PKCE pair and state token, authorization URL opened
//!    in the browser, redirect captured by a `LoopbackListener` (or the code
//!    pasted by the user), code exchanged via `token::exchange_code()`
//! 3. The credential is written atomically by `TokenStore::save()`
//! 4. `TokenLifecycle::logout()` revokes the access token and deletes the file

pub mod browser;
pub mod config;
pub mod constants;
pub mod credential;
pub mod error;
pub mod flow;
pub mod lifecycle;
pub mod pkce;
pub mod redirect;
pub mod store;
pub mod token;

#[cfg(test)]
mod test_support;

pub use browser::{BrowserLauncher, CodePrompt, StdinPrompt, SystemBrowser};
pub use config::ClientConfig;
pub use credential::{AuthHeaders, Credential, ScopeSet, unix_now};
pub use error::{Error, Result};
pub use flow::{AuthorizationFlow, FlowPhase, RedirectMode, build_authorization_url};
pub use lifecycle::TokenLifecycle;
pub use pkce::{PkceChallenge, compute_challenge, generate_state};
pub use redirect::{AuthorizationResult, LoopbackListener, listen_once, reserve_port};
pub use store::{StoredLocation, TokenStore};
pub use token::TokenResponse;
