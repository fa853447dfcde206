//! Error types for the authorization flow and token lifecycle

use std::path::PathBuf;
use std::time::Duration;

/// Errors from OAuth client operations.
///
/// Every variant is surfaced to the caller. The only failure that is logged
/// and swallowed is a revocation error during logout, which never reaches
/// this type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The user or the authorization server declined the request.
    #[error("authorization denied: {error}{}", .description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    AuthorizationDenied {
        error: String,
        description: Option<String>,
    },

    #[error("no authorization redirect received within {}s", .0.as_secs())]
    RedirectTimeout(Duration),

    /// The redirect carried a state value other than the one we generated.
    /// Possible CSRF; the code is never exchanged.
    #[error("authorization state mismatch, refusing to exchange the code")]
    StateMismatch,

    #[error("token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("corrupt token file {}: {reason}", .path.display())]
    CorruptTokenFile { path: PathBuf, reason: String },

    #[error("could not reserve a local port: {0}")]
    PortReservationFailed(String),

    #[error("malformed authorization redirect: {0}")]
    MalformedRedirect(String),

    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for OAuth client operations.
pub type Result<T> = std::result::Result<T, Error>;
