//! Protocol constants
//!
//! Endpoint paths are relative to the configured authorization server base
//! URL. The trailing slashes on the token and revocation paths are part of
//! the server's routes.

use std::time::Duration;

/// Authorization endpoint path (browser consent page)
pub const AUTHORIZE_PATH: &str = "/authorize";

/// Token endpoint path for code exchange and refresh
pub const TOKEN_PATH: &str = "/token/";

/// Revocation endpoint path used on logout
pub const REVOKE_PATH: &str = "/revoke_token/";

/// Out-of-band redirect URI for the manual code entry variant. The server
/// shows the code in the browser instead of redirecting.
pub const OOB_REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";

/// PKCE challenge method. Plain challenges are never sent.
pub const CODE_CHALLENGE_METHOD: &str = "S256";

/// Token type assumed when the token endpoint omits `token_type`.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// A token expiring within this window is treated as already expired, so a
/// request made right after `restore` does not race the server's clock.
pub const EXPIRY_LEEWAY_SECS: u64 = 60;

/// How long the loopback variant waits for the browser redirect by default.
pub const DEFAULT_REDIRECT_TIMEOUT: Duration = Duration::from_secs(300);

/// Body of the page served to the browser by the loopback listener.
pub const REDIRECT_SUCCESS_BODY: &str = "You may close this tab and return to your application.";

/// File name of the persisted credential inside its namespaced directory.
pub const TOKEN_FILE_NAME: &str = "token.json";
