//! The persisted credential and the headers derived from it
//!
//! `expires_at` is an absolute unix timestamp in seconds, computed when the
//! token response arrives from its `expires_in` delta. `None` means the
//! server never said, and the token is treated as non-expiring.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::{DEFAULT_TOKEN_TYPE, EXPIRY_LEEWAY_SECS};
use crate::token::TokenResponse;

/// Header name to value, ready to attach to API requests.
pub type AuthHeaders = BTreeMap<String, String>;

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Set of OAuth scopes, compared without regard to order.
///
/// Serialized the way OAuth servers report it: one space-delimited string.
/// A JSON list is also accepted when reading.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeSet(BTreeSet<String>);

impl ScopeSet {
    /// Parse a space-delimited scope parameter.
    pub fn from_param(param: &str) -> Self {
        param.split_whitespace().map(str::to_owned).collect()
    }

    pub fn contains_all(&self, requested: &BTreeSet<String>) -> bool {
        requested.is_subset(&self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(Into::into)
                .filter(|s: &String| !s.is_empty())
                .collect(),
        )
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.iter().collect();
        f.write_str(&joined.join(" "))
    }
}

impl Serialize for ScopeSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ScopeSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            List(Vec<String>),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Text(text) => Self::from_param(&text),
            Repr::List(list) => list.into_iter().collect(),
        })
    }
}

/// A stored OAuth credential.
///
/// Without a `refresh_token` the credential cannot be renewed: once it
/// expires it is discarded and the user logs in again.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Expiration as unix timestamp in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    /// Granted scope as reported by the server
    #[serde(default)]
    pub scope: ScopeSet,
}

fn default_token_type() -> String {
    DEFAULT_TOKEN_TYPE.to_string()
}

impl Credential {
    /// Build a credential from a code-exchange response.
    ///
    /// When the server does not report a scope, the requested scope is
    /// assumed to have been granted.
    pub fn from_token_response(response: TokenResponse, requested: ScopeSet, now: u64) -> Self {
        let expires_at = response.expiry(now);
        let scope = match response.scope.as_deref() {
            Some(scope) if !scope.trim().is_empty() => ScopeSet::from_param(scope),
            _ => requested,
        };
        Self {
            access_token: response.access_token,
            token_type: response
                .token_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(default_token_type),
            refresh_token: response.refresh_token.filter(|t| !t.is_empty()),
            expires_at,
            scope,
        }
    }

    /// Apply a refresh response. Fields the server leaves out (rotated
    /// refresh token, scope, token type) keep their previous values.
    pub fn refreshed(self, response: TokenResponse, now: u64) -> Self {
        let expires_at = response.expiry(now);
        Self {
            access_token: response.access_token,
            token_type: response
                .token_type
                .filter(|t| !t.is_empty())
                .unwrap_or(self.token_type),
            refresh_token: response
                .refresh_token
                .filter(|t| !t.is_empty())
                .or(self.refresh_token),
            expires_at,
            scope: match response.scope.as_deref() {
                Some(scope) if !scope.trim().is_empty() => ScopeSet::from_param(scope),
                _ => self.scope,
            },
        }
    }

    /// Whether the access token is expired (or expires within the leeway).
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at
            .is_some_and(|at| at <= now.saturating_add(EXPIRY_LEEWAY_SECS))
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }

    /// `Authorization: <token_type> <access_token>`
    pub fn auth_headers(&self) -> AuthHeaders {
        AuthHeaders::from([(
            "Authorization".to_string(),
            format!("{} {}", self.token_type, self.access_token),
        )])
    }

    /// Reject records that parse but cannot be used.
    pub(crate) fn validate(&self) -> std::result::Result<(), String> {
        if self.access_token.trim().is_empty() {
            return Err("access_token is empty".into());
        }
        if self.token_type.trim().is_empty() {
            return Err("token_type is empty".into());
        }
        Ok(())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish()
    }
}
