//! Credential lifecycle: restore, refresh, login, logout
//!
//! The stored credential is read fresh on every call and threaded through
//! explicitly; nothing is cached between calls.

use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::credential::{AuthHeaders, Credential, unix_now};
use crate::error::{Error, Result};
use crate::flow::{AuthorizationFlow, RedirectMode};
use crate::store::{StoredLocation, TokenStore};
use crate::token;

pub struct TokenLifecycle {
    store: TokenStore,
    http: reqwest::Client,
}

impl TokenLifecycle {
    pub fn new(store: TokenStore, http: reqwest::Client) -> Self {
        Self { store, http }
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Headers from the stored credential, refreshing it if it has expired.
    ///
    /// Returns `None` when the user has to log in: no stored credential, an
    /// expired one that cannot be refreshed, or one granted fewer scopes than
    /// the configuration now asks for. The last two are removed from disk.
    pub async fn restore(&self, config: &ClientConfig) -> Result<Option<AuthHeaders>> {
        let location = self.store.location(config);
        let Some(mut credential) = self.store.load(&location).await? else {
            return Ok(None);
        };

        let now = unix_now();
        if credential.is_expired(now) {
            let Some(refresh) = credential.refresh_token.clone() else {
                info!(host = config.host(), "stored credential expired and cannot be refreshed");
                self.store.delete(&location).await?;
                return Ok(None);
            };

            let response = token::refresh_token(&self.http, config, &refresh).await?;
            credential = credential.refreshed(response, unix_now());
            self.store.save(&location, &credential).await?;
            info!(host = config.host(), "access token refreshed");
        }

        if !credential.scope.contains_all(&config.scope_set()) {
            info!(
                host = config.host(),
                granted = %credential.scope,
                requested = %config.scope_param(),
                "stored credential lacks requested scopes, logging out"
            );
            self.revoke_and_delete(config, &location, Some(&credential))
                .await?;
            return Ok(None);
        }

        debug!(host = config.host(), "restored stored credential");
        Ok(Some(credential.auth_headers()))
    }

    /// Run a fresh login, persist the result, and return its headers.
    pub async fn login(
        &self,
        config: &ClientConfig,
        flow: &AuthorizationFlow,
        mode: RedirectMode,
    ) -> Result<AuthHeaders> {
        let credential = flow.login(config, mode).await?;
        let location = self.store.location(config);
        self.store.save(&location, &credential).await?;
        info!(path = %location.path().display(), "credential saved");
        Ok(credential.auth_headers())
    }

    /// Revoke the stored access token (best effort) and delete the file.
    pub async fn logout(&self, config: &ClientConfig) -> Result<()> {
        let location = self.store.location(config);
        let credential = match self.store.load(&location).await {
            Ok(credential) => credential,
            Err(Error::CorruptTokenFile { path, reason }) => {
                debug!(path = %path.display(), %reason, "corrupt token file, nothing to revoke");
                None
            }
            Err(e) => return Err(e),
        };
        self.revoke_and_delete(config, &location, credential.as_ref())
            .await
    }

    /// The stored credential as-is, without refreshing or validating scope.
    pub async fn current(&self, config: &ClientConfig) -> Result<Option<Credential>> {
        self.store.load(&self.store.location(config)).await
    }

    async fn revoke_and_delete(
        &self,
        config: &ClientConfig,
        location: &StoredLocation,
        credential: Option<&Credential>,
    ) -> Result<()> {
        if let Some(credential) = credential {
            match token::revoke_token(&self.http, config, &credential.access_token).await {
                Ok(()) => debug!(host = config.host(), "access token revoked"),
                Err(e) => warn!(host = config.host(), error = %e, "token revocation failed"),
            }
        }
        self.store.delete(location).await
    }
}
