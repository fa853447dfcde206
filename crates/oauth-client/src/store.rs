//! On-disk token storage
//!
//! One JSON file per (application, authorization host, client id):
//!
//! ```text
//! <root>/<app_id>/<host>/<client_id>/token.json
//! ```
//!
//! Saves write a temp file in the same directory and rename it over the
//! target, so a crash mid-write leaves either the old record or the new one.
//! The file holds live tokens and is created 0600 on unix.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::constants::TOKEN_FILE_NAME;
use crate::credential::Credential;
use crate::error::{Error, Result};

/// Where the credential for one client configuration lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredLocation {
    path: PathBuf,
}

impl StoredLocation {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reads and writes token files under a root directory.
#[derive(Debug, Clone)]
pub struct TokenStore {
    root: PathBuf,
}

impl TokenStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at the platform's per-user data directory.
    pub fn with_default_root() -> Result<Self> {
        Ok(Self::new(default_root()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Derive the token file location for a configuration. Distinct hosts or
    /// client ids never share a file.
    pub fn location(&self, config: &ClientConfig) -> StoredLocation {
        let path = self
            .root
            .join(path_component(config.app_id()))
            .join(path_component(config.host()))
            .join(path_component(config.client_id()))
            .join(TOKEN_FILE_NAME);
        StoredLocation { path }
    }

    /// Read the stored credential. `None` if there is no file.
    ///
    /// A file that exists but cannot be used is `CorruptTokenFile`; it is
    /// left in place for the caller to inspect or overwrite.
    pub async fn load(&self, location: &StoredLocation) -> Result<Option<Credential>> {
        let path = location.path();
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no stored credential");
                return Ok(None);
            }
            Err(e) => {
                return Err(Error::Io(format!("reading {}: {e}", path.display())));
            }
        };

        let credential: Credential =
            serde_json::from_str(&contents).map_err(|e| Error::CorruptTokenFile {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        credential
            .validate()
            .map_err(|reason| Error::CorruptTokenFile {
                path: path.to_path_buf(),
                reason,
            })?;

        debug!(path = %path.display(), "loaded stored credential");
        Ok(Some(credential))
    }

    /// Persist a credential, replacing any previous one.
    pub async fn save(&self, location: &StoredLocation, credential: &Credential) -> Result<()> {
        write_atomic(location.path(), credential).await
    }

    /// Remove the stored credential. Removing a missing file is not an error.
    pub async fn delete(&self, location: &StoredLocation) -> Result<()> {
        let path = location.path();
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                info!(path = %path.display(), "deleted stored credential");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(format!("deleting {}: {e}", path.display()))),
        }
    }
}

/// Platform per-user data directory (e.g. `~/.local/share` on Linux).
pub fn default_root() -> Result<PathBuf> {
    dirs::data_dir()
        .ok_or_else(|| Error::Io("could not determine the user data directory".into()))
}

/// Make a config value safe to use as a single path component.
fn path_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

async fn write_atomic(path: &Path, credential: &Credential) -> Result<()> {
    let json = serde_json::to_string_pretty(credential)
        .map_err(|e| Error::Io(format!("serializing credential: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("token path has no parent directory".into()))?;
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::Io(format!("creating {}: {e}", dir.display())))?;

    let tmp_path = dir.join(format!(".token.tmp.{}", std::process::id()));

    let result = match write_private(&tmp_path, json.as_bytes()).await {
        Ok(()) => tokio::fs::rename(&tmp_path, path)
            .await
            .map_err(|e| Error::Io(format!("renaming temp token file: {e}"))),
        Err(e) => Err(e),
    };
    if result.is_err() {
        // Never leave a stray copy of the tokens behind
        if let Err(e) = remove_if_present(&tmp_path).await {
            warn!(path = %tmp_path.display(), error = %e, "could not remove temp token file");
        }
    }
    result?;

    debug!(path = %path.display(), "persisted credential");
    Ok(())
}

/// Write `data` to a new file that is owner-only (0600 on unix) from the
/// moment it exists.
async fn write_private(path: &Path, data: &[u8]) -> Result<()> {
    // A leftover from a crashed run may carry a wider mode
    remove_if_present(path)
        .await
        .map_err(|e| Error::Io(format!("removing stale temp token file: {e}")))?;

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options
        .open(path)
        .await
        .map_err(|e| Error::Io(format!("creating temp token file: {e}")))?;
    file.write_all(data)
        .await
        .map_err(|e| Error::Io(format!("writing temp token file: {e}")))?;
    file.sync_all()
        .await
        .map_err(|e| Error::Io(format!("syncing temp token file: {e}")))?;
    Ok(())
}

async fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::ScopeSet;

    fn config(base_url: &str, client_id: &str) -> ClientConfig {
        ClientConfig::new("test-app", base_url, client_id, ["identity"]).unwrap()
    }

    fn test_credential() -> Credential {
        Credential {
            access_token: "at_1".into(),
            token_type: "Bearer".into(),
            refresh_token: Some("rt_1".into()),
            expires_at: Some(1_735_500_000),
            scope: ScopeSet::from_param("identity read"),
        }
    }

    #[test]
    fn location_layout() {
        let store = TokenStore::new("/data");
        let loc = store.location(&config("https://auth.example.com/oauth", "cid"));
        assert_eq!(
            loc.path(),
            Path::new("/data/test-app/auth.example.com/cid/token.json")
        );
    }

    #[test]
    fn locations_are_scoped_by_host_and_client() {
        let store = TokenStore::new("/data");
        let a = store.location(&config("https://a.example.com", "cid"));
        let b = store.location(&config("https://b.example.com", "cid"));
        let c = store.location(&config("https://a.example.com", "other"));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn path_components_are_sanitized() {
        assert_eq!(path_component("client/../../etc"), "client_.._.._etc");
        assert_eq!(path_component(".."), "_");
        assert_eq!(path_component("."), "_");
        assert_eq!(path_component("a b:c"), "a_b_c");
        assert_eq!(path_component("ok-id_1.2"), "ok-id_1.2");

        let store = TokenStore::new("/data");
        let loc = store.location(&config("https://h.example", "../escape"));
        assert!(loc.path().starts_with("/data/test-app/h.example"));
        assert!(!loc.path().components().any(|c| c.as_os_str() == ".."));
    }

    #[tokio::test]
    async fn roundtrip_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        let loc = store.location(&config("https://auth.example.com", "cid"));

        store.save(&loc, &test_credential()).await.unwrap();
        let loaded = store.load(&loc).await.unwrap().unwrap();
        assert_eq!(loaded, test_credential());

        // A second store over the same root sees the same record
        let other = TokenStore::new(dir.path());
        assert_eq!(
            other.load(&loc).await.unwrap(),
            Some(test_credential())
        );
    }

    #[tokio::test]
    async fn save_replaces_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        let loc = store.location(&config("https://auth.example.com", "cid"));

        store.save(&loc, &test_credential()).await.unwrap();
        let updated = Credential {
            access_token: "at_2".into(),
            refresh_token: None,
            ..test_credential()
        };
        store.save(&loc, &updated).await.unwrap();
        assert_eq!(store.load(&loc).await.unwrap(), Some(updated));

        // No temp files left behind
        let entries: Vec<_> = std::fs::read_dir(loc.path().parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("token.json")]);
    }

    #[tokio::test]
    async fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        let loc = store.location(&config("https://auth.example.com", "cid"));
        assert_eq!(store.load(&loc).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unparsable_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        let loc = store.location(&config("https://auth.example.com", "cid"));
        std::fs::create_dir_all(loc.path().parent().unwrap()).unwrap();
        std::fs::write(loc.path(), "{not json").unwrap();

        let err = store.load(&loc).await.unwrap_err();
        assert!(
            matches!(err, Error::CorruptTokenFile { ref path, .. } if path == loc.path()),
            "got: {err:?}"
        );
        assert!(loc.path().exists(), "corrupt file must be left in place");
    }

    #[tokio::test]
    async fn empty_access_token_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        let loc = store.location(&config("https://auth.example.com", "cid"));
        std::fs::create_dir_all(loc.path().parent().unwrap()).unwrap();
        std::fs::write(loc.path(), r#"{"access_token":"  ","token_type":"Bearer"}"#).unwrap();

        let err = store.load(&loc).await.unwrap_err();
        assert!(matches!(err, Error::CorruptTokenFile { .. }), "got: {err:?}");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        let loc = store.location(&config("https://auth.example.com", "cid"));

        store.save(&loc, &test_credential()).await.unwrap();
        store.delete(&loc).await.unwrap();
        assert!(!loc.path().exists());
        store.delete(&loc).await.unwrap();
        assert_eq!(store.load(&loc).await.unwrap(), None);
    }

    #[tokio::test]
    async fn failed_rename_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        let loc = store.location(&config("https://auth.example.com", "cid"));

        // A non-empty directory where the token file should go
        std::fs::create_dir_all(loc.path().join("blocker")).unwrap();

        let err = store.save(&loc, &test_credential()).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)), "got: {err:?}");

        let leftovers: Vec<_> = std::fs::read_dir(loc.path().parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(".token.tmp"))
            .collect();
        assert!(leftovers.is_empty(), "temp file left behind: {leftovers:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stale_temp_file_is_replaced_not_reused() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        let loc = store.location(&config("https://auth.example.com", "cid"));
        let parent = loc.path().parent().unwrap();
        std::fs::create_dir_all(parent).unwrap();

        let stale = parent.join(format!(".token.tmp.{}", std::process::id()));
        std::fs::write(&stale, "old").unwrap();
        std::fs::set_permissions(&stale, std::fs::Permissions::from_mode(0o644)).unwrap();

        store.save(&loc, &test_credential()).await.unwrap();
        assert!(!stale.exists());
        let mode = std::fs::metadata(loc.path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "token file must be 0600, got {mode:o}");
        assert_eq!(store.load(&loc).await.unwrap(), Some(test_credential()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        let loc = store.location(&config("https://auth.example.com", "cid"));
        store.save(&loc, &test_credential()).await.unwrap();

        let metadata = tokio::fs::metadata(loc.path()).await.unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "token file must be 0600, got {mode:o}");
    }
}
