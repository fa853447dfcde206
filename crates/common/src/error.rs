//! Configuration error types shared by the workspace binaries

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors raised while locating, reading or validating configuration.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Wrap an I/O error with the path it occurred on.
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_context() {
        let config_err = Error::Config("missing field".into());
        assert_eq!(config_err.to_string(), "Configuration error: missing field");

        let io_err = Error::io(
            Path::new("/etc/oauth-cli.toml"),
            std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        );
        let msg = io_err.to_string();
        assert!(msg.starts_with("I/O error on /etc/oauth-cli.toml"), "got: {msg}");
        assert!(msg.contains("file not found"), "got: {msg}");
    }

    #[test]
    fn toml_errors_convert() {
        let parse: std::result::Result<toml::Table, _> = toml::from_str("not valid {{{{ toml");
        let err: Error = parse.unwrap_err().into();
        assert!(
            err.to_string().starts_with("TOML parse error:"),
            "got: {err}"
        );
    }
}
