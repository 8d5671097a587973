//! Credentials mounted next to the scan request.
//!
//! Each credential is a directory containing either `username` and `password`
//! files, or a single `header-value` file when header authentication is used.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::{AuthKind, ScanMode};
use crate::error::ConfigError;

const USERNAME_FILE: &str = "username";
const PASSWORD_FILE: &str = "password";
const HEADER_VALUE_FILE: &str = "header-value";

/// A username/password pair. With header authentication the password holds the
/// header value and the username is empty.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Loads every credential directory below `dir`, in name order.
///
/// A missing `dir` yields no credentials.
pub fn load(dir: &Path, auth: AuthKind, mode: ScanMode) -> Result<Vec<Credential>, ConfigError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(ConfigError::Credential {
                path: dir.to_path_buf(),
                source,
            });
        }
    };

    let mut dirs: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ConfigError::Credential {
            path: dir.to_path_buf(),
            source,
        })?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();

    if mode == ScanMode::ApiScript && dirs.len() > 1 {
        return Err(ConfigError::TooManyCredentials {
            mode,
            count: dirs.len(),
        });
    }

    dirs.iter().map(|d| read_credential(d, auth)).collect()
}

fn read_credential(dir: &Path, auth: AuthKind) -> Result<Credential, ConfigError> {
    if auth == AuthKind::Header {
        let value = read_trimmed(&dir.join(HEADER_VALUE_FILE))?;
        return Ok(Credential::new("", value));
    }

    let username = read_trimmed(&dir.join(USERNAME_FILE))?;
    let password = read_trimmed(&dir.join(PASSWORD_FILE))?;
    Ok(Credential::new(username, password))
}

fn read_trimmed(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|source| ConfigError::Credential {
            path: path.to_path_buf(),
            source,
        })
}
