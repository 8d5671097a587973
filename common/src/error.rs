use std::path::PathBuf;

use thiserror::Error;

use crate::config::ScanMode;

/// Reasons a scan request cannot be turned into a usable [`Config`](crate::Config).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to parse configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("unable to read credential file {path}: {source}")]
    Credential {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("required field {0} is empty")]
    MissingField(&'static str),

    #[error("field {field} is not allowed in {mode} mode")]
    NotAllowedInMode { field: &'static str, mode: ScanMode },

    #[error("only one credential can be defined in {mode} mode (found {count})")]
    TooManyCredentials { mode: ScanMode, count: usize },

    #[error("header authentication requires exactly one credential (found {0})")]
    HeaderCredentialCount(usize),
}
