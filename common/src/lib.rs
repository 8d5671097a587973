//! Shared configuration model for `zapper`.
//!
//! Everything in here is synchronous and free of process or network IO apart
//! from reading the scan request file and the mounted credential directories.

pub mod config;
pub mod credentials;
pub mod error;

pub use config::{AuthKind, Config, ScanMode};
pub use credentials::Credential;
pub use error::ConfigError;
