//! # Scan Request Model
//!
//! Describes one scan: the target and its scope, report thresholds, scan options,
//! the authentication strategy and the credentials used with it.
//!
//! A [`Config`] is produced once by [`Config::load`] and treated as read-only
//! afterwards. Which fields may be populated depends on the [`ScanMode`]: the
//! daemon-driven scan and the script-driven API scan accept different subsets,
//! and [`Config::validate`] rejects anything populated for the wrong mode.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::credentials::{self, Credential};
use crate::error::ConfigError;

/// Context name used when the request file leaves it blank.
pub const DEFAULT_CONTEXT_NAME: &str = "Context";

const SECRETS_DIRECTORY: &str = "workflow-secrets";

/// How the scan is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// The daemon is driven directly over its control API.
    Daemon,
    /// The whole scan is delegated to the packaged API-scan script.
    ApiScript,
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanMode::Daemon => f.write_str("daemon"),
            ScanMode::ApiScript => f.write_str("api-script"),
        }
    }
}

/// Authentication strategy tag as written in the request file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum AuthKind {
    #[default]
    #[serde(rename = "", alias = "none")]
    None,
    #[serde(rename = "formAuthentication")]
    Form,
    #[serde(rename = "scriptAuthentication")]
    Script,
    #[serde(rename = "headerAuthentication")]
    Header,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    pub name: String,
    /// Root of the mounted request; credentials live underneath it.
    pub work_directory: String,
}

impl RequestOptions {
    /// Directory holding one sub-directory per mounted credential.
    pub fn secrets_directory(&self) -> Option<PathBuf> {
        if self.work_directory.is_empty() {
            return None;
        }
        Some(Path::new(&self.work_directory).join(SECRETS_DIRECTORY))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContextOptions {
    pub name: String,
    pub target: String,
    /// API definition format (`openapi`, `soap`, `graphql`). API script only.
    pub format: String,
    /// Replaces the host named in an OpenAPI definition. API script only.
    pub open_api_hostname_override: String,
    /// Extra URLs seeded into the daemon before spidering. Daemon only.
    pub import_urls: Vec<String>,
    pub include_regular_expressions: Vec<String>,
    pub exclude_regular_expressions: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct ReportOptions {
    pub min_risk_threshold: u32,
    pub min_conf_threshold: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    pub run_active_scan: bool,
    /// Passed through to the API-scan script. API script only.
    pub api_scan_options: Vec<String>,
    /// Written to a script configuration file. API script only.
    pub api_scan_config_content: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthenticationOptions {
    #[serde(rename = "type")]
    pub kind: AuthKind,
    pub login_indicator_regex: String,
    /// Daemon only.
    pub forced_user_mode: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FormAuthentication {
    pub form_url: String,
    pub form_username_field_name: String,
    pub form_password_field_name: String,
    pub form_anti_cross_site_request_forgery_field_name: String,
    pub form_extra_post_data: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScriptAuthentication {
    pub authentication_script_content: String,
}

/// API script only.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HeaderAuthentication {
    pub auth_header_name: String,
    pub auth_header_site: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub request: RequestOptions,
    pub context: ContextOptions,
    pub report_options: ReportOptions,
    pub scan_options: ScanOptions,
    pub authentication: AuthenticationOptions,
    pub form_authentication: FormAuthentication,
    pub script_authentication: ScriptAuthentication,
    pub header_authentication: HeaderAuthentication,
    /// Never read from the request file, see [`credentials::load`].
    #[serde(skip)]
    credentials: Vec<Credential>,
}

impl Config {
    /// Reads a TOML scan request, applies mode defaults and loads the mounted
    /// credentials. The result is not validated; call [`Config::validate`].
    pub fn load(path: &Path, mode: ScanMode) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut cfg = Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        cfg.apply_defaults(mode);

        if let Some(dir) = cfg.request.secrets_directory() {
            cfg.credentials = credentials::load(&dir, cfg.authentication.kind, mode)?;
            debug!("Loaded {} credential(s) from {}", cfg.credentials.len(), dir.display());
        }

        Ok(cfg)
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn apply_defaults(&mut self, mode: ScanMode) {
        if self.context.name.is_empty() {
            self.context.name = DEFAULT_CONTEXT_NAME.to_string();
        }

        if mode == ScanMode::Daemon && self.context.include_regular_expressions.is_empty() {
            let scope = format!("{}.*", self.context.target);
            self.context.include_regular_expressions.push(scope);
        }
    }

    pub fn with_credentials(mut self, credentials: Vec<Credential>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn credentials(&self) -> &[Credential] {
        &self.credentials
    }

    pub fn auth_kind(&self) -> AuthKind {
        self.authentication.kind
    }

    pub fn is_authentication_enabled(&self) -> bool {
        self.auth_kind() != AuthKind::None && !self.credentials.is_empty()
    }

    /// Whether authentication has to be configured inside the daemon context.
    /// Header authentication never is; it travels in environment variables.
    pub fn is_context_auth_required(&self) -> bool {
        self.is_authentication_enabled()
            && matches!(self.auth_kind(), AuthKind::Form | AuthKind::Script)
    }

    /// Whether the API-scan script needs an exported context definition.
    pub fn is_context_file_required(&self) -> bool {
        !self.context.include_regular_expressions.is_empty()
            || !self.context.exclude_regular_expressions.is_empty()
            || self.is_context_auth_required()
    }

    /// Rejects requests that cannot run in `mode`. Fails closed.
    pub fn validate(&self, mode: ScanMode) -> Result<(), ConfigError> {
        if self.context.name.is_empty() {
            return Err(ConfigError::MissingField("context.name"));
        }
        if self.context.target.is_empty() {
            return Err(ConfigError::MissingField("context.target"));
        }

        let not_allowed = |field| Err(ConfigError::NotAllowedInMode { field, mode });

        match mode {
            ScanMode::Daemon => {
                if !self.context.format.is_empty() {
                    return not_allowed("context.format");
                }
                if !self.context.open_api_hostname_override.is_empty() {
                    return not_allowed("context.open_api_hostname_override");
                }
                if !self.scan_options.api_scan_options.is_empty() {
                    return not_allowed("scan_options.api_scan_options");
                }
                if !self.scan_options.api_scan_config_content.is_empty() {
                    return not_allowed("scan_options.api_scan_config_content");
                }
                if self.auth_kind() == AuthKind::Header {
                    return not_allowed("authentication.type");
                }
            }
            ScanMode::ApiScript => {
                if self.context.format.is_empty() {
                    return Err(ConfigError::MissingField("context.format"));
                }
                if self.authentication.forced_user_mode {
                    return not_allowed("authentication.forced_user_mode");
                }
                if !self.context.import_urls.is_empty() {
                    return not_allowed("context.import_urls");
                }
                if self.credentials.len() > 1 {
                    return Err(ConfigError::TooManyCredentials {
                        mode,
                        count: self.credentials.len(),
                    });
                }
            }
        }

        if self.auth_kind() == AuthKind::Header && self.credentials.len() != 1 {
            return Err(ConfigError::HeaderCredentialCount(self.credentials.len()));
        }

        Ok(())
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
