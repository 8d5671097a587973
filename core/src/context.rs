//! # Context and Authentication Setup
//!
//! Establishes the scan scope inside the daemon and, when the request carries
//! credentials for a context-based strategy, the authentication method and one
//! daemon-side user per credential.
//!
//! Steps run in a fixed order and the first failure aborts the rest:
//! context creation, include patterns, exclude patterns, authentication method,
//! logged-in indicator, users.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};
use url::form_urlencoded;
use zapper_common::config::{FormAuthentication, ScriptAuthentication};
use zapper_common::{AuthKind, Config, Credential};

use crate::api::{ApiError, ControlApi};

/// Name the authentication script is registered under in the daemon.
pub const AUTH_SCRIPT_NAME: &str = "authScript";

const AUTH_SCRIPT_TYPE: &str = "authentication";
const AUTH_SCRIPT_ENGINE: &str = "Mozilla Zest";
const FORM_AUTH_METHOD: &str = "formBasedAuthentication";
const SCRIPT_AUTH_METHOD: &str = "scriptBasedAuthentication";

#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("unable to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} authentication cannot be configured in the daemon")]
    UnsupportedStrategy(&'static str),
}

/// A daemon-side user and the credential it was created from.
#[derive(Debug, Clone)]
pub struct User<'a> {
    pub id: String,
    pub credential: &'a Credential,
}

/// The configured scope. Users are kept in creation order.
#[derive(Debug, Clone)]
pub struct Context<'a> {
    pub id: String,
    pub name: String,
    pub users: Vec<User<'a>>,
}

/// How a user's credentials are handed to the daemon. Form and script
/// authentication expect differently cased field names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialFormat {
    UsernamePassword,
    Generic,
}

impl CredentialFormat {
    pub fn for_strategy(kind: AuthKind) -> Option<Self> {
        match kind {
            AuthKind::Form => Some(CredentialFormat::UsernamePassword),
            AuthKind::Script => Some(CredentialFormat::Generic),
            AuthKind::None | AuthKind::Header => None,
        }
    }

    pub fn params(self, credential: &Credential) -> String {
        let password = encode(&credential.password);
        let username = encode(&credential.username);
        match self {
            CredentialFormat::UsernamePassword => format!(
                "password={password}&username={username}&type=UsernamePasswordAuthenticationCredentials"
            ),
            CredentialFormat::Generic => format!(
                "Password={password}&Username={username}&type=GenericAuthenticationCredentials"
            ),
        }
    }
}

fn encode(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Creates the context described by `cfg` and returns it with its users.
///
/// With script authentication the script is written to `auth_script_path` when
/// given (it must outlive this call), otherwise to a temporary file.
pub async fn configure<'a, C>(
    client: &C,
    cfg: &'a Config,
    auth_script_path: Option<&Path>,
) -> Result<Context<'a>, ContextError>
where
    C: ControlApi + ?Sized,
{
    let name = cfg.context.name.clone();
    let id = client.new_context(&name).await?;
    let mut ctx = Context {
        id,
        name,
        users: Vec::new(),
    };

    for regex in non_empty(&cfg.context.include_regular_expressions) {
        client.include_in_context(&ctx.name, regex).await?;
    }
    for regex in non_empty(&cfg.context.exclude_regular_expressions) {
        client.exclude_from_context(&ctx.name, regex).await?;
    }

    if !cfg.is_context_auth_required() {
        return Ok(ctx);
    }

    let format = match cfg.auth_kind() {
        AuthKind::Form => {
            configure_form_authentication(client, &ctx, &cfg.form_authentication).await?;
            CredentialFormat::UsernamePassword
        }
        AuthKind::Script => {
            configure_script_authentication(client, &ctx, &cfg.script_authentication, auth_script_path)
                .await?;
            CredentialFormat::Generic
        }
        AuthKind::Header => return Err(ContextError::UnsupportedStrategy("header")),
        AuthKind::None => return Ok(ctx),
    };

    client
        .set_logged_in_indicator(&ctx.id, &cfg.authentication.login_indicator_regex)
        .await?;

    for credential in cfg.credentials() {
        let id = add_user(client, &ctx.id, credential, format).await?;
        ctx.users.push(User { id, credential });
    }

    Ok(ctx)
}

fn non_empty(patterns: &[String]) -> impl Iterator<Item = &str> {
    patterns.iter().map(String::as_str).filter(|p| !p.is_empty())
}

/// Login request template with the daemon's username/password placeholders.
pub fn login_request_data(form: &FormAuthentication) -> String {
    let mut data = format!(
        "{}={{%username%}}&{}={{%password%}}",
        form.form_username_field_name, form.form_password_field_name
    );

    let token = &form.form_anti_cross_site_request_forgery_field_name;
    if !token.is_empty() {
        data.push_str(&format!("&{token}={{%token%}}"));
    }

    let extra = &form.form_extra_post_data;
    if !extra.is_empty() {
        if !extra.starts_with('&') {
            data.push('&');
        }
        data.push_str(extra);
    }

    data
}

async fn configure_form_authentication<C>(
    client: &C,
    ctx: &Context<'_>,
    form: &FormAuthentication,
) -> Result<(), ContextError>
where
    C: ControlApi + ?Sized,
{
    // Registering a token the daemon already knows is a no-op.
    let token = &form.form_anti_cross_site_request_forgery_field_name;
    if !token.is_empty() {
        client.add_anti_csrf_token(token).await?;
    }

    let params = format!(
        "loginUrl={}&loginRequestData={}",
        form.form_url,
        encode(&login_request_data(form))
    );
    client
        .set_authentication_method(&ctx.id, FORM_AUTH_METHOD, &params)
        .await?;
    Ok(())
}

/// Either a caller-owned file or one removed when this value is dropped.
enum ScriptFile {
    Exported(PathBuf),
    Transient(NamedTempFile),
}

impl ScriptFile {
    fn path(&self) -> &Path {
        match self {
            ScriptFile::Exported(path) => path,
            ScriptFile::Transient(file) => file.path(),
        }
    }
}

fn write_script(content: &str, export_path: Option<&Path>) -> Result<ScriptFile, ContextError> {
    match export_path {
        Some(path) => {
            std::fs::write(path, content).map_err(|source| ContextError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            Ok(ScriptFile::Exported(path.to_path_buf()))
        }
        None => {
            let io_error = |source| ContextError::Io {
                path: std::env::temp_dir(),
                source,
            };
            let mut file = tempfile::Builder::new()
                .prefix("authScript")
                .tempfile()
                .map_err(io_error)?;
            file.write_all(content.as_bytes()).map_err(io_error)?;
            file.flush().map_err(io_error)?;
            Ok(ScriptFile::Transient(file))
        }
    }
}

async fn configure_script_authentication<C>(
    client: &C,
    ctx: &Context<'_>,
    script: &ScriptAuthentication,
    export_path: Option<&Path>,
) -> Result<(), ContextError>
where
    C: ControlApi + ?Sized,
{
    let file = write_script(&script.authentication_script_content, export_path)?;
    let file_name = file.path().to_string_lossy().into_owned();
    info!("Created {file_name}");

    client
        .load_script(AUTH_SCRIPT_NAME, AUTH_SCRIPT_TYPE, AUTH_SCRIPT_ENGINE, &file_name)
        .await?;

    client
        .set_authentication_method(&ctx.id, SCRIPT_AUTH_METHOD, &format!("scriptName={AUTH_SCRIPT_NAME}"))
        .await?;
    Ok(())
}

async fn add_user<C>(
    client: &C,
    context_id: &str,
    credential: &Credential,
    format: CredentialFormat,
) -> Result<String, ContextError>
where
    C: ControlApi + ?Sized,
{
    let user_id = client.new_user(context_id, &credential.username).await?;
    client
        .set_authentication_credentials(context_id, &user_id, &format.params(credential))
        .await?;
    client.set_user_enabled(context_id, &user_id, true).await?;
    debug!("Added user {} as {user_id}", credential.username);
    Ok(user_id)
}

/// Seeds the daemon with extra URLs, one per line of a transient file.
pub async fn import_urls<C>(client: &C, urls: &[String]) -> Result<(), ContextError>
where
    C: ControlApi + ?Sized,
{
    let io_error = |source| ContextError::Io {
        path: std::env::temp_dir(),
        source,
    };
    let mut file = tempfile::Builder::new()
        .prefix("urls")
        .tempfile()
        .map_err(io_error)?;
    for url in urls {
        writeln!(file, "{url}").map_err(io_error)?;
    }
    file.flush().map_err(io_error)?;

    client
        .import_urls(&file.path().to_string_lossy())
        .await?;
    Ok(())
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
