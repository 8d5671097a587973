//! Driver for the packaged API scan script.
//!
//! The script owns its daemon, so everything it needs travels through its
//! command line, environment and files dropped into its fixed working
//! directory. Paths handed to it (report, context, config) are relative to
//! that directory.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{info, warn};
use zapper_common::{AuthKind, Config};

use crate::context::AUTH_SCRIPT_NAME;

pub const DEFAULT_SCRIPT_PATH: &str = "/zap/zap-api-scan.py";
pub const DEFAULT_WORK_DIR: &str = "/zap/wrk";

/// Name of the report the script writes into its working directory.
pub const REPORT_FILE: &str = "zap-api-scan-report.xml";

const AUTH_SCRIPT_FILE: &str = "authScript.zst";
const HOOK_FILE: &str = "auth_hook.py";
const SCAN_CONFIG_FILE: &str = "api-scan.conf";

pub const AUTH_HEADER_VALUE_VAR: &str = "ZAP_AUTH_HEADER_VALUE";
pub const AUTH_HEADER_VAR: &str = "ZAP_AUTH_HEADER";
pub const AUTH_HEADER_SITE_VAR: &str = "ZAP_AUTH_HEADER_SITE";

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("unable to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to run {program}: {source}")]
    Launch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("API scan script failed with exit code {}", describe(.0))]
    Failed(Option<i32>),
}

fn describe(code: &Option<i32>) -> String {
    code.map_or_else(|| "none (killed by signal)".to_string(), |c| c.to_string())
}

/// Files prepared for the script before it runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifacts {
    /// Context definition, relative to the working directory.
    pub context_file: Option<String>,
    pub hook_file: Option<PathBuf>,
    /// Scan rule configuration, relative to the working directory.
    pub config_file: Option<String>,
}

/// A fully assembled script command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(&'static str, String)>,
}

#[derive(Debug, Clone)]
pub struct ScriptDriver {
    script: PathBuf,
    work_dir: PathBuf,
}

impl ScriptDriver {
    pub fn new(script: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
            work_dir: work_dir.into(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn report_path(&self) -> PathBuf {
        self.work_dir.join(REPORT_FILE)
    }

    pub fn context_file_name(cfg: &Config) -> String {
        format!("{}.context", cfg.context.name)
    }

    pub fn context_file_path(&self, cfg: &Config) -> PathBuf {
        self.work_dir.join(Self::context_file_name(cfg))
    }

    pub fn auth_script_path(&self) -> PathBuf {
        self.work_dir.join(AUTH_SCRIPT_FILE)
    }

    /// Writes a hook that loads the exported authentication script as soon as
    /// the script's daemon is up.
    pub fn write_hook(&self) -> Result<PathBuf, ScriptError> {
        let hook = format!(
            "def zap_started(zap, target):\n    zap.script.load('{AUTH_SCRIPT_NAME}', 'authentication', 'Mozilla Zest', '{}')\n",
            self.auth_script_path().display()
        );
        let path = self.work_dir.join(HOOK_FILE);
        write(&path, &hook)?;
        Ok(path)
    }

    /// Writes supplementary scan rule configuration and returns its name.
    pub fn write_scan_config(&self, content: &str) -> Result<String, ScriptError> {
        write(&self.work_dir.join(SCAN_CONFIG_FILE), content)?;
        Ok(SCAN_CONFIG_FILE.to_string())
    }

    pub fn invocation(&self, cfg: &Config, artifacts: &Artifacts) -> Invocation {
        let mut args = vec![
            "-t".to_string(),
            cfg.context.target.clone(),
            "-f".to_string(),
            cfg.context.format.clone(),
            "-x".to_string(),
            REPORT_FILE.to_string(),
        ];

        if let Some(context_file) = &artifacts.context_file {
            args.extend(["-n".to_string(), context_file.clone()]);
        }

        if cfg.is_context_auth_required() {
            if let Some(credential) = cfg.credentials().first() {
                args.extend(["-U".to_string(), credential.username.clone()]);
            }
        }

        if let Some(hook) = &artifacts.hook_file {
            args.push(format!("--hook={}", hook.display()));
        }

        let hostname = &cfg.context.open_api_hostname_override;
        if !hostname.is_empty() {
            args.extend(["-O".to_string(), hostname.clone()]);
        }

        if !cfg.scan_options.run_active_scan {
            args.push("-S".to_string());
        }

        let options = &cfg.scan_options.api_scan_options;
        if !options.is_empty() {
            args.extend(["-z".to_string(), options.join(" ")]);
        }

        if let Some(config_file) = &artifacts.config_file {
            args.extend(["-c".to_string(), config_file.clone()]);
        }

        Invocation {
            program: self.script.clone(),
            args,
            env: header_environment(cfg),
        }
    }

    /// Runs the script to completion. Exit codes 0 to 2 count as success.
    pub async fn run(&self, cfg: &Config, artifacts: &Artifacts) -> Result<(), ScriptError> {
        let invocation = self.invocation(cfg, artifacts);
        info!("Running {} {}", invocation.program.display(), invocation.args.join(" "));

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (*k, v.as_str())))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ScriptError::Launch {
                program: invocation.program.clone(),
                source,
            })?;

        let stdout = child.stdout.take().map(|s| tokio::spawn(forward(s)));
        let stderr = child.stderr.take().map(|s| tokio::spawn(forward(s)));

        let status = child.wait().await.map_err(|source| ScriptError::Launch {
            program: invocation.program.clone(),
            source,
        })?;

        for forwarder in [stdout, stderr].into_iter().flatten() {
            if let Err(e) = forwarder.await {
                warn!("API scan script output forwarder failed: {e}");
            }
        }

        match status.code() {
            Some(0) | Some(1) => Ok(()),
            Some(2) => {
                warn!("API scan script reported failures");
                Ok(())
            }
            code => Err(ScriptError::Failed(code)),
        }
    }
}

fn header_environment(cfg: &Config) -> Vec<(&'static str, String)> {
    let mut env = Vec::new();
    if cfg.auth_kind() != AuthKind::Header {
        return env;
    }
    let Some(credential) = cfg.credentials().first() else {
        return env;
    };

    env.push((AUTH_HEADER_VALUE_VAR, credential.password.clone()));

    let header = &cfg.header_authentication;
    if !header.auth_header_name.is_empty() {
        env.push((AUTH_HEADER_VAR, header.auth_header_name.clone()));
    }
    if !header.auth_header_site.is_empty() {
        env.push((AUTH_HEADER_SITE_VAR, header.auth_header_site.clone()));
    }
    env
}

fn write(path: &Path, content: &str) -> Result<(), ScriptError> {
    std::fs::write(path, content).map_err(|source| ScriptError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    info!("Created {}", path.display());
    Ok(())
}

async fn forward<R>(stream: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        info!(target: "zapper::script", "{line}");
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

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use zapper_common::{Credential, ScanMode};

    use super::*;

    fn config(kind: AuthKind, credentials: Vec<Credential>) -> Config {
        let mut cfg = Config::default();
        cfg.context.target = "http://x/openapi.json".to_string();
        cfg.context.format = "openapi".to_string();
        cfg.authentication.kind = kind;
        cfg.scan_options.run_active_scan = true;
        cfg.apply_defaults(ScanMode::ApiScript);
        cfg.with_credentials(credentials)
    }

    fn fake_script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("zap-api-scan.py");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn minimal_invocation() {
        let driver = ScriptDriver::new("/zap/zap-api-scan.py", "/zap/wrk");
        let cfg = config(AuthKind::None, vec![]);

        let invocation = driver.invocation(&cfg, &Artifacts::default());

        assert_eq!(
            invocation.args,
            vec!["-t", "http://x/openapi.json", "-f", "openapi", "-x", REPORT_FILE]
        );
        assert!(invocation.env.is_empty());
    }

    #[test]
    fn full_invocation_keeps_argument_order() {
        let driver = ScriptDriver::new("/zap/zap-api-scan.py", "/zap/wrk");
        let mut cfg = config(AuthKind::Script, vec![Credential::new("alice", "pw")]);
        cfg.context.open_api_hostname_override = "api.internal:8443".to_string();
        cfg.scan_options.run_active_scan = false;
        cfg.scan_options.api_scan_options = vec!["-config".to_string(), "a=b".to_string()];
        let artifacts = Artifacts {
            context_file: Some("Context.context".to_string()),
            hook_file: Some(PathBuf::from("/zap/wrk/auth_hook.py")),
            config_file: Some("api-scan.conf".to_string()),
        };

        let invocation = driver.invocation(&cfg, &artifacts);

        assert_eq!(
            invocation.args,
            vec![
                "-t",
                "http://x/openapi.json",
                "-f",
                "openapi",
                "-x",
                REPORT_FILE,
                "-n",
                "Context.context",
                "-U",
                "alice",
                "--hook=/zap/wrk/auth_hook.py",
                "-O",
                "api.internal:8443",
                "-S",
                "-z",
                "-config a=b",
                "-c",
                "api-scan.conf",
            ]
        );
    }

    #[test]
    fn header_auth_travels_in_environment() {
        let driver = ScriptDriver::new("/zap/zap-api-scan.py", "/zap/wrk");
        let mut cfg = config(AuthKind::Header, vec![Credential::new("", "Bearer t0k")]);
        cfg.header_authentication.auth_header_name = "X-Auth".to_string();

        let invocation = driver.invocation(&cfg, &Artifacts::default());

        assert!(!invocation.args.contains(&"-U".to_string()));
        assert_eq!(
            invocation.env,
            vec![
                (AUTH_HEADER_VALUE_VAR, "Bearer t0k".to_string()),
                (AUTH_HEADER_VAR, "X-Auth".to_string()),
            ]
        );
    }

    #[test]
    fn hook_loads_exported_script() {
        let dir = tempfile::tempdir().unwrap();
        let driver = ScriptDriver::new("/zap/zap-api-scan.py", dir.path());

        let hook = driver.write_hook().unwrap();

        let text = std::fs::read_to_string(hook).unwrap();
        assert!(text.starts_with("def zap_started(zap, target):"));
        assert!(text.contains(&driver.auth_script_path().display().to_string()));
        assert!(text.contains("'authScript', 'authentication', 'Mozilla Zest'"));
    }

    #[tokio::test]
    async fn exit_codes_up_to_two_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(AuthKind::None, vec![]);

        for code in 0..=2 {
            let script = fake_script(dir.path(), &format!("exit {code}"));
            let driver = ScriptDriver::new(script, dir.path());
            driver.run(&cfg, &Artifacts::default()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn script_output_is_drained_before_returning() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_script(
            dir.path(),
            "i=0\nwhile [ $i -lt 2000 ]; do echo out-$i; echo err-$i >&2; i=$((i+1)); done\nexit 0",
        );
        let driver = ScriptDriver::new(script, dir.path());

        tokio::time::timeout(
            std::time::Duration::from_secs(10),
            driver.run(&config(AuthKind::None, vec![]), &Artifacts::default()),
        )
        .await
        .expect("both output streams should be joined")
        .unwrap();
    }

    #[tokio::test]
    async fn other_exit_codes_fail() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_script(dir.path(), "exit 3");
        let driver = ScriptDriver::new(script, dir.path());

        let err = driver
            .run(&config(AuthKind::None, vec![]), &Artifacts::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ScriptError::Failed(Some(3))));
    }

    #[tokio::test]
    async fn missing_script_is_a_launch_error() {
        let driver = ScriptDriver::new("/nonexistent/zap-api-scan.py", "/tmp");

        let err = driver
            .run(&config(AuthKind::None, vec![]), &Artifacts::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ScriptError::Launch { .. }));
    }

    #[tokio::test]
    async fn script_receives_arguments_and_header_value() {
        let dir = tempfile::tempdir().unwrap();
        let seen = dir.path().join("seen.txt");
        let script = fake_script(
            dir.path(),
            &format!("echo \"$@ $ZAP_AUTH_HEADER_VALUE\" > {}", seen.display()),
        );
        let driver = ScriptDriver::new(script, dir.path());
        let cfg = config(AuthKind::Header, vec![Credential::new("", "secret")]);

        driver.run(&cfg, &Artifacts::default()).await.unwrap();

        let text = std::fs::read_to_string(seen).unwrap();
        assert_eq!(
            text.trim(),
            format!("-t http://x/openapi.json -f openapi -x {REPORT_FILE} secret")
        );
    }
}
