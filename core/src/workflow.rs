//! # Run Pipelines
//!
//! The two end-to-end flows. Both converge on the same report filtering step.
//!
//! * **daemon scan**: start the daemon, configure the context, spider and scan,
//!   save the report, stop the daemon.
//! * **API scan**: optionally run a short-lived daemon just to export a context
//!   definition, then hand over to the external script and filter its report.
//!
//! Whenever a daemon was started it is stopped, and the stop awaited, before a
//! result is returned, including on every failure.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use zapper_common::{AuthKind, Config, ConfigError, ScanMode};

use crate::api::ControlApi;
use crate::api::http::HttpControlClient;
use crate::context;
use crate::daemon::{DaemonError, DaemonSettings, Supervisor};
use crate::error::RunError;
use crate::external::{Artifacts, ScriptDriver};
use crate::report::{self, ReportFilter, XsltProgram};
use crate::scanner::{Orchestrator, POLL_INTERVAL, Phase};

type ProgressFn = Arc<dyn Fn(Phase, i64) + Send + Sync>;

/// Loads the scan request for `mode` and rejects it when it cannot run there.
pub fn load_config(path: &Path, mode: ScanMode) -> Result<Config, RunError> {
    let cfg = Config::load(path, mode).map_err(|e| match e {
        ConfigError::TooManyCredentials { .. } => RunError::InvalidForMode(e),
        e => RunError::Config(e),
    })?;
    cfg.validate(mode).map_err(RunError::InvalidForMode)?;
    Ok(cfg)
}

/// Resolves the report filter program, failing when it is unsupported or absent.
pub fn locate_xslt(path: &Path) -> Result<XsltProgram, RunError> {
    XsltProgram::locate(path).map_err(RunError::XsltProgram)
}

pub fn create_client(api_url: &str, api_key: &str) -> Result<HttpControlClient, RunError> {
    HttpControlClient::new(api_url, api_key).map_err(RunError::Client)
}

pub struct Workflow<C: ?Sized> {
    client: Arc<C>,
    daemon: DaemonSettings,
    xslt: XsltProgram,
    output: PathBuf,
    poll_interval: Duration,
    on_progress: Option<ProgressFn>,
}

impl<C> Workflow<C>
where
    C: ControlApi + ?Sized + 'static,
{
    pub fn new(client: Arc<C>, daemon: DaemonSettings, xslt: XsltProgram, output: impl Into<PathBuf>) -> Self {
        Self {
            client,
            daemon,
            xslt,
            output: output.into(),
            poll_interval: POLL_INTERVAL,
            on_progress: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_progress(mut self, on_progress: impl Fn(Phase, i64) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(on_progress));
        self
    }

    /// Runs the daemon-driven scan and returns the number of discovered nodes.
    pub async fn daemon_scan(&self, cfg: &Config) -> Result<usize, RunError> {
        let mut supervisor = Supervisor::new(self.daemon.clone());
        self.start_daemon(&mut supervisor).await?;

        let result = self.scan_with_daemon(cfg).await;

        info!("Stopping daemon...");
        supervisor.stop().await;
        if result.is_ok() {
            info!("Scan completed");
        }
        result
    }

    /// Runs the external API scan script and filters its report.
    pub async fn api_scan(&self, cfg: &Config, driver: &ScriptDriver) -> Result<(), RunError> {
        let mut artifacts = Artifacts::default();

        if cfg.is_context_file_required() {
            let mut supervisor = Supervisor::new(self.daemon.clone());
            self.start_daemon(&mut supervisor).await?;
            let exported = self.export_context(cfg, driver).await;
            supervisor.stop().await;
            artifacts = exported?;
        }

        let scan_config = &cfg.scan_options.api_scan_config_content;
        if !scan_config.is_empty() {
            let name = driver.write_scan_config(scan_config).map_err(RunError::Script)?;
            artifacts.config_file = Some(name);
        }

        driver.run(cfg, &artifacts).await.map_err(RunError::Script)?;

        info!("Saving report...");
        report::copy_then_filter(&driver.report_path(), &self.output, &self.xslt, filter(cfg))
            .await
            .map_err(RunError::Report)?;
        info!("API scan completed");
        Ok(())
    }

    async fn start_daemon(&self, supervisor: &mut Supervisor) -> Result<String, RunError> {
        if let Err(e) = supervisor.start(self.client.clone()).await {
            supervisor.stop().await;
            return Err(match e {
                DaemonError::OutputLog { .. } => RunError::DaemonLog(e),
                e => RunError::DaemonNotReady(e),
            });
        }

        match supervisor.wait_ready().await {
            Ok(version) => Ok(version),
            Err(e) => {
                supervisor.stop().await;
                Err(RunError::DaemonNotReady(e))
            }
        }
    }

    async fn scan_with_daemon(&self, cfg: &Config) -> Result<usize, RunError> {
        let client = self.client.as_ref();

        info!("Creating context...");
        let ctx = context::configure(client, cfg, None)
            .await
            .map_err(RunError::Context)?;
        info!("Context {} created with {} user(s)", ctx.id, ctx.users.len());

        let urls = &cfg.context.import_urls;
        if !urls.is_empty() {
            context::import_urls(client, urls)
                .await
                .map_err(RunError::Context)?;
            info!("Imported {} URL(s)", urls.len());
        }

        let nodes = self
            .orchestrator(cfg)
            .run(client, cfg, &ctx)
            .await
            .map_err(RunError::Scan)?;

        info!("Saving report...");
        report::generate(client, &self.xslt, &self.output, filter(cfg))
            .await
            .map_err(RunError::Report)?;
        info!("Report saved to {}", self.output.display());
        Ok(nodes)
    }

    async fn export_context(&self, cfg: &Config, driver: &ScriptDriver) -> Result<Artifacts, RunError> {
        let client = self.client.as_ref();
        let auth_script = (cfg.auth_kind() == AuthKind::Script && cfg.is_context_auth_required())
            .then(|| driver.auth_script_path());

        let ctx = context::configure(client, cfg, auth_script.as_deref())
            .await
            .map_err(RunError::Context)?;

        let context_file = driver.context_file_path(cfg);
        client
            .export_context(&ctx.name, &context_file.to_string_lossy())
            .await
            .map_err(RunError::ContextExport)?;
        info!("Exported context to {}", context_file.display());

        let hook_file = match auth_script {
            Some(_) => Some(driver.write_hook().map_err(RunError::Script)?),
            None => None,
        };

        Ok(Artifacts {
            context_file: Some(ScriptDriver::context_file_name(cfg)),
            hook_file,
            config_file: None,
        })
    }

    fn orchestrator(&self, cfg: &Config) -> Orchestrator {
        let orchestrator = Orchestrator::new(cfg.context.target.clone()).with_interval(self.poll_interval);
        match &self.on_progress {
            Some(cb) => {
                let cb = cb.clone();
                orchestrator.with_progress(move |phase, percent| cb(phase, percent))
            }
            None => orchestrator,
        }
    }
}

fn filter(cfg: &Config) -> ReportFilter {
    ReportFilter::new(
        cfg.report_options.min_risk_threshold,
        cfg.report_options.min_conf_threshold,
    )
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

    use super::*;
    use crate::api::fake::FakeApi;
    use crate::api::operations as ops;

    fn fake_daemon(dir: &Path) -> PathBuf {
        let path = dir.join("fake-daemon.sh");
        std::fs::write(&path, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn workflow(api: Arc<FakeApi>, dir: &Path) -> Workflow<FakeApi> {
        let daemon = DaemonSettings::new(fake_daemon(dir), "k", Duration::from_secs(5));
        // Never executed by these tests: they all fail before the report step.
        let xslt = XsltProgram::Xsltproc("xsltproc".into());
        Workflow::new(api, daemon, xslt, dir.join("out.xml")).with_poll_interval(Duration::from_millis(1))
    }

    fn config() -> Config {
        let mut cfg = Config::parse("[context]\ntarget = \"http://x\"\n").unwrap();
        cfg.apply_defaults(ScanMode::Daemon);
        cfg
    }

    #[tokio::test]
    async fn context_failure_stops_daemon() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(FakeApi::new());
        api.reject(ops::NEW_CONTEXT, "already_exists", "context exists");

        let err = workflow(api.clone(), dir.path())
            .daemon_scan(&config())
            .await
            .unwrap_err();

        assert_eq!(err.exit_code(), 10);
        assert!(api.calls_to(ops::SPIDER_SCAN).is_empty());
    }

    #[tokio::test]
    async fn zero_nodes_skips_report() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(FakeApi::new());
        api.script(ops::SPIDER_ADDED_NODES, [serde_json::json!({"addedNodes": []})]);

        let err = workflow(api.clone(), dir.path())
            .daemon_scan(&config())
            .await
            .unwrap_err();

        assert_eq!(err.exit_code(), 16);
        assert!(api.calls_to(ops::XML_REPORT).is_empty());
    }

    #[tokio::test]
    async fn unreachable_daemon_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(FakeApi::new());
        api.unreachable(ops::VERSION);
        let mut flow = workflow(api, dir.path());
        flow.daemon.readiness_timeout = Duration::from_millis(1500);

        let err = flow.daemon_scan(&config()).await.unwrap_err();

        assert_eq!(err.exit_code(), 8);
    }

    #[tokio::test]
    async fn unopenable_daemon_log_is_reported_per_stream() {
        let dir = tempfile::tempdir().unwrap();
        let mut flow = workflow(Arc::new(FakeApi::new()), dir.path());
        flow.daemon.stderr_log = Some(dir.path().join("missing").join("err.log"));

        let err = flow.daemon_scan(&config()).await.unwrap_err();

        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn second_credential_in_script_mode_is_invalid_for_mode() {
        let dir = tempfile::tempdir().unwrap();
        let secrets = dir.path().join("workflow-secrets");
        for name in ["a", "b"] {
            let entry = secrets.join(name);
            std::fs::create_dir_all(&entry).unwrap();
            std::fs::write(entry.join("username"), name).unwrap();
            std::fs::write(entry.join("password"), "pw").unwrap();
        }
        let request = dir.path().join("request.toml");
        std::fs::write(
            &request,
            format!(
                "[request]\nwork_directory = {:?}\n[context]\ntarget = \"http://x\"\nformat = \"openapi\"\n[authentication]\ntype = \"formAuthentication\"\n",
                dir.path().display().to_string()
            ),
        )
        .unwrap();

        let err = load_config(&request, ScanMode::ApiScript).unwrap_err();

        assert_eq!(err.exit_code(), 17);
    }

    #[test]
    fn unreadable_request_is_a_config_error() {
        let err = load_config(Path::new("/nonexistent/request.toml"), ScanMode::Daemon).unwrap_err();
        assert_eq!(err.exit_code(), 6);
    }
}
