//! # Daemon Process Supervisor
//!
//! Owns the scanning daemon's subprocess for its whole lifetime.
//!
//! A single background task spawns the process, polls the control API until it
//! answers (or a deadline passes), then parks until asked to stop, at which point
//! it kills and reaps the process. The rest of the program talks to that task
//! through exactly two one-way signals:
//!
//! * **readiness**: fires at most once, with the daemon version, or closes
//!   without a value when the daemon never became ready;
//! * **stop**: best effort; dropped if the task is no longer listening.
//!
//! [`Supervisor::stop`] always waits for the task to exit, so no process is left
//! behind once it returns.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::api::ControlApi;

const READINESS_POLL_INTERVAL: Duration = Duration::from_secs(1);
const JVM_LAUNCHER: &str = "java";
const SHELL_LAUNCHER: &str = "sh";
const JVM_MAX_RAM: &str = "-XX:MaxRAMPercentage=75.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Stdout => f.write_str("stdout"),
            OutputStream::Stderr => f.write_str("stderr"),
        }
    }
}

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("unable to open daemon {stream} log {path}: {source}")]
    OutputLog {
        stream: OutputStream,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to start daemon at {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("daemon exited before its API became ready ({status})")]
    Exited { status: std::process::ExitStatus },

    #[error("daemon API not ready after {0:?}")]
    ReadinessTimeout(Duration),

    #[error("daemon supervisor task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("daemon is not ready")]
    NotReady,

    #[error("daemon was already started")]
    AlreadyStarted,
}

/// Where the daemon lives and how long to wait for it.
#[derive(Debug, Clone)]
pub struct DaemonSettings {
    pub path: PathBuf,
    pub api_key: String,
    pub readiness_timeout: Duration,
    pub stdout_log: Option<PathBuf>,
    pub stderr_log: Option<PathBuf>,
}

impl DaemonSettings {
    pub fn new(path: impl Into<PathBuf>, api_key: impl Into<String>, readiness_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            api_key: api_key.into(),
            readiness_timeout,
            stdout_log: None,
            stderr_log: None,
        }
    }
}

/// The fully resolved process invocation for a daemon artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl LaunchCommand {
    /// Packaged `.jar` artifacts run under the JVM and `.sh` launchers under
    /// `sh`; anything else is executed directly. The daemon always runs
    /// headless with a fixed API key, from the artifact's own directory.
    pub fn for_daemon(path: &Path, api_key: &str) -> Self {
        let artifact = path.to_string_lossy().into_owned();
        let mut args: Vec<String> = Vec::new();

        let program = match path.extension().and_then(|e| e.to_str()) {
            Some("jar") => {
                if let Some(home) = home_dir() {
                    args.push(format!("-Duser.home={}", home.display()));
                }
                args.extend([JVM_MAX_RAM.to_string(), "-jar".to_string(), artifact]);
                PathBuf::from(JVM_LAUNCHER)
            }
            Some("sh") => {
                args.push(artifact);
                PathBuf::from(SHELL_LAUNCHER)
            }
            _ => path.to_path_buf(),
        };

        args.extend([
            "-daemon".to_string(),
            "-config".to_string(),
            format!("api.key={api_key}"),
        ]);

        let working_dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        Self {
            program,
            args,
            working_dir,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.program.display(), self.args.join(" "))
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

/// Lifecycle of one daemon invocation, as seen by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonState {
    NotStarted,
    Starting,
    Ready(String),
    Failed,
    Stopped,
}

/// Handle on the background task that owns the daemon process.
pub struct Supervisor {
    settings: DaemonSettings,
    state: DaemonState,
    ready_rx: Option<oneshot::Receiver<String>>,
    quit_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<(), DaemonError>>>,
}

impl Supervisor {
    pub fn new(settings: DaemonSettings) -> Self {
        Self {
            settings,
            state: DaemonState::NotStarted,
            ready_rx: None,
            quit_tx: None,
            task: None,
        }
    }

    pub fn state(&self) -> &DaemonState {
        &self.state
    }

    /// Spawns the supervising task. `client` is used to check readiness.
    pub async fn start<C>(&mut self, client: Arc<C>) -> Result<(), DaemonError>
    where
        C: ControlApi + ?Sized + 'static,
    {
        if self.state != DaemonState::NotStarted {
            return Err(DaemonError::AlreadyStarted);
        }

        let stdout = open_log(self.settings.stdout_log.as_deref(), OutputStream::Stdout).await?;
        let stderr = open_log(self.settings.stderr_log.as_deref(), OutputStream::Stderr).await?;

        let launch = LaunchCommand::for_daemon(&self.settings.path, &self.settings.api_key);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (quit_tx, quit_rx) = oneshot::channel();

        let run = DaemonRun {
            launch,
            client,
            readiness_timeout: self.settings.readiness_timeout,
            stdout,
            stderr,
        };
        self.task = Some(tokio::spawn(run.supervise(ready_tx, quit_rx)));
        self.ready_rx = Some(ready_rx);
        self.quit_tx = Some(quit_tx);
        self.state = DaemonState::Starting;
        Ok(())
    }

    /// Blocks until the daemon answers, returning its version.
    ///
    /// When readiness never arrives the task has already given up; it is joined
    /// here so the returned error carries the reason.
    pub async fn wait_ready(&mut self) -> Result<String, DaemonError> {
        let Some(ready_rx) = self.ready_rx.take() else {
            return match &self.state {
                DaemonState::Ready(version) => Ok(version.clone()),
                _ => Err(DaemonError::NotReady),
            };
        };

        match ready_rx.await {
            Ok(version) => {
                info!("Daemon API version {version} is ready");
                self.state = DaemonState::Ready(version.clone());
                Ok(version)
            }
            Err(_closed) => {
                self.state = DaemonState::Failed;
                match self.task.take() {
                    Some(task) => Err(task.await?.err().unwrap_or(DaemonError::NotReady)),
                    None => Err(DaemonError::NotReady),
                }
            }
        }
    }

    /// Requests a stop and waits until the process is killed and reaped.
    ///
    /// Safe to call in any state and more than once.
    pub async fn stop(&mut self) {
        if let Some(quit_tx) = self.quit_tx.take() {
            match quit_tx.send(()) {
                Ok(()) => info!("Sent quit message to daemon"),
                Err(()) => info!("Quit message not sent to daemon"),
            }
        }

        if let Some(task) = self.task.take() {
            info!("Waiting for daemon to stop running...");
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Daemon supervisor ended with: {e}"),
                Err(e) => error!("Daemon supervisor task failed: {e}"),
            }
            info!("Daemon stopped");
        }

        if self.state != DaemonState::NotStarted {
            self.state = DaemonState::Stopped;
        }
    }
}

/// Everything the background task owns.
struct DaemonRun<C: ?Sized> {
    launch: LaunchCommand,
    client: Arc<C>,
    readiness_timeout: Duration,
    stdout: Option<File>,
    stderr: Option<File>,
}

impl<C> DaemonRun<C>
where
    C: ControlApi + ?Sized + 'static,
{
    async fn supervise(
        self,
        ready_tx: oneshot::Sender<String>,
        quit_rx: oneshot::Receiver<()>,
    ) -> Result<(), DaemonError> {
        info!("Starting daemon: {}", self.launch);
        let mut child = self
            .launch
            .command()
            .spawn()
            .map_err(|source| DaemonError::Spawn {
                program: self.launch.program.clone(),
                source,
            })?;

        let forwarders = [
            child
                .stdout
                .take()
                .map(|out| tokio::spawn(forward_output(out, self.stdout, OutputStream::Stdout))),
            child
                .stderr
                .take()
                .map(|err| tokio::spawn(forward_output(err, self.stderr, OutputStream::Stderr))),
        ];

        let outcome = match wait_for_api(&mut child, self.client.as_ref(), self.readiness_timeout).await {
            Ok(version) => {
                if ready_tx.send(version).is_err() {
                    debug!("Nobody is waiting for daemon readiness");
                }
                // A dropped sender counts as a stop request.
                let _ = quit_rx.await;
                Ok(())
            }
            Err(e) => {
                error!("{e}");
                drop(ready_tx);
                Err(e)
            }
        };

        info!("Killing daemon process...");
        if let Err(e) = child.kill().await {
            warn!("Unable to kill daemon process: {e}");
        }
        for forwarder in forwarders.into_iter().flatten() {
            forwarder.abort();
        }
        info!("Daemon killed");

        outcome
    }
}

async fn wait_for_api<C>(child: &mut Child, client: &C, timeout: Duration) -> Result<String, DaemonError>
where
    C: ControlApi + ?Sized,
{
    let give_up = Instant::now() + timeout;
    loop {
        let remaining = give_up.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, client.version()).await {
            Ok(Ok(version)) => return Ok(version),
            Ok(Err(e)) => debug!("Daemon API not answering: {e}"),
            Err(_) => debug!("Daemon API call timed out"),
        }

        if let Ok(Some(status)) = child.try_wait() {
            return Err(DaemonError::Exited { status });
        }

        if Instant::now() >= give_up {
            warn!("Giving up on wait for daemon API");
            return Err(DaemonError::ReadinessTimeout(timeout));
        }

        info!("Daemon API not ready. Retrying...");
        tokio::time::sleep(READINESS_POLL_INTERVAL).await;
    }
}

async fn open_log(path: Option<&Path>, stream: OutputStream) -> Result<Option<File>, DaemonError> {
    let Some(path) = path else {
        return Ok(None);
    };

    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map(Some)
        .map_err(|source| DaemonError::OutputLog {
            stream,
            path: path.to_path_buf(),
            source,
        })
}

async fn forward_output<R>(source: R, mut sink: Option<File>, stream: OutputStream)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(source).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "zapper::daemon", %stream, "{line}");
        if let Some(file) = sink.as_mut() {
            let written = file.write_all(format!("{line}\n").as_bytes()).await;
            if written.and(file.flush().await).is_err() {
                sink = None;
            }
        }
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
