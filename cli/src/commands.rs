pub mod api_scan;
pub mod scan;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use zapper_core::api::http::{DEFAULT_API_KEY, DEFAULT_API_URL};
use zapper_core::daemon::DaemonSettings;
use zapper_core::external::{DEFAULT_SCRIPT_PATH, DEFAULT_WORK_DIR};

#[derive(Parser)]
#[command(name = "zapper")]
#[command(about = "Runs OWASP ZAP scans described by a scan request.")]
pub struct CommandLine {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Spider and scan a web application with a supervised ZAP daemon
    #[command(alias = "s")]
    Scan(ScanArgs),
    /// Scan an API with the packaged API scan script
    #[command(alias = "a")]
    ApiScan(ApiScanArgs),
}

impl Commands {
    pub fn common(&self) -> &CommonArgs {
        match self {
            Commands::Scan(args) => &args.common,
            Commands::ApiScan(args) => &args.common,
        }
    }
}

/// Flags shared by both scan modes.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Path to the TOML scan request
    #[arg(short, long)]
    pub config: PathBuf,

    /// Path to the ZAP program (.sh, .jar or executable)
    #[arg(long, default_value = "zap.sh")]
    pub daemon_path: PathBuf,

    /// Seconds to wait for the ZAP API to become available
    #[arg(long, default_value_t = 450)]
    pub daemon_startup_wait: u64,

    /// XSLT program used to filter the report (xsltproc or msxsl)
    #[arg(long, default_value = "xsltproc")]
    pub xslt_program: PathBuf,

    /// Where the filtered report is written
    #[arg(short, long, default_value = "zap.output.xml")]
    pub output: PathBuf,

    /// Base address of the ZAP API
    #[arg(long, default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// Key the ZAP daemon is started with
    #[arg(long, default_value = DEFAULT_API_KEY)]
    pub api_key: String,

    /// Also append log output to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Append the daemon's stdout to this file
    #[arg(long)]
    pub daemon_stdout_log: Option<PathBuf>,

    /// Append the daemon's stderr to this file
    #[arg(long)]
    pub daemon_stderr_log: Option<PathBuf>,
}

impl CommonArgs {
    pub fn daemon_settings(&self) -> DaemonSettings {
        let mut settings = DaemonSettings::new(
            &self.daemon_path,
            &self.api_key,
            Duration::from_secs(self.daemon_startup_wait),
        );
        settings.stdout_log = self.daemon_stdout_log.clone();
        settings.stderr_log = self.daemon_stderr_log.clone();
        settings
    }
}

#[derive(Args, Debug, Clone)]
pub struct ScanArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ApiScanArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Path to zap-api-scan.py
    #[arg(long, default_value = DEFAULT_SCRIPT_PATH)]
    pub script_path: PathBuf,

    /// Working directory the script reads from and writes to
    #[arg(long, default_value = DEFAULT_WORK_DIR)]
    pub work_dir: PathBuf,
}

impl CommandLine {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_line_is_consistent() {
        CommandLine::command().debug_assert();
    }

    #[test]
    fn defaults_match_documented_values() {
        let cli = CommandLine::try_parse_from(["zapper", "scan", "--config", "req.toml"]).unwrap();
        let common = cli.command.common();

        assert_eq!(common.daemon_path, PathBuf::from("zap.sh"));
        assert_eq!(common.daemon_startup_wait, 450);
        assert_eq!(common.output, PathBuf::from("zap.output.xml"));
        assert_eq!(common.api_url, DEFAULT_API_URL);
        assert!(common.log_file.is_none());
    }

    #[test]
    fn api_scan_has_script_flags() {
        let cli = CommandLine::try_parse_from([
            "zapper",
            "api-scan",
            "-c",
            "req.toml",
            "--work-dir",
            "/tmp/wrk",
        ])
        .unwrap();

        let Commands::ApiScan(args) = cli.command else {
            panic!("expected api-scan");
        };
        assert_eq!(args.script_path, PathBuf::from(DEFAULT_SCRIPT_PATH));
        assert_eq!(args.work_dir, PathBuf::from("/tmp/wrk"));
    }

    #[test]
    fn config_is_required() {
        assert!(CommandLine::try_parse_from(["zapper", "scan"]).is_err());
    }
}
