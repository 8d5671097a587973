use std::path::PathBuf;

use thiserror::Error;
use zapper_common::ConfigError;

use crate::api::ApiError;
use crate::context::ContextError;
use crate::daemon::{DaemonError, OutputStream};
use crate::external::ScriptError;
use crate::report::ReportError;
use crate::scanner::{Phase, ScanError};

/// A failed run, tagged with the stage it failed in.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("unable to open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    DaemonLog(DaemonError),

    #[error("unable to load configuration: {0}")]
    Config(#[source] ConfigError),

    #[error(transparent)]
    XsltProgram(ReportError),

    #[error("daemon is not ready: {0}")]
    DaemonNotReady(#[source] DaemonError),

    #[error("unable to create control API client: {0}")]
    Client(#[source] ApiError),

    #[error("unable to create context: {0}")]
    Context(#[source] ContextError),

    #[error(transparent)]
    Scan(ScanError),

    #[error("unable to save report: {0}")]
    Report(#[source] ReportError),

    #[error("configuration is invalid: {0}")]
    InvalidForMode(#[source] ConfigError),

    #[error("unable to export context: {0}")]
    ContextExport(#[source] ApiError),

    #[error(transparent)]
    Script(ScriptError),
}

impl RunError {
    /// Process exit code for this failure. Stable across releases.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::LogFile { .. } => 3,
            RunError::DaemonLog(DaemonError::OutputLog {
                stream: OutputStream::Stderr,
                ..
            }) => 5,
            RunError::DaemonLog(_) => 4,
            RunError::Config(_) => 6,
            RunError::XsltProgram(_) => 7,
            RunError::DaemonNotReady(_) => 8,
            RunError::Client(_) => 9,
            RunError::Context(_) => 10,
            RunError::Scan(e) => match e.phase() {
                Some(Phase::AnonymousSpider) => 11,
                Some(Phase::AnonymousScan) => 12,
                Some(Phase::ForcedUser | Phase::UserSpider) => 13,
                Some(Phase::UserScan) => 14,
                None => 16,
            },
            RunError::Report(_) => 15,
            RunError::InvalidForMode(_) => 17,
            RunError::ContextExport(_) => 18,
            RunError::Script(_) => 19,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_stage_has_its_own_code() {
        let io = || std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        let api = || ApiError::Client("bad".into());
        let phase = |phase| RunError::Scan(ScanError::Phase { phase, source: api() });

        let cases = [
            (RunError::LogFile { path: "log".into(), source: io() }, 3),
            (
                RunError::DaemonLog(DaemonError::OutputLog {
                    stream: OutputStream::Stdout,
                    path: "out".into(),
                    source: io(),
                }),
                4,
            ),
            (
                RunError::DaemonLog(DaemonError::OutputLog {
                    stream: OutputStream::Stderr,
                    path: "err".into(),
                    source: io(),
                }),
                5,
            ),
            (RunError::Config(ConfigError::MissingField("context.target")), 6),
            (RunError::XsltProgram(ReportError::UnsupportedProgram("saxon".into())), 7),
            (RunError::DaemonNotReady(DaemonError::NotReady), 8),
            (RunError::Client(api()), 9),
            (RunError::Context(ContextError::Api(api())), 10),
            (phase(Phase::AnonymousSpider), 11),
            (phase(Phase::AnonymousScan), 12),
            (phase(Phase::ForcedUser), 13),
            (phase(Phase::UserSpider), 13),
            (phase(Phase::UserScan), 14),
            (RunError::Report(ReportError::Api(api())), 15),
            (RunError::Scan(ScanError::NoNodes), 16),
            (RunError::InvalidForMode(ConfigError::MissingField("context.format")), 17),
            (RunError::ContextExport(api()), 18),
            (RunError::Script(ScriptError::Failed(Some(3))), 19),
        ];

        for (err, code) in cases {
            assert_eq!(err.exit_code(), code, "{err}");
        }
    }
}
