//! # Report Generation
//!
//! Saves the daemon's XML report (or copies one produced by the external
//! script) and filters out alerts below the configured risk and confidence
//! thresholds with an XSLT program.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::api::{ApiError, ControlApi};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("unable to find XSLT program at {0}")]
    ProgramMissing(PathBuf),

    #[error("the specified XSLT program ({0}) is unsupported")]
    UnsupportedProgram(PathBuf),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("unable to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to copy {from} to {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to run {program}: {source}")]
    Launch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    Transform { program: PathBuf, status: std::process::ExitStatus },
}

/// One of the two supported XSLT processors. They disagree on where the
/// output argument goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XsltProgram {
    Xsltproc(PathBuf),
    Msxsl(PathBuf),
}

impl XsltProgram {
    /// Picks the processor by the suffix of the configured path.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, ReportError> {
        let path = path.into();
        let name = path.to_string_lossy();
        if name.ends_with("xsltproc") {
            Ok(XsltProgram::Xsltproc(path))
        } else if name.ends_with("msxsl") || name.ends_with("msxsl.exe") {
            Ok(XsltProgram::Msxsl(path))
        } else {
            Err(ReportError::UnsupportedProgram(path))
        }
    }

    /// Like [`XsltProgram::from_path`], but also requires the program to
    /// exist, either at the given path or, for a bare name, on `PATH`.
    pub fn locate(path: impl Into<PathBuf>) -> Result<Self, ReportError> {
        let program = Self::from_path(path)?;
        let path = program.path();
        let found = if path.components().count() > 1 {
            path.exists()
        } else {
            path.exists() || on_search_path(path)
        };
        if !found {
            return Err(ReportError::ProgramMissing(path.to_path_buf()));
        }
        Ok(program)
    }

    pub fn path(&self) -> &Path {
        match self {
            XsltProgram::Xsltproc(path) | XsltProgram::Msxsl(path) => path,
        }
    }

    /// Arguments transforming `report` in place with `stylesheet`.
    pub fn args(&self, stylesheet: &Path, report: &Path) -> Vec<OsString> {
        let (stylesheet, report) = (stylesheet.as_os_str().to_owned(), report.as_os_str().to_owned());
        match self {
            XsltProgram::Xsltproc(_) => vec!["-o".into(), report.clone(), stylesheet, report],
            XsltProgram::Msxsl(_) => vec![report.clone(), stylesheet, "-o".into(), report],
        }
    }
}

fn on_search_path(name: &Path) -> bool {
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(name).is_file()))
        .unwrap_or(false)
}

/// Minimum risk code and confidence an alert needs to stay in the report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportFilter {
    pub min_risk: u32,
    pub min_confidence: u32,
}

impl ReportFilter {
    pub fn new(min_risk: u32, min_confidence: u32) -> Self {
        Self {
            min_risk,
            min_confidence,
        }
    }

    /// Identity transform that drops alerts failing either threshold.
    pub fn stylesheet(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="1.0">
  <xsl:template match="@*|node()">
    <xsl:copy>
      <xsl:apply-templates select="@*|node()"/>
    </xsl:copy>
  </xsl:template>
  <xsl:template match="OWASPZAPReport/site/alerts/alertitem[riskcode &lt; {}]"/>
  <xsl:template match="OWASPZAPReport/site/alerts/alertitem[confidence &lt; {}]"/>
</xsl:stylesheet>"#,
            self.min_risk, self.min_confidence
        )
    }

    /// Filters `report` in place.
    pub async fn apply(&self, program: &XsltProgram, report: &Path) -> Result<(), ReportError> {
        let io_error = |source| ReportError::Io {
            path: std::env::temp_dir(),
            source,
        };
        let mut stylesheet = tempfile::Builder::new()
            .prefix("report-filter-xslt")
            .tempfile()
            .map_err(io_error)?;
        stylesheet
            .write_all(self.stylesheet().as_bytes())
            .map_err(io_error)?;
        stylesheet.flush().map_err(io_error)?;

        let output = Command::new(program.path())
            .args(program.args(stylesheet.path(), report))
            .output()
            .await
            .map_err(|source| ReportError::Launch {
                program: program.path().to_path_buf(),
                source,
            })?;

        if !output.status.success() {
            error!("{}", String::from_utf8_lossy(&output.stdout));
            error!("{}", String::from_utf8_lossy(&output.stderr));
            return Err(ReportError::Transform {
                program: program.path().to_path_buf(),
                status: output.status,
            });
        }
        debug!(
            "Filtered {} (risk >= {}, confidence >= {})",
            report.display(),
            self.min_risk,
            self.min_confidence
        );
        Ok(())
    }
}

/// Writes the daemon's report to `output` and filters it.
pub async fn generate<C>(
    client: &C,
    program: &XsltProgram,
    output: &Path,
    filter: ReportFilter,
) -> Result<(), ReportError>
where
    C: ControlApi + ?Sized,
{
    let report = client.xml_report().await?;
    tokio::fs::write(output, &report)
        .await
        .map_err(|source| ReportError::Io {
            path: output.to_path_buf(),
            source,
        })?;
    info!("Saved report to {}", output.display());
    filter.apply(program, output).await
}

/// Copies a report produced elsewhere to `output` and filters the copy. The
/// source may live on another filesystem, so it is copied rather than moved.
pub async fn copy_then_filter(
    source: &Path,
    output: &Path,
    program: &XsltProgram,
    filter: ReportFilter,
) -> Result<(), ReportError> {
    tokio::fs::copy(source, output)
        .await
        .map_err(|e| ReportError::Copy {
            from: source.to_path_buf(),
            to: output.to_path_buf(),
            source: e,
        })?;
    info!("Copied report to {}", output.display());
    filter.apply(program, output).await
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
