use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use zapper_core::api::fake::FakeApi;
use zapper_core::daemon::DaemonSettings;
use zapper_core::report::XsltProgram;
use zapper_core::workflow::Workflow;

pub const REPORT: &str = "<?xml version=\"1.0\"?><OWASPZAPReport version=\"2.16.0\"/>\n";

/// Writes an executable `#!/bin/sh` script.
pub fn script(path: &Path, body: &str) -> anyhow::Result<PathBuf> {
    std::fs::write(path, format!("#!/bin/sh\n{body}\n"))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(path.to_path_buf())
}

/// A daemon that never prints anything and runs until killed.
pub fn fake_daemon(dir: &Path) -> anyhow::Result<PathBuf> {
    script(&dir.join("fake-daemon.sh"), "exec sleep 30")
}

/// An `xsltproc` stand-in that leaves the report untouched and records its
/// arguments next to it.
pub fn fake_xsltproc(dir: &Path) -> anyhow::Result<XsltProgram> {
    let record = dir.join("xsltproc.args");
    let path = script(
        &dir.join("xsltproc"),
        &format!("echo \"$@\" > {}", record.display()),
    )?;
    Ok(XsltProgram::from_path(path)?)
}

/// Writes a scan request below `dir` and returns its path.
pub fn request(dir: &Path, toml: &str) -> anyhow::Result<PathBuf> {
    let path = dir.join("request.toml");
    let text = format!(
        "[request]\nwork_directory = {:?}\n{toml}",
        dir.display().to_string()
    );
    std::fs::write(&path, text)?;
    Ok(path)
}

/// Mounts one credential directory per `(name, username, password)`.
pub fn credentials(dir: &Path, entries: &[(&str, &str, &str)]) -> anyhow::Result<()> {
    for (name, username, password) in entries {
        let entry = dir.join("workflow-secrets").join(name);
        std::fs::create_dir_all(&entry)?;
        std::fs::write(entry.join("username"), format!("{username}\n"))?;
        std::fs::write(entry.join("password"), format!("{password}\n"))?;
    }
    Ok(())
}

pub fn workflow(api: Arc<FakeApi>, dir: &Path) -> anyhow::Result<Workflow<FakeApi>> {
    let daemon = DaemonSettings::new(fake_daemon(dir)?, "api-key", Duration::from_secs(5));
    let xslt = fake_xsltproc(dir)?;
    Ok(Workflow::new(api, daemon, xslt, dir.join("zap.output.xml"))
        .with_poll_interval(Duration::from_millis(1)))
}
