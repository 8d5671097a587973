use std::path::Path;
use std::sync::Arc;

use zapper_common::ScanMode;
use zapper_core::api::fake::FakeApi;
use zapper_core::api::operations as ops;
use zapper_core::external::{REPORT_FILE, ScriptDriver};
use zapper_core::workflow;

use crate::support;

/// A scan script that records its arguments and drops a report where the
/// real script would.
fn fake_api_script(dir: &Path, exit_code: i32) -> anyhow::Result<ScriptDriver> {
    let body = format!(
        "echo \"$@\" > {args}\nprintf '%s' '{report}' > {out}\nexit {exit_code}",
        args = dir.join("script.args").display(),
        report = support::REPORT.trim_end(),
        out = dir.join(REPORT_FILE).display(),
    );
    let script = support::script(&dir.join("zap-api-scan.py"), &body)?;
    Ok(ScriptDriver::new(script, dir))
}

#[tokio::test]
async fn plain_api_scan_needs_no_daemon() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = support::request(
        dir.path(),
        "[context]\ntarget = \"http://x/openapi.json\"\nformat = \"openapi\"\n",
    )?;
    let cfg = workflow::load_config(&path, ScanMode::ApiScript)?;
    let api = Arc::new(FakeApi::new());
    let driver = fake_api_script(dir.path(), 1)?;

    support::workflow(api.clone(), dir.path())?
        .api_scan(&cfg, &driver)
        .await?;

    assert!(api.calls().is_empty());
    let args = std::fs::read_to_string(dir.path().join("script.args"))?;
    assert_eq!(
        args.trim(),
        format!("-t http://x/openapi.json -f openapi -x {REPORT_FILE} -S")
    );
    assert!(dir.path().join("zap.output.xml").exists());
    Ok(())
}

#[tokio::test]
async fn script_auth_exports_context_and_hook() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    support::credentials(dir.path(), &[("svc", "svc-user", "pw")])?;
    let path = support::request(
        dir.path(),
        r#"
[context]
target = "http://x/openapi.json"
format = "openapi"
exclude_regular_expressions = ["http://x/logout"]

[scan_options]
run_active_scan = true
api_scan_config_content = "10020\tIGNORE\t(X-Frame-Options)"

[authentication]
type = "scriptAuthentication"
login_indicator_regex = "Logout"

[script_authentication]
authentication_script_content = "{\"zest\": 1}"
"#,
    )?;
    let cfg = workflow::load_config(&path, ScanMode::ApiScript)?;
    let api = Arc::new(FakeApi::new());
    let driver = fake_api_script(dir.path(), 0)?;

    support::workflow(api.clone(), dir.path())?
        .api_scan(&cfg, &driver)
        .await?;

    let export = &api.calls_to(ops::EXPORT_CONTEXT)[0];
    let context_file = dir.path().join("Context.context");
    assert_eq!(
        export.param("contextFile"),
        Some(context_file.to_string_lossy().as_ref())
    );
    assert!(api.calls_to(ops::SPIDER_SCAN).is_empty());

    assert_eq!(
        std::fs::read_to_string(driver.auth_script_path())?,
        "{\"zest\": 1}"
    );
    let hook = dir.path().join("auth_hook.py");
    assert!(hook.exists());
    assert!(dir.path().join("api-scan.conf").exists());

    let args = std::fs::read_to_string(dir.path().join("script.args"))?;
    assert_eq!(
        args.trim(),
        format!(
            "-t http://x/openapi.json -f openapi -x {REPORT_FILE} -n Context.context -U svc-user --hook={} -c api-scan.conf",
            hook.display()
        )
    );
    Ok(())
}

#[tokio::test]
async fn failing_script_has_its_own_exit_code() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = support::request(
        dir.path(),
        "[context]\ntarget = \"http://x/openapi.json\"\nformat = \"openapi\"\n",
    )?;
    let cfg = workflow::load_config(&path, ScanMode::ApiScript)?;
    let driver = fake_api_script(dir.path(), 3)?;

    let err = support::workflow(Arc::new(FakeApi::new()), dir.path())?
        .api_scan(&cfg, &driver)
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), 19);
    assert!(!dir.path().join("zap.output.xml").exists());
    Ok(())
}

#[tokio::test]
async fn rejected_export_has_its_own_exit_code() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = support::request(
        dir.path(),
        "[context]\ntarget = \"http://x/openapi.json\"\nformat = \"openapi\"\ninclude_regular_expressions = [\"http://x/api.*\"]\n",
    )?;
    let cfg = workflow::load_config(&path, ScanMode::ApiScript)?;
    let api = Arc::new(FakeApi::new());
    api.reject(ops::EXPORT_CONTEXT, "internal_error", "disk full");
    let driver = fake_api_script(dir.path(), 0)?;

    let err = support::workflow(api, dir.path())?
        .api_scan(&cfg, &driver)
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), 18);
    assert!(!dir.path().join("script.args").exists());
    Ok(())
}

#[test]
fn two_credentials_are_rejected_in_script_mode() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    support::credentials(dir.path(), &[("a", "a", "1"), ("b", "b", "2")])?;
    let path = support::request(
        dir.path(),
        "[context]\ntarget = \"http://x/openapi.json\"\nformat = \"openapi\"\n[authentication]\ntype = \"formAuthentication\"\n",
    )?;

    let err = workflow::load_config(&path, ScanMode::ApiScript).unwrap_err();

    assert_eq!(err.exit_code(), 17);
    Ok(())
}

#[test]
fn forced_user_mode_is_daemon_only() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = support::request(
        dir.path(),
        "[context]\ntarget = \"http://x\"\nformat = \"openapi\"\n[authentication]\nforced_user_mode = true\n",
    )?;

    let err = workflow::load_config(&path, ScanMode::ApiScript).unwrap_err();

    assert_eq!(err.exit_code(), 17);
    Ok(())
}
