use std::sync::Arc;

use serde_json::json;
use zapper_common::ScanMode;
use zapper_core::api::fake::FakeApi;
use zapper_core::api::operations as ops;
use zapper_core::workflow;

use crate::support;

/// Operations that start a crawl, a scan or switch users.
const SCAN_STEPS: [zapper_core::api::operations::Operation; 6] = [
    ops::SPIDER_SCAN,
    ops::ACTIVE_SCAN,
    ops::SET_FORCED_USER,
    ops::SPIDER_SCAN_AS_USER,
    ops::ACTIVE_SCAN_AS_USER,
    ops::NEW_USER,
];

#[tokio::test]
async fn anonymous_scan_end_to_end() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = support::request(
        dir.path(),
        "[context]\ntarget = \"http://x\"\n[scan_options]\nrun_active_scan = true\n",
    )?;
    let cfg = workflow::load_config(&path, ScanMode::Daemon)?;
    let api = Arc::new(FakeApi::new());
    api.set_report(support::REPORT.as_bytes());

    let nodes = support::workflow(api.clone(), dir.path())?
        .daemon_scan(&cfg)
        .await?;

    assert_eq!(nodes, 2);
    assert_eq!(api.calls_to(ops::NEW_CONTEXT).len(), 1);
    assert_eq!(
        api.calls_to(ops::INCLUDE_IN_CONTEXT)[0].param("regex"),
        Some("http://x.*")
    );
    let steps: Vec<_> = api
        .operations()
        .into_iter()
        .filter(|op| SCAN_STEPS.contains(op))
        .collect();
    assert_eq!(steps, vec![ops::SPIDER_SCAN, ops::ACTIVE_SCAN]);

    let report = std::fs::read_to_string(dir.path().join("zap.output.xml"))?;
    assert_eq!(report, support::REPORT);
    let filter_args = std::fs::read_to_string(dir.path().join("xsltproc.args"))?;
    assert!(filter_args.starts_with("-o "));
    Ok(())
}

#[tokio::test]
async fn form_users_are_spidered_and_scanned_in_order() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    support::credentials(dir.path(), &[("1-alice", "alice", "pw1"), ("2-bob", "bob", "pw2")])?;
    let path = support::request(
        dir.path(),
        r#"
[context]
target = "http://x"
import_urls = ["http://x/hidden"]

[scan_options]
run_active_scan = true

[authentication]
type = "formAuthentication"
login_indicator_regex = "Logout"
forced_user_mode = true

[form_authentication]
form_url = "http://x/login"
form_username_field_name = "user"
form_password_field_name = "pass"
"#,
    )?;
    let cfg = workflow::load_config(&path, ScanMode::Daemon)?;
    let api = Arc::new(FakeApi::new());

    let nodes = support::workflow(api.clone(), dir.path())?
        .daemon_scan(&cfg)
        .await?;

    assert_eq!(nodes, 6);
    assert_eq!(api.calls_to(ops::IMPORT_URLS).len(), 1);
    assert!(api.calls_to(ops::ADD_ANTI_CSRF_TOKEN).is_empty());

    let users: Vec<_> = api
        .calls_to(ops::NEW_USER)
        .iter()
        .filter_map(|c| c.param("name").map(str::to_string))
        .collect();
    assert_eq!(users, vec!["alice", "bob"]);

    let steps: Vec<_> = api
        .operations()
        .into_iter()
        .filter(|op| SCAN_STEPS.contains(op))
        .collect();
    assert_eq!(
        steps,
        vec![
            ops::NEW_USER,
            ops::NEW_USER,
            ops::SPIDER_SCAN,
            ops::ACTIVE_SCAN,
            ops::SET_FORCED_USER,
            ops::SPIDER_SCAN_AS_USER,
            ops::ACTIVE_SCAN_AS_USER,
            ops::SET_FORCED_USER,
            ops::SPIDER_SCAN_AS_USER,
            ops::ACTIVE_SCAN_AS_USER,
        ]
    );
    Ok(())
}

#[tokio::test]
async fn user_scan_failure_has_its_own_exit_code() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    support::credentials(dir.path(), &[("alice", "alice", "pw")])?;
    let path = support::request(
        dir.path(),
        r#"
[context]
target = "http://x"

[scan_options]
run_active_scan = true

[authentication]
type = "scriptAuthentication"
login_indicator_regex = "Logout"

[script_authentication]
authentication_script_content = "{}"
"#,
    )?;
    let cfg = workflow::load_config(&path, ScanMode::Daemon)?;
    let api = Arc::new(FakeApi::new());
    api.reject(ops::ACTIVE_SCAN_AS_USER, "user_not_found", "gone");

    let err = support::workflow(api.clone(), dir.path())?
        .daemon_scan(&cfg)
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), 14);
    assert!(api.calls_to(ops::XML_REPORT).is_empty());
    Ok(())
}

#[tokio::test]
async fn spiders_without_nodes_fail_the_run() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = support::request(dir.path(), "[context]\ntarget = \"http://typo\"\n")?;
    let cfg = workflow::load_config(&path, ScanMode::Daemon)?;
    let api = Arc::new(FakeApi::new());
    api.script(ops::SPIDER_ADDED_NODES, [json!({"addedNodes": []})]);

    let err = support::workflow(api, dir.path())?
        .daemon_scan(&cfg)
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), 16);
    assert!(!dir.path().join("zap.output.xml").exists());
    Ok(())
}

#[test]
fn script_only_fields_are_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = support::request(
        dir.path(),
        "[context]\ntarget = \"http://x\"\nformat = \"openapi\"\n",
    )?;

    let err = workflow::load_config(&path, ScanMode::Daemon).unwrap_err();

    assert_eq!(err.exit_code(), 17);
    Ok(())
}
