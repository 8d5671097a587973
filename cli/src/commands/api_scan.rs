use std::sync::Arc;

use zapper_common::ScanMode;
use zapper_core::RunError;
use zapper_core::external::ScriptDriver;
use zapper_core::workflow::{self, Workflow};

use super::ApiScanArgs;
use crate::terminal::print;

pub async fn api_scan(args: &ApiScanArgs) -> Result<(), RunError> {
    let common = &args.common;

    let xslt = workflow::locate_xslt(&common.xslt_program)?;
    let cfg = workflow::load_config(&common.config, ScanMode::ApiScript)?;
    print::request(&cfg);

    let client = workflow::create_client(&common.api_url, &common.api_key)?;
    let flow = Workflow::new(Arc::new(client), common.daemon_settings(), xslt, &common.output);
    let driver = ScriptDriver::new(&args.script_path, &args.work_dir);

    print::header("running api scan");
    flow.api_scan(&cfg, &driver).await?;

    print::header("done");
    print::aligned_line("Report", common.output.display().to_string());
    Ok(())
}
