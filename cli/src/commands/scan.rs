use std::sync::Arc;

use zapper_common::ScanMode;
use zapper_core::RunError;
use zapper_core::workflow::{self, Workflow};

use super::ScanArgs;
use crate::terminal::{print, spinner};

pub async fn scan(args: &ScanArgs) -> Result<(), RunError> {
    let common = &args.common;

    let xslt = workflow::locate_xslt(&common.xslt_program)?;
    let cfg = workflow::load_config(&common.config, ScanMode::Daemon)?;
    print::request(&cfg);

    let client = workflow::create_client(&common.api_url, &common.api_key)?;
    let flow = Workflow::new(Arc::new(client), common.daemon_settings(), xslt, &common.output)
        .with_progress(spinner::report_scan_progress);

    print::header("scanning");
    let nodes = flow.daemon_scan(&cfg).await?;

    print::header("done");
    print::aligned_line("Nodes", nodes.to_string());
    print::aligned_line("Report", common.output.display().to_string());
    Ok(())
}
