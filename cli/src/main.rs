mod commands;
mod terminal;

use commands::{CommandLine, Commands, api_scan, scan};
use terminal::{logging, print, spinner};
use tracing::error;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let commands = CommandLine::parse_args();

    if let Err(e) = logging::init(commands.command.common().log_file.as_deref()) {
        eprintln!("{e}");
        std::process::exit(e.exit_code());
    }
    print::banner();

    let outcome = match &commands.command {
        Commands::Scan(args) => {
            print::header("daemon scan");
            scan::scan(args).await
        }
        Commands::ApiScan(args) => {
            print::header("api scan");
            api_scan::api_scan(args).await
        }
    };

    if let Err(e) = outcome {
        error!("{e}");
        spinner::finish();
        std::process::exit(e.exit_code());
    }

    print::end_of_program();
    spinner::finish();
    Ok(())
}
