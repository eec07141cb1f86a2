use std::process::ExitCode;

use clap::Parser;
use refstudio::{cli, logger};

fn main() -> ExitCode {
    let args = cli::CliArgs::parse();

    // Initialize session log (overwrites previous session log)
    logger::init(args.verbose);
    log::info!("refstudio {}", env!("CARGO_PKG_VERSION"));

    cli::run(args)
}
