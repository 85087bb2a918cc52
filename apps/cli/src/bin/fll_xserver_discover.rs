//! Prints shell assignments describing each VGA adapter and its X driver.

use std::io::{self, Write};
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use fll_core::XserverConfig;
use fll_core::pci::discover_display_adapters;

#[derive(Parser, Debug)]
#[command(name = "fll_xserver_discover")]
#[command(version)]
#[command(about = "Describe VGA adapters as shell variable assignments")]
struct Args {
    /// Print per-device diagnostics to stderr (repeatable)
    #[arg(short, long, action = ArgAction::Count)]
    debug: u8,
}

fn main() -> ExitCode {
    let args: Args = match fll_cli::parse_args() {
        Ok(args) => args,
        Err(code) => return code,
    };
    fll_cli::init_tracing(args.debug);

    let adapters = match discover_display_adapters(&XserverConfig::default()) {
        Ok(adapters) => adapters,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut out = io::stdout().lock();
    for adapter in &adapters {
        if let Err(e) = out.write_all(adapter.to_shell().as_bytes()) {
            tracing::error!("failed to write output: {}", e);
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}
