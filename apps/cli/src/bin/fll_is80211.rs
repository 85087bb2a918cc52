//! Exits 0 if the named network interface is an 802.11 device.

use std::path::Path;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use fll_core::disk::SYSFS_ROOT;
use fll_core::wireless::is_80211;

#[derive(Parser, Debug)]
#[command(name = "fll_is80211")]
#[command(version)]
#[command(about = "Exit successfully if INTERFACE is a wireless device")]
struct Args {
    /// Increase diagnostic output (repeatable)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Network interface name, e.g. wlan0
    interface: String,
}

fn main() -> ExitCode {
    let args: Args = match fll_cli::parse_args() {
        Ok(args) => args,
        Err(code) => return code,
    };
    fll_cli::init_tracing(args.verbose);

    match is_80211(&args.interface, Path::new(SYSFS_ROOT)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
