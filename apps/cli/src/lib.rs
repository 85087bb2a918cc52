//! Shared plumbing for the live boot utilities: logging setup and argument
//! parsing with the exit codes the boot scripts expect.

use std::ffi::OsString;
use std::process::ExitCode;

use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Maps the number of `-v`/`-d` flags onto a log level. Warnings are always
/// shown.
pub fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Sets up logging to stderr. `RUST_LOG` takes precedence over `verbosity`.
pub fn init_tracing(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_for(verbosity).to_string()));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}

/// Parses the process arguments.
///
/// On `--help`/`--version` the text is printed and `Err(ExitCode::SUCCESS)`
/// is returned; on invalid arguments the usage error is printed and
/// `Err(ExitCode::FAILURE)` is returned.
pub fn parse_args<P: Parser>() -> Result<P, ExitCode> {
    parse_args_from(std::env::args_os())
}

/// [`parse_args`] over an explicit argument list.
pub fn parse_args_from<P, I, T>(args: I) -> Result<P, ExitCode>
where
    P: Parser,
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    P::try_parse_from(args).map_err(|e| {
        let _ = e.print();
        if e.use_stderr() {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Parser, Debug)]
    #[command(name = "probe", version)]
    struct Args {
        #[arg(short, action = clap::ArgAction::Count)]
        verbose: u8,
    }

    #[test]
    fn test_level_for() {
        assert_eq!(level_for(0), LevelFilter::WARN);
        assert_eq!(level_for(2), LevelFilter::DEBUG);
        assert_eq!(level_for(9), LevelFilter::TRACE);
    }

    #[test]
    fn test_parse_exit_codes() {
        let args: Args = parse_args_from(["probe", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);

        let err = parse_args_from::<Args, _, _>(["probe", "--bogus"]).unwrap_err();
        assert_eq!(err, ExitCode::FAILURE);

        let err = parse_args_from::<Args, _, _>(["probe", "--help"]).unwrap_err();
        assert_eq!(err, ExitCode::SUCCESS);
    }
}
