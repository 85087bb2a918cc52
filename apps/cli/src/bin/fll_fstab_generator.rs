//! Writes fstab records for the block devices of the running host.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use fll_core::generator::open_sink;
use fll_core::{ClassifierOptions, FstabGenerator, GeneratorConfig, HostPaths, ProbeIdentity};

#[derive(Parser, Debug)]
#[command(name = "fll_fstab_generator")]
#[command(version)]
#[command(about = "Generate fstab entries for the block devices of this host")]
struct Args {
    /// Write `auto` instead of `noauto` for removable media entries
    #[arg(short, long)]
    auto: bool,

    /// Probe devices directly instead of using udev properties
    #[arg(short, long)]
    blkid: bool,

    /// Precede labelled entries with a `# <label>` comment
    #[arg(short = 'c', long)]
    label_comments: bool,

    /// Write to FILE instead of standard output
    #[arg(short, long, value_name = "FILE")]
    file: Option<PathBuf>,

    /// Address Linux filesystems by label
    #[arg(short, long)]
    labels: bool,

    /// Create missing mount point directories
    #[arg(short, long)]
    mkdir: bool,

    /// Ignore the live mount table
    #[arg(short, long)]
    nomounts: bool,

    /// Include removable devices
    #[arg(short, long)]
    removable: bool,

    /// Do not write swap entries
    #[arg(short = 's', long)]
    noswap: bool,

    /// Address Linux filesystems by UUID
    #[arg(short, long)]
    uuids: bool,

    /// Increase diagnostic output (repeatable)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Include this removable device (repeatable)
    #[arg(short, long, value_name = "DEVICE")]
    wanted: Vec<PathBuf>,

    /// Only process these devices
    #[arg(value_name = "DEVICE")]
    devices: Vec<PathBuf>,
}

impl Args {
    fn generator_config(&self) -> GeneratorConfig {
        let classifier = ClassifierOptions {
            use_uuids: self.uuids,
            use_labels: self.labels,
            prefer_automount: self.auto,
            suppress_swap: self.noswap,
            create_mountpoints: self.mkdir,
            skip_mount_scan: self.nomounts,
            label_comments: self.label_comments,
            ..ClassifierOptions::default()
        };
        let config = GeneratorConfig::new()
            .with_classifier(classifier)
            .with_inputs(self.devices.clone())
            .with_wanted(self.wanted.clone())
            .with_removable(self.removable);

        if self.blkid {
            config.with_raw_probe(ProbeIdentity::nobody())
        } else {
            config
        }
    }
}

fn main() -> ExitCode {
    let args: Args = match fll_cli::parse_args() {
        Ok(args) => args,
        Err(code) => return code,
    };
    fll_cli::init_tracing(args.verbose);

    let mut sink = match open_sink(args.file.as_deref()) {
        Ok(sink) => sink,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let generator = FstabGenerator::new(HostPaths::default(), args.generator_config());
    match generator.run(&mut sink) {
        Ok(summary) => {
            tracing::info!("wrote {} of {} devices", summary.emitted, summary.seen);
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_map_to_config() {
        let args: Args = fll_cli::parse_args_from([
            "fll_fstab_generator",
            "-u",
            "-a",
            "-n",
            "-s",
            "-w",
            "/dev/sdb",
            "-w",
            "/dev/sdc",
            "/dev/sda",
        ])
        .unwrap();
        let config = args.generator_config();

        assert!(config.classifier.use_uuids);
        assert!(config.classifier.prefer_automount);
        assert!(config.classifier.skip_mount_scan);
        assert!(config.classifier.suppress_swap);
        assert!(!config.classifier.create_mountpoints);
        assert!(!config.raw_probe);
        assert_eq!(config.wanted, vec![PathBuf::from("/dev/sdb"), PathBuf::from("/dev/sdc")]);
        assert_eq!(config.inputs, vec![PathBuf::from("/dev/sda")]);
    }

    #[test]
    fn test_blkid_enables_raw_probe() {
        let args: Args =
            fll_cli::parse_args_from(["fll_fstab_generator", "-b", "-m", "-c"]).unwrap();
        let config = args.generator_config();
        assert!(config.raw_probe);
        assert!(config.classifier.create_mountpoints);
        assert!(config.classifier.label_comments);
    }
}
