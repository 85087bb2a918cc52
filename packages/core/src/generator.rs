//! The fstab generator pipeline.
//!
//! Enumerates block devices, selects the ones wanted on this boot, turns each
//! into a [`DeviceRecord`], classifies it and writes the resulting line. A
//! device that cannot be inspected is skipped; only failures to enumerate or
//! to write the output abort the run.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use snafu::ResultExt;

use crate::classify::{ClassifierOptions, classify};
use crate::disk::{self, BlockDevice, DeviceRecord, HostPaths};
use crate::error::{Error, OutputOpenSnafu, OutputWriteSnafu, Result};
use crate::fstab::{SPEC_WIDTH, UUID_SPEC_WIDTH, write_entry};
use crate::mount::{MountStateLookup, MountTable, create_mount_point};
use crate::preset::{FilesystemKind, FsUsage};
use crate::privilege::ProbeIdentity;
use crate::probe::probe_device;

/// Configuration for one generator run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorConfig {
    pub classifier: ClassifierOptions,
    /// Explicit devices; when non-empty only these are processed.
    pub inputs: Vec<PathBuf>,
    /// Removable devices that are processed even without `include_removable`.
    pub wanted: Vec<PathBuf>,
    pub include_removable: bool,
    /// Probe devices directly instead of trusting udev properties.
    pub raw_probe: bool,
    pub probe_identity: ProbeIdentity,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierOptions::default(),
            inputs: Vec::new(),
            wanted: Vec::new(),
            include_removable: false,
            raw_probe: false,
            probe_identity: ProbeIdentity::default(),
        }
    }
}

impl GeneratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_classifier(mut self, classifier: ClassifierOptions) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_inputs(mut self, inputs: Vec<PathBuf>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_wanted(mut self, wanted: Vec<PathBuf>) -> Self {
        self.wanted = wanted;
        self
    }

    pub fn with_removable(mut self, include: bool) -> Self {
        self.include_removable = include;
        self
    }

    /// Enables raw probing as `identity`.
    pub fn with_raw_probe(mut self, identity: ProbeIdentity) -> Self {
        self.raw_probe = true;
        self.probe_identity = identity;
        self
    }
}

/// Counts from one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Selected devices.
    pub seen: usize,
    /// Records written.
    pub emitted: usize,
    /// Selected devices that produced no record.
    pub skipped: usize,
}

/// Opens the output sink: the named file (truncated), or standard output.
pub fn open_sink(path: Option<&Path>) -> Result<Box<dyn Write>> {
    match path {
        Some(path) => {
            let file = File::create(path).context(OutputOpenSnafu { path })?;
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(io::stdout().lock())),
    }
}

/// Generates fstab records for the devices of one host.
#[derive(Debug, Clone)]
pub struct FstabGenerator {
    paths: HostPaths,
    config: GeneratorConfig,
}

impl FstabGenerator {
    pub fn new(paths: HostPaths, config: GeneratorConfig) -> Self {
        Self { paths, config }
    }

    /// Runs one enumeration pass, writing records to `sink`.
    pub fn run<W: Write + ?Sized>(&self, sink: &mut W) -> Result<RunSummary> {
        let mount_table = self.load_mount_table();
        let lookup = mount_table.as_ref().map(|t| t as &dyn MountStateLookup);
        let devices = disk::list_block_devices(&self.paths)?;
        let spec_width = if self.config.classifier.use_uuids {
            UUID_SPEC_WIDTH
        } else {
            SPEC_WIDTH
        };

        let mut summary = RunSummary::default();
        let mut disk_count = 0u32;

        for device in devices.iter().filter(|d| d.is_candidate()) {
            if !self.is_selected(device) {
                tracing::trace!("{}: not selected", device.path.display());
                continue;
            }
            summary.seen += 1;

            let numbered = !device.is_mapped() && !device.is_drive_media();
            if numbered && device.is_disk() {
                disk_count += 1;
            }
            let disk_index = (numbered && disk_count > 0).then_some(disk_count);

            let record = match self.build_record(device, disk_index) {
                Ok(record) => record,
                Err(e) => {
                    match e {
                        Error::NoSignature { .. } => tracing::debug!("skipping: {}", e),
                        _ => tracing::warn!("skipping {}: {}", device.path.display(), e),
                    }
                    summary.skipped += 1;
                    continue;
                }
            };

            let Some(classification) = classify(&record, lookup, &self.config.classifier) else {
                summary.skipped += 1;
                continue;
            };

            if self.config.classifier.create_mountpoints && classification.has_directory() {
                let mount_point = &classification.entry.mount_point;
                match create_mount_point(mount_point) {
                    Ok(true) => tracing::info!("created {}", mount_point.display()),
                    Ok(false) => {}
                    Err(e) => tracing::warn!("{}: {}", e, source_message(&e)),
                }
            }

            write_entry(
                sink,
                &classification.entry,
                classification.comment.as_deref(),
                spec_width,
            )?;
            summary.emitted += 1;
        }

        sink.flush().context(OutputWriteSnafu)?;
        tracing::debug!(
            "{} devices selected, {} records written, {} skipped",
            summary.seen,
            summary.emitted,
            summary.skipped
        );
        Ok(summary)
    }

    fn load_mount_table(&self) -> Option<MountTable> {
        if self.config.classifier.skip_mount_scan {
            return None;
        }
        match MountTable::read(&self.paths.mounts) {
            Ok(table) => Some(table),
            Err(e) => {
                tracing::warn!("{}: {}", e, source_message(&e));
                None
            }
        }
    }

    fn is_selected(&self, device: &BlockDevice) -> bool {
        if !self.config.inputs.is_empty() {
            return device.matches_any(&self.config.inputs);
        }
        if device.removable && !self.config.include_removable {
            return device.matches_any(&self.config.wanted);
        }
        true
    }

    fn build_record(&self, device: &BlockDevice, disk_index: Option<u32>) -> Result<DeviceRecord> {
        let mut record = DeviceRecord::new(&device.path).with_alternate_paths(device.links.clone());
        record.disk_index = disk_index;
        record.partition_index = device.partition;

        if self.config.raw_probe {
            let probed = probe_device(&device.path, self.config.probe_identity)?;
            record.filesystem = Some(probed.fs_type);
            record.usage = Some(probed.usage);
            record.label = probed.label.or_else(|| device.fs_label.clone());
            record.uuid = probed.uuid.or_else(|| device.fs_uuid.clone());
        } else {
            record.filesystem = device.fs_type.as_deref().map(FilesystemKind::from);
            record.usage = device.fs_usage.as_deref().map(FsUsage::from);
            record.label = device.fs_label.clone();
            record.uuid = device.fs_uuid.clone();
        }

        Ok(record)
    }
}

fn source_message(e: &Error) -> String {
    std::error::Error::source(e)
        .map(|s| s.to_string())
        .unwrap_or_default()
}
