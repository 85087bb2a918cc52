//! Device classification: deciding whether and how a device gets an fstab line.
//!
//! The decision is made in a fixed order:
//!
//! 1. devices without a filesystem type, or whose signature is not a plain
//!    filesystem or swap, get nothing;
//! 2. swap gets `none sw 0 0` unless swap entries are suppressed;
//! 3. Linux-native filesystems already mounted on the live system keep their
//!    mount directory, with tuned options and pass 1 (root) or 2;
//! 4. everything else is given a mount point under the media root and the
//!    option set of its filesystem kind. Kinds without a rule get nothing.

use std::path::{Path, PathBuf};

use crate::disk::{DeviceRecord, decode_udev_string};
use crate::fstab::FstabEntry;
use crate::mount::MountStateLookup;
use crate::preset::{FilesystemKind, SWAP_MOUNT_POINT, rule_for};

/// Default directory under which media mount points are created.
pub const MEDIA_ROOT: &str = "/media";

/// Toggles that shape each classified record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierOptions {
    /// Address Linux filesystems as `UUID=...`.
    pub use_uuids: bool,
    /// Address Linux filesystems as `LABEL=...`.
    pub use_labels: bool,
    /// Write `auto` instead of `noauto` for media entries.
    pub prefer_automount: bool,
    pub suppress_swap: bool,
    pub create_mountpoints: bool,
    /// Do not consult the live mount table.
    pub skip_mount_scan: bool,
    /// Precede labelled records with a `# <label>` comment.
    pub label_comments: bool,
    pub media_root: PathBuf,
}

impl Default for ClassifierOptions {
    fn default() -> Self {
        Self {
            use_uuids: false,
            use_labels: false,
            prefer_automount: false,
            suppress_swap: false,
            create_mountpoints: false,
            skip_mount_scan: false,
            label_comments: false,
            media_root: PathBuf::from(MEDIA_ROOT),
        }
    }
}

/// Where a classified record's mount point came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Swap area, mount point `none`.
    Swap,
    /// Mount directory taken from the live mount table.
    Mounted,
    /// Synthesized mount point under the media root.
    Media,
}

/// Outcome for one device that gets a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub entry: FstabEntry,
    pub placement: Placement,
    /// Comment line written before the record.
    pub comment: Option<String>,
}

impl Classification {
    /// Returns true if the mount point is a directory that may need creating.
    pub fn has_directory(&self) -> bool {
        self.placement != Placement::Swap
    }
}

/// Classifies one device.
///
/// `lookup` is consulted only for non-swap devices and only when the mount
/// scan is enabled.
pub fn classify(
    record: &DeviceRecord,
    lookup: Option<&dyn MountStateLookup>,
    options: &ClassifierOptions,
) -> Option<Classification> {
    let Some(kind) = record.filesystem.as_ref() else {
        tracing::debug!("{}: no filesystem type", record.device_path.display());
        return None;
    };
    if let Some(usage) = &record.usage
        && !usage.is_classifiable()
    {
        tracing::debug!("{}: usage {:?} is not mountable", record.device_path.display(), usage);
        return None;
    }
    let Some(rule) = rule_for(kind) else {
        tracing::debug!("{}: no rule for {}", record.device_path.display(), kind);
        return None;
    };

    let spec = fs_spec(record, kind, options);
    let comment = options
        .label_comments
        .then(|| record.label.clone())
        .flatten();

    if *kind == FilesystemKind::Swap {
        if options.suppress_swap {
            tracing::debug!("{}: swap entries suppressed", record.device_path.display());
            return None;
        }
        let swap_options = rule.media_option_string(options.prefer_automount)?;
        return Some(Classification {
            entry: FstabEntry::new(
                spec,
                SWAP_MOUNT_POINT,
                kind.as_str(),
                swap_options,
                0,
                rule.pass,
            ),
            placement: Placement::Swap,
            comment,
        });
    }

    let mounted_at = if options.skip_mount_scan {
        None
    } else {
        lookup.and_then(|lookup| lookup.find_mount(record))
    };

    if let Some(dir) = mounted_at
        && let Some(mounted_options) = rule.mounted_options
    {
        let pass = if dir == Path::new("/") { 1 } else { 2 };
        return Some(Classification {
            entry: FstabEntry::new(spec, dir, kind.as_str(), mounted_options, 0, pass),
            placement: Placement::Mounted,
            comment,
        });
    }

    let media_options = rule.media_option_string(options.prefer_automount)?;
    Some(Classification {
        entry: FstabEntry::new(
            spec,
            media_mount_point(record, &options.media_root),
            kind.as_str(),
            media_options,
            0,
            rule.pass,
        ),
        placement: Placement::Media,
        comment,
    })
}

/// Chooses the first fstab column.
///
/// UUID addressing wins over label addressing. Linux filesystems and swap get
/// `UUID=`/`LABEL=` tags; foreign filesystems get the kernel's by-uuid or
/// by-label symlink instead. Without a usable value the device node is used.
pub fn fs_spec(
    record: &DeviceRecord,
    kind: &FilesystemKind,
    options: &ClassifierOptions,
) -> String {
    let tagged = |tag: &str, value: Option<&String>, by_dir: &str| -> Option<String> {
        let link = record.link_in(by_dir);
        if kind.uses_tag_spec() {
            // link names carry udev's \xNN escapes
            let value = value.filter(|v| !v.is_empty()).cloned().or_else(|| {
                link.and_then(Path::file_name)
                    .map(|name| decode_udev_string(&name.to_string_lossy()))
            })?;
            Some(format!("{}={}", tag, value))
        } else {
            link.map(|l| l.display().to_string())
        }
    };

    let uuid_spec = options
        .use_uuids
        .then(|| tagged("UUID", record.uuid.as_ref(), "by-uuid"))
        .flatten();
    let label_spec = || {
        options
            .use_labels
            .then(|| tagged("LABEL", record.label.as_ref(), "by-label"))
            .flatten()
    };

    uuid_spec
        .or_else(label_spec)
        .unwrap_or_else(|| record.device_path.display().to_string())
}

/// Builds the synthesized mount point for a device that is not mounted.
pub fn media_mount_point(record: &DeviceRecord, media_root: &Path) -> PathBuf {
    match (record.disk_index, record.partition_index) {
        (Some(disk), Some(part)) => media_root.join(format!("disk{}part{}", disk, part)),
        (Some(disk), None) => media_root.join(format!("disk{}", disk)),
        (None, _) => media_root.join(
            record
                .device_path
                .file_name()
                .unwrap_or(record.device_path.as_os_str()),
        ),
    }
}
