//! Live mount table lookup and mount point creation.
//!
//! The live mount table tells the generator which devices the running system
//! already uses, and where, so that e.g. the root filesystem keeps `/`.

use std::fs;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use crate::disk::DeviceRecord;
use crate::error::{IoResultExt, Result};
use crate::fstab::FstabEntry;

/// Permission bits for created mount points (before the umask).
const MOUNT_POINT_MODE: u32 = 0o777;

/// One line of the live mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Device node or symlink the filesystem was mounted from.
    pub source: String,
    pub fs_type: String,
    pub target: PathBuf,
}

/// Looks up where a device is currently mounted.
pub trait MountStateLookup {
    /// Returns the mount directory of `record`, if it is mounted with its
    /// own filesystem type from its node or one of its symlinks.
    fn find_mount(&self, record: &DeviceRecord) -> Option<&Path>;
}

/// Snapshot of the live mount table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountTable {
    entries: Vec<MountEntry>,
}

impl MountTable {
    /// Reads and parses a mount table file such as `/proc/mounts`.
    pub fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).mount_table_context(path)?;
        Ok(Self::parse(&content))
    }

    /// Parses mount table text. Malformed lines are skipped.
    pub fn parse(content: &str) -> Self {
        let entries = content
            .lines()
            .filter_map(|line| match FstabEntry::from_line(line) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!("ignoring mount table line: {}", e);
                    None
                }
            })
            .map(|entry| MountEntry {
                source: entry.fs_spec,
                fs_type: entry.vfs_type,
                target: entry.mount_point,
            })
            .collect();
        Self { entries }
    }

    /// Returns all parsed entries in table order.
    pub fn entries(&self) -> &[MountEntry] {
        &self.entries
    }
}

impl MountStateLookup for MountTable {
    fn find_mount(&self, record: &DeviceRecord) -> Option<&Path> {
        let fs_type = record.filesystem.as_ref()?;
        self.entries
            .iter()
            .filter(|entry| entry.fs_type == fs_type.as_str())
            .find(|entry| {
                let source = Path::new(&entry.source);
                record.device_path == source || record.alternate_paths.iter().any(|p| p == source)
            })
            .map(|entry| entry.target.as_path())
    }
}

/// Creates a single mount point directory.
///
/// Returns `Ok(false)` if the directory already exists.
pub fn create_mount_point(path: &Path) -> Result<bool> {
    match fs::DirBuilder::new().mode(MOUNT_POINT_MODE).create(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e).mount_point_context(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preset::FilesystemKind;
    use tempfile::TempDir;

    const SAMPLE_MOUNTS: &str = "\
rootfs / rootfs rw 0 0
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
/dev/sda1 / ext4 rw,relatime,errors=remount-ro 0 0
/dev/disk/by-uuid/77aa-01 /home xfs rw,noatime 0 0
/dev/sdb1 /media/My\\040Stick vfat rw 0 0
";

    fn record(path: &str, kind: FilesystemKind, links: &[&str]) -> DeviceRecord {
        DeviceRecord::new(path)
            .with_filesystem(kind)
            .with_alternate_paths(links.iter().map(PathBuf::from).collect())
    }

    #[test]
    fn test_parse_mount_table() {
        let table = MountTable::parse(SAMPLE_MOUNTS);
        assert_eq!(table.entries().len(), 5);
        assert_eq!(table.entries()[4].target, PathBuf::from("/media/My Stick"));
    }

    #[test]
    fn test_find_by_node_and_link() {
        let table = MountTable::parse(SAMPLE_MOUNTS);

        let root = record("/dev/sda1", FilesystemKind::Ext4, &[]);
        assert_eq!(table.find_mount(&root), Some(Path::new("/")));

        let home = record("/dev/sda2", FilesystemKind::Xfs, &["/dev/disk/by-uuid/77aa-01"]);
        assert_eq!(table.find_mount(&home), Some(Path::new("/home")));
    }

    #[test]
    fn test_type_must_match() {
        let table = MountTable::parse(SAMPLE_MOUNTS);
        let wrong_type = record("/dev/sda1", FilesystemKind::Ext3, &[]);
        assert_eq!(table.find_mount(&wrong_type), None);

        let untyped = DeviceRecord::new("/dev/sda1");
        assert_eq!(table.find_mount(&untyped), None);
    }

    #[test]
    fn test_read_missing_table() {
        let err = MountTable::read(Path::new("/nonexistent/mounts")).unwrap_err();
        assert!(matches!(err, crate::Error::MountTableRead { .. }));
    }

    #[test]
    fn test_create_mount_point() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("disk1part1");

        assert!(create_mount_point(&target).unwrap());
        assert!(target.is_dir());
        assert!(!create_mount_point(&target).unwrap());

        let nested = dir.path().join("missing").join("disk2");
        let err = create_mount_point(&nested).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Creation);
    }
}
