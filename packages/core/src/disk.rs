//! Block device enumeration from sysfs and the udev database.
//!
//! Devices are listed the way udev enumerates the block subsystem: every whole
//! disk under `/sys/block` in order of its `/sys/devices` path, each followed
//! by its partitions. Properties such as
//! the filesystem type and the `/dev/disk/by-*` symlinks come from the udev
//! database under `/run/udev/data`.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use snafu::ResultExt;

use crate::error::{EnumerationSnafu, IoResultExt, Result};
use crate::preset::{FilesystemKind, FsUsage};

/// Default sysfs mount point.
pub const SYSFS_ROOT: &str = "/sys";

/// Default device node directory.
pub const DEV_ROOT: &str = "/dev";

/// Default udev database directory.
pub const UDEV_DATA_DIR: &str = "/run/udev/data";

/// Default live mount table.
pub const PROC_MOUNTS: &str = "/proc/mounts";

/// Locations of the kernel interfaces the tools read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPaths {
    /// Root of sysfs.
    pub sys_root: PathBuf,
    /// Directory holding device nodes; udev symlinks are resolved against it.
    pub dev_root: PathBuf,
    /// udev database directory.
    pub udev_data: PathBuf,
    /// Live mount table.
    pub mounts: PathBuf,
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            sys_root: PathBuf::from(SYSFS_ROOT),
            dev_root: PathBuf::from(DEV_ROOT),
            udev_data: PathBuf::from(UDEV_DATA_DIR),
            mounts: PathBuf::from(PROC_MOUNTS),
        }
    }
}

impl HostPaths {
    /// Creates paths pointing at the running system.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sysfs root.
    pub fn with_sys_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.sys_root = path.into();
        self
    }

    /// Sets the device node directory.
    pub fn with_dev_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.dev_root = path.into();
        self
    }

    /// Sets the udev database directory.
    pub fn with_udev_data(mut self, path: impl Into<PathBuf>) -> Self {
        self.udev_data = path.into();
        self
    }

    /// Sets the mount table path.
    pub fn with_mounts(mut self, path: impl Into<PathBuf>) -> Self {
        self.mounts = path.into();
        self
    }
}

/// Kernel device type (`DEVTYPE` in uevent).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceType {
    Disk,
    Partition,
    Other(String),
}

impl From<&str> for DeviceType {
    fn from(s: &str) -> Self {
        match s {
            "disk" => DeviceType::Disk,
            "partition" => DeviceType::Partition,
            other => DeviceType::Other(other.to_string()),
        }
    }
}

/// One udev database record: `E:` properties and `S:` devlinks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UdevRecord {
    pub properties: BTreeMap<String, String>,
    /// Symlinks relative to the device node directory.
    pub links: Vec<String>,
}

impl UdevRecord {
    /// Parses the contents of a `/run/udev/data/b<major>:<minor>` file.
    pub fn parse(content: &str) -> Self {
        let mut record = Self::default();
        for line in content.lines() {
            if let Some(property) = line.strip_prefix("E:") {
                if let Some((key, value)) = property.split_once('=') {
                    record.properties.insert(key.to_string(), value.to_string());
                }
            } else if let Some(link) = line.strip_prefix("S:") {
                record.links.push(link.to_string());
            }
        }
        record
    }

    /// Returns a non-empty property value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Returns the exact value of `key`, preferring the escaped `<key>_ENC`
    /// form over the plain one, in which udev replaces whitespace and other
    /// unsafe characters.
    pub fn get_encoded(&self, key: &str) -> Option<String> {
        self.get(&format!("{}_ENC", key))
            .map(decode_udev_string)
            .or_else(|| self.get(key).map(String::from))
    }
}

/// A block device found during enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDevice {
    /// Kernel name (e.g., "sda1", "dm-0").
    pub name: String,
    /// Device node (e.g., "/dev/sda1").
    pub path: PathBuf,
    /// Symlinks pointing at the node, in udev order.
    pub links: Vec<PathBuf>,
    /// Node and symlinks of the parent disk, for partitions.
    pub parent_paths: Vec<PathBuf>,
    pub devtype: DeviceType,
    /// Partition number from the `partition` attribute.
    pub partition: Option<u32>,
    /// Removable flag of the device or its parent disk.
    pub removable: bool,
    /// udev `ID_TYPE` (e.g., "disk", "cd", "floppy").
    pub id_type: Option<String>,
    /// Device-mapper name, if this is a mapped device.
    pub dm_name: Option<String>,
    pub fs_type: Option<String>,
    pub fs_usage: Option<String>,
    pub fs_label: Option<String>,
    pub fs_uuid: Option<String>,
}

impl BlockDevice {
    /// Returns true for whole-disk devices.
    pub fn is_disk(&self) -> bool {
        self.devtype == DeviceType::Disk
    }

    /// Returns true for device-mapper volumes.
    pub fn is_mapped(&self) -> bool {
        self.dm_name.is_some()
    }

    /// Returns true for optical and floppy drives.
    pub fn is_drive_media(&self) -> bool {
        matches!(self.id_type.as_deref(), Some("cd") | Some("floppy"))
    }

    /// Returns true if the generator should look at this device at all.
    pub fn is_candidate(&self) -> bool {
        self.is_mapped()
            || matches!(
                self.id_type.as_deref(),
                Some("disk") | Some("cd") | Some("floppy")
            )
    }

    /// Returns true if the device, one of its links, or its parent disk
    /// appears in `wanted`.
    pub fn matches_any(&self, wanted: &[PathBuf]) -> bool {
        std::iter::once(&self.path)
            .chain(&self.links)
            .chain(&self.parent_paths)
            .any(|p| wanted.contains(p))
    }
}

/// The classifier's view of one device, built once per enumeration pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    /// Canonical device node.
    pub device_path: PathBuf,
    /// Equivalent symlinks (by-label, by-uuid, by-id), in udev order.
    pub alternate_paths: Vec<PathBuf>,
    pub filesystem: Option<FilesystemKind>,
    pub usage: Option<FsUsage>,
    pub label: Option<String>,
    pub uuid: Option<String>,
    /// Position of the disk in enumeration order, starting at 1. `None` for
    /// devices named after their node (mapped volumes, optical, floppy).
    pub disk_index: Option<u32>,
    pub partition_index: Option<u32>,
}

impl DeviceRecord {
    /// Creates a record with nothing known but the device node.
    pub fn new(device_path: impl Into<PathBuf>) -> Self {
        Self {
            device_path: device_path.into(),
            alternate_paths: Vec::new(),
            filesystem: None,
            usage: None,
            label: None,
            uuid: None,
            disk_index: None,
            partition_index: None,
        }
    }

    pub fn with_alternate_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.alternate_paths = paths;
        self
    }

    pub fn with_filesystem(mut self, kind: FilesystemKind) -> Self {
        self.filesystem = Some(kind);
        self
    }

    pub fn with_usage(mut self, usage: FsUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    /// Marks the record as a whole disk with the given index.
    pub fn as_disk(mut self, disk_index: u32) -> Self {
        self.disk_index = Some(disk_index);
        self
    }

    /// Marks the record as partition `partition_index` of disk `disk_index`.
    pub fn as_partition(mut self, disk_index: u32, partition_index: u32) -> Self {
        self.disk_index = Some(disk_index);
        self.partition_index = Some(partition_index);
        self
    }

    /// Returns the first symlink below `/dev/disk/<by_dir>/`.
    pub fn link_in(&self, by_dir: &str) -> Option<&Path> {
        self.alternate_paths
            .iter()
            .find(|p| {
                p.parent()
                    .is_some_and(|parent| parent.ends_with(Path::new("disk").join(by_dir)))
            })
            .map(PathBuf::as_path)
    }
}

/// Lists block devices in udev enumeration order.
///
/// Devices whose uevent cannot be read are skipped with a warning.
pub fn list_block_devices(paths: &HostPaths) -> Result<Vec<BlockDevice>> {
    let block_dir = paths.sys_root.join("block");
    let mut disks: Vec<(PathBuf, PathBuf)> = sorted_entries(&block_dir)
        .context(EnumerationSnafu { path: &block_dir })?
        .into_iter()
        .map(|dir| (fs::canonicalize(&dir).unwrap_or_else(|_| dir.clone()), dir))
        .collect();
    // udev enumerates by the resolved /sys/devices path, not by name
    disks.sort();
    let disks = disks.into_iter().map(|(_, dir)| dir);

    let mut devices = Vec::new();
    for disk_dir in disks {
        let disk = match read_device(&disk_dir, paths, None) {
            Ok(disk) => disk,
            Err(e) => {
                tracing::warn!("skipping {}: {}", disk_dir.display(), e);
                continue;
            }
        };

        let mut partitions: Vec<(u32, PathBuf)> = sorted_entries(&disk_dir)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|dir| {
                let number = read_attribute(&dir.join("partition")).ok()??;
                Some((number.parse().ok()?, dir))
            })
            .collect();
        partitions.sort();

        let mut children = Vec::with_capacity(partitions.len());
        for (_, part_dir) in partitions {
            match read_device(&part_dir, paths, Some(&disk)) {
                Ok(part) => children.push(part),
                Err(e) => tracing::warn!("skipping {}: {}", part_dir.display(), e),
            }
        }

        devices.push(disk);
        devices.extend(children);
    }

    Ok(devices)
}

fn sorted_entries(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect::<Vec<_>>();
    entries.sort();
    Ok(entries)
}

/// Decodes the `\xNN` escapes udev uses in `*_ENC` properties and devlink
/// names. Malformed escapes are kept verbatim.
pub fn decode_udev_string(encoded: &str) -> String {
    let bytes = encoded.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && bytes.get(i + 1) == Some(&b'x')
            && let Some(byte) = bytes.get(i + 2..i + 4).and_then(|h| hex::decode(h).ok())
        {
            decoded.extend(byte);
            i += 4;
            continue;
        }
        decoded.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

/// Reads a trimmed sysfs attribute. A missing attribute is `None`.
pub(crate) fn read_attribute(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(value) => Ok(Some(value.trim().to_string())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).attribute_context(path),
    }
}

fn parse_uevent(content: &str) -> BTreeMap<&str, &str> {
    content
        .lines()
        .filter_map(|line| line.split_once('='))
        .collect()
}

fn read_device(dir: &Path, paths: &HostPaths, parent: Option<&BlockDevice>) -> Result<BlockDevice> {
    let uevent_path = dir.join("uevent");
    let uevent_content = fs::read_to_string(&uevent_path).attribute_context(&uevent_path)?;
    let uevent = parse_uevent(&uevent_content);

    let name = match uevent.get("DEVNAME") {
        Some(name) => name.to_string(),
        None => dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };
    let devtype = uevent
        .get("DEVTYPE")
        .map(|t| DeviceType::from(*t))
        .unwrap_or(DeviceType::Other(String::new()));

    let udev = match (uevent.get("MAJOR"), uevent.get("MINOR")) {
        (Some(major), Some(minor)) => {
            let record_path = paths.udev_data.join(format!("b{}:{}", major, minor));
            match read_attribute(&record_path)? {
                Some(content) => UdevRecord::parse(&content),
                None => {
                    tracing::debug!("no udev record for {} at {}", name, record_path.display());
                    UdevRecord::default()
                }
            }
        }
        _ => UdevRecord::default(),
    };

    let partition = read_attribute(&dir.join("partition"))?.and_then(|p| p.parse().ok());
    let removable = match read_attribute(&dir.join("removable"))? {
        Some(flag) => flag != "0",
        None => parent.map(|p| p.removable).unwrap_or(true),
    };
    let dm_name = match udev.get("DM_NAME") {
        Some(dm) => Some(dm.to_string()),
        None => read_attribute(&dir.join("dm").join("name"))?,
    };
    let parent_paths = parent
        .map(|p| std::iter::once(p.path.clone()).chain(p.links.iter().cloned()).collect())
        .unwrap_or_default();

    Ok(BlockDevice {
        path: paths.dev_root.join(&name),
        links: udev.links.iter().map(|l| paths.dev_root.join(l)).collect(),
        parent_paths,
        devtype,
        partition,
        removable,
        id_type: udev.get("ID_TYPE").map(String::from),
        dm_name,
        fs_type: udev.get("ID_FS_TYPE").map(String::from),
        fs_usage: udev.get("ID_FS_USAGE").map(String::from),
        fs_label: udev.get_encoded("ID_FS_LABEL"),
        fs_uuid: udev.get_encoded("ID_FS_UUID"),
        name,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Fake sysfs, udev database and /dev under one temporary directory.
    pub(crate) struct FakeHost {
        pub dir: TempDir,
    }

    impl FakeHost {
        pub(crate) fn new() -> Self {
            let dir = TempDir::new().unwrap();
            for sub in ["sys/block", "dev", "udev", "media"] {
                fs::create_dir_all(dir.path().join(sub)).unwrap();
            }
            fs::write(dir.path().join("mounts"), "").unwrap();
            Self { dir }
        }

        pub(crate) fn paths(&self) -> HostPaths {
            let root = self.dir.path();
            HostPaths::new()
                .with_sys_root(root.join("sys"))
                .with_dev_root(root.join("dev"))
                .with_udev_data(root.join("udev"))
                .with_mounts(root.join("mounts"))
        }

        pub(crate) fn media_root(&self) -> PathBuf {
            self.dir.path().join("media")
        }

        pub(crate) fn dev(&self, name: &str) -> PathBuf {
            self.dir.path().join("dev").join(name)
        }

        /// Adds a whole disk with the given `removable` attribute.
        pub(crate) fn add_disk(
            &self,
            name: &str,
            devnum: (u32, u32),
            removable: bool,
            udev: &[&str],
        ) {
            let dir = self.dir.path().join("sys/block").join(name);
            self.write_disk(&dir, name, devnum, removable, udev);
        }

        /// Adds a whole disk living under `sys/devices/<parent>`, linked from
        /// `sys/block` as on a real host.
        pub(crate) fn add_disk_at(
            &self,
            parent: &str,
            name: &str,
            devnum: (u32, u32),
            removable: bool,
            udev: &[&str],
        ) {
            let dir = self.dir.path().join("sys/devices").join(parent).join(name);
            self.write_disk(&dir, name, devnum, removable, udev);
            std::os::unix::fs::symlink(&dir, self.dir.path().join("sys/block").join(name))
                .unwrap();
        }

        fn write_disk(
            &self,
            dir: &Path,
            name: &str,
            (major, minor): (u32, u32),
            removable: bool,
            udev: &[&str],
        ) {
            fs::create_dir_all(dir).unwrap();
            fs::write(
                dir.join("uevent"),
                format!("MAJOR={major}\nMINOR={minor}\nDEVNAME={name}\nDEVTYPE=disk\n"),
            )
            .unwrap();
            fs::write(dir.join("removable"), if removable { "1\n" } else { "0\n" }).unwrap();
            self.write_udev(major, minor, udev);
        }

        /// Adds a partition below an existing disk.
        pub(crate) fn add_partition(
            &self,
            disk: &str,
            name: &str,
            number: u32,
            (major, minor): (u32, u32),
            udev: &[&str],
        ) {
            let dir = self.dir.path().join("sys/block").join(disk).join(name);
            fs::create_dir_all(&dir).unwrap();
            fs::write(
                dir.join("uevent"),
                format!("MAJOR={major}\nMINOR={minor}\nDEVNAME={name}\nDEVTYPE=partition\n"),
            )
            .unwrap();
            fs::write(dir.join("partition"), format!("{number}\n")).unwrap();
            self.write_udev(major, minor, udev);
        }

        pub(crate) fn write_mounts(&self, content: &str) {
            fs::write(self.dir.path().join("mounts"), content).unwrap();
        }

        fn write_udev(&self, major: u32, minor: u32, lines: &[&str]) {
            let path = self.dir.path().join("udev").join(format!("b{major}:{minor}"));
            fs::write(path, lines.join("\n")).unwrap();
        }
    }

    #[test]
    fn test_parse_udev_record() {
        let record = UdevRecord::parse(
            "S:disk/by-uuid/1234-ABCD\nS:disk/by-label/STICK\n\
             E:ID_FS_TYPE=vfat\nE:ID_FS_LABEL=\nI:123456\n",
        );
        assert_eq!(record.links, vec!["disk/by-uuid/1234-ABCD", "disk/by-label/STICK"]);
        assert_eq!(record.get("ID_FS_TYPE"), Some("vfat"));
        assert_eq!(record.get("ID_FS_LABEL"), None);
        assert_eq!(record.get("MISSING"), None);
    }

    #[test]
    fn test_encoded_properties() {
        let record = UdevRecord::parse(
            "E:ID_FS_LABEL=My_Disk\nE:ID_FS_LABEL_ENC=My\\x20Disk\nE:ID_FS_UUID=4A2B-19C3\n",
        );
        assert_eq!(record.get_encoded("ID_FS_LABEL").as_deref(), Some("My Disk"));
        assert_eq!(record.get_encoded("ID_FS_UUID").as_deref(), Some("4A2B-19C3"));
        assert_eq!(record.get_encoded("ID_FS_TYPE"), None);
    }

    #[test]
    fn test_decode_udev_string() {
        assert_eq!(decode_udev_string(r"My\x20Disk"), "My Disk");
        assert_eq!(decode_udev_string(r"a\x2fb\x5cc"), r"a/b\c");
        assert_eq!(decode_udev_string(r"caf\xc3\xa9"), "café");
        assert_eq!(decode_udev_string(r"bad\xzz\x4"), r"bad\xzz\x4");
        assert_eq!(decode_udev_string("plain"), "plain");
    }

    #[test]
    fn test_list_orders_disks_then_partitions() {
        let host = FakeHost::new();
        host.add_disk("sdb", (8, 16), true, &["E:ID_TYPE=disk"]);
        host.add_disk("sda", (8, 0), false, &["E:ID_TYPE=disk"]);
        host.add_partition("sda", "sda10", 10, (8, 10), &["E:ID_TYPE=disk"]);
        host.add_partition("sda", "sda2", 2, (8, 2), &[
            "E:ID_TYPE=disk",
            "E:ID_FS_TYPE=swap",
            "E:ID_FS_USAGE=other",
        ]);
        host.add_partition("sdb", "sdb1", 1, (8, 17), &[
            "E:ID_TYPE=disk",
            "S:disk/by-label/STICK",
            "E:ID_FS_TYPE=vfat",
        ]);

        let devices = list_block_devices(&host.paths()).unwrap();
        let names: Vec<_> = devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["sda", "sda2", "sda10", "sdb", "sdb1"]);

        let sda2 = &devices[1];
        assert_eq!(sda2.devtype, DeviceType::Partition);
        assert_eq!(sda2.partition, Some(2));
        assert!(!sda2.removable);
        assert_eq!(sda2.fs_type.as_deref(), Some("swap"));
        assert_eq!(sda2.parent_paths, vec![host.dev("sda")]);

        let sdb1 = &devices[4];
        assert!(sdb1.removable);
        assert_eq!(sdb1.links, vec![host.dev("disk/by-label/STICK")]);
        assert!(sdb1.matches_any(&[host.dev("sdb")]));
        assert!(sdb1.matches_any(&[host.dev("disk/by-label/STICK")]));
        assert!(!sdb1.matches_any(&[host.dev("sda")]));
    }

    #[test]
    fn test_disks_follow_device_path_order() {
        let host = FakeHost::new();
        let disk = ["E:ID_TYPE=disk"];
        host.add_disk_at("pci0000:00/0000:00:1d.0/nvme/nvme0", "nvme0n1", (259, 0), false, &disk);
        host.add_disk_at("pci0000:00/0000:00:17.0/ata1/block", "sda", (8, 0), false, &disk);
        host.add_partition("nvme0n1", "nvme0n1p1", 1, (259, 1), &disk);
        host.add_partition("sda", "sda1", 1, (8, 1), &disk);

        let devices = list_block_devices(&host.paths()).unwrap();
        let names: Vec<_> = devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["sda", "sda1", "nvme0n1", "nvme0n1p1"]);
        assert_eq!(devices[0].path, host.dev("sda"));
        assert_eq!(devices[1].parent_paths, vec![host.dev("sda")]);
    }

    #[test]
    fn test_candidates() {
        let host = FakeHost::new();
        host.add_disk("sr0", (11, 0), true, &["E:ID_TYPE=cd", "E:ID_CDROM=1"]);
        host.add_disk("dm-0", (254, 0), false, &["E:DM_NAME=cryptroot"]);
        host.add_disk("loop0", (7, 0), false, &[]);

        let devices = list_block_devices(&host.paths()).unwrap();
        let dm = devices.iter().find(|d| d.name == "dm-0").unwrap();
        assert!(dm.is_mapped() && dm.is_candidate());
        let sr = devices.iter().find(|d| d.name == "sr0").unwrap();
        assert!(sr.is_drive_media() && sr.is_candidate());
        let lo = devices.iter().find(|d| d.name == "loop0").unwrap();
        assert!(!lo.is_candidate());
    }

    #[test]
    fn test_missing_block_dir_is_setup_error() {
        let dir = TempDir::new().unwrap();
        let paths = HostPaths::new().with_sys_root(dir.path());
        let err = list_block_devices(&paths).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Setup);
    }

    #[test]
    fn test_device_without_uevent_is_skipped() {
        let host = FakeHost::new();
        fs::create_dir_all(host.dir.path().join("sys/block/broken")).unwrap();
        host.add_disk("sda", (8, 0), false, &["E:ID_TYPE=disk"]);

        let devices = list_block_devices(&host.paths()).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "sda");
    }
}
