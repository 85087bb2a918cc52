//! Filesystem kinds and the static mount option table.
//!
//! Every decision the fstab generator makes about a device's options and
//! fsck pass number is driven by the [`FilesystemKind`] of the device and the
//! [`ClassificationRule`] returned by [`rule_for`].

use std::fmt;

/// Options used for swap entries.
pub const SWAP_OPTIONS: &str = "sw";

/// Mount point column used for swap entries.
pub const SWAP_MOUNT_POINT: &str = "none";

/// Options suffix for Linux-native filesystems on media that is not mounted.
const LINUX_MEDIA_OPTIONS: &str = "users,rw,exec,noatime";

/// Filesystem types recognised by the generator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FilesystemKind {
    Ext2,
    Ext3,
    Ext4,
    Xfs,
    Jfs,
    Reiserfs,
    Reiser4,
    Swap,
    Ntfs,
    Msdos,
    Vfat,
    HfsPlus,
    /// Any other type string reported by udev or the probe.
    Unknown(String),
}

impl From<&str> for FilesystemKind {
    fn from(s: &str) -> Self {
        match s {
            "ext2" => FilesystemKind::Ext2,
            "ext3" => FilesystemKind::Ext3,
            "ext4" => FilesystemKind::Ext4,
            "xfs" => FilesystemKind::Xfs,
            "jfs" => FilesystemKind::Jfs,
            "reiserfs" => FilesystemKind::Reiserfs,
            "reiser4" => FilesystemKind::Reiser4,
            "swap" => FilesystemKind::Swap,
            "ntfs" => FilesystemKind::Ntfs,
            "msdos" => FilesystemKind::Msdos,
            "vfat" => FilesystemKind::Vfat,
            "hfsplus" => FilesystemKind::HfsPlus,
            other => FilesystemKind::Unknown(other.to_string()),
        }
    }
}

impl FilesystemKind {
    /// Returns the type name as written in the third fstab column.
    pub fn as_str(&self) -> &str {
        match self {
            FilesystemKind::Ext2 => "ext2",
            FilesystemKind::Ext3 => "ext3",
            FilesystemKind::Ext4 => "ext4",
            FilesystemKind::Xfs => "xfs",
            FilesystemKind::Jfs => "jfs",
            FilesystemKind::Reiserfs => "reiserfs",
            FilesystemKind::Reiser4 => "reiser4",
            FilesystemKind::Swap => "swap",
            FilesystemKind::Ntfs => "ntfs",
            FilesystemKind::Msdos => "msdos",
            FilesystemKind::Vfat => "vfat",
            FilesystemKind::HfsPlus => "hfsplus",
            FilesystemKind::Unknown(name) => name,
        }
    }

    /// Returns true for filesystems fully integrated with the kernel's
    /// error-recovery and remount semantics.
    pub fn is_linux_native(&self) -> bool {
        matches!(
            self,
            FilesystemKind::Ext2
                | FilesystemKind::Ext3
                | FilesystemKind::Ext4
                | FilesystemKind::Xfs
                | FilesystemKind::Jfs
                | FilesystemKind::Reiserfs
                | FilesystemKind::Reiser4
        )
    }

    /// Returns true if `UUID=`/`LABEL=` specs are written for this type.
    ///
    /// Foreign filesystems get the kernel symlink path instead.
    pub fn uses_tag_spec(&self) -> bool {
        self.is_linux_native() || *self == FilesystemKind::Swap
    }
}

impl fmt::Display for FilesystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a probed signature is used for (udev `ID_FS_USAGE`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsUsage {
    Filesystem,
    Other,
    Raid,
    Crypto,
    Unknown(String),
}

impl From<&str> for FsUsage {
    fn from(s: &str) -> Self {
        match s {
            "filesystem" => FsUsage::Filesystem,
            "other" => FsUsage::Other,
            "raid" => FsUsage::Raid,
            "crypto" => FsUsage::Crypto,
            other => FsUsage::Unknown(other.to_string()),
        }
    }
}

impl FsUsage {
    /// Only plain filesystems and swap (`other`) ever get an fstab line.
    pub fn is_classifiable(&self) -> bool {
        matches!(self, FsUsage::Filesystem | FsUsage::Other)
    }
}

/// Static mount rule for one filesystem kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassificationRule {
    /// Options used when the filesystem is already mounted on the live
    /// system. Only Linux-native kinds have them.
    pub mounted_options: Option<&'static str>,
    /// Options appended after `auto`/`noauto` for media mount points.
    pub media_options: Option<&'static str>,
    /// Whether the `auto`/`noauto` toggle applies.
    pub automount: bool,
    /// fsck pass number for entries that are not already mounted.
    pub pass: u16,
}

impl ClassificationRule {
    const fn linux(mounted: &'static str) -> Self {
        Self {
            mounted_options: Some(mounted),
            media_options: Some(LINUX_MEDIA_OPTIONS),
            automount: true,
            pass: 0,
        }
    }

    const fn foreign(media: &'static str) -> Self {
        Self {
            mounted_options: None,
            media_options: Some(media),
            automount: true,
            pass: 0,
        }
    }

    /// Builds the option string for a media mount point.
    pub fn media_option_string(&self, prefer_automount: bool) -> Option<String> {
        let options = self.media_options?;
        if !self.automount {
            return Some(options.to_string());
        }
        let toggle = if prefer_automount { "auto" } else { "noauto" };
        Some(format!("{},{}", toggle, options))
    }
}

/// Looks up the rule for a filesystem kind. Unknown kinds have none.
pub fn rule_for(kind: &FilesystemKind) -> Option<ClassificationRule> {
    let rule = match kind {
        FilesystemKind::Ext4 => {
            ClassificationRule::linux("defaults,errors=remount-ro,noatime,barrier=0")
        }
        FilesystemKind::Ext2 | FilesystemKind::Ext3 => {
            ClassificationRule::linux("defaults,errors=remount-ro,noatime")
        }
        FilesystemKind::Xfs
        | FilesystemKind::Jfs
        | FilesystemKind::Reiserfs
        | FilesystemKind::Reiser4 => ClassificationRule::linux("defaults,noatime"),
        FilesystemKind::Ntfs => {
            ClassificationRule::foreign("users,ro,dmask=0022,fmask=0133,nls=utf8")
        }
        FilesystemKind::Msdos => {
            ClassificationRule::foreign("users,rw,quiet,umask=000,iocharset=utf8")
        }
        FilesystemKind::Vfat => {
            ClassificationRule::foreign("users,rw,quiet,umask=000,shortname=lower")
        }
        FilesystemKind::HfsPlus => ClassificationRule::foreign("users,ro,exec"),
        FilesystemKind::Swap => ClassificationRule {
            mounted_options: None,
            media_options: Some(SWAP_OPTIONS),
            automount: false,
            pass: 0,
        },
        FilesystemKind::Unknown(_) => return None,
    };
    Some(rule)
}
