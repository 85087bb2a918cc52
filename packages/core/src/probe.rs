//! Raw filesystem signature probing.
//!
//! Reads the first few kilobytes of a device and recognises the superblocks
//! of the filesystems the fstab generator has rules for. This is the path
//! taken when udev has not (yet) recorded `ID_FS_TYPE` for a device.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{Error, IoResultExt, Result};
use crate::preset::{FilesystemKind, FsUsage};
use crate::privilege::{PrivilegeGuard, ProbeIdentity};

/// Bytes read from the start of a device; covers superblocks at 64 KiB.
pub const PROBE_WINDOW: u64 = 68 * 1024;

const EXT_SUPERBLOCK: usize = 0x400;
const EXT_MAGIC: u16 = 0xEF53;
const EXT3_FEATURE_COMPAT_HAS_JOURNAL: u32 = 0x0004;
const EXT4_FEATURE_INCOMPAT_EXTENTS: u32 = 0x0040;
const EXT4_FEATURE_INCOMPAT_64BIT: u32 = 0x0080;
const EXT4_FEATURE_INCOMPAT_FLEX_BG: u32 = 0x0200;

const JFS_SUPERBLOCK: usize = 0x8000;
const REISER_SUPERBLOCK: usize = 0x10000;
const REISER_OLD_SUPERBLOCK: usize = 0x2000;
const REISER_MAGIC_OFFSET: usize = 52;

const SWAP_PAGE_SIZES: [usize; 4] = [4096, 8192, 16384, 65536];
const SWAP_HEADER: usize = 1024;

/// What the probe found on a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub fs_type: FilesystemKind,
    pub usage: FsUsage,
    pub label: Option<String>,
    pub uuid: Option<String>,
}

impl ProbeResult {
    fn new(fs_type: FilesystemKind) -> Self {
        let usage = if fs_type == FilesystemKind::Swap {
            FsUsage::Other
        } else {
            FsUsage::Filesystem
        };
        Self {
            fs_type,
            usage,
            label: None,
            uuid: None,
        }
    }

    fn with_label(mut self, label: Option<String>) -> Self {
        self.label = label;
        self
    }

    fn with_uuid(mut self, uuid: Option<String>) -> Self {
        self.uuid = uuid;
        self
    }
}

/// Probes a device node for a filesystem signature.
///
/// The node is opened with the caller's identity; the read itself happens
/// with privileges narrowed to `identity`.
pub fn probe_device(path: &Path, identity: ProbeIdentity) -> Result<ProbeResult> {
    let mut file = File::open(path).device_open_context(path)?;
    let size = file.seek(SeekFrom::End(0)).device_read_context(path)?;
    file.seek(SeekFrom::Start(0)).device_read_context(path)?;

    let mut buf = Vec::new();
    {
        let _guard = PrivilegeGuard::acquire(identity)?;
        (&mut file)
            .take(PROBE_WINDOW.min(size))
            .read_to_end(&mut buf)
            .device_read_context(path)?;
    }

    tracing::trace!("read {} of {} bytes from {}", buf.len(), size, path.display());
    identify(&buf).ok_or_else(|| Error::NoSignature {
        path: path.to_path_buf(),
    })
}

/// Recognises a filesystem from the start of a device.
pub fn identify(buf: &[u8]) -> Option<ProbeResult> {
    probe_swap(buf)
        .or_else(|| probe_xfs(buf))
        .or_else(|| probe_ext(buf))
        .or_else(|| probe_jfs(buf))
        .or_else(|| probe_reiser4(buf))
        .or_else(|| probe_reiserfs(buf))
        .or_else(|| probe_ntfs(buf))
        .or_else(|| probe_vfat(buf))
        .or_else(|| probe_hfsplus(buf))
}

fn bytes_at(buf: &[u8], offset: usize, len: usize) -> Option<&[u8]> {
    buf.get(offset..offset.checked_add(len)?)
}

fn le16(buf: &[u8], offset: usize) -> Option<u16> {
    let b = bytes_at(buf, offset, 2)?;
    Some(u16::from_le_bytes([b[0], b[1]]))
}

fn le32(buf: &[u8], offset: usize) -> Option<u32> {
    let b = bytes_at(buf, offset, 4)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Formats 16 raw bytes as a canonical lowercase UUID. All-zero is no UUID.
fn format_uuid(bytes: &[u8]) -> Option<String> {
    if bytes.len() != 16 || bytes.iter().all(|b| *b == 0) {
        return None;
    }
    let hex = hex::encode(bytes);
    Some(format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    ))
}

/// Decodes a fixed-size label field padded with NULs or spaces.
fn text_label(bytes: &[u8]) -> Option<String> {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    let label = String::from_utf8_lossy(&bytes[..end]).trim_end().to_string();
    (!label.is_empty()).then_some(label)
}

fn probe_swap(buf: &[u8]) -> Option<ProbeResult> {
    let page_size = SWAP_PAGE_SIZES.iter().copied().find(|page| {
        matches!(
            bytes_at(buf, page - 10, 10),
            Some(b"SWAPSPACE2") | Some(b"SWAP-SPACE")
        )
    })?;

    let result = ProbeResult::new(FilesystemKind::Swap);
    if bytes_at(buf, page_size - 10, 10) != Some(&b"SWAPSPACE2"[..]) {
        return Some(result);
    }
    // version, last_page and nr_badpages precede the uuid
    let uuid_offset = SWAP_HEADER + 12;
    Some(
        result
            .with_uuid(bytes_at(buf, uuid_offset, 16).and_then(format_uuid))
            .with_label(bytes_at(buf, uuid_offset + 16, 16).and_then(text_label)),
    )
}

fn probe_xfs(buf: &[u8]) -> Option<ProbeResult> {
    if bytes_at(buf, 0, 4)? != b"XFSB" {
        return None;
    }
    Some(
        ProbeResult::new(FilesystemKind::Xfs)
            .with_uuid(bytes_at(buf, 32, 16).and_then(format_uuid))
            .with_label(bytes_at(buf, 108, 12).and_then(text_label)),
    )
}

fn probe_ext(buf: &[u8]) -> Option<ProbeResult> {
    if le16(buf, EXT_SUPERBLOCK + 0x38)? != EXT_MAGIC {
        return None;
    }
    let compat = le32(buf, EXT_SUPERBLOCK + 0x5c)?;
    let incompat = le32(buf, EXT_SUPERBLOCK + 0x60)?;

    let kind = if incompat
        & (EXT4_FEATURE_INCOMPAT_EXTENTS
            | EXT4_FEATURE_INCOMPAT_64BIT
            | EXT4_FEATURE_INCOMPAT_FLEX_BG)
        != 0
    {
        FilesystemKind::Ext4
    } else if compat & EXT3_FEATURE_COMPAT_HAS_JOURNAL != 0 {
        FilesystemKind::Ext3
    } else {
        FilesystemKind::Ext2
    };

    Some(
        ProbeResult::new(kind)
            .with_uuid(bytes_at(buf, EXT_SUPERBLOCK + 0x68, 16).and_then(format_uuid))
            .with_label(bytes_at(buf, EXT_SUPERBLOCK + 0x78, 16).and_then(text_label)),
    )
}

fn probe_jfs(buf: &[u8]) -> Option<ProbeResult> {
    if bytes_at(buf, JFS_SUPERBLOCK, 4)? != b"JFS1" {
        return None;
    }
    Some(
        ProbeResult::new(FilesystemKind::Jfs)
            .with_uuid(bytes_at(buf, JFS_SUPERBLOCK + 136, 16).and_then(format_uuid))
            .with_label(bytes_at(buf, JFS_SUPERBLOCK + 152, 16).and_then(text_label)),
    )
}

fn probe_reiser4(buf: &[u8]) -> Option<ProbeResult> {
    if bytes_at(buf, REISER_SUPERBLOCK, 7)? != b"ReIsEr4" {
        return None;
    }
    Some(ProbeResult::new(FilesystemKind::Reiser4))
}

fn probe_reiserfs(buf: &[u8]) -> Option<ProbeResult> {
    let magic_at = |sb: usize| bytes_at(buf, sb + REISER_MAGIC_OFFSET, 9);

    if let Some(magic) = magic_at(REISER_SUPERBLOCK)
        && (magic == b"ReIsEr2Fs" || magic == b"ReIsEr3Fs")
    {
        return Some(
            ProbeResult::new(FilesystemKind::Reiserfs)
                .with_uuid(bytes_at(buf, REISER_SUPERBLOCK + 84, 16).and_then(format_uuid))
                .with_label(bytes_at(buf, REISER_SUPERBLOCK + 100, 16).and_then(text_label)),
        );
    }

    [REISER_SUPERBLOCK, REISER_OLD_SUPERBLOCK]
        .into_iter()
        .any(|sb| bytes_at(buf, sb + REISER_MAGIC_OFFSET, 8) == Some(&b"ReIsErFs"[..]))
        .then(|| ProbeResult::new(FilesystemKind::Reiserfs))
}

fn probe_ntfs(buf: &[u8]) -> Option<ProbeResult> {
    if bytes_at(buf, 3, 8)? != b"NTFS    " {
        return None;
    }
    let serial = bytes_at(buf, 0x48, 8)
        .map(|b| u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
        .filter(|s| *s != 0)
        .map(|s| format!("{:016X}", s));
    Some(ProbeResult::new(FilesystemKind::Ntfs).with_uuid(serial))
}

fn probe_vfat(buf: &[u8]) -> Option<ProbeResult> {
    let (serial_offset, label_offset) = if bytes_at(buf, 82, 8)? == b"FAT32   " {
        (67, 71)
    } else if matches!(
        bytes_at(buf, 54, 8)?,
        b"FAT12   " | b"FAT16   " | b"FAT     "
    ) {
        (39, 43)
    } else {
        return None;
    };

    let serial = le32(buf, serial_offset)
        .filter(|s| *s != 0)
        .map(|s| format!("{:04X}-{:04X}", s >> 16, s & 0xffff));
    let label = bytes_at(buf, label_offset, 11)
        .and_then(text_label)
        .filter(|l| l != "NO NAME");

    Some(
        ProbeResult::new(FilesystemKind::Vfat)
            .with_uuid(serial)
            .with_label(label),
    )
}

fn probe_hfsplus(buf: &[u8]) -> Option<ProbeResult> {
    match bytes_at(buf, 1024, 2)? {
        b"H+" | b"HX" => Some(ProbeResult::new(FilesystemKind::HfsPlus)),
        _ => None,
    }
}
