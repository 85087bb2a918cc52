//! Fstab line formatting and parsing.
//!
//! Records are written in the padded column layout boot scripts have always
//! received from the generator. The same six-column format is used by the
//! kernel's mount table, so [`FstabEntry::from_line`] also backs
//! [`crate::mount::MountTable`].

use std::io::Write;
use std::path::PathBuf;

use snafu::ResultExt;

use crate::Error;
use crate::error::{OutputWriteSnafu, Result};

/// Width of the first column for device paths and `LABEL=` specs.
pub const SPEC_WIDTH: usize = 20;

/// Width of the first column when UUID addressing is enabled.
pub const UUID_SPEC_WIDTH: usize = 45;

const MOUNT_POINT_WIDTH: usize = 20;
const VFS_TYPE_WIDTH: usize = 10;
const OPTIONS_WIDTH: usize = 45;

pub trait IntoMountOptions {
    fn into(self) -> Vec<String>;
}

impl IntoMountOptions for &str {
    fn into(self) -> Vec<String> {
        self.split(',').map(|s| s.to_string()).collect()
    }
}

impl IntoMountOptions for String {
    fn into(self) -> Vec<String> {
        IntoMountOptions::into(self.as_str())
    }
}

impl IntoMountOptions for Vec<String> {
    fn into(self) -> Vec<String> {
        self
    }
}

/// Represents a single fstab entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FstabEntry {
    /// The device identifier (e.g., "/dev/sda1", "UUID=xxx" or "LABEL=xxx").
    pub fs_spec: String,
    /// Mount point path, or "none" for swap.
    pub mount_point: PathBuf,
    /// Filesystem type (e.g., "ext4", "vfat").
    pub vfs_type: String,
    /// Mount options.
    pub mount_options: Vec<String>,
    /// This field is used by dump(8) to determine which filesystems need to be dumped.
    pub dump: u8,
    /// This field is used by fsck(8) to determine the order in which
    /// filesystem checks are done at boot time.
    pub fsck_order: u16,
}

impl FstabEntry {
    /// Creates a new fstab entry.
    pub fn new(
        fs_spec: impl Into<String>,
        mount_point: impl Into<PathBuf>,
        fs_type: impl Into<String>,
        mount_options: impl IntoMountOptions,
        dump: u8,
        fsck_order: u16,
    ) -> Self {
        Self {
            fs_spec: fs_spec.into(),
            mount_point: mount_point.into(),
            vfs_type: fs_type.into(),
            mount_options: mount_options.into(),
            dump,
            fsck_order,
        }
    }

    /// Formats the entry with the default spec column width.
    pub fn to_fstab_line(&self) -> String {
        self.to_padded_line(SPEC_WIDTH)
    }

    /// Formats the entry as a padded fstab line.
    pub fn to_padded_line(&self, spec_width: usize) -> String {
        format!(
            "{:<spec_width$} {:<MOUNT_POINT_WIDTH$} {:<VFS_TYPE_WIDTH$} {:<OPTIONS_WIDTH$} {} {}",
            escape_fstab_path(&self.fs_spec),
            escape_fstab_path(&self.mount_point.to_string_lossy()),
            self.vfs_type,
            self.mount_options.join(","),
            self.dump,
            self.fsck_order
        )
    }

    /// Parses a single fstab or mount table line into an entry.
    ///
    /// Returns None for comments, empty lines and lines without six fields.
    pub fn from_line(line: &str) -> Result<Option<Self>> {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 6 {
            return Ok(None);
        }

        let dump = parts[4].parse::<u8>().map_err(|e| Error::MountTableParse {
            message: format!("failed to parse dump field of line {}: {}", line, e),
        })?;
        let fsck_order = parts[5].parse::<u16>().map_err(|e| Error::MountTableParse {
            message: format!("failed to parse fsck_order of line {}: {}", line, e),
        })?;

        Ok(Some(Self {
            fs_spec: unescape_fstab_path(parts[0]),
            mount_point: PathBuf::from(unescape_fstab_path(parts[1])),
            vfs_type: parts[2].to_string(),
            mount_options: IntoMountOptions::into(parts[3]),
            dump,
            fsck_order,
        }))
    }
}

/// Writes one record, optionally preceded by a `# <label>` comment line.
pub fn write_entry<W: Write + ?Sized>(
    sink: &mut W,
    entry: &FstabEntry,
    comment: Option<&str>,
    spec_width: usize,
) -> Result<()> {
    if let Some(comment) = comment {
        writeln!(sink, "# {}", comment).context(OutputWriteSnafu)?;
    }
    writeln!(sink, "{}", entry.to_padded_line(spec_width)).context(OutputWriteSnafu)
}

/// Escapes special characters in fstab paths using octal sequences.
///
/// Handles space (\040), tab (\011), newline (\012), and backslash (\134).
fn escape_fstab_path(path: &str) -> String {
    let mut encoded = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            ' ' => encoded.push_str(r"\040"),
            '\t' => encoded.push_str(r"\011"),
            '\n' => encoded.push_str(r"\012"),
            '\\' => encoded.push_str(r"\134"),
            _ => encoded.push(c),
        }
    }
    encoded
}

/// Unescapes octal sequences in fstab paths.
fn unescape_fstab_path(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' {
            let octal_digits: String = chars
                .clone()
                .take(3)
                .take_while(|d| ('0'..='7').contains(d))
                .collect();

            if octal_digits.len() == 3
                && let Ok(byte) = u8::from_str_radix(&octal_digits, 8)
            {
                result.push(byte as char);
                for _ in 0..3 {
                    chars.next();
                }
                continue;
            }
        }
        result.push(c);
    }
    result
}
