//! Unified error types for the fll-core library.
//!
//! Uses SNAFU for context-rich error handling, especially useful when the same
//! underlying error type (like `std::io::Error`) appears in different contexts.

use snafu::{ResultExt, Snafu};
use std::path::PathBuf;

/// Result type alias using the library's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// How a failure affects the run it happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The program cannot do its job at all and exits non-zero.
    Setup,
    /// A single device could not be inspected; it is skipped.
    Probe,
    /// A mountpoint directory could not be created; the record is still written.
    Creation,
}

/// Unified error type for all core library operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The output file could not be opened.
    #[snafu(display("failed to open output file {}", path.display()))]
    OutputOpen {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Writing a formatted record failed.
    #[snafu(display("failed to write output"))]
    OutputWrite { source: std::io::Error },

    /// The block device directory in sysfs could not be listed.
    #[snafu(display("failed to enumerate block devices in {}", path.display()))]
    Enumeration {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A sysfs attribute or udev record could not be read.
    #[snafu(display("failed to read device attribute {}", path.display()))]
    AttributeRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A device node could not be opened for probing.
    #[snafu(display("failed to open device {}", path.display()))]
    DeviceOpen {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The size or contents of a device could not be read.
    #[snafu(display("failed to read device {}", path.display()))]
    DeviceRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// No known filesystem signature was found on the device.
    #[snafu(display("no filesystem signature found on {}", path.display()))]
    NoSignature { path: PathBuf },

    /// Changing the effective identity before a probe failed.
    #[snafu(display("failed to drop privileges to uid {uid} gid {gid}"))]
    PrivilegeDrop {
        uid: u32,
        gid: u32,
        source: nix::Error,
    },

    /// The live mount table could not be read.
    #[snafu(display("failed to read mount table at {}", path.display()))]
    MountTableRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse a mount table line.
    #[snafu(display("failed to parse mount table entry: {message}"))]
    MountTableParse { message: String },

    /// Mount point creation failed.
    #[snafu(display("failed to create mount point at {}", path.display()))]
    MountPointCreation {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The interface name cannot be passed to the kernel.
    #[snafu(display("invalid interface name '{ifname}'"))]
    InvalidInterface { ifname: String },

    /// The socket used for wireless queries could not be created.
    #[snafu(display("failed to open control socket"))]
    ControlSocket { source: nix::Error },

    /// The PCI device directory in sysfs could not be listed.
    #[snafu(display("failed to scan PCI devices in {}", path.display()))]
    PciScan {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A PCI attribute held something other than a hex number.
    #[snafu(display("invalid PCI attribute {}: '{value}'", path.display()))]
    PciAttribute { path: PathBuf, value: String },
}

impl Error {
    /// Classifies the error by its effect on a run.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AttributeRead { .. }
            | Error::DeviceOpen { .. }
            | Error::DeviceRead { .. }
            | Error::NoSignature { .. }
            | Error::PrivilegeDrop { .. }
            | Error::MountTableRead { .. }
            | Error::MountTableParse { .. }
            | Error::PciAttribute { .. } => ErrorKind::Probe,
            Error::MountPointCreation { .. } => ErrorKind::Creation,
            Error::OutputOpen { .. }
            | Error::OutputWrite { .. }
            | Error::Enumeration { .. }
            | Error::InvalidInterface { .. }
            | Error::ControlSocket { .. }
            | Error::PciScan { .. } => ErrorKind::Setup,
        }
    }
}

/// Extension trait for adding context to io::Error results.
pub trait IoResultExt<T> {
    /// Add context for sysfs attribute and udev record reads.
    fn attribute_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for opening a device node.
    fn device_open_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for reading from a device node.
    fn device_read_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for mount table reads.
    fn mount_table_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for mount point creation errors.
    fn mount_point_context(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::result::Result<T, std::io::Error> {
    fn attribute_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(AttributeReadSnafu { path: path.into() })
    }

    fn device_open_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(DeviceOpenSnafu { path: path.into() })
    }

    fn device_read_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(DeviceReadSnafu { path: path.into() })
    }

    fn mount_table_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(MountTableReadSnafu { path: path.into() })
    }

    fn mount_point_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(MountPointCreationSnafu { path: path.into() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let missing = || std::io::Error::from(std::io::ErrorKind::NotFound);

        let err = Err::<(), _>(missing()).device_open_context("/dev/sdz").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Probe);

        let err = Err::<(), _>(missing()).mount_point_context("/media/disk1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Creation);

        let err = Error::OutputOpen {
            path: PathBuf::from("/nonexistent/fstab"),
            source: missing(),
        };
        assert_eq!(err.kind(), ErrorKind::Setup);
    }

    #[test]
    fn test_error_display_includes_path() {
        let err = Err::<(), _>(std::io::Error::from(std::io::ErrorKind::PermissionDenied))
            .device_read_context("/dev/sdb1")
            .unwrap_err();
        assert_eq!(err.to_string(), "failed to read device /dev/sdb1");
    }
}
