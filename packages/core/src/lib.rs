//! fll-core: hardware inspection for live-system boot.
//!
//! This library holds the logic behind the live boot utilities: turning the
//! block devices of the running host into fstab records, telling wireless
//! interfaces apart, and picking an X driver for the display adapter.
//!
//! # Modules
//!
//! - [`disk`]: Block device enumeration from sysfs and the udev database
//! - [`probe`]: Raw filesystem signature probing
//! - [`privilege`]: Scoped privilege narrowing for raw device reads
//! - [`preset`]: Filesystem kinds and their mount option rules
//! - [`mount`]: Live mount table lookup and mount point creation
//! - [`classify`]: Per-device record decisions
//! - [`fstab`]: Fstab line formatting and parsing
//! - [`generator`]: The fstab generator pipeline
//! - [`wireless`]: 802.11 interface detection
//! - [`pci`]: Display adapter and X driver discovery
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```no_run
//! use fll_core::{FstabGenerator, GeneratorConfig, HostPaths};
//! use fll_core::classify::ClassifierOptions;
//!
//! let config = GeneratorConfig::new().with_classifier(ClassifierOptions {
//!     use_uuids: true,
//!     ..ClassifierOptions::default()
//! });
//! let generator = FstabGenerator::new(HostPaths::default(), config);
//!
//! let mut out = std::io::stdout().lock();
//! let summary = generator.run(&mut out).unwrap();
//! eprintln!("{} records", summary.emitted);
//! ```

pub mod classify;
pub mod disk;
pub mod error;
pub mod fstab;
pub mod generator;
pub mod mount;
pub mod pci;
pub mod preset;
pub mod privilege;
pub mod probe;
pub mod wireless;

// Re-export commonly used types
pub use classify::{Classification, ClassifierOptions, Placement};
pub use disk::{BlockDevice, DeviceRecord, HostPaths};
pub use error::{Error, ErrorKind, Result};
pub use fstab::FstabEntry;
pub use generator::{FstabGenerator, GeneratorConfig, RunSummary};
pub use mount::{MountStateLookup, MountTable};
pub use pci::{DisplayAdapter, XserverConfig};
pub use preset::{FilesystemKind, FsUsage};
pub use privilege::ProbeIdentity;
