//! PCI display adapter discovery for X server configuration.
//!
//! Finds VGA-class devices in sysfs, names them from the `pci.ids` database
//! and picks an X driver from the per-driver device id lists shipped by the
//! xserver-xorg driver packages. The result is printed as shell variable
//! assignments for the boot scripts to source.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use snafu::ResultExt;

use crate::disk::{SYSFS_ROOT, read_attribute};
use crate::error::{Error, PciScanSnafu, Result};

/// PCI devices directory, relative to the sysfs root.
pub const PCI_DEVICES_DIR: &str = "bus/pci/devices";

/// Locations of the PCI id database, tried in order.
pub const PCI_IDS_PATHS: [&str; 2] = ["/usr/share/misc/pci.ids", "/usr/share/hwdata/pci.ids"];

/// Directory of `<driver>.ids` device lists.
pub const XORG_DRIVER_IDS_DIR: &str = "/usr/share/xserver-xorg/pci";

/// Base class and subclass of VGA-compatible display controllers.
pub const VGA_CLASS: u32 = 0x0300;

/// Driver lists sorted after every other list.
const LAST_RESORT_PREFIX: &str = "ati";

/// Where discovery looks for its inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XserverConfig {
    pub sys_root: PathBuf,
    /// `pci.ids` candidates; the first readable one is used.
    pub pci_ids: Vec<PathBuf>,
    pub driver_ids_dir: PathBuf,
}

impl Default for XserverConfig {
    fn default() -> Self {
        Self {
            sys_root: PathBuf::from(SYSFS_ROOT),
            pci_ids: PCI_IDS_PATHS.iter().map(PathBuf::from).collect(),
            driver_ids_dir: PathBuf::from(XORG_DRIVER_IDS_DIR),
        }
    }
}

impl XserverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sys_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.sys_root = path.into();
        self
    }

    pub fn with_pci_ids(mut self, paths: Vec<PathBuf>) -> Self {
        self.pci_ids = paths;
        self
    }

    pub fn with_driver_ids_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.driver_ids_dir = path.into();
        self
    }
}

/// Bus address of a PCI function, as in `0000:01:00.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PciAddress {
    pub domain: u16,
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl PciAddress {
    /// Parses a sysfs device directory name.
    pub fn parse(s: &str) -> Option<Self> {
        let (domain, rest) = s.split_once(':')?;
        let (bus, rest) = rest.split_once(':')?;
        let (device, function) = rest.split_once('.')?;
        Some(Self {
            domain: u16::from_str_radix(domain, 16).ok()?,
            bus: u8::from_str_radix(bus, 16).ok()?,
            device: u8::from_str_radix(device, 16).ok()?,
            function: function.parse().ok()?,
        })
    }

    /// X server `BusID` form: decimal `PCI:bus:dev:func`.
    pub fn bus_id(&self) -> String {
        format!("PCI:{}:{}:{}", self.bus, self.device, self.function)
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{}",
            self.domain, self.bus, self.device, self.function
        )
    }
}

/// One PCI function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciDevice {
    pub address: PciAddress,
    pub vendor: u16,
    pub device: u16,
    /// Class code without the programming interface byte.
    pub class: u32,
}

impl PciDevice {
    pub fn is_vga(&self) -> bool {
        self.class == VGA_CLASS
    }

    /// `vvvvdddd`, the key used by the driver id lists.
    pub fn id_string(&self) -> String {
        format!("{:04x}{:04x}", self.vendor, self.device)
    }
}

/// Lists PCI functions below `<sys_root>/bus/pci/devices`, in address order.
///
/// Functions with unreadable or malformed attributes are skipped.
pub fn scan_pci_devices(sys_root: &Path) -> Result<Vec<PciDevice>> {
    let dir = sys_root.join(PCI_DEVICES_DIR);
    let mut devices = Vec::new();

    for entry in fs::read_dir(&dir).context(PciScanSnafu { path: &dir })? {
        let entry = entry.context(PciScanSnafu { path: &dir })?;
        let name = entry.file_name();
        let Some(address) = PciAddress::parse(&name.to_string_lossy()) else {
            tracing::debug!("ignoring {}", entry.path().display());
            continue;
        };
        match read_pci_device(&entry.path(), address) {
            Ok(Some(device)) => devices.push(device),
            Ok(None) => tracing::debug!("{}: incomplete attributes", address),
            Err(e) => tracing::warn!("skipping {}: {}", address, e),
        }
    }

    devices.sort_by_key(|d| d.address);
    Ok(devices)
}

fn read_pci_device(dir: &Path, address: PciAddress) -> Result<Option<PciDevice>> {
    let attribute = |name: &str| -> Result<Option<u32>> {
        let path = dir.join(name);
        read_attribute(&path)?
            .map(|value| parse_hex(&path, &value))
            .transpose()
    };

    let (Some(vendor), Some(device), Some(class)) =
        (attribute("vendor")?, attribute("device")?, attribute("class")?)
    else {
        return Ok(None);
    };

    Ok(Some(PciDevice {
        address,
        vendor: vendor as u16,
        device: device as u16,
        class: class >> 8,
    }))
}

fn parse_hex(path: &Path, value: &str) -> Result<u32> {
    let digits = value.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).map_err(|_| Error::PciAttribute {
        path: path.to_path_buf(),
        value: value.to_string(),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct VendorEntry {
    name: String,
    devices: BTreeMap<u16, String>,
}

/// Vendor and device names from a `pci.ids` database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PciIds {
    vendors: BTreeMap<u16, VendorEntry>,
}

impl PciIds {
    /// Loads the first readable database among `paths`.
    pub fn load(paths: &[PathBuf]) -> Option<Self> {
        paths.iter().find_map(|path| match fs::read(path) {
            Ok(bytes) => {
                tracing::debug!("using PCI ids from {}", path.display());
                Some(Self::parse(&String::from_utf8_lossy(&bytes)))
            }
            Err(e) => {
                tracing::trace!("{}: {}", path.display(), e);
                None
            }
        })
    }

    /// Parses the vendor/device part of the database. Subsystem lines and
    /// the device class section are ignored.
    pub fn parse(content: &str) -> Self {
        let mut vendors = BTreeMap::new();
        let mut current: Option<u16> = None;

        for line in content.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with("C ") {
                current = None;
                continue;
            }
            if let Some(rest) = line.strip_prefix('\t') {
                if rest.starts_with('\t') {
                    continue;
                }
                if let (Some(vendor), Some((id, name))) = (current, split_id(rest)) {
                    vendors
                        .entry(vendor)
                        .or_insert_with(VendorEntry::default)
                        .devices
                        .insert(id, name.to_string());
                }
                continue;
            }
            current = split_id(line).map(|(id, name)| {
                vendors.entry(id).or_insert_with(VendorEntry::default).name = name.to_string();
                id
            });
        }

        Self { vendors }
    }

    pub fn vendor_name(&self, vendor: u16) -> Option<&str> {
        self.vendors.get(&vendor).map(|v| v.name.as_str())
    }

    pub fn device_name(&self, vendor: u16, device: u16) -> Option<&str> {
        self.vendors.get(&vendor)?.devices.get(&device).map(String::as_str)
    }
}

fn split_id(line: &str) -> Option<(u16, &str)> {
    let (id, name) = line.split_once(char::is_whitespace)?;
    let id = u16::from_str_radix(id, 16).ok()?;
    Some((id, name.trim()))
}

/// Human readable board name: `"<vendor> <device>"`, with numeric fallbacks
/// for ids missing from the database.
pub fn board_name(ids: Option<&PciIds>, vendor: u16, device: u16) -> String {
    let vendor_name = ids.and_then(|ids| ids.vendor_name(vendor));
    let device_name = ids.and_then(|ids| ids.device_name(vendor, device));
    match (vendor_name, device_name) {
        (Some(v), Some(d)) => format!("{} {}", v, d),
        (Some(v), None) => format!("{} Device {:04x}", v, device),
        _ => format!("Device {:04x}:{:04x}", vendor, device),
    }
}

/// Returns the `.ids` lists of `dir` in lookup order.
///
/// Lists are compared by natural version order, except that lists whose
/// name starts with `ati` always come last. A missing directory yields no
/// lists.
pub fn driver_id_files(dir: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!("{}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| !name.starts_with('.') && name.ends_with(".ids"))
        .collect();

    names.sort_by(|a, b| {
        let a_last = a.starts_with(LAST_RESORT_PREFIX);
        let b_last = b.starts_with(LAST_RESORT_PREFIX);
        a_last.cmp(&b_last).then_with(|| version_cmp(a, b))
    });

    names.into_iter().map(|name| dir.join(name)).collect()
}

/// Finds the X driver whose id list has a line starting with `id`
/// (case-insensitive). Returns an empty string when no list claims it.
pub fn find_driver(dir: &Path, id: &str) -> String {
    for path in driver_id_files(dir) {
        tracing::info!("looking for {} in {}", id, path.display());
        let content = match fs::read(&path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                tracing::debug!("{}: {}", path.display(), e);
                continue;
            }
        };
        let claimed = content.lines().any(|line| {
            tracing::debug!("{}: {}", path.display(), line);
            line.get(..id.len())
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case(id))
        });
        if claimed {
            let driver = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            tracing::info!("found {} in {}", id, driver);
            return driver;
        }
    }
    String::new()
}

/// Compares two names the way `versionsort` does: runs of digits compare
/// numerically, everything else byte-wise.
pub fn version_cmp(a: &str, b: &str) -> Ordering {
    let (mut a, mut b) = (a.as_bytes(), b.as_bytes());
    loop {
        match (a.first(), b.first()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let (a_digits, a_rest) = split_digits(a);
                let (b_digits, b_rest) = split_digits(b);
                let a_trimmed = trim_zeros(a_digits);
                let b_trimmed = trim_zeros(b_digits);
                let ord = a_trimmed
                    .len()
                    .cmp(&b_trimmed.len())
                    .then_with(|| a_trimmed.cmp(b_trimmed))
                    .then_with(|| b_digits.len().cmp(&a_digits.len()));
                if ord != Ordering::Equal {
                    return ord;
                }
                a = a_rest;
                b = b_rest;
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(y);
                }
                a = &a[1..];
                b = &b[1..];
            }
        }
    }
}

fn split_digits(s: &[u8]) -> (&[u8], &[u8]) {
    let end = s.iter().position(|c| !c.is_ascii_digit()).unwrap_or(s.len());
    s.split_at(end)
}

fn trim_zeros(s: &[u8]) -> &[u8] {
    let start = s.iter().position(|&c| c != b'0').unwrap_or(s.len());
    &s[start..]
}

/// A VGA device with everything the boot scripts need to configure X.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayAdapter {
    pub device: PciDevice,
    pub board_name: String,
    /// X driver name, empty if no driver list claims the device.
    pub driver: String,
}

impl DisplayAdapter {
    /// Renders the adapter as shell variable assignments, one per line.
    pub fn to_shell(&self) -> String {
        let vars = [
            ("XBUSID", self.device.address.bus_id()),
            ("XVENDOR", format!("{:04x}", self.device.vendor)),
            ("XDEVICE", format!("{:04x}", self.device.device)),
            ("XBOARDNAME", self.board_name.clone()),
            ("XMODULE", self.driver.clone()),
        ];
        vars.iter()
            .map(|(name, value)| format!("{}={}\n", name, shell_quote(value)))
            .collect()
    }
}

/// Single-quotes `value` for POSIX shells.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Finds every VGA adapter and resolves its board name and X driver.
pub fn discover_display_adapters(config: &XserverConfig) -> Result<Vec<DisplayAdapter>> {
    let devices = scan_pci_devices(&config.sys_root)?;
    let ids = PciIds::load(&config.pci_ids);
    if ids.is_none() {
        tracing::info!("no readable pci.ids database, using numeric names");
    }

    let adapters = devices
        .into_iter()
        .inspect(|d| {
            tracing::info!(
                "{} vendor={:04x} device={:04x} class={:04x} {}",
                d.address,
                d.vendor,
                d.device,
                d.class,
                board_name(ids.as_ref(), d.vendor, d.device)
            )
        })
        .filter(PciDevice::is_vga)
        .map(|device| DisplayAdapter {
            board_name: board_name(ids.as_ref(), device.vendor, device.device),
            driver: find_driver(&config.driver_ids_dir, &device.id_string()),
            device,
        })
        .collect();

    Ok(adapters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    const PCI_IDS: &str = "\
# comment
1002  Advanced Micro Devices, Inc. [AMD/ATI]
\t67df  Ellesmere [Radeon RX 470/480/570/580]
\t\t1002 0b37  Radeon RX 480
10de  NVIDIA Corporation
\t1c82  GP107 [GeForce GTX 1050 Ti]
8086  Intel Corporation
C 03  Display controller
\t00  VGA compatible controller
";

    fn add_pci(root: &Path, address: &str, vendor: &str, device: &str, class: &str) {
        let dir = root.join(PCI_DEVICES_DIR).join(address);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("vendor"), format!("{vendor}\n")).unwrap();
        fs::write(dir.join("device"), format!("{device}\n")).unwrap();
        fs::write(dir.join("class"), format!("{class}\n")).unwrap();
    }

    #[test]
    fn test_parse_address() {
        let addr = PciAddress::parse("0000:0a:1f.3").unwrap();
        assert_eq!(addr.bus, 10);
        assert_eq!(addr.device, 31);
        assert_eq!(addr.function, 3);
        assert_eq!(addr.bus_id(), "PCI:10:31:3");
        assert_eq!(addr.to_string(), "0000:0a:1f.3");
        assert!(PciAddress::parse("devices").is_none());
    }

    #[test]
    fn test_pci_ids_lookup() {
        let ids = PciIds::parse(PCI_IDS);
        assert_eq!(
            board_name(Some(&ids), 0x10de, 0x1c82),
            "NVIDIA Corporation GP107 [GeForce GTX 1050 Ti]"
        );
        assert_eq!(board_name(Some(&ids), 0x8086, 0x0166), "Intel Corporation Device 0166");
        assert_eq!(board_name(Some(&ids), 0x1234, 0x1111), "Device 1234:1111");
        assert_eq!(board_name(None, 0x10de, 0x1c82), "Device 10de:1c82");
        // class section lines do not become devices
        assert_eq!(ids.device_name(0x8086, 0x0000), None);
    }

    #[test]
    fn test_version_cmp() {
        assert_eq!(version_cmp("nv2.ids", "nv10.ids"), Ordering::Less);
        assert_eq!(version_cmp("intel.ids", "nv.ids"), Ordering::Less);
        assert_eq!(version_cmp("r128.ids", "r128.ids"), Ordering::Equal);
        assert_eq!(version_cmp("a", "a1"), Ordering::Less);
    }

    #[test]
    fn test_driver_order_puts_ati_last() {
        let dir = TempDir::new().unwrap();
        for name in ["ati.ids", "radeonhd.ids", "mach64.ids", "r128.ids", ".hidden.ids", "README"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        let names: Vec<_> = driver_id_files(dir.path())
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["mach64.ids", "r128.ids", "radeonhd.ids", "ati.ids"]);
    }

    #[test]
    fn test_find_driver() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("ati.ids"), "100267DF\n10025964\n").unwrap();
        fs::write(dir.path().join("radeonhd.ids"), "100267df\n").unwrap();
        fs::write(dir.path().join("nv.ids"), "10de1c82\n").unwrap();

        assert_eq!(find_driver(dir.path(), "100267df"), "radeonhd");
        assert_eq!(find_driver(dir.path(), "10025964"), "ati");
        assert_eq!(find_driver(dir.path(), "10de1c82"), "nv");
        assert_eq!(find_driver(dir.path(), "80860166"), "");
        assert_eq!(find_driver(&dir.path().join("missing"), "10de1c82"), "");
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_driver_search_visible_at_info() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("nv.ids"), "10de1c82\n").unwrap();

        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            assert_eq!(find_driver(dir.path(), "10de1c82"), "nv");
        });

        let text = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(text.contains("looking for 10de1c82"), "{text}");
        assert!(text.contains("found 10de1c82 in nv"), "{text}");
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_discover_display_adapters() {
        let root = TempDir::new().unwrap();
        let sys = root.path().join("sys");
        add_pci(&sys, "0000:01:00.0", "0x10de", "0x1c82", "0x030000");
        add_pci(&sys, "0000:00:1f.3", "0x8086", "0xa348", "0x040380");
        add_pci(&sys, "0000:00:02.0", "0x8086", "0x3e92", "0x030000");
        fs::write(root.path().join("pci.ids"), PCI_IDS).unwrap();
        let drivers = root.path().join("drivers");
        fs::create_dir(&drivers).unwrap();
        fs::write(drivers.join("nv.ids"), "10DE1C82\n").unwrap();

        let config = XserverConfig::new()
            .with_sys_root(&sys)
            .with_pci_ids(vec![root.path().join("missing.ids"), root.path().join("pci.ids")])
            .with_driver_ids_dir(&drivers);
        let adapters = discover_display_adapters(&config).unwrap();

        assert_eq!(adapters.len(), 2);
        assert_eq!(adapters[0].device.address.bus_id(), "PCI:0:2:0");
        assert_eq!(adapters[0].driver, "");
        assert_eq!(adapters[1].driver, "nv");
        assert_eq!(
            adapters[1].to_shell(),
            "XBUSID='PCI:1:0:0'\n\
             XVENDOR='10de'\n\
             XDEVICE='1c82'\n\
             XBOARDNAME='NVIDIA Corporation GP107 [GeForce GTX 1050 Ti]'\n\
             XMODULE='nv'\n"
        );
    }

    #[test]
    fn test_malformed_device_is_skipped() {
        let root = TempDir::new().unwrap();
        add_pci(root.path(), "0000:00:02.0", "0x8086", "zz", "0x030000");
        let devices = scan_pci_devices(root.path()).unwrap();
        assert!(devices.is_empty());
    }

    #[test]
    fn test_missing_pci_dir_is_setup_error() {
        let root = TempDir::new().unwrap();
        let err = scan_pci_devices(root.path()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Setup);
    }
}
