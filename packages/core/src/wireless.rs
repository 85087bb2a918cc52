//! Wireless (802.11) interface detection.

use std::os::fd::AsRawFd;
use std::path::Path;

use nix::sys::socket::{AddressFamily, SockFlag, SockType, socket};
use snafu::{ResultExt, ensure};

use crate::error::{ControlSocketSnafu, InvalidInterfaceSnafu, Result};

/// Kernel limit for interface names, including the terminating NUL.
pub const IFNAMSIZ: usize = 16;

/// Wireless extensions "get name" request.
const SIOCGIWNAME: u32 = 0x8B01;

/// `struct iwreq`: interface name followed by a 16-byte request union.
#[repr(C)]
struct IwReq {
    ifr_name: [u8; IFNAMSIZ],
    data: IwReqData,
}

#[repr(C, align(8))]
struct IwReqData {
    bytes: [u8; 16],
}

nix::ioctl_read_bad!(siocgiwname, SIOCGIWNAME, IwReq);

/// Returns true if `ifname` is a wireless interface.
///
/// Asks the kernel through the wireless extensions ioctl first. Drivers
/// without wireless extensions still expose `wireless` or `phy80211` under
/// the interface's sysfs directory, which is checked below `sys_root`.
pub fn is_80211(ifname: &str, sys_root: &Path) -> Result<bool> {
    ensure!(
        !ifname.is_empty() && ifname.len() < IFNAMSIZ && !ifname.contains(['/', '\0']),
        InvalidInterfaceSnafu { ifname }
    );

    match query_wireless_name(ifname)? {
        Some(protocol) => {
            tracing::debug!("{}: wireless extensions report {}", ifname, protocol);
            Ok(true)
        }
        None => Ok(has_wireless_sysfs(ifname, sys_root)),
    }
}

/// Issues SIOCGIWNAME. Returns the protocol name on success, None if the
/// interface does not answer wireless requests.
fn query_wireless_name(ifname: &str) -> Result<Option<String>> {
    let sock = socket(
        AddressFamily::Inet,
        SockType::Datagram,
        SockFlag::SOCK_CLOEXEC,
        None,
    )
    .context(ControlSocketSnafu)?;

    let mut request = IwReq {
        ifr_name: [0; IFNAMSIZ],
        data: IwReqData { bytes: [0; 16] },
    };
    request.ifr_name[..ifname.len()].copy_from_slice(ifname.as_bytes());

    // SAFETY: `request` is a correctly sized, NUL-terminated iwreq that
    // outlives the call, and `sock` is an open socket.
    match unsafe { siocgiwname(sock.as_raw_fd(), &mut request) } {
        Ok(_) => {
            let end = request
                .data
                .bytes
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(request.data.bytes.len());
            Ok(Some(String::from_utf8_lossy(&request.data.bytes[..end]).into_owned()))
        }
        Err(errno) => {
            tracing::debug!("{}: SIOCGIWNAME failed: {}", ifname, errno);
            Ok(None)
        }
    }
}

fn has_wireless_sysfs(ifname: &str, sys_root: &Path) -> bool {
    let dir = sys_root.join("class/net").join(ifname);
    ["wireless", "phy80211"].iter().any(|entry| {
        let found = dir.join(entry).exists();
        if found {
            tracing::debug!("{}: found {}", ifname, dir.join(entry).display());
        }
        found
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rejects_bad_names() {
        let root = Path::new("/sys");
        for name in ["", "an-interface-name-too-long", "../lo"] {
            let err = is_80211(name, root).unwrap_err();
            assert!(matches!(err, crate::Error::InvalidInterface { .. }), "{name}");
        }
    }

    #[test]
    fn test_missing_interface_is_not_wireless() {
        let dir = TempDir::new().unwrap();
        assert!(!is_80211("nosuchif0", dir.path()).unwrap());
    }

    #[test]
    fn test_loopback_is_not_wireless() {
        let dir = TempDir::new().unwrap();
        assert!(!is_80211("lo", dir.path()).unwrap());
    }

    #[test]
    fn test_sysfs_fallback() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("class/net/wlfake0/phy80211")).unwrap();
        std::fs::create_dir_all(dir.path().join("class/net/ethfake0")).unwrap();

        assert!(has_wireless_sysfs("wlfake0", dir.path()));
        assert!(!has_wireless_sysfs("ethfake0", dir.path()));
    }

    #[test]
    fn test_request_layout() {
        assert_eq!(std::mem::size_of::<IwReq>(), 32);
    }
}
