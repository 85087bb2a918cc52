//! Scoped privilege narrowing around raw device reads.
//!
//! The device node is opened with the caller's identity, then the effective
//! uid, gid and supplementary groups are narrowed to an unprivileged account
//! while the on-disk signature is parsed. [`PrivilegeGuard`] restores the
//! saved identity when it goes out of scope, on every exit path.
//!
//! Credentials are process-wide: a guard must not be held by two threads at
//! once, and guards must not nest.

use nix::unistd::{Gid, Uid, User, getegid, geteuid, getgroups, setegid, seteuid, setgroups};
use snafu::ResultExt;

use crate::error::{PrivilegeDropSnafu, Result};

/// Account used for probing when none is configured.
pub const PROBE_USER: &str = "nobody";

/// The conventional uid/gid of `nobody` when the account is missing.
const OVERFLOW_ID: u32 = 65534;

/// Identity assumed while a device is probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeIdentity {
    pub uid: u32,
    pub gid: u32,
}

impl Default for ProbeIdentity {
    fn default() -> Self {
        Self {
            uid: OVERFLOW_ID,
            gid: OVERFLOW_ID,
        }
    }
}

impl ProbeIdentity {
    /// Looks up an account by name, falling back to the overflow ids.
    pub fn from_user(name: &str) -> Self {
        match User::from_name(name) {
            Ok(Some(user)) => Self {
                uid: user.uid.as_raw(),
                gid: user.gid.as_raw(),
            },
            Ok(None) => {
                tracing::debug!("user {} not found, probing as {}", name, OVERFLOW_ID);
                Self::default()
            }
            Err(e) => {
                tracing::warn!("failed to look up user {}: {}", name, e);
                Self::default()
            }
        }
    }

    /// The `nobody` account.
    pub fn nobody() -> Self {
        Self::from_user(PROBE_USER)
    }

    /// The current effective identity. Probing with it changes nothing.
    pub fn current() -> Self {
        Self {
            uid: geteuid().as_raw(),
            gid: getegid().as_raw(),
        }
    }
}

#[derive(Debug)]
struct SavedIdentity {
    euid: Uid,
    egid: Gid,
    groups: Vec<Gid>,
}

/// Holds narrowed privileges until dropped.
#[derive(Debug)]
pub struct PrivilegeGuard {
    saved: Option<SavedIdentity>,
}

impl PrivilegeGuard {
    /// Narrows the effective identity to `identity`.
    ///
    /// Only root can narrow and later restore its identity; for any other
    /// caller, or when `identity` is already the effective one, the returned
    /// guard is inactive. If narrowing fails half way, the partially changed
    /// identity is restored before the error is returned.
    pub fn acquire(identity: ProbeIdentity) -> Result<Self> {
        let euid = geteuid();
        if !euid.is_root() || identity == ProbeIdentity::current() {
            return Ok(Self { saved: None });
        }

        let context = PrivilegeDropSnafu {
            uid: identity.uid,
            gid: identity.gid,
        };
        let groups = getgroups().context(context)?;
        let guard = Self {
            saved: Some(SavedIdentity {
                euid,
                egid: getegid(),
                groups,
            }),
        };

        let gid = Gid::from_raw(identity.gid);
        setgroups(&[gid]).context(context)?;
        setegid(gid).context(context)?;
        seteuid(Uid::from_raw(identity.uid)).context(context)?;

        tracing::trace!("narrowed to uid {} gid {}", identity.uid, identity.gid);
        Ok(guard)
    }

    /// Returns true if privileges were actually narrowed.
    pub fn is_active(&self) -> bool {
        self.saved.is_some()
    }
}

impl Drop for PrivilegeGuard {
    fn drop(&mut self) {
        let Some(saved) = self.saved.take() else {
            return;
        };
        // The uid goes back first: changing gid and groups needs root.
        if let Err(e) = seteuid(saved.euid) {
            tracing::error!("failed to restore euid {}: {}", saved.euid, e);
        }
        if let Err(e) = setegid(saved.egid) {
            tracing::error!("failed to restore egid {}: {}", saved.egid, e);
        }
        if let Err(e) = setgroups(&saved.groups) {
            tracing::error!("failed to restore supplementary groups: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_identity_guard_is_inactive() {
        let before = ProbeIdentity::current();
        {
            let guard = PrivilegeGuard::acquire(ProbeIdentity::current()).unwrap();
            assert!(!guard.is_active());
        }
        assert_eq!(ProbeIdentity::current(), before);
    }

    #[test]
    fn test_default_identity_is_overflow_id() {
        let identity = ProbeIdentity::default();
        assert_eq!(identity.uid, 65534);
        assert_eq!(identity.gid, 65534);
    }

    #[test]
    fn test_missing_user_falls_back() {
        let identity = ProbeIdentity::from_user("no-such-user-for-probing");
        assert_eq!(identity, ProbeIdentity::default());
    }
}
