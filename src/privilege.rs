//! Root privilege checks
//!
//! Installing touches raw block devices, mounts and a chroot, so every
//! command that changes the system runs as root. Nothing is elevated on the
//! fly: the installer is started with the privileges it needs, or refuses.

use anyhow::{Result, bail};

/// Whether the process runs with effective uid 0
#[cfg(unix)]
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
pub fn is_root() -> bool {
    false
}

/// Fail unless running as root, naming the action that needs it
pub fn require_root(action: &str) -> Result<()> {
    if !is_root() {
        bail!("{action} must run as root (try: sudo rootstrap ...)");
    }
    Ok(())
}
