use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::record::is_symlink;

bitflags! {
    /// Requested access, same bit values as `R_OK`, `W_OK` and `X_OK`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Access: u32 {
        const READ    = 0b100;
        const WRITE   = 0b010;
        const EXECUTE = 0b001;
    }
}

/// uid/gid that bypasses every check.
pub const PRIVILEGED_ID: u32 = 0;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
    pub euid: u32,
    pub egid: u32,
    /// Supplementary groups.
    #[serde(default)]
    pub groups: Vec<u32>,
}

impl Credentials {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self {
            uid,
            gid,
            euid: uid,
            egid: gid,
            groups: Vec::new(),
        }
    }

    pub fn root() -> Self {
        Self::new(PRIVILEGED_ID, PRIVILEGED_ID)
    }

    pub fn with_groups(mut self, groups: impl Into<Vec<u32>>) -> Self {
        self.groups = groups.into();
        self
    }

    pub fn is_privileged(&self) -> bool {
        self.euid == PRIVILEGED_ID || self.egid == PRIVILEGED_ID
    }
}

/// Decide whether `credentials` may perform `access` on an entry owned by
/// `uid:gid` with permission bits `mode`.
///
/// Owner and group bits are added on a uid/gid match; the "other" bits are
/// always added, whatever matched before.
pub fn has_access(credentials: &Credentials, mode: u16, uid: u32, gid: u32, access: Access) -> bool {
    if is_symlink(mode) || credentials.is_privileged() {
        return true;
    }

    let mode = u32::from(mode);
    let mut perm = 0u32;

    if credentials.uid == uid {
        perm |= (mode >> 6) & 0o7;
    }

    if credentials.gid == gid || credentials.groups.contains(&gid) {
        perm |= (mode >> 3) & 0o7;
    }

    perm |= mode & 0o7;

    Access::from_bits_truncate(perm).contains(access)
}
