//! Dropping root in the worker process

use std::ffi::{CStr, CString};
use std::io;
use std::path::{Path, PathBuf};

use nix::unistd::{Gid, Uid, User};
use thiserror::Error;
use tracing::{debug, info};

use crate::common::constants::privileges::{DEFAULT_DROP_USER, DROP_USER_ENV};

#[derive(Debug, Error)]
pub enum PrivilegeError {
    #[error("user '{0}' does not exist")]
    UnknownUser(String),
    #[error("cannot look up user '{name}': {source}")]
    Lookup { name: String, source: nix::Error },
    #[error("user name '{0}' contains a NUL byte")]
    InvalidName(String),
    #[error("cannot change ownership of {}: {source}", path.display())]
    Chown { path: PathBuf, source: io::Error },
    #[error("initgroups failed: {0}")]
    InitGroups(nix::Error),
    #[error("setgid({gid}) failed: {source}")]
    SetGid { gid: Gid, source: nix::Error },
    #[error("setuid({uid}) failed: {source}")]
    SetUid { uid: Uid, source: nix::Error },
    #[error("root privileges can still be regained after switching to uid {0}")]
    EscalationStillPossible(Uid),
}

/// Credential syscalls, separated so the drop sequence can be tested
pub trait CredentialOps {
    fn init_groups(&mut self, user: &CStr, group: Gid) -> nix::Result<()>;
    fn set_gid(&mut self, gid: Gid) -> nix::Result<()>;
    fn set_uid(&mut self, uid: Uid) -> nix::Result<()>;
}

pub struct SystemCredentials;

impl CredentialOps for SystemCredentials {
    fn init_groups(&mut self, user: &CStr, group: Gid) -> nix::Result<()> {
        nix::unistd::initgroups(user, group)
    }

    fn set_gid(&mut self, gid: Gid) -> nix::Result<()> {
        nix::unistd::setgid(gid)
    }

    fn set_uid(&mut self, uid: Uid) -> nix::Result<()> {
        nix::unistd::setuid(uid)
    }
}

/// The account the worker runs as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropTarget {
    pub name: String,
    pub uid: Uid,
    pub gid: Gid,
}

impl DropTarget {
    /// `TNK_DROP_USER`, or `nobody`
    pub fn from_env() -> Result<Self, PrivilegeError> {
        let name = std::env::var(DROP_USER_ENV)
            .ok()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_DROP_USER.to_string());
        Self::lookup(&name)
    }

    pub fn lookup(name: &str) -> Result<Self, PrivilegeError> {
        let user = User::from_name(name)
            .map_err(|source| PrivilegeError::Lookup {
                name: name.to_string(),
                source,
            })?
            .ok_or_else(|| PrivilegeError::UnknownUser(name.to_string()))?;
        Ok(Self {
            name: user.name,
            uid: user.uid,
            gid: user.gid,
        })
    }
}

/// Supplementary groups, then gid, then uid. Afterwards regaining root must
/// fail; if it doesn't the caller has to abort.
pub fn drop_privileges(
    ops: &mut impl CredentialOps,
    target: &DropTarget,
) -> Result<(), PrivilegeError> {
    let name = CString::new(target.name.as_str())
        .map_err(|_| PrivilegeError::InvalidName(target.name.clone()))?;

    ops.init_groups(&name, target.gid)
        .map_err(PrivilegeError::InitGroups)?;
    ops.set_gid(target.gid).map_err(|source| PrivilegeError::SetGid {
        gid: target.gid,
        source,
    })?;
    ops.set_uid(target.uid).map_err(|source| PrivilegeError::SetUid {
        uid: target.uid,
        source,
    })?;

    if ops.set_uid(Uid::from_raw(0)).is_ok() {
        return Err(PrivilegeError::EscalationStillPossible(target.uid));
    }

    info!(user = %target.name, uid = %target.uid, gid = %target.gid, "Dropped privileges");
    Ok(())
}

/// Recursive `lchown`. Symlinks are re-owned but never followed.
pub fn chown_tree(path: &Path, uid: Uid, gid: Gid) -> Result<(), PrivilegeError> {
    let chown_error = |path: &Path, source: io::Error| PrivilegeError::Chown {
        path: path.to_path_buf(),
        source,
    };

    std::os::unix::fs::lchown(path, Some(uid.as_raw()), Some(gid.as_raw()))
        .map_err(|e| chown_error(path, e))?;

    let metadata = std::fs::symlink_metadata(path).map_err(|e| chown_error(path, e))?;
    if metadata.is_dir() {
        for entry in std::fs::read_dir(path).map_err(|e| chown_error(path, e))? {
            let entry = entry.map_err(|e| chown_error(path, e))?;
            chown_tree(&entry.path(), uid, gid)?;
        }
    }
    debug!(path = %path.display(), "Changed ownership");
    Ok(())
}
