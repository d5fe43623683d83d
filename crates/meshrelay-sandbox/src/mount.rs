//! Mount validation for sandbox invocations (§4.2).
//!
//! Every group gets its own workspace mounted read-write, main and non-main
//! alike — §4.2 reserves the read-only restriction for the *global shared
//! context* mount, not the group's own workspace (see [`base_mounts`]).
//! Additional mounts requested by a task or command go through
//! [`validate_mount`], which enforces a fixed denylist (credentials, SSH
//! keys, cloud config) plus an operator-supplied blocked-prefix list from
//! config, and forces non-main groups to read-only per the allowlist.

use std::path::{Path, PathBuf};

use crate::error::{Result, SandboxError};
use crate::types::MountSpec;

/// Paths that are never mountable, regardless of configuration. Matched as
/// path-component prefixes so both `/root/.ssh` and `/root/.ssh/id_rsa` are
/// caught.
const HARD_DENYLIST: &[&str] = &[
    ".ssh",
    ".aws",
    ".gcp",
    ".gnupg",
    ".config/gcloud",
    ".kube",
    ".docker/config.json",
];

/// The group workspace mount: always read-write regardless of `is_main`.
/// `is_main` is accepted (rather than dropped) so call sites don't need a
/// separate branch — it's currently unused here but mirrors the signature
/// of the per-group mount builders that do vary by it.
pub fn base_mounts(workspace_root: &Path, group_folder: &str, _is_main: bool) -> Vec<MountSpec> {
    let host_path = workspace_root.join(group_folder);
    vec![MountSpec::new(host_path, "/workspace", false)]
}

/// Validates an additional mount request against the hard denylist and the
/// operator's configured blocked prefixes. Non-main groups may only request
/// read-only mounts (§4.2 "non-main groups are forced read-only").
pub fn validate_mount(
    mount: &MountSpec,
    is_main: bool,
    blocked_prefixes: &[PathBuf],
) -> Result<MountSpec> {
    if !is_main && !mount.read_only {
        return Err(SandboxError::MountDenied(format!(
            "non-main group cannot request a writable mount at {}",
            mount.guest_path.display()
        )));
    }

    let host_str = mount.host_path.to_string_lossy();
    for blocked in HARD_DENYLIST {
        if host_str.contains(blocked) {
            return Err(SandboxError::MountDenied(format!(
                "{} is on the hard denylist",
                mount.host_path.display()
            )));
        }
    }

    for prefix in blocked_prefixes {
        if mount.host_path.starts_with(prefix) {
            return Err(SandboxError::MountDenied(format!(
                "{} falls under blocked prefix {}",
                mount.host_path.display(),
                prefix.display()
            )));
        }
    }

    Ok(mount.clone())
}

impl Clone for MountSpec {
    fn clone(&self) -> Self {
        Self {
            host_path: self.host_path.clone(),
            guest_path: self.guest_path.clone(),
            read_only: self.read_only,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_mount_is_read_write_for_non_main() {
        let mounts = base_mounts(Path::new("/var/meshrelay/groups"), "team-a", false);
        assert_eq!(mounts.len(), 1);
        assert!(!mounts[0].read_only);
    }

    #[test]
    fn base_mount_is_read_write_for_main() {
        let mounts = base_mounts(Path::new("/var/meshrelay/groups"), "main", true);
        assert!(!mounts[0].read_only);
    }

    #[test]
    fn denies_ssh_dir() {
        let mount = MountSpec::new("/root/.ssh", "/mnt/ssh", true);
        let err = validate_mount(&mount, true, &[]).unwrap_err();
        assert!(matches!(err, SandboxError::MountDenied(_)));
    }

    #[test]
    fn denies_writable_mount_for_non_main_group() {
        let mount = MountSpec::new("/tmp/shared", "/mnt/shared", false);
        let err = validate_mount(&mount, false, &[]).unwrap_err();
        assert!(matches!(err, SandboxError::MountDenied(_)));
    }

    #[test]
    fn allows_read_only_mount_for_non_main_group() {
        let mount = MountSpec::new("/tmp/shared", "/mnt/shared", true);
        assert!(validate_mount(&mount, false, &[]).is_ok());
    }

    #[test]
    fn denies_configured_blocked_prefix() {
        let mount = MountSpec::new("/var/secrets/api-keys", "/mnt/keys", true);
        let err =
            validate_mount(&mount, true, &[PathBuf::from("/var/secrets")]).unwrap_err();
        assert!(matches!(err, SandboxError::MountDenied(_)));
    }
}
