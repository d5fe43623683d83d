//! Builds the full mount list for one sandbox invocation (§4.2 "Mounts").
//!
//! [`meshrelay_sandbox::mount::base_mounts`] only covers the group workspace
//! mount; the rest (shared context, IPC namespace, runtime source) are
//! dispatch-level concerns since they depend on `Config` and the group's
//! folder, not anything the Sandbox Runner itself needs to know about.

use std::path::Path;

use meshrelay_core::Config;
use meshrelay_sandbox::mount::base_mounts;
use meshrelay_sandbox::MountSpec;

/// Assembles the base + well-known additional mounts for `folder`. Any
/// further per-group mounts configured via `mount_allowlist_path` are
/// validated (not built) by [`meshrelay_sandbox::mount::validate_mount`]
/// elsewhere — this function only emits the mounts every invocation gets.
pub fn build_mounts(config: &Config, folder: &str, is_main: bool, runtime_name: &str) -> Vec<MountSpec> {
    let mut mounts = base_mounts(&config.store.groups_dir, folder, is_main);

    // §4.2: the global shared context is read-only for non-main groups; the
    // group's own workspace above is read-write for everyone.
    let shared = config.data_root.join("shared");
    mounts.push(MountSpec::new(shared, "/shared", !is_main));

    mounts.push(MountSpec::new(config.ipc_dir(folder), "/ipc", false));

    let runtime_source = runtime_source_path(&config.data_root, runtime_name);
    mounts.push(MountSpec::new(runtime_source, "/runtime", true));

    mounts
}

fn runtime_source_path(data_root: &Path, runtime_name: &str) -> std::path::PathBuf {
    data_root.join("runtimes").join(runtime_name).join("source")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_workspace_shared_ipc_and_runtime_mounts() {
        let mut config = Config::default();
        config.data_root = std::path::PathBuf::from("/tmp/meshrelay-test-data");
        config.store.groups_dir = std::path::PathBuf::from("/tmp/meshrelay-test-groups");

        let mounts = build_mounts(&config, "main", true, "claude");
        assert_eq!(mounts.len(), 4);
        assert_eq!(mounts[0].guest_path, Path::new("/workspace"));
        assert!(!mounts[0].read_only);
        assert_eq!(mounts[1].guest_path, Path::new("/shared"));
        assert!(!mounts[1].read_only, "main group gets a writable shared context");
        assert_eq!(mounts[2].guest_path, Path::new("/ipc"));
        assert!(!mounts[2].read_only);
        assert_eq!(mounts[3].guest_path, Path::new("/runtime"));
        assert!(mounts[3].read_only);
    }

    #[test]
    fn non_main_workspace_mount_is_read_write() {
        let mut config = Config::default();
        config.data_root = std::path::PathBuf::from("/tmp/meshrelay-test-data");
        config.store.groups_dir = std::path::PathBuf::from("/tmp/meshrelay-test-groups");

        let mounts = build_mounts(&config, "side", false, "claude");
        assert!(!mounts[0].read_only, "group workspace must be read-write for non-main groups too");
        assert!(mounts[1].read_only, "shared context stays read-only for non-main groups");
    }

    #[test]
    fn main_group_shared_context_mount_is_read_write() {
        let mut config = Config::default();
        config.data_root = std::path::PathBuf::from("/tmp/meshrelay-test-data");
        config.store.groups_dir = std::path::PathBuf::from("/tmp/meshrelay-test-groups");

        let mounts = build_mounts(&config, "main", true, "claude");
        assert!(!mounts[1].read_only);
    }
}
