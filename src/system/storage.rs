use std::path::Path;

use sysinfo::Disks;

pub trait StorageProbe: Send + Sync {
    /// Whether the filesystem holding `dir` has at least `min_free` bytes available.
    fn has_space(&self, dir: &Path, min_free: u64) -> bool;
}

/// Looks up the disk with the longest mount point containing the directory.
#[derive(Debug, Default)]
pub struct DiskSpaceProbe;

impl StorageProbe for DiskSpaceProbe {
    fn has_space(&self, dir: &Path, min_free: u64) -> bool {
        let disks = Disks::new_with_refreshed_list();
        let target = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
        let mounts = disks.list().iter().map(|disk| disk.mount_point());
        let Some(mount) = longest_mount(&target, mounts) else {
            tracing::warn!(dir = %dir.display(), "no disk found for directory, assuming space");
            return true;
        };
        disks
            .list()
            .iter()
            .find(|disk| disk.mount_point() == mount)
            .is_none_or(|disk| disk.available_space() >= min_free)
    }
}

fn longest_mount<'a>(target: &Path, mounts: impl Iterator<Item = &'a Path>) -> Option<&'a Path> {
    mounts
        .filter(|mount| target.starts_with(mount))
        .max_by_key(|mount| mount.as_os_str().len())
}
