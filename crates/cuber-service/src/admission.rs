//! Disk-space admission gate (`MIN_FREE_DISK`): operations that grow a Cube's
//! storage file are refused outright when free space on the Cube's volume is low,
//! rather than left to fail mid-write.

use cuber_types::ServiceError;
use std::path::Path;

/// Check that the volume containing `path` has at least `min_free_disk_mb` free.
/// `path` need not exist yet; its nearest existing ancestor directory is checked.
pub fn check_disk_space(path: &Path, min_free_disk_mb: u64) -> Result<(), ServiceError> {
    let mut probe = path;
    while !probe.exists() {
        match probe.parent() {
            Some(parent) => probe = parent,
            None => break,
        }
    }
    let available = fs2::available_space(probe)
        .map_err(|e| ServiceError::Resource(format!("disk space check failed: {e}")))?;
    let min_free_bytes = min_free_disk_mb * 1024 * 1024;
    if available < min_free_bytes {
        return Err(ServiceError::Resource(format!(
            "only {} MiB free, below the {} MiB admission threshold",
            available / (1024 * 1024),
            min_free_disk_mb
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_an_unreasonably_high_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let err = check_disk_space(&dir.path().join("cube.db"), u64::MAX / (1024 * 1024))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Resource(_)));
    }

    #[test]
    fn accepts_a_trivially_small_threshold() {
        let dir = tempfile::tempdir().unwrap();
        check_disk_space(&dir.path().join("cube.db"), 1).unwrap();
    }
}
