//! Delete: remove a Cube's storage file from disk. Catalog-row cleanup (stats,
//! lineage, contributor, Cube rows) is the registry's responsibility; this is the one
//! piece of Delete that touches the filesystem this crate already owns via Export/Import.

use cuber_types::LifecycleError;
use std::path::Path;

/// Remove the storage file at `path`. Missing files are treated as already-deleted,
/// matching Delete's irreversibility contract — calling it twice is not an error.
pub fn delete_storage_file(path: impl AsRef<Path>) -> Result<(), LifecycleError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(LifecycleError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_removes_an_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cube.db");
        std::fs::write(&path, b"data").unwrap();
        delete_storage_file(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn delete_is_idempotent_for_a_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.db");
        delete_storage_file(&path).unwrap();
    }
}
