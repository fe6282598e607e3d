use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::Path;

/// Create `path` (and parents) with `mode` if it does not exist yet. Existing
/// directories keep their permissions.
pub fn ensure_dir(path: &Path, mode: u32) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    fs::DirBuilder::new()
        .recursive(true)
        .mode(mode)
        .create(path)
        .with_context(|| format!("create directory {}", path.display()))?;
    set_permissions(path, mode)
}

pub fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("set permissions {:o} on {}", mode, path.display()))
}

/// Permission bits of `path`, without the file type.
pub fn mode_of(path: &Path) -> Result<u32> {
    let meta = fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
    Ok(meta.permissions().mode() & 0o7777)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ensure_dir_creates_with_mode() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("a").join("b");
        ensure_dir(&target, 0o750).unwrap();
        assert!(target.is_dir());
        assert_eq!(mode_of(&target).unwrap(), 0o750);
    }

    #[test]
    fn test_ensure_dir_leaves_existing_alone() {
        let dir = TempDir::new().unwrap();
        set_permissions(dir.path(), 0o755).unwrap();
        ensure_dir(dir.path(), 0o700).unwrap();
        assert_eq!(mode_of(dir.path()).unwrap(), 0o755);
    }
}
