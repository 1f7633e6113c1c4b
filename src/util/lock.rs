use std::fs::{File, OpenOptions};
use std::path::Path;

use anyhow::{Context, Result};
use fs2::FileExt;

/// Holds an advisory exclusive lock on the daemon's lock file for as long as
/// it stays alive; dropping it releases the lock. Replaces the original's
/// bare `flock(LOCK_EX | LOCK_NB)` on a file opened with mode 0640.
pub struct LockFile {
    file: File,
}

impl LockFile {
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating lock file directory {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .with_context(|| format!("opening lock file {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o640)).ok();
        }

        file.try_lock_exclusive()
            .with_context(|| format!("locking {} (is another fitbitd running?)", path.display()))?;

        Ok(Self { file })
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("fitbitd-lock-test-{}-{}", std::process::id(), name));
        p
    }

    #[test]
    fn acquires_and_releases() {
        let path = scratch_path("basic");
        let _ = std::fs::remove_file(&path);

        let lock = LockFile::acquire(&path).expect("first acquire succeeds");
        drop(lock);

        let lock2 = LockFile::acquire(&path).expect("re-acquire after drop succeeds");
        drop(lock2);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn second_concurrent_acquire_fails() {
        let path = scratch_path("concurrent");
        let _ = std::fs::remove_file(&path);

        let _lock = LockFile::acquire(&path).expect("first acquire succeeds");
        let second = LockFile::acquire(&path);
        assert!(second.is_err(), "a second exclusive lock on the same file must fail");

        drop(_lock);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn creates_missing_parent_directory() {
        let mut dir = std::env::temp_dir();
        dir.push(format!("fitbitd-lock-test-{}-parent", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("nested").join("lock");

        let lock = LockFile::acquire(&path).expect("creates parent dirs and acquires");
        drop(lock);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
