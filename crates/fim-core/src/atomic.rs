//! Whole-file replacement through a staging file and a rename.
//!
//! The staging file lives in the destination directory so the final rename
//! never crosses a filesystem. Readers observe either the old content or the
//! new content, never a torn mix.

use anyhow::{anyhow, Context, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

/// Prefix of staging files, used to find orphans left by a crash.
pub const STAGING_PREFIX: &str = ".fim_staging_";

/// Atomically replace `dest` with `bytes`.
pub fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<()> {
    let parent = parent_dir(dest)?;
    fs::create_dir_all(&parent).with_context(|| format!("create {}", parent.display()))?;

    let staging_path = parent.join(format!("{}{}", STAGING_PREFIX, Uuid::new_v4().simple()));
    let written = (|| -> Result<()> {
        let mut file = File::create(&staging_path)
            .with_context(|| format!("create staging {}", staging_path.display()))?;
        file.write_all(bytes)?;
        file.sync_all()?;
        Ok(())
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&staging_path);
        return Err(e);
    }

    if let Err(e) = atomic_rename(&staging_path, dest) {
        let _ = fs::remove_file(&staging_path);
        return Err(e).with_context(|| {
            format!("atomic rename {} -> {}", staging_path.display(), dest.display())
        });
    }
    fsync_dir(&parent);
    Ok(())
}

/// Remove staging files left behind in `dir` by an interrupted write.
/// Returns the number of files removed.
pub fn cleanup_staging(dir: &Path) -> usize {
    let mut removed = 0;
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            if entry.file_name().to_string_lossy().starts_with(STAGING_PREFIX) {
                warn!(path = %entry.path().display(), "removing orphaned staging file");
                if fs::remove_file(entry.path()).is_ok() {
                    removed += 1;
                }
            }
        }
    }
    removed
}

fn parent_dir(path: &Path) -> Result<PathBuf> {
    match path.parent() {
        Some(p) if p.as_os_str().is_empty() => Ok(PathBuf::from(".")),
        Some(p) => Ok(p.to_path_buf()),
        None => Err(anyhow!("no parent dir for {}", path.display())),
    }
}

fn atomic_rename(from: &Path, to: &Path) -> Result<()> {
    #[cfg(not(windows))]
    {
        fs::rename(from, to)?;
    }
    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt;
        let wide_from: Vec<u16> = from.as_os_str().encode_wide().chain(Some(0)).collect();
        let wide_to: Vec<u16> = to.as_os_str().encode_wide().chain(Some(0)).collect();
        let ret = unsafe {
            windows_sys::Win32::Storage::FileSystem::MoveFileExW(
                wide_from.as_ptr(),
                wide_to.as_ptr(),
                windows_sys::Win32::Storage::FileSystem::MOVEFILE_REPLACE_EXISTING
                    | windows_sys::Win32::Storage::FileSystem::MOVEFILE_WRITE_THROUGH,
            )
        };
        if ret == 0 {
            return Err(anyhow!("MoveFileExW failed: {}", std::io::Error::last_os_error()));
        }
    }
    Ok(())
}

fn fsync_dir(path: &Path) {
    #[cfg(unix)]
    {
        if let Ok(dir) = fs::OpenOptions::new().read(true).open(path) {
            let _ = dir.sync_all();
        }
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn replaces_existing_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("target.txt");
        fs::write(&path, b"a much longer original body").unwrap();
        write_atomic(&path, b"short").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"short");
    }

    #[test]
    fn creates_missing_file_and_leaves_no_staging() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("target.txt");
        write_atomic(&path, b"hello").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"hello");
        let leftovers = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with(STAGING_PREFIX))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn cleanup_removes_only_staging_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(format!("{STAGING_PREFIX}abc")), b"x").unwrap();
        fs::write(dir.path().join("keep.txt"), b"y").unwrap();
        assert_eq!(cleanup_staging(dir.path()), 1);
        assert!(dir.path().join("keep.txt").exists());
    }
}
