//! Atomic filesystem writes.
//!
//! All atomic writes follow this pattern:
//! 1. Write content to a temporary file in the same directory
//! 2. Sync the file to disk (fsync)
//! 3. Atomically replace the original file with `rename()`
//!
//! `std::fs::rename` replaces an existing destination on both POSIX and
//! Windows. Source and destination must be on the same filesystem, which
//! holds because the temporary file lives next to the target.
//!
//! The temporary name carries the process id, so two processes writing the
//! same target never share a temporary file. On crash, a temporary file may
//! remain (named `.{filename}.{pid}.tmp`); record listing skips dot-files.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Atomically write bytes to a file.
///
/// The target is either left untouched or fully replaced; readers never
/// observe a partial file.
pub fn atomic_write<P: AsRef<Path>>(path: P, content: &[u8]) -> io::Result<()> {
    let path = path.as_ref();

    if let Some(parent) = path.parent()
        && !parent.exists()
    {
        fs::create_dir_all(parent)?;
    }

    let temp_path = generate_temp_path(path)?;

    write_and_sync(&temp_path, content)?;

    fs::rename(&temp_path, path).inspect_err(|_| {
        let _ = fs::remove_file(&temp_path);
    })?;

    // Persist the directory entry as well; opening a directory fails on
    // Windows, which skips this step
    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }

    Ok(())
}

/// Generate a temporary file path in the same directory as the target.
fn generate_temp_path(target: &Path) -> io::Result<PathBuf> {
    let parent = target.parent().unwrap_or(Path::new("."));
    let filename = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid file path"))?;

    Ok(parent.join(format!(".{}.{}.tmp", filename, std::process::id())))
}

/// Write content to a file and sync to disk.
fn write_and_sync(path: &Path, content: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;

    let result = file.write_all(content).and_then(|_| file.sync_all());
    if result.is_err() {
        let _ = fs::remove_file(path);
    }
    result
}
