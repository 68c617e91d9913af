//! Atomic file operations
//!
//! Every durable write goes through [`write_atomic`]: the payload is written to
//! `<target>.tmp`, flushed to disk, then renamed over the target. Readers see
//! either the old file or the new one, never a partial write.

use crate::Result;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Path of the temporary sibling used while writing `target`
pub fn temp_path_for(target: &Path) -> PathBuf {
    let mut name: OsString = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("tza"));
    name.push(".tmp");
    target.with_file_name(name)
}

/// Write `contents` to `target` atomically
///
/// Parent directories are created if missing.
pub fn write_atomic(target: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let temp = temp_path_for(target);
    {
        let mut file = File::create(&temp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }

    if let Err(e) = fs::rename(&temp, target) {
        // Best-effort cleanup; the rename error is what matters
        let _ = fs::remove_file(&temp);
        return Err(e.into());
    }

    Ok(())
}
