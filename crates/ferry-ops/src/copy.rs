//! Byte-level copy with atomic placement.

use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::ops::ControlFlow;
use std::path::Path;

use filetime::FileTime;
use tracing::warn;

use ferry_core::{EngineConfig, Result, TransferError};

/// Copies single files and symlinks.
///
/// Data is streamed into a hidden sibling of the destination and renamed
/// into place once complete, so an interrupted copy never leaves a
/// truncated file under the final name.
#[derive(Debug, Clone, Copy)]
pub struct FileCopier {
    buffer_size: usize,
    preserve_timestamps: bool,
}

impl FileCopier {
    pub fn new(buffer_size: usize, preserve_timestamps: bool) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
            preserve_timestamps,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.copy_buffer_size, config.preserve_timestamps)
    }

    /// Copy `src` to `dest`, replacing whatever file is there.
    ///
    /// `on_chunk` sees the running byte count after every chunk and may
    /// break to abandon the copy; the partial data is discarded and a
    /// `Cancelled` error returned.
    pub fn copy_file(
        &self,
        src: &Path,
        dest: &Path,
        mut on_chunk: impl FnMut(u64) -> ControlFlow<()>,
    ) -> Result<u64> {
        let parent = dest
            .parent()
            .ok_or_else(|| TransferError::other(dest, "Destination has no parent directory"))?;
        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut reader = File::open(src).map_err(|e| TransferError::io(src, e))?;
        let meta = reader.metadata().map_err(|e| TransferError::io(src, e))?;

        let mut part = tempfile::Builder::new()
            .prefix(&format!(".{name}."))
            .suffix(".ferry-part")
            .tempfile_in(parent)
            .map_err(|e| TransferError::io(parent, e))?;

        let mut buf = vec![0u8; self.buffer_size];
        let mut written = 0u64;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransferError::io(src, e)),
            };
            part.write_all(&buf[..n])
                .map_err(|e| TransferError::io(dest, e))?;
            written += n as u64;

            if on_chunk(written).is_break() {
                return Err(TransferError::cancelled("Copy interrupted"));
            }
        }

        if written != meta.len() {
            return Err(TransferError::other(
                src,
                format!(
                    "Source changed during copy: expected {} bytes, read {written}",
                    meta.len()
                ),
            ));
        }

        if let Err(e) = fs::set_permissions(part.path(), meta.permissions()) {
            warn!(path = %dest.display(), error = %e, "Failed to copy permissions");
        }
        if self.preserve_timestamps {
            let atime = FileTime::from_last_access_time(&meta);
            let mtime = FileTime::from_last_modification_time(&meta);
            if let Err(e) = filetime::set_file_times(part.path(), atime, mtime) {
                warn!(path = %dest.display(), error = %e, "Failed to preserve timestamps");
            }
        }

        part.persist(dest)
            .map_err(|e| TransferError::io(dest, e.error))?;
        Ok(written)
    }

    /// Recreate the symlink `src` at `dest` without following it.
    #[cfg(unix)]
    pub fn copy_symlink(&self, src: &Path, dest: &Path) -> Result<()> {
        let target = fs::read_link(src).map_err(|e| TransferError::io(src, e))?;
        let parent = dest
            .parent()
            .ok_or_else(|| TransferError::other(dest, "Destination has no parent directory"))?;
        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let staging = parent.join(format!(
            ".{name}.{}.ferry-part",
            uuid::Uuid::new_v4().simple()
        ));
        std::os::unix::fs::symlink(&target, &staging)
            .map_err(|e| TransferError::io(&staging, e))?;

        if let Err(e) = fs::rename(&staging, dest) {
            let _ = fs::remove_file(&staging);
            return Err(TransferError::io(dest, e));
        }
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn copy_symlink(&self, src: &Path, _dest: &Path) -> Result<()> {
        Err(TransferError::other(
            src,
            "Symbolic links are not supported on this platform",
        ))
    }
}

impl Default for FileCopier {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}
