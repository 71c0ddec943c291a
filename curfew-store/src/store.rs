//! Store: atomic whole-file read/replace of a single encrypted blob.
//!
//! Spec contract (spec.md §4.4): `load()` returns the blob or a distinguishable
//! not-found/IO error; `save()` creates the parent directory on demand and replaces the
//! file atomically via write-temp-then-rename, so a crash mid-write is never observed as
//! a valid-but-truncated prior state (spec.md §9: "any such rename would produce either
//! the old intact blob or the new intact blob"). Concealment is applied where the host
//! supports it; elsewhere the hint is silently ignored.
//!
//! Grounded on `clock-bound-shm/src/writer.rs`'s `ShmWriter::new()` lifecycle handling
//! (missing file vs. malformed file vs. valid file are three distinct start states
//! there too), replacing the mmap'd shared-memory segment with a plain file since this
//! spec's `State` is process-private, not an IPC channel to concurrent readers.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::StoreError;

/// Atomic persistence of a single encrypted blob at a configured path.
///
/// Implementations must guarantee that `save` is crash-atomic: a reader calling `load`
/// concurrently, or after an abrupt process death mid-`save`, must only ever observe
/// either the blob from the last successful `save` or nothing at all — never a partial
/// write.
pub trait Store {
    fn load(&self) -> Result<Vec<u8>, StoreError>;
    fn save(&self, bytes: &[u8]) -> Result<(), StoreError>;
}

/// A [`Store`] backed by a plain file on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Best-effort concealment of the state file.
    ///
    /// Spec.md §4.4: "the path's 'hidden/system' metadata is set where the host OS
    /// supports it; on hosts where it does not, the hint is silently ignored." Unix has
    /// no hidden-file attribute bit; the closest analog is owner-only permissions, which
    /// also happens to keep the passphrase-encrypted blob away from other local users.
    /// Failure here is swallowed, matching the "silently ignored" contract.
    fn conceal(path: &Path) {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
        }
        #[cfg(not(unix))]
        {
            let _ = path;
        }
    }
}

impl Store for FileStore {
    fn load(&self) -> Result<Vec<u8>, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn save(&self, bytes: &[u8]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state".to_string());
        let tmp_name = format!(".{file_name}.tmp.{}", std::process::id());
        let tmp_path = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.join(tmp_name),
            _ => PathBuf::from(tmp_name),
        };
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(bytes)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        Self::conceal(&self.path);
        Ok(())
    }
}
