// Standard library imports
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

// External crate imports
use async_trait::async_trait;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

// Internal crate imports
use crate::error::DbInfraError;

pub fn lock_id(key: &str) -> u64 {
    xxh3_64(key.as_bytes())
}

/// Lock key for one database on one engine. The URL must already be sanitized.
pub fn provision_lock_key(database: &str, sanitized_url: &str) -> String {
    format!("provision:{database}:{sanitized_url}")
}

// ============================================================================
// BootstrapLock Trait and Implementations
// ============================================================================

/// Guard struct that represents a held lock.
/// For file locks, holds the OS file handle directly; released on `release` or drop.
pub struct Guard {
    lock_file: Option<File>,
    lock_path: Option<PathBuf>,
    released: bool,
}

impl Guard {
    fn file(file: File, lock_path: PathBuf) -> Self {
        Self {
            lock_file: Some(file),
            lock_path: Some(lock_path),
            released: false,
        }
    }

    fn in_memory() -> Self {
        Self {
            lock_file: None,
            lock_path: None,
            released: false,
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub async fn release(mut self) -> Result<(), DbInfraError> {
        if self.released {
            return Ok(());
        }

        if let Some(file) = self.lock_file.take() {
            use fs4::fs_std::FileExt;

            let lock_path_display = self
                .lock_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "unknown".to_string());

            match FileExt::unlock(&file) {
                Ok(()) => {
                    debug!(lock_path = lock_path_display, "bootstrap file lock released");
                }
                Err(e) => {
                    // The handle is dropped right after, which releases the OS lock anyway
                    debug!(
                        error = %e,
                        lock_path = lock_path_display,
                        "bootstrap file unlock returned error (may be benign)"
                    );
                }
            }
        }

        self.released = true;
        Ok(())
    }
}

/// Bootstrap lock serializing provisioning runs against the same database.
#[async_trait]
pub trait BootstrapLock {
    /// Try to acquire the lock (non-blocking).
    /// Returns Some(Guard) if acquired, None if already held by another process.
    async fn try_acquire(&mut self) -> Result<Option<Guard>, DbInfraError>;
}

/// Host-level exclusive file lock on `<dir>/provision-<xxh3(key)>.lock`.
/// Non-blocking `try_lock_exclusive()` integrates with the backoff/timeout loop.
pub struct FileLock {
    lock_path: PathBuf,
}

impl FileLock {
    pub fn new(lock_path: &Path) -> Self {
        Self {
            lock_path: lock_path.to_path_buf(),
        }
    }

    /// Lock file for `key` inside `dir`. Every process using the same key
    /// resolves the same on-disk file.
    pub fn for_key(dir: &Path, key: &str) -> Self {
        Self::new(&dir.join(format!("provision-{:016x}.lock", lock_id(key))))
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

#[async_trait]
impl BootstrapLock for FileLock {
    async fn try_acquire(&mut self) -> Result<Option<Guard>, DbInfraError> {
        use fs4::fs_std::FileExt;

        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DbInfraError::lock(format!("failed to create lock file parent directory: {e}"))
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| DbInfraError::lock(format!("failed to open lock file: {e}")))?;

        // Ok(true) = acquired, Ok(false) = held elsewhere
        match file.try_lock_exclusive() {
            Ok(true) => {
                debug!(lock_path = %self.lock_path.display(), "bootstrap file lock acquired");
                Ok(Some(Guard::file(file, self.lock_path.clone())))
            }
            Ok(false) => {
                debug!(lock_path = %self.lock_path.display(), "bootstrap file lock contended");
                Ok(None)
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                debug!(
                    lock_path = %self.lock_path.display(),
                    "bootstrap file lock contended (would block error)"
                );
                Ok(None)
            }
            Err(e) => Err(DbInfraError::lock(format!(
                "failed to acquire bootstrap file lock: {e}"
            ))),
        }
    }
}

/// No-op lock, for runs the caller already serializes (`--no-lock`) and for tests.
pub struct InMemoryLock;

#[async_trait]
impl BootstrapLock for InMemoryLock {
    async fn try_acquire(&mut self) -> Result<Option<Guard>, DbInfraError> {
        Ok(Some(Guard::in_memory()))
    }
}
