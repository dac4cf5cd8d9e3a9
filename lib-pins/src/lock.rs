use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{PinError, Result};

/// Directory-level lock serializing tarball builds and extracts on a
/// shared scratch path. Acquisition polls until the lock file can be
/// created; the lock file is removed on drop.
#[derive(Debug)]
pub struct ScratchLock {
    lock_path: PathBuf,
}

impl ScratchLock {
    /// Acquires the lock guarding `target`, polling every `poll` until
    /// `timeout` elapses.
    pub async fn acquire(target: &Path, poll: Duration, timeout: Duration) -> Result<Self> {
        let mut lock_name = target.as_os_str().to_os_string();
        lock_name.push(".lock");
        let lock_path = PathBuf::from(lock_name);

        let deadline = Instant::now() + timeout;

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
                Ok(_) => return Ok(Self { lock_path }),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        return Err(PinError::ScratchBusy(target.display().to_string()));
                    }
                    tokio::time::sleep(poll).await;
                }
                Err(e) => return Err(PinError::Io(e)),
            }
        }
    }
}

impl Drop for ScratchLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.lock_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn lock_is_exclusive_until_released() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("scratch");

        let lock = ScratchLock::acquire(&target, Duration::from_millis(5), Duration::from_millis(50))
            .await
            .unwrap();

        let contended =
            ScratchLock::acquire(&target, Duration::from_millis(5), Duration::from_millis(50)).await;
        assert!(matches!(contended, Err(PinError::ScratchBusy(_))));

        drop(lock);

        let reacquired =
            ScratchLock::acquire(&target, Duration::from_millis(5), Duration::from_millis(50)).await;
        assert!(reacquired.is_ok());
    }
}
