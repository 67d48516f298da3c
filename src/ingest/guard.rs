//! Write guard: exclusive access to the load → aggregate → save sequence,
//! acquired with a bounded wait.
//!
//! Writers in one process queue on a mutex. A guard built with
//! [`WriteGuard::for_document`] also takes an exclusive `flock` on a sibling
//! lockfile, so `serve` and a one-shot `ingest` never interleave their
//! read-modify-write cycles on the same document.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};

use crate::core::errors::Result;
use crate::ingest::service::IngestError;

#[cfg(unix)]
type FileLock = nix::fcntl::Flock<std::fs::File>;
#[cfg(not(unix))]
type FileLock = ();

const LOCK_POLL: Duration = Duration::from_millis(10);

/// Serializes document writers.
#[derive(Debug)]
pub struct WriteGuard {
    lock: Mutex<()>,
    lock_file: Option<PathBuf>,
    timeout: Duration,
}

/// Proof of exclusive write access; released when dropped, on every exit path.
#[must_use = "the write lease is released as soon as it is dropped"]
pub struct WriteLease<'a> {
    _file: Option<FileLock>,
    _held: MutexGuard<'a, ()>,
}

impl std::fmt::Debug for WriteLease<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteLease")
            .field("file_locked", &self._file.is_some())
            .finish_non_exhaustive()
    }
}

impl WriteGuard {
    /// In-process guard only.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self {
            lock: Mutex::new(()),
            lock_file: None,
            timeout,
        }
    }

    /// Guard that also excludes other processes writing `document`, via
    /// `<document>.lock`.
    #[must_use]
    pub fn for_document(document: &Path, timeout: Duration) -> Self {
        let mut name = document.as_os_str().to_owned();
        name.push(".lock");
        Self {
            lock: Mutex::new(()),
            lock_file: Some(PathBuf::from(name)),
            timeout,
        }
    }

    /// Block up to the configured timeout for exclusive access. The timeout
    /// covers both the in-process and the lockfile wait.
    pub fn acquire(&self) -> std::result::Result<WriteLease<'_>, IngestError> {
        let deadline = Instant::now() + self.timeout;
        let held = self.lock.try_lock_for(self.timeout).ok_or_else(|| self.busy())?;

        let file = match &self.lock_file {
            Some(path) => Some(lock_exclusive(path, deadline)?.ok_or_else(|| self.busy())?),
            None => None,
        };

        Ok(WriteLease {
            _file: file,
            _held: held,
        })
    }

    fn busy(&self) -> IngestError {
        IngestError::Busy {
            waited: self.timeout,
        }
    }
}

/// Poll a non-blocking exclusive `flock` until `deadline`; `None` on timeout.
#[cfg(unix)]
fn lock_exclusive(path: &Path, deadline: Instant) -> Result<Option<FileLock>> {
    use crate::core::errors::TelemetryError;
    use nix::errno::Errno;
    use nix::fcntl::{Flock, FlockArg};
    use std::fs::OpenOptions;
    use std::os::unix::fs::OpenOptionsExt;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| TelemetryError::io(parent, e))?;
    }
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .mode(0o600)
        .open(path)
        .map_err(|e| TelemetryError::io(path, e))?;

    loop {
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(locked) => return Ok(Some(locked)),
            Err((returned, errno)) if errno == Errno::EWOULDBLOCK || errno == Errno::EINTR => {
                file = returned;
            }
            Err((_, errno)) => {
                return Err(TelemetryError::Runtime {
                    details: format!("failed to lock {}: {errno}", path.display()),
                });
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        std::thread::sleep(LOCK_POLL.min(deadline - now));
    }
}

#[cfg(not(unix))]
fn lock_exclusive(path: &Path, _deadline: Instant) -> Result<Option<FileLock>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| crate::core::errors::TelemetryError::io(parent, e))?;
    }
    Ok(Some(()))
}
