use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::config::LockStrategy;

/// Capability to lock a file against other cooperating claimants.
///
/// Locks are advisory: a process that does not go through a `FileLocker`
/// is not stopped by them.
pub trait FileLocker: Send + Sync {
    /// Attempts to lock `path` without blocking. Returns false when another
    /// holder already has it or the file cannot be locked.
    fn try_lock(&self, path: &Path) -> bool;

    /// Releases a lock taken by this locker. The file may have been moved
    /// away since it was locked.
    fn unlock(&self, path: &Path);
}

/// Builds the locker for a configured strategy.
pub fn locker_for(strategy: LockStrategy) -> Arc<dyn FileLocker> {
    match strategy {
        #[cfg(unix)]
        LockStrategy::Flock => Arc::new(FlockLocker::new()),
        #[cfg(not(unix))]
        LockStrategy::Flock => {
            warn!("flock locking is unavailable on this platform, using lock files");
            Arc::new(LockFileLocker::new())
        }
        LockStrategy::LockFile => Arc::new(LockFileLocker::new()),
    }
}

/// Exclusive `flock(2)` on the deposited file.
///
/// The lock follows the open file description, so it stays valid after the
/// file is renamed out of the inbox and is released when dropped.
#[cfg(unix)]
#[derive(Default)]
pub struct FlockLocker {
    held: Mutex<HashMap<PathBuf, nix::fcntl::Flock<std::fs::File>>>,
}

#[cfg(unix)]
impl FlockLocker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(unix)]
impl FileLocker for FlockLocker {
    fn try_lock(&self, path: &Path) -> bool {
        use nix::errno::Errno;
        use nix::fcntl::{Flock, FlockArg};

        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if held.contains_key(path) {
            return false;
        }

        let file = match std::fs::File::open(path) {
            Ok(file) => file,
            Err(e) => {
                debug!("Cannot open {} for locking: {}", path.display(), e);
                return false;
            }
        };

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            // The file may have been claimed and replaced between open and lock.
            Ok(lock) if !is_same_file(&lock, path) => {
                debug!("{} was replaced while locking", path.display());
                false
            }
            Ok(lock) => {
                held.insert(path.to_path_buf(), lock);
                true
            }
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => false,
            Err((_, errno)) => {
                warn!("Failed to lock {}: {}", path.display(), errno);
                false
            }
        }
    }

    fn unlock(&self, path: &Path) {
        let lock = self
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
        if let Some(lock) = lock {
            if let Err((_, errno)) = lock.unlock() {
                warn!("Failed to unlock {}: {}", path.display(), errno);
            }
        }
    }
}

/// True when `file` is still the file found at `path`.
#[cfg(unix)]
fn is_same_file(file: &std::fs::File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (file.metadata(), std::fs::metadata(path)) {
        (Ok(locked), Ok(current)) => {
            locked.dev() == current.dev() && locked.ino() == current.ino()
        }
        _ => false,
    }
}

/// Lock held by exclusively creating `<file>.lock` next to the file.
///
/// Lock files of a crashed holder are not cleaned up automatically.
#[derive(Default)]
pub struct LockFileLocker {
    held: Mutex<HashSet<PathBuf>>,
}

impl LockFileLocker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }
}

impl FileLocker for LockFileLocker {
    fn try_lock(&self, path: &Path) -> bool {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if held.contains(path) || !path.exists() {
            return false;
        }

        let lock_path = Self::lock_path(path);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(_) => {
                held.insert(path.to_path_buf());
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => false,
            Err(e) => {
                warn!("Failed to create lock file {}: {}", lock_path.display(), e);
                false
            }
        }
    }

    fn unlock(&self, path: &Path) {
        let was_held = self
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
        if !was_held {
            return;
        }

        let lock_path = Self::lock_path(path);
        if let Err(e) = std::fs::remove_file(&lock_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove lock file {}: {}", lock_path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;
    use tempfile::TempDir;

    fn deposit(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"PK").unwrap();
        path
    }

    fn exactly_one_winner(lockers: Vec<Arc<dyn FileLocker>>, path: &Path) {
        let barrier = Arc::new(Barrier::new(lockers.len()));
        let handles: Vec<_> = lockers
            .into_iter()
            .map(|locker| {
                let barrier = Arc::clone(&barrier);
                let path = path.to_path_buf();
                thread::spawn(move || {
                    barrier.wait();
                    locker.try_lock(&path)
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_flock_single_winner_across_lockers() {
        let dir = TempDir::new().unwrap();
        let path = deposit(&dir, "job.zip");
        let lockers: Vec<Arc<dyn FileLocker>> =
            (0..4).map(|_| Arc::new(FlockLocker::new()) as Arc<dyn FileLocker>).collect();
        exactly_one_winner(lockers, &path);
    }

    #[cfg(unix)]
    #[test]
    fn test_flock_relock_after_unlock() {
        let dir = TempDir::new().unwrap();
        let path = deposit(&dir, "job.zip");
        let first = FlockLocker::new();
        let second = FlockLocker::new();

        assert!(first.try_lock(&path));
        assert!(!first.try_lock(&path));
        assert!(!second.try_lock(&path));

        first.unlock(&path);
        assert!(second.try_lock(&path));
        second.unlock(&path);
    }

    #[cfg(unix)]
    #[test]
    fn test_flock_unlock_after_move() {
        let dir = TempDir::new().unwrap();
        let path = deposit(&dir, "job.zip");
        let locker = FlockLocker::new();

        assert!(locker.try_lock(&path));
        std::fs::rename(&path, dir.path().join("moved.zip")).unwrap();
        locker.unlock(&path);

        assert!(locker.held.lock().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_replaced_file_is_not_the_locked_file() {
        let dir = TempDir::new().unwrap();
        let path = deposit(&dir, "job.zip");
        let opened = std::fs::File::open(&path).unwrap();
        assert!(is_same_file(&opened, &path));

        std::fs::rename(&path, dir.path().join("moved.zip")).unwrap();
        assert!(!is_same_file(&opened, &path));

        deposit(&dir, "job.zip");
        assert!(!is_same_file(&opened, &path));
    }

    #[test]
    fn test_flock_missing_file_not_locked() {
        let dir = TempDir::new().unwrap();
        let locker = locker_for(LockStrategy::Flock);
        assert!(!locker.try_lock(&dir.path().join("absent.zip")));
    }

    #[test]
    fn test_lock_file_single_winner() {
        let dir = TempDir::new().unwrap();
        let path = deposit(&dir, "job.zip");
        let lockers: Vec<Arc<dyn FileLocker>> = (0..4)
            .map(|_| Arc::new(LockFileLocker::new()) as Arc<dyn FileLocker>)
            .collect();
        exactly_one_winner(lockers, &path);
    }

    #[test]
    fn test_lock_file_created_and_removed() {
        let dir = TempDir::new().unwrap();
        let path = deposit(&dir, "job.zip");
        let locker = LockFileLocker::new();

        assert!(locker.try_lock(&path));
        assert!(LockFileLocker::lock_path(&path).exists());

        locker.unlock(&path);
        assert!(!LockFileLocker::lock_path(&path).exists());
        assert!(locker.try_lock(&path));
    }
}
