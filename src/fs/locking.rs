//! Per-state file locking for safe concurrent read-modify-write cycles
//!
//! The lock is a sibling file `<state>.lock` created with `create_new`, so
//! exactly one process wins. The winner writes `{owner_id, acquired_at,
//! expires_at}` into it. A holder that crashed leaves the file behind; the
//! next contender detects that it is stale and breaks it.
//!
//! This is a short-lived mutex around a single mutation. Logical ownership
//! of a plan across many mutations is the lease stored in the state itself.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{IoResultExt, Result, TrackerError};

/// Timing knobs for lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSettings {
    /// Give up after waiting this long
    pub timeout: Duration,
    /// Sleep between attempts while the lock is held
    pub retry_interval: Duration,
    /// Lifetime written into the lock payload; also the mtime age after
    /// which an unreadable lock file counts as abandoned
    pub stale_after: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            retry_interval: Duration::from_millis(50),
            stale_after: Duration::from_secs(3600),
        }
    }
}

/// Exclusive access to one state file for the lifetime of the guard.
pub trait StateMutex {
    type Guard;

    fn lock(&self, state_path: &Path) -> Result<Self::Guard>;
}

/// Contents of a lock file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockPayload {
    pub owner_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Path of the lock guarding `state_path`: `x.json` -> `x.json.lock`.
pub fn lock_path_for(state_path: &Path) -> PathBuf {
    let mut name = state_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    state_path.with_file_name(name)
}

/// Create-exclusive lock files with stale detection.
#[derive(Debug, Clone, Default)]
pub struct FileLockManager {
    settings: LockSettings,
}

impl FileLockManager {
    pub fn new(settings: LockSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &LockSettings {
        &self.settings
    }

    /// Acquire the lock, retrying until `settings.timeout` elapses.
    pub fn acquire(&self, state_path: &Path) -> Result<FileLockGuard> {
        let lock_path = lock_path_for(state_path);
        let owner_id = uuid::Uuid::new_v4().simple().to_string();
        let start = Instant::now();

        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).at_path(parent)?;
        }

        loop {
            match self.try_create(&lock_path, &owner_id) {
                Ok(()) => {
                    tracing::debug!(lock = %lock_path.display(), owner = %owner_id, "lock acquired");
                    return Ok(FileLockGuard {
                        lock_path,
                        owner_id,
                        held: true,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if is_stale(&lock_path, self.settings.stale_after) {
                        tracing::warn!(lock = %lock_path.display(), "breaking stale lock");
                        break_lock(&lock_path)?;
                        continue;
                    }
                    if start.elapsed() >= self.settings.timeout {
                        let holder = read_payload(&lock_path);
                        return Err(TrackerError::LockTimeout {
                            lock_path,
                            holder: holder.as_ref().map(|p| p.owner_id.clone()),
                            expires_at: holder.map(|p| p.expires_at),
                        });
                    }
                    std::thread::sleep(self.settings.retry_interval);
                }
                Err(e) => return Err(e).at_path(&lock_path),
            }
        }
    }

    fn try_create(&self, lock_path: &Path, owner_id: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock_path)?;

        let now = Utc::now();
        let lifetime = chrono::Duration::from_std(self.settings.stale_after)
            .unwrap_or_else(|_| chrono::Duration::hours(1))
            .max(chrono::Duration::milliseconds(1));
        let payload = LockPayload {
            owner_id: owner_id.to_string(),
            acquired_at: now,
            expires_at: now + lifetime,
        };
        let json = serde_json::to_vec(&payload).map_err(io::Error::other)?;
        file.write_all(&json)?;
        file.sync_all()?;
        Ok(())
    }
}

impl StateMutex for FileLockManager {
    type Guard = FileLockGuard;

    fn lock(&self, state_path: &Path) -> Result<FileLockGuard> {
        self.acquire(state_path)
    }
}

/// Held lock; released on drop.
#[derive(Debug)]
pub struct FileLockGuard {
    lock_path: PathBuf,
    owner_id: String,
    held: bool,
}

impl FileLockGuard {
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Release the lock
    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    /// Delete the lock file only while it still carries our owner id. If a
    /// contender broke our lock as stale and took it, theirs is left alone.
    fn release_inner(&mut self) -> Result<()> {
        if !self.held {
            return Ok(());
        }
        self.held = false;

        if let Some(payload) = read_payload(&self.lock_path) {
            if payload.owner_id != self.owner_id {
                tracing::warn!(
                    lock = %self.lock_path.display(),
                    holder = %payload.owner_id,
                    "lock taken over by another owner, leaving it in place"
                );
                return Ok(());
            }
        }
        break_lock(&self.lock_path)?;
        tracing::debug!(lock = %self.lock_path.display(), "lock released");
        Ok(())
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        // Best-effort release on drop
        self.release_inner().ok();
    }
}

/// Decide whether an existing lock file has been abandoned.
///
/// - JSON object with a parseable `expires_at`: stale once that instant passes
/// - JSON object without one: stale
/// - no JSON object at all (empty, partial write): stale once the file's
///   mtime is at least `stale_after` old
pub fn is_stale(lock_path: &Path, stale_after: Duration) -> bool {
    let raw = match fs::read_to_string(lock_path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return false,
        Err(_) => String::new(),
    };

    if let Ok(serde_json::Value::Object(object)) = serde_json::from_str(&raw) {
        return object
            .get("expires_at")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map_or(true, |expires_at| Utc::now() >= expires_at);
    }

    let age = match fs::metadata(lock_path).and_then(|m| m.modified()) {
        Ok(modified) => SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO),
        Err(_) => return false,
    };
    age >= stale_after.max(Duration::from_millis(1))
}

/// Read the payload of a lock file, if it has a well-formed one.
pub fn read_payload(lock_path: &Path) -> Option<LockPayload> {
    let raw = fs::read_to_string(lock_path).ok()?;
    serde_json::from_str(&raw).ok()
}

fn break_lock(lock_path: &Path) -> Result<()> {
    match fs::remove_file(lock_path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).at_path(lock_path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use tempfile::TempDir;

    fn fast_settings() -> LockSettings {
        LockSettings {
            timeout: Duration::from_millis(200),
            retry_interval: Duration::from_millis(10),
            stale_after: Duration::from_secs(3600),
        }
    }

    #[test]
    fn test_lock_path_appends_suffix() {
        assert_eq!(
            lock_path_for(Path::new("/p/_state/a.json")),
            PathBuf::from("/p/_state/a.json.lock")
        );
    }

    #[test]
    fn test_acquire_release() {
        let temp_dir = TempDir::new().unwrap();
        let state_path = temp_dir.path().join("plan.json");
        let manager = FileLockManager::new(fast_settings());

        let guard = manager.acquire(&state_path).unwrap();
        let payload = read_payload(guard.lock_path()).unwrap();
        assert_eq!(payload.owner_id, guard.owner_id());
        assert!(payload.expires_at > payload.acquired_at);

        guard.release().unwrap();
        assert!(!lock_path_for(&state_path).exists());
    }

    #[test]
    fn test_contention_times_out_with_holder() {
        let temp_dir = TempDir::new().unwrap();
        let state_path = temp_dir.path().join("plan.json");
        let manager = FileLockManager::new(fast_settings());

        let guard = manager.acquire(&state_path).unwrap();
        let err = manager.acquire(&state_path).unwrap_err();
        match err {
            TrackerError::LockTimeout { holder, expires_at, .. } => {
                assert_eq!(holder.as_deref(), Some(guard.owner_id()));
                assert!(expires_at.is_some());
            }
            other => panic!("expected LockTimeout, got {other:?}"),
        }
    }

    #[test]
    fn test_drop_releases() {
        let temp_dir = TempDir::new().unwrap();
        let state_path = temp_dir.path().join("plan.json");
        let manager = FileLockManager::new(fast_settings());

        {
            let _guard = manager.acquire(&state_path).unwrap();
            assert!(lock_path_for(&state_path).exists());
        }
        assert!(!lock_path_for(&state_path).exists());
    }

    #[test]
    fn test_expired_payload_is_broken() {
        let temp_dir = TempDir::new().unwrap();
        let state_path = temp_dir.path().join("plan.json");
        let lock_path = lock_path_for(&state_path);
        let past = Utc::now() - chrono::Duration::minutes(5);
        let payload = LockPayload {
            owner_id: "dead".to_string(),
            acquired_at: past - chrono::Duration::minutes(1),
            expires_at: past,
        };
        fs::write(&lock_path, serde_json::to_string(&payload).unwrap()).unwrap();

        let guard = FileLockManager::new(fast_settings()).acquire(&state_path).unwrap();
        assert_ne!(guard.owner_id(), "dead");
    }

    #[test]
    fn test_object_without_expiry_is_stale() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("plan.json.lock");
        fs::write(&lock_path, r#"{"owner_id": "x"}"#).unwrap();
        assert!(is_stale(&lock_path, Duration::from_secs(3600)));

        fs::write(&lock_path, r#"{"owner_id": "x", "expires_at": "soon"}"#).unwrap();
        assert!(is_stale(&lock_path, Duration::from_secs(3600)));
    }

    #[test]
    fn test_garbage_lock_uses_mtime_age() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("plan.json.lock");
        fs::write(&lock_path, "").unwrap();

        // Fresh and unparseable: a writer may be between create and write
        assert!(!is_stale(&lock_path, Duration::from_secs(3600)));

        thread::sleep(Duration::from_millis(20));
        assert!(is_stale(&lock_path, Duration::from_millis(10)));
    }

    #[test]
    fn test_garbage_lock_blocks_until_old_enough() {
        let temp_dir = TempDir::new().unwrap();
        let state_path = temp_dir.path().join("plan.json");
        fs::write(lock_path_for(&state_path), "not json").unwrap();

        let manager = FileLockManager::new(LockSettings {
            timeout: Duration::from_millis(500),
            retry_interval: Duration::from_millis(10),
            stale_after: Duration::from_millis(50),
        });
        assert!(manager.acquire(&state_path).is_ok());
    }

    #[test]
    fn test_release_leaves_foreign_lock() {
        let temp_dir = TempDir::new().unwrap();
        let state_path = temp_dir.path().join("plan.json");
        let manager = FileLockManager::new(fast_settings());

        let guard = manager.acquire(&state_path).unwrap();
        let now = Utc::now();
        let foreign = LockPayload {
            owner_id: "someone-else".to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::hours(1),
        };
        fs::write(guard.lock_path(), serde_json::to_string(&foreign).unwrap()).unwrap();

        guard.release().unwrap();
        assert_eq!(
            read_payload(&lock_path_for(&state_path)).unwrap().owner_id,
            "someone-else"
        );
    }

    #[test]
    fn test_concurrent_critical_sections_do_not_overlap() {
        let temp_dir = TempDir::new().unwrap();
        let state_path = Arc::new(temp_dir.path().join("plan.json"));
        let inside = Arc::new(Mutex::new(0usize));
        let manager = FileLockManager::new(LockSettings {
            timeout: Duration::from_secs(10),
            retry_interval: Duration::from_millis(5),
            stale_after: Duration::from_secs(3600),
        });

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state_path = Arc::clone(&state_path);
                let inside = Arc::clone(&inside);
                let manager = manager.clone();
                thread::spawn(move || {
                    let _guard = manager.acquire(&state_path).unwrap();
                    {
                        let mut count = inside.lock().unwrap();
                        *count += 1;
                        assert_eq!(*count, 1);
                    }
                    thread::sleep(Duration::from_millis(5));
                    *inside.lock().unwrap() -= 1;
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
