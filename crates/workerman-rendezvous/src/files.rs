//! Rendezvous directory paths and atomic file operations.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use workerman_common::{Error, ProcessHash, Result};

/// Master pid file.
pub const PID_FILE: &str = "process.pid";
/// Hash list written by the master on a status request.
pub const STATUS_FILE: &str = "status.workerman";
/// Hash list written by the master when a graceful stop or reload begins.
pub const SHUTDOWN_FILE: &str = "shutdown.workerman";
/// Unix timestamp written by the master after a reload completes.
pub const RESTART_FILE: &str = "restart.workerman";

/// The working directory holding all rendezvous files.
///
/// Paths are relative to the operator-supplied working directory; payloads
/// are JSON. Writes go through a temp file and a rename so readers never
/// observe a partial payload.
#[derive(Debug, Clone)]
pub struct RendezvousDir {
    root: PathBuf,
}

impl RendezvousDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the working directory if it does not exist yet.
    pub fn ensure_exists(&self) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| Error::file_io(&self.root, e))
    }

    pub fn pid_file(&self) -> PathBuf {
        self.root.join(PID_FILE)
    }

    pub fn status_file(&self) -> PathBuf {
        self.root.join(STATUS_FILE)
    }

    pub fn shutdown_file(&self) -> PathBuf {
        self.root.join(SHUTDOWN_FILE)
    }

    pub fn restart_file(&self) -> PathBuf {
        self.root.join(RESTART_FILE)
    }

    /// Path of a per-process file; the filename is the raw hash string.
    pub fn hash_file(&self, hash: &ProcessHash) -> PathBuf {
        self.root.join(hash.as_str())
    }

    /// Atomic JSON write: serialize to `<path>.tmp`, then rename over
    /// `<path>`.
    pub fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| Error::file_io(path, format!("serialize failed: {e}")))?;
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, json).map_err(|e| Error::file_io(&temp_path, e))?;
        fs::rename(&temp_path, path).map_err(|e| Error::file_io(path, e))?;
        Ok(())
    }

    /// Reads and deserializes a JSON payload.
    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let content = fs::read_to_string(path).map_err(|e| Error::file_io(path, e))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::file_io(path, format!("parse failed: {e}")))
    }

    /// Creates an empty file. Used for the graceful-drain stubs the workers
    /// delete as they exit.
    pub fn touch(&self, path: &Path) -> Result<()> {
        File::create(path).map_err(|e| Error::file_io(path, e))?;
        Ok(())
    }

    /// Removes a file. Idempotent: a missing file is not an error.
    pub fn remove(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::file_io(path, e)),
        }
    }

    /// Writes the master pid. The payload is the decimal pid, which is
    /// also valid JSON.
    pub fn write_pid(&self, pid: i32) -> Result<()> {
        self.write_json(&self.pid_file(), &pid)
    }

    /// Reads the master pid, or `None` when no pid file exists.
    pub fn read_pid(&self) -> Result<Option<i32>> {
        let path = self.pid_file();
        if !path.exists() {
            return Ok(None);
        }
        self.read_json(&path).map(Some)
    }

    /// Removes every well-known rendezvous file. The master calls this on
    /// startup (stale files from a prior run) and on exit.
    pub fn remove_well_known(&self) -> Result<()> {
        for path in [
            self.pid_file(),
            self.status_file(),
            self.shutdown_file(),
            self.restart_file(),
        ] {
            self.remove(&path)?;
        }
        debug!(dir = %self.root.display(), "removed well-known rendezvous files");
        Ok(())
    }
}

/// Exclusive advisory file locks with cached guards.
///
/// `lock` acquires an exclusive flock on a path and caches the guard;
/// `unlock` releases and closes it. Unlocking a path that is not locked is
/// an error; unlocking a locked path always succeeds.
#[derive(Default)]
pub struct LockRegistry {
    locks: HashMap<PathBuf, Flock<File>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires an exclusive advisory lock, blocking until it is granted.
    /// Locking a path this registry already holds is a no-op.
    pub fn lock(&mut self, path: &Path) -> Result<()> {
        if self.locks.contains_key(path) {
            return Ok(());
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| Error::file_io(path, e))?;
        let guard = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| Error::file_io(path, format!("flock failed: {errno}")))?;
        self.locks.insert(path.to_path_buf(), guard);
        Ok(())
    }

    /// Releases a previously acquired lock.
    pub fn unlock(&mut self, path: &Path) -> Result<()> {
        match self.locks.remove(path) {
            Some(_guard) => Ok(()),
            None => Err(Error::file_io(path, "cannot unlock, file is not locked")),
        }
    }

    pub fn is_locked(&self, path: &Path) -> bool {
        self.locks.contains_key(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn dir() -> (TempDir, RendezvousDir) {
        let tmp = TempDir::new().unwrap();
        let dir = RendezvousDir::new(tmp.path());
        (tmp, dir)
    }

    #[test]
    fn test_pid_round_trip() {
        let (_tmp, dir) = dir();
        assert_eq!(dir.read_pid().unwrap(), None);
        dir.write_pid(4321).unwrap();
        assert_eq!(dir.read_pid().unwrap(), Some(4321));
        let raw = std::fs::read_to_string(dir.pid_file()).unwrap();
        assert_eq!(raw.trim(), "4321");
    }

    #[test]
    fn test_json_write_leaves_no_temp_file() {
        let (_tmp, dir) = dir();
        let path = dir.status_file();
        dir.write_json(&path, &vec!["a".to_string(), "b".to_string()])
            .unwrap();
        assert!(!path.with_extension("tmp").exists());
        let hashes: Vec<String> = dir.read_json(&path).unwrap();
        assert_eq!(hashes, vec!["a", "b"]);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let (_tmp, dir) = dir();
        let path = dir.shutdown_file();
        dir.touch(&path).unwrap();
        dir.remove(&path).unwrap();
        dir.remove(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_remove_well_known_clears_all_four() {
        let (_tmp, dir) = dir();
        dir.write_pid(1).unwrap();
        dir.touch(&dir.status_file()).unwrap();
        dir.touch(&dir.shutdown_file()).unwrap();
        dir.write_json(&dir.restart_file(), &1_700_000_000_i64).unwrap();
        dir.remove_well_known().unwrap();
        for path in [
            dir.pid_file(),
            dir.status_file(),
            dir.shutdown_file(),
            dir.restart_file(),
        ] {
            assert!(!path.exists());
        }
    }

    #[test]
    fn test_hash_file_name_is_raw_hash() {
        let (_tmp, dir) = dir();
        let hash = ProcessHash::from("deadbeefdeadbeef");
        assert_eq!(
            dir.hash_file(&hash).file_name().unwrap().to_str().unwrap(),
            "deadbeefdeadbeef"
        );
    }

    #[test]
    fn test_unlock_without_lock_fails() {
        let (_tmp, dir) = dir();
        let path = dir.root().join("lockfile");
        let mut locks = LockRegistry::new();
        assert!(locks.unlock(&path).is_err());
        locks.lock(&path).unwrap();
        assert!(locks.is_locked(&path));
        locks.unlock(&path).unwrap();
        assert!(!locks.is_locked(&path));
    }

    #[test]
    fn test_lock_twice_is_noop() {
        let (_tmp, dir) = dir();
        let path = dir.root().join("lockfile");
        let mut locks = LockRegistry::new();
        locks.lock(&path).unwrap();
        locks.lock(&path).unwrap();
        locks.unlock(&path).unwrap();
        assert!(locks.unlock(&path).is_err());
    }
}
