use crate::{
    config::Config,
    dependency::DependencyEdge,
    error::{BlastError, BlastResult},
};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const CACHE_FORMAT_VERSION: u32 = 1;

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub format_version: u32,
    pub built_at: DateTime<Utc>,
    pub installed: Vec<String>,
    pub essential: Vec<String>,
    pub manual: Vec<String>,
    pub edges: Vec<DependencyEdge>,
}

impl GraphSnapshot {
    pub fn new(
        built_at: DateTime<Utc>,
        installed: Vec<String>,
        essential: Vec<String>,
        manual: Vec<String>,
        edges: Vec<DependencyEdge>,
    ) -> Self {
        Self {
            format_version: CACHE_FORMAT_VERSION,
            built_at,
            installed,
            essential,
            manual,
            edges,
        }
    }

    /// A snapshot stamped in the future is treated as stale.
    pub fn is_fresh(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.built_at);
        match age.to_std() {
            Ok(age) => age < max_age,
            Err(_) => false,
        }
    }
}

/// Exclusive advisory lock on the cache, released when dropped.
#[derive(Debug)]
pub struct CacheLock {
    file: File,
    path: PathBuf,
}

impl CacheLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        // Closing the descriptor would release it too; unlock explicitly so the
        // release does not depend on drop order of the File.
        let rc = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
        if rc != 0 {
            debug!(
                "Failed to unlock {}: {}",
                self.path.display(),
                std::io::Error::last_os_error()
            );
        }
    }
}

#[derive(Debug, Clone)]
pub struct GraphCache {
    path: PathBuf,
    max_age: Duration,
    lock_timeout: Duration,
}

impl GraphCache {
    pub fn new(path: PathBuf, max_age: Duration, lock_timeout: Duration) -> Self {
        Self {
            path,
            max_age,
            lock_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.graph_cache_path(),
            config.cache_max_age(),
            config.lock_timeout(),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Blocks until the lock is held or `lock_timeout` expires.
    pub fn lock(&self) -> BlastResult<CacheLock> {
        let lock_path = self.lock_path();
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)?;

        let started = Instant::now();
        loop {
            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
            if rc == 0 {
                debug!("Acquired cache lock {}", lock_path.display());
                return Ok(CacheLock {
                    file,
                    path: lock_path,
                });
            }

            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                Some(code) if code == libc::EWOULDBLOCK => {
                    if started.elapsed() >= self.lock_timeout {
                        return Err(BlastError::LockTimeout(format!(
                            "{} still held after {:?}",
                            lock_path.display(),
                            self.lock_timeout
                        )));
                    }
                    std::thread::sleep(LOCK_POLL_INTERVAL);
                }
                Some(code) if code == libc::EINTR => continue,
                _ => return Err(BlastError::Io(err)),
            }
        }
    }

    pub fn read(&self) -> BlastResult<GraphSnapshot> {
        let content = std::fs::read_to_string(&self.path)?;
        let snapshot: GraphSnapshot = serde_json::from_str(&content)
            .map_err(|e| BlastError::CacheCorruption(format!("{}: {}", self.path.display(), e)))?;
        if snapshot.format_version != CACHE_FORMAT_VERSION {
            return Err(BlastError::CacheCorruption(format!(
                "{}: format version {} (expected {})",
                self.path.display(),
                snapshot.format_version,
                CACHE_FORMAT_VERSION
            )));
        }
        Ok(snapshot)
    }

    pub fn load(&self) -> Option<GraphSnapshot> {
        match self.read() {
            Ok(snapshot) if snapshot.is_fresh(self.max_age, Utc::now()) => {
                debug!("Using graph cache built at {}", snapshot.built_at);
                Some(snapshot)
            }
            Ok(snapshot) => {
                info!(
                    "Graph cache built at {} is stale (max age {:?}), rebuilding",
                    snapshot.built_at, self.max_age
                );
                None
            }
            Err(BlastError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No graph cache at {}", self.path.display());
                None
            }
            Err(e) => {
                warn!("Ignoring unreadable graph cache: {}", e);
                None
            }
        }
    }

    /// Atomically replaces the snapshot.
    pub fn store(&self, lock: &CacheLock, snapshot: &GraphSnapshot) -> BlastResult<()> {
        debug_assert_eq!(lock.path(), self.lock_path().as_path());
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer(&mut writer, snapshot)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)?;
        debug!(
            "Stored graph cache at {} ({} packages, {} edges)",
            self.path.display(),
            snapshot.installed.len(),
            snapshot.edges.len()
        );
        Ok(())
    }

    pub fn clear(&self, _lock: &CacheLock) -> BlastResult<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
