//! Process-aware advisory lock, encoded as a sibling `.lock` file holding
//! `pid\ntimestamp`.
//!
//! This is a plain marker file rather than an `fcntl` record lock: staleness
//! is detected by comparing the recorded timestamp against a timeout, not by
//! asking the kernel whether the owning process is still alive. That trades
//! automatic release-on-crash for portability to filesystems where advisory
//! record locks aren't available.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Result, StoreError};
use crate::managed_path::ManagedPath;

/// A lock is considered stale once its timestamp is this many seconds old,
/// regardless of whether the owning process is actually still running.
pub const LOCK_STALE_SECS: f64 = 60.0;

pub struct LockFile {
    sibling: PathBuf,
    pid: u32,
}

struct ParsedLock {
    pid: u32,
    timestamp: f64,
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

impl LockFile {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        let target = ManagedPath::new(target.into());
        let sibling = target.sibling_with_extension("lock");
        LockFile {
            sibling,
            pid: std::process::id(),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.sibling.exists()
    }

    /// Parse contract: a lock with other than exactly two lines, or
    /// non-numeric fields, is corrupt and treated as stale.
    fn parse(&self) -> Option<ParsedLock> {
        let data = fs::read_to_string(&self.sibling).ok()?;
        let mut lines = data.lines();
        let pid_line = lines.next()?;
        let ts_line = lines.next()?;
        if lines.next().is_some() {
            return None;
        }
        let pid: u32 = pid_line.trim().parse().ok()?;
        let timestamp: f64 = ts_line.trim().parse().ok()?;
        Some(ParsedLock { pid, timestamp })
    }

    fn is_stale(&self) -> bool {
        match self.parse() {
            Some(lock) => now_secs() - lock.timestamp > LOCK_STALE_SECS,
            // corrupt or unreadable lock is treated as stale
            None => true,
        }
    }

    /// Atomically create the sibling lock file. On a collision with an
    /// existing, stale lock, the stale lock is forcibly removed but the
    /// caller still receives `Timeout` -- it is expected to retry.
    pub fn acquire(&self) -> Result<()> {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.sibling)
        {
            Ok(mut file) => {
                write!(file, "{}\n{}", self.pid, now_secs())?;
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                if self.is_stale() {
                    fs::remove_file(&self.sibling).ok();
                }
                Err(StoreError::Timeout(self.sibling.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Release the lock. With `ignore_owner: false`, the stored pid and
    /// age are verified first; failure raises `CouldNotRelease`. With
    /// `ignore_owner: true`, the sibling is unconditionally (and
    /// idempotently) unlinked.
    pub fn release(&self, ignore_owner: bool) -> Result<()> {
        if ignore_owner {
            fs::remove_file(&self.sibling).ok();
            return Ok(());
        }

        let lock = self
            .parse()
            .ok_or_else(|| StoreError::CouldNotRelease(self.sibling.clone()))?;

        if lock.pid != self.pid || now_secs() - lock.timestamp > LOCK_STALE_SECS {
            return Err(StoreError::CouldNotRelease(self.sibling.clone()));
        }

        fs::remove_file(&self.sibling)?;
        Ok(())
    }

    /// Overwrite the timestamp if the current process still owns the lock.
    pub fn refresh(&self) -> Result<()> {
        let lock = self
            .parse()
            .ok_or_else(|| StoreError::NotOwned(self.sibling.clone()))?;

        if lock.pid != self.pid {
            return Err(StoreError::NotOwned(self.sibling.clone()));
        }

        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.sibling)?;
        write!(file, "{}\n{}", self.pid, now_secs())?;
        Ok(())
    }
}
