//! Cross-process write lock for session transcript files.
//!
//! One JSON claim file (`<transcript>.lock`) per canonical transcript path
//! is the source of truth across processes; a process-wide registry makes
//! acquisition re-entrant within one process via reference counting. A
//! claim whose owner is provably dead, recycled, or too old is reclaimed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::StoreError;

const BACKOFF_INITIAL: Duration = Duration::from_millis(10);
const BACKOFF_CAP: Duration = Duration::from_millis(200);

/// JSON body of a lock file on durable storage.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockClaim {
    pub pid: u32,
    pub created_at: DateTime<Utc>,
    /// Platform process-start counter of the owner, when available. A pid
    /// that is alive but carries a different start time was recycled by
    /// the OS and the claim is dead.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<u64>,
}

impl LockClaim {
    fn for_current_process() -> Self {
        Self {
            pid: std::process::id(),
            created_at: Utc::now(),
            start_time: process_start_time(std::process::id()),
        }
    }
}

struct HeldLock {
    count: u32,
}

/// Process-wide registry of held session locks.
///
/// All call sites in a process must share one manager so that repeated
/// acquisition of the same path observes the same reference counts; the
/// composition root owns the `Arc` and hands out clones.
pub struct SessionLockManager {
    held: Mutex<HashMap<PathBuf, HeldLock>>,
    cleanup_installed: AtomicBool,
}

impl Default for SessionLockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLockManager {
    pub fn new() -> Self {
        Self {
            held: Mutex::new(HashMap::new()),
            cleanup_installed: AtomicBool::new(false),
        }
    }

    /// Acquire the write lock for `transcript_path`.
    ///
    /// Guarantees at most one effective writer per canonicalized path
    /// across processes. Within this process the same path can be acquired
    /// again while held; the claim file is removed only when every guard
    /// has been released. Fails with [`StoreError::Locked`] naming the
    /// perceived owner once `timeout` elapses.
    pub async fn acquire(
        self: &Arc<Self>,
        transcript_path: &Path,
        timeout: Duration,
        stale_after: Duration,
    ) -> Result<LockGuard, StoreError> {
        let lock_path = lock_path_for(transcript_path);
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            match self.try_acquire_once(&lock_path, stale_after)? {
                AttemptOutcome::Acquired => {
                    debug!(path = %lock_path.display(), "session lock acquired");
                    return Ok(LockGuard {
                        manager: Arc::clone(self),
                        lock_path,
                    });
                }
                AttemptOutcome::ReclaimedStale => {
                    // Claim deleted; retry immediately without backing off.
                    continue;
                }
                AttemptOutcome::Contended { owner_pid } => {
                    if started.elapsed() >= timeout {
                        warn!(
                            path = %lock_path.display(),
                            owner_pid,
                            "session lock acquisition timed out"
                        );
                        return Err(StoreError::Locked { owner_pid });
                    }
                    let delay = backoff_delay(attempt);
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One claim attempt. Holds the registry mutex across the map check and
    /// the create-only file write so a concurrent acquire in this process
    /// cannot mistake our half-installed claim for an orphan.
    fn try_acquire_once(
        &self,
        lock_path: &Path,
        stale_after: Duration,
    ) -> Result<AttemptOutcome, StoreError> {
        let mut held = self.held.lock();

        // Re-entrant within this process.
        if let Some(entry) = held.get_mut(lock_path) {
            entry.count += 1;
            return Ok(AttemptOutcome::Acquired);
        }

        let claim = LockClaim::for_current_process();
        let body = serde_json::to_vec(&claim)?;
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock_path)
        {
            Ok(mut file) => {
                use std::io::Write;
                file.write_all(&body)?;
                held.insert(lock_path.to_path_buf(), HeldLock { count: 1 });
                Ok(AttemptOutcome::Acquired)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                // An unreadable or corrupt claim is treated as stale. A claim
                // carrying our own pid without a registry entry is an orphan
                // from a previous life of this pid.
                match read_claim(lock_path) {
                    Some(c) if c.pid != std::process::id() && !claim_is_dead(&c, stale_after) => {
                        return Ok(AttemptOutcome::Contended { owner_pid: c.pid });
                    }
                    _ => {}
                }
                info!(path = %lock_path.display(), "reclaiming stale session lock");
                remove_claim_file(lock_path);
                Ok(AttemptOutcome::ReclaimedStale)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Release one reference; removes the claim file when the count hits 0.
    /// Releasing a path not held by this process is a no-op.
    fn release(&self, lock_path: &Path) {
        let mut held = self.held.lock();
        match held.get_mut(lock_path) {
            Some(entry) if entry.count > 1 => {
                entry.count -= 1;
            }
            Some(_) => {
                held.remove(lock_path);
                remove_claim_file(lock_path);
            }
            None => {}
        }
    }

    /// Synchronously release every lock this process holds. Used by the
    /// termination cleanup path and by graceful shutdown.
    pub fn release_all(&self) -> usize {
        let mut held = self.held.lock();
        let count = held.len();
        for lock_path in held.keys() {
            remove_claim_file(lock_path);
        }
        held.clear();
        count
    }

    /// Number of distinct paths currently locked by this process.
    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }
}

enum AttemptOutcome {
    Acquired,
    ReclaimedStale,
    Contended { owner_pid: u32 },
}

/// Handle to one acquired reference. Dropping it releases the reference;
/// the claim file disappears when the last reference for the path goes.
#[must_use = "dropping the guard releases the lock"]
pub struct LockGuard {
    manager: Arc<SessionLockManager>,
    lock_path: PathBuf,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("lock_path", &self.lock_path)
            .finish()
    }
}

impl LockGuard {
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Explicit release; equivalent to dropping the guard.
    pub fn release(self) {}
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.manager.release(&self.lock_path);
    }
}

/// Register process-wide termination handlers (once per manager) that
/// synchronously release all held locks on SIGINT/SIGTERM/SIGHUP and then
/// exit with the conventional `128 + signo` status, preserving observable
/// process-termination semantics.
pub fn install_termination_cleanup(manager: &Arc<SessionLockManager>) {
    if manager.cleanup_installed.swap(true, Ordering::SeqCst) {
        return;
    }

    let manager = Arc::clone(manager);
    tokio::spawn(async move {
        let signo = wait_for_termination_signal().await;
        let released = manager.release_all();
        info!(released, signo, "released session locks on termination signal");
        std::process::exit(128 + signo);
    });
}

#[cfg(unix)]
async fn wait_for_termination_signal() -> i32 {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");

    tokio::select! {
        _ = sigint.recv() => 2,
        _ = sigterm.recv() => 15,
        _ = sighup.recv() => 1,
    }
}

#[cfg(not(unix))]
async fn wait_for_termination_signal() -> i32 {
    let _ = tokio::signal::ctrl_c().await;
    2
}

/// Lock file path for a transcript: realpath of the parent directory (the
/// transcript itself may not exist yet) plus the file name, with a `.lock`
/// suffix. Canonicalizing defeats symlink aliases of the same file.
fn lock_path_for(transcript_path: &Path) -> PathBuf {
    let canonical = std::fs::canonicalize(transcript_path).unwrap_or_else(|_| {
        match (transcript_path.parent(), transcript_path.file_name()) {
            (Some(parent), Some(name)) => std::fs::canonicalize(parent)
                .map(|p| p.join(name))
                .unwrap_or_else(|_| transcript_path.to_path_buf()),
            _ => transcript_path.to_path_buf(),
        }
    });
    let mut s = canonical.into_os_string();
    s.push(".lock");
    PathBuf::from(s)
}

fn read_claim(lock_path: &Path) -> Option<LockClaim> {
    let content = std::fs::read_to_string(lock_path).ok()?;
    serde_json::from_str(&content).ok()
}

fn remove_claim_file(lock_path: &Path) {
    if let Err(e) = std::fs::remove_file(lock_path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %lock_path.display(), error = %e, "failed to remove lock file");
        }
    }
}

fn claim_is_dead(claim: &LockClaim, stale_after: Duration) -> bool {
    let age = Utc::now().signed_duration_since(claim.created_at);
    if age > chrono::Duration::from_std(stale_after).unwrap_or_else(|_| chrono::Duration::MAX) {
        return true;
    }

    if !process_is_alive(claim.pid) {
        return true;
    }

    // Alive pid, but recycled since the claim was written.
    if let (Some(recorded), Some(current)) = (claim.start_time, process_start_time(claim.pid)) {
        if recorded != current {
            return true;
        }
    }

    false
}

/// kill(pid, 0) probe: EPERM still proves the process exists.
fn process_is_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    let Some(pid) = rustix::process::Pid::from_raw(raw) else {
        return false;
    };
    match rustix::process::test_kill_process(pid) {
        Ok(()) => true,
        Err(rustix::io::Errno::PERM) => true,
        Err(_) => false,
    }
}

/// Process start counter from /proc/<pid>/stat (field 22). Only available
/// on Linux; elsewhere the recycle check is skipped.
#[cfg(target_os = "linux")]
fn process_start_time(pid: u32) -> Option<u64> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // comm can contain spaces and parentheses; fields resume after the last ')'
    let rest = &stat[stat.rfind(')')? + 1..];
    // rest starts at field 3 (state); starttime is field 22
    rest.split_whitespace().nth(19)?.parse().ok()
}

#[cfg(not(target_os = "linux"))]
fn process_start_time(_pid: u32) -> Option<u64> {
    None
}

/// Increasing backoff, capped: 10ms, 20ms, 40ms, ... up to 200ms.
fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_INITIAL.saturating_mul(2u32.saturating_pow(attempt.min(16)));
    exp.min(BACKOFF_CAP)
}
