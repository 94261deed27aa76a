//! Locks shared by the components of one process, and the advisory run lock.
//!
//! [`Locks`] is built once at startup and passed by reference to every component that
//! touches a local git working tree. [`RunLock`] is an advisory file lock on the store
//! root that keeps two `tick` commands on the same machine from interleaving their
//! writes; it is not a distributed lock.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use thiserror::Error;
use tracing::debug;

/// Lock file inside the store root; never deployed.
pub const LOCK_FILENAME: &str = ".tick.lock";

/// Process-wide locks.
///
/// Git operations (clone, commit, push) on local working copies are serialized through
/// one reentrant lock, so a helper that already holds it may call another that takes it
/// again.
#[derive(Debug, Clone, Default)]
pub struct Locks {
  git: Arc<ReentrantMutex<()>>,
}

impl Locks {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn git(&self) -> ReentrantMutexGuard<'_, ()> {
    self.git.lock()
  }
}

/// Readers (`run`, `snapshot take`) share the store; writers hold it alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
  Shared,
  Exclusive,
}

/// The writer recorded in the lock file, stored as one line: `<pid> <unix secs> <command>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHolder {
  pub pid: u32,
  pub since: u64,
  pub command: String,
}

impl LockHolder {
  fn current(command: &str) -> Self {
    Self {
      pid: std::process::id(),
      since: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
      command: command.to_string(),
    }
  }

  fn parse(line: &str) -> Option<Self> {
    let mut parts = line.trim().splitn(3, ' ');
    let pid = parts.next()?.parse().ok()?;
    let since = parts.next()?.parse().ok()?;
    let command = parts.next()?.to_string();
    Some(Self { pid, since, command })
  }

  /// `Some(false)` when the process is known to be gone.
  pub fn is_alive(&self) -> Option<bool> {
    process_alive(self.pid)
  }
}

impl fmt::Display for LockHolder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "'{}' (PID {}, since unix {})", self.command, self.pid, self.since)?;
    if self.is_alive() == Some(false) {
      write!(f, ", no longer running")?;
    }
    Ok(())
  }
}

#[derive(Debug, Error)]
pub enum RunLockError {
  #[error("Store is in use by {}\nRemove {} if no tick process is running", holder_text(.holder), .path.display())]
  Held {
    holder: Option<LockHolder>,
    path: PathBuf,
  },

  #[error("Failed to {action} {}: {source}", .path.display())]
  Io {
    action: &'static str,
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

fn holder_text(holder: &Option<LockHolder>) -> String {
  match holder {
    Some(h) => h.to_string(),
    None => "another process".to_string(),
  }
}

/// Held for the lifetime of a command; released when dropped.
#[derive(Debug)]
pub struct RunLock {
  _file: File,
  path: PathBuf,
  mode: LockMode,
}

impl RunLock {
  /// Take the lock without waiting. Exclusive holders record themselves in the file.
  pub fn acquire(root: &Path, mode: LockMode, command: &str) -> Result<Self, RunLockError> {
    let path = root.join(LOCK_FILENAME);
    let io_err = |action, source| RunLockError::Io {
      action,
      path: path.clone(),
      source,
    };

    fs::create_dir_all(root).map_err(|e| io_err("create", e))?;
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&path)
      .map_err(|e| io_err("open", e))?;

    match try_lock(&file, mode) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
        return Err(RunLockError::Held {
          holder: Self::holder(root),
          path: path.clone(),
        });
      }
      Err(e) => return Err(io_err("lock", e)),
    }

    if mode == LockMode::Exclusive {
      let holder = LockHolder::current(command);
      file.set_len(0).map_err(|e| io_err("write", e))?;
      writeln!(&file, "{} {} {}", holder.pid, holder.since, holder.command).map_err(|e| io_err("write", e))?;
    }
    debug!(path = %path.display(), ?mode, command, "store lock taken");

    Ok(Self { _file: file, path, mode })
  }

  /// The last exclusive holder recorded under `root`, if any.
  pub fn holder(root: &Path) -> Option<LockHolder> {
    let text = fs::read_to_string(root.join(LOCK_FILENAME)).ok()?;
    LockHolder::parse(text.lines().next()?)
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn mode(&self) -> LockMode {
    self.mode
  }
}

#[cfg(unix)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};

  let op = if mode == LockMode::Exclusive {
    FlockOperation::NonBlockingLockExclusive
  } else {
    FlockOperation::NonBlockingLockShared
  };
  flock(file, op).map_err(io::Error::from)
}

#[cfg(unix)]
fn process_alive(pid: u32) -> Option<bool> {
  use rustix::io::Errno;
  use rustix::process::{Pid, test_kill_process};

  let pid = Pid::from_raw(i32::try_from(pid).ok()?)?;
  match test_kill_process(pid) {
    Ok(()) => Some(true),
    Err(Errno::SRCH) => Some(false),
    Err(_) => None,
  }
}

#[cfg(windows)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let mut flags = LOCKFILE_FAIL_IMMEDIATELY;
  if mode == LockMode::Exclusive {
    flags |= LOCKFILE_EXCLUSIVE_LOCK;
  }
  // SAFETY: the handle is owned by `file` for the whole call and a zeroed OVERLAPPED
  // asks for a lock starting at offset 0.
  let ok = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(file.as_raw_handle(), flags, 0, 1, 0, &mut overlapped)
  };
  if ok == 0 { Err(io::Error::last_os_error()) } else { Ok(()) }
}

#[cfg(windows)]
fn process_alive(_pid: u32) -> Option<bool> {
  None
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn git_lock_is_reentrant() {
    let locks = Locks::new();
    let _outer = locks.git();
    let _inner = locks.git();
  }

  #[test]
  fn git_lock_is_shared_between_clones() {
    let locks = Locks::new();
    let other = locks.clone();
    assert!(Arc::ptr_eq(&locks.git, &other.git));
  }

  #[test]
  fn readers_share_the_store() {
    let temp = TempDir::new().unwrap();
    let first = RunLock::acquire(temp.path(), LockMode::Shared, "run").unwrap();
    let second = RunLock::acquire(temp.path(), LockMode::Shared, "snapshot take").unwrap();
    assert_eq!(first.path(), second.path());
    assert_eq!(second.mode(), LockMode::Shared);
    assert!(RunLock::holder(temp.path()).is_none());
  }

  #[test]
  fn writer_records_itself() {
    let temp = TempDir::new().unwrap();
    let _lock = RunLock::acquire(&temp.path().join("nested"), LockMode::Exclusive, "graph build").unwrap();
    let holder = RunLock::holder(&temp.path().join("nested")).unwrap();
    assert_eq!(holder.pid, std::process::id());
    assert_eq!(holder.command, "graph build");
  }

  #[test]
  #[cfg(unix)]
  fn writer_excludes_readers_and_names_itself() {
    let temp = TempDir::new().unwrap();
    let _held = RunLock::acquire(temp.path(), LockMode::Exclusive, "snapshot restore").unwrap();
    let err = RunLock::acquire(temp.path(), LockMode::Shared, "run").unwrap_err();
    match &err {
      RunLockError::Held { holder: Some(h), .. } => {
        assert_eq!(h.command, "snapshot restore");
        assert_eq!(h.is_alive(), Some(true));
      }
      other => panic!("expected a held lock, got {other:?}"),
    }
    assert!(err.to_string().contains("snapshot restore"));
  }

  #[test]
  fn released_on_drop() {
    let temp = TempDir::new().unwrap();
    drop(RunLock::acquire(temp.path(), LockMode::Exclusive, "deploy").unwrap());
    RunLock::acquire(temp.path(), LockMode::Exclusive, "deploy").unwrap();
  }

  #[test]
  fn holder_line_keeps_spaces_in_command() {
    let holder = LockHolder::parse("42 1700000000 snapshot take\n").unwrap();
    assert_eq!(holder.pid, 42);
    assert_eq!(holder.since, 1_700_000_000);
    assert_eq!(holder.command, "snapshot take");
    assert!(LockHolder::parse("garbage").is_none());
  }
}
