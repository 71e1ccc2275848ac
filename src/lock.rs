use std::{
  fs::{self, OpenOptions},
  io::{ErrorKind, Write},
  path::{Path, PathBuf},
};

use log::{error, warn};

use crate::errors::{Errors, Result};

pub const WRITE_LOCK_FILE_NAME: &str = "bitcask.write.lock";
pub const MERGE_LOCK_FILE_NAME: &str = "bitcask.merge.lock";

/// The two directory-level locks a store recognises: one writer, one
/// merger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
  Write,
  Merge,
}

impl LockKind {
  pub fn file_name(&self) -> &'static str {
    match self {
      LockKind::Write => WRITE_LOCK_FILE_NAME,
      LockKind::Merge => MERGE_LOCK_FILE_NAME,
    }
  }

  fn held_error(&self) -> Errors {
    match self {
      LockKind::Write => Errors::WriteLocked,
      LockKind::Merge => Errors::MergeLocked,
    }
  }
}

/// Parsed body of a lock file: `"<owner_pid> <active_filename>\n"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
  pub owner_pid: u32,
  pub active_file: Option<String>,
}

impl LockInfo {
  pub fn owner_alive(&self) -> bool {
    process_alive(self.owner_pid)
  }
}

/// Holds one directory lock. The lock file is removed on drop.
pub struct LockGuard {
  path: PathBuf,
}

impl LockGuard {
  /// Rewrites the lock body to advertise the active data filename, so
  /// read-only opens can leave the file the writer owns out of their
  /// read set.
  pub fn update(&self, active_file: &str) -> Result<()> {
    let body = format!("{} {}\n", std::process::id(), active_file);
    fs::write(&self.path, body).map_err(|e| {
      error!("failed to update lock file {}: {}", self.path.display(), e);
      Errors::FailedToCreateLockFile
    })
  }
}

impl Drop for LockGuard {
  fn drop(&mut self) {
    if let Err(e) = fs::remove_file(&self.path) {
      warn!("failed to remove lock file {}: {}", self.path.display(), e);
    }
  }
}

/// Takes the `kind` lock on `dir` by exclusively creating its lock file
/// with this process's identity inside. A lock file whose recorded owner
/// is no longer alive is reclaimed; any other existing lock fails with
/// `WriteLocked` / `MergeLocked`.
pub fn acquire<P: AsRef<Path>>(dir: P, kind: LockKind) -> Result<LockGuard> {
  let path = dir.as_ref().join(kind.file_name());

  for reclaim_attempted in [false, true] {
    match OpenOptions::new().write(true).create_new(true).open(&path) {
      Ok(mut file) => {
        let body = format!("{} \n", std::process::id());
        if let Err(e) = file.write_all(body.as_bytes()).and_then(|_| file.sync_all()) {
          error!("failed to write lock file {}: {}", path.display(), e);
          let _ = fs::remove_file(&path);
          return Err(Errors::FailedToCreateLockFile);
        }
        return Ok(LockGuard { path });
      }
      Err(e) if e.kind() == ErrorKind::AlreadyExists => {
        if reclaim_attempted {
          return Err(kind.held_error());
        }
        match check(&dir, kind) {
          Some(info) if !info.owner_alive() => {
            warn!(
              "reclaiming {} left behind by dead process {}",
              kind.file_name(),
              info.owner_pid
            );
            let _ = fs::remove_file(&path);
          }
          Some(_) => return Err(kind.held_error()),
          // unreadable or vanished between the create and the read;
          // one more exclusive create settles it
          None => {}
        }
      }
      Err(e) => {
        error!("failed to create lock file {}: {}", path.display(), e);
        return Err(Errors::FailedToCreateLockFile);
      }
    }
  }

  Err(kind.held_error())
}

/// Reads the lock file for `kind`, if present, returning the owner it
/// records and the active filename it advertises.
pub fn check<P: AsRef<Path>>(dir: P, kind: LockKind) -> Option<LockInfo> {
  let path = dir.as_ref().join(kind.file_name());
  let body = fs::read_to_string(path).ok()?;
  parse_lock_body(&body)
}

fn parse_lock_body(body: &str) -> Option<LockInfo> {
  let mut parts = body.trim_end().splitn(2, ' ');
  let owner_pid = parts.next()?.parse().ok()?;
  let active_file = parts
    .next()
    .map(str::trim)
    .filter(|f| !f.is_empty())
    .map(str::to_string);
  Some(LockInfo {
    owner_pid,
    active_file,
  })
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
  // pids outside the valid range cannot name a live process, and must not
  // reach kill(), where they would address a process group
  if pid == 0 || pid > i32::MAX as u32 {
    return false;
  }
  // signal 0 probes for existence without delivering anything
  if unsafe { libc::kill(pid as libc::pid_t, 0) } == 0 {
    return true;
  }
  std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
  // no portable liveness probe; never reclaim another owner's lock
  true
}
