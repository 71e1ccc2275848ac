use std::{
  collections::HashMap,
  fs,
  path::{Path, PathBuf},
  sync::atomic::{AtomicU32, AtomicU64, Ordering},
};

use bytes::Bytes;
use log::{error, warn};
use parking_lot::{Mutex, RwLock};

use crate::{
  data::{
    data_file::{self, DataFile},
    hint_file::HintFile,
    log_record::{LogRecord, RECORD_HEADER_SIZE, TOMBSTONE},
  },
  errors::{Errors, Result},
  keydir::{new_keydir, Keydir, KeydirEntry},
  lock::{self, LockGuard, LockKind},
  option::{IOManagerType, Options},
  util,
};

/// An open store: one directory, a resident keydir, the set of immutable
/// read files, and (in read-write mode) the active append file.
///
/// The handle is shared freely across threads. The keydir is the only
/// structure touched by every operation; the active file is guarded by
/// single-writer discipline behind its lock.
pub struct Engine {
  pub(crate) options: Options,
  pub(crate) dir_path: PathBuf,
  pub(crate) active_file: RwLock<Option<DataFile>>,
  pub(crate) read_files: RwLock<HashMap<u32, DataFile>>,
  pub(crate) keydir: Box<dyn Keydir>,
  write_lock: Mutex<Option<LockGuard>>,
  last_tstamp: AtomicU32,
  bytes_since_sync: AtomicU64,
}

impl Engine {
  /// Opens the store in `dir`.
  ///
  /// Read-write mode takes the directory's write lock, rebuilds the
  /// keydir from every data file (hint sidecars are preferred when
  /// present), then starts a fresh active file and records its name in
  /// the lock body. A read-only open skips the lock and, when a live
  /// writer is present, leaves that writer's active file out of the read
  /// set.
  pub fn open<P>(dir: P, options: Options) -> Result<Engine>
  where
    P: AsRef<Path>,
  {
    if options.max_file_size == 0 {
      return Err(Errors::InvalidMaxFileSize);
    }

    let dir_path = dir.as_ref().to_path_buf();
    if !dir_path.is_dir() {
      if let Err(e) = fs::create_dir_all(&dir_path) {
        error!("failed to create database directory {}: {}", dir_path.display(), e);
        return Err(Errors::FailedToCreateDatabaseDir);
      }
    }

    let write_lock = if options.read_write {
      Some(lock::acquire(&dir_path, LockKind::Write)?)
    } else {
      None
    };

    // a live writer owns its active file exclusively; never read it
    let excluded = if options.read_write {
      None
    } else {
      lock::check(&dir_path, LockKind::Write)
        .filter(|info| info.owner_alive())
        .and_then(|info| info.active_file)
    };

    let keydir = new_keydir(options.keydir_type);
    let mut read_files = HashMap::new();
    let mut max_file_id = 0u32;
    let mut max_tstamp = 0u32;

    for file_id in data_file::list_file_ids(&dir_path)? {
      if excluded.as_deref() == Some(data_file::data_file_name(file_id).as_str()) {
        continue;
      }
      max_file_id = max_file_id.max(file_id);

      if data_file::hint_file_path(&dir_path, file_id).is_file() {
        let hint = HintFile::open(&dir_path, file_id)?;
        hint.fold(file_id, |key, entry| {
          max_tstamp = max_tstamp.max(entry.tstamp);
          keydir.put(key, entry);
          Ok(())
        })?;
        read_files.insert(file_id, DataFile::open(&dir_path, file_id, IOManagerType::StandardFileIO)?);
      } else if options.mmap_at_startup {
        let scan = DataFile::open(&dir_path, file_id, IOManagerType::MemoryMap)?;
        scan.fold(|record, value_offset, total_size| {
          max_tstamp = max_tstamp.max(record.tstamp);
          let entry = KeydirEntry {
            file_id,
            total_size,
            value_offset,
            tstamp: record.tstamp,
          };
          keydir.put(record.key, entry);
          Ok(())
        })?;
        read_files.insert(file_id, DataFile::open(&dir_path, file_id, IOManagerType::StandardFileIO)?);
      } else {
        let file = DataFile::open(&dir_path, file_id, IOManagerType::StandardFileIO)?;
        file.fold(|record, value_offset, total_size| {
          max_tstamp = max_tstamp.max(record.tstamp);
          let entry = KeydirEntry {
            file_id,
            total_size,
            value_offset,
            tstamp: record.tstamp,
          };
          keydir.put(record.key, entry);
          Ok(())
        })?;
        read_files.insert(file_id, file);
      }
    }

    let active_file = if options.read_write {
      let file = DataFile::create(&dir_path, max_file_id.saturating_add(1))?;
      if let Some(guard) = &write_lock {
        guard.update(&file.file_name())?;
      }
      Some(file)
    } else {
      None
    };

    Ok(Engine {
      options,
      dir_path,
      active_file: RwLock::new(active_file),
      read_files: RwLock::new(read_files),
      keydir,
      write_lock: Mutex::new(write_lock),
      last_tstamp: AtomicU32::new(max_tstamp),
      bytes_since_sync: AtomicU64::new(0),
    })
  }

  /// Looks up `key`. Never-written and deleted keys both come back as
  /// `KeyNotFound`.
  pub fn get(&self, key: Bytes) -> Result<Bytes> {
    if key.is_empty() {
      return Err(Errors::KeyIsEmpty);
    }
    let entry = self.keydir.get(&key).ok_or(Errors::KeyNotFound)?;
    let record = self.read_record(&key, &entry)?;
    if record.is_tombstone() {
      return Err(Errors::KeyNotFound);
    }
    Ok(Bytes::from(record.value))
  }

  /// Stores `value` under `key`. The tombstone sentinel is not a legal
  /// value.
  pub fn put(&self, key: Bytes, value: Bytes) -> Result<()> {
    if key.is_empty() {
      return Err(Errors::KeyIsEmpty);
    }
    if value.as_ref() == TOMBSTONE {
      return Err(Errors::ValueIsReserved);
    }
    self.append(&key, &value)?;
    Ok(())
  }

  /// Appends a tombstone for `key`. Deleting a key that was never
  /// written is not an error; the tombstone is compacted away by merge.
  pub fn delete(&self, key: Bytes) -> Result<()> {
    if key.is_empty() {
      return Err(Errors::KeyIsEmpty);
    }
    self.append(&key, TOMBSTONE)?;
    Ok(())
  }

  /// Forces the active file's contents to stable storage.
  pub fn sync(&self) -> Result<()> {
    match self.active_file.read().as_ref() {
      Some(file) => file.sync(),
      None => Ok(()),
    }
  }

  /// Syncs, closes every file handle, discards the keydir, and releases
  /// the write lock. The handle is inert afterwards: reads come back
  /// `KeyNotFound`, writes `ReadOnly`. Reopen the directory to resume.
  pub fn close(&self) -> Result<()> {
    self.sync()?;
    *self.active_file.write() = None;
    self.read_files.write().clear();
    self.keydir.clear();
    *self.write_lock.lock() = None;
    Ok(())
  }

  fn append(&self, key: &[u8], value: &[u8]) -> Result<KeydirEntry> {
    if key.len() as u64 > u32::MAX as u64 {
      return Err(Errors::KeyTooLarge);
    }
    if value.len() as u64 > u32::MAX as u64 {
      return Err(Errors::ValueTooLarge);
    }

    let tstamp = self.next_tstamp();
    let record = LogRecord {
      key: key.to_vec(),
      value: value.to_vec(),
      tstamp,
    };
    let enc = record.encode();

    let mut active_guard = self.active_file.write();
    let active = active_guard.as_mut().ok_or(Errors::ReadOnly)?;

    if active.check_write(enc.len() as u64, self.options.max_file_size) {
      self.rotate_active(active)?;
    }

    let write_off = active.write(&enc)?;

    if self.options.sync_writes {
      active.sync()?;
    } else if self.options.bytes_per_sync > 0 {
      let pending =
        self.bytes_since_sync.fetch_add(enc.len() as u64, Ordering::SeqCst) + enc.len() as u64;
      if pending >= self.options.bytes_per_sync {
        self.bytes_since_sync.store(0, Ordering::SeqCst);
        active.sync()?;
      }
    }

    let entry = KeydirEntry {
      file_id: active.file_id(),
      total_size: enc.len() as u64,
      value_offset: write_off + RECORD_HEADER_SIZE + key.len() as u64,
      tstamp,
    };
    self.keydir.put(key.to_vec(), entry);

    // a single record can blow straight past max_file_size; retire the
    // file now so the next write starts fresh
    if active.write_off() > self.options.max_file_size {
      self.rotate_active(active)?;
    }

    Ok(entry)
  }

  /// Seals the active file and swaps in a fresh one. The sealed file
  /// stays open in the read set; closing and reopening it would only
  /// throw away warm page cache.
  fn rotate_active(&self, active: &mut DataFile) -> Result<()> {
    active.sync()?;
    let next = DataFile::create(&self.dir_path, active.file_id().saturating_add(1))?;
    if let Some(guard) = self.write_lock.lock().as_ref() {
      guard.update(&next.file_name())?;
    }
    let sealed = std::mem::replace(active, next);
    self.read_files.write().insert(sealed.file_id(), sealed);
    Ok(())
  }

  /// Re-reads the whole record behind a keydir entry and verifies both
  /// its crc and that the stored key matches the lookup key.
  fn read_record(&self, key: &[u8], entry: &KeydirEntry) -> Result<LogRecord> {
    let record_start = entry
      .value_offset
      .saturating_sub(RECORD_HEADER_SIZE + key.len() as u64);

    let result = {
      let active = self.active_file.read();
      match active.as_ref() {
        Some(file) if file.file_id() == entry.file_id => file.read_record(record_start),
        _ => {
          let read_files = self.read_files.read();
          match read_files.get(&entry.file_id) {
            Some(file) => file.read_record(record_start),
            None => Err(Errors::DataFileNotFound),
          }
        }
      }
    };

    let (record, _) = match result {
      // the keydir said a record lives here, so running out of file
      // means it was truncated underneath us
      Err(Errors::ReadDataFileEOF) => return Err(Errors::InvalidRecordCrc),
      other => other?,
    };

    if record.key != key {
      return Err(Errors::InvalidRecordCrc);
    }
    Ok(record)
  }

  /// Timestamps are wall-clock seconds, forced non-decreasing across the
  /// writes of this handle.
  fn next_tstamp(&self) -> u32 {
    let now = util::unix_seconds();
    self.last_tstamp.fetch_max(now, Ordering::SeqCst);
    self.last_tstamp.load(Ordering::SeqCst)
  }
}

impl Drop for Engine {
  fn drop(&mut self) {
    // best-effort flush for handles dropped without an explicit close;
    // the write lock guard removes its file when the Mutex drops
    if let Some(file) = self.active_file.read().as_ref() {
      if let Err(e) = file.sync() {
        warn!("failed to sync active file on drop: {}", e);
      }
    }
  }
}
