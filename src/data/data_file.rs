use std::{
  fs,
  io::ErrorKind,
  path::{Path, PathBuf},
  sync::atomic::{AtomicU64, Ordering},
};

use log::error;

use crate::{
  errors::{Errors, Result},
  fio::{new_io_manager, IOManager},
  option::IOManagerType,
  util,
};

use super::log_record::{LogRecord, RecordHeader, RECORD_HEADER_SIZE};

pub const DATA_FILE_SUFFIX: &str = ".bitcask.data";
pub const HINT_FILE_SUFFIX: &str = ".bitcask.hint";
pub const MERGING_HINT_SUFFIX: &str = ".bitcask.hint.merging";

/// An append-only log of records. Immutable once the writer rotates away
/// from it; only ever deleted by merge.
pub struct DataFile {
  file_id: u32,
  write_off: AtomicU64,
  io: Box<dyn IOManager>,
}

impl DataFile {
  /// Creates a brand-new empty data file. The file id starts at the
  /// current wall-clock second, clamped below by `floor`, and is bumped
  /// until the name is free so ids stay strictly increasing even under
  /// rapid rotation or a clock that stepped backwards.
  pub fn create<P>(dir: P, floor: u32) -> Result<DataFile>
  where
    P: AsRef<Path>,
  {
    let mut file_id = util::unix_seconds().max(floor);
    loop {
      let path = data_file_path(&dir, file_id);
      match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(_) => return DataFile::open(&dir, file_id, IOManagerType::StandardFileIO),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => file_id += 1,
        Err(e) => {
          error!("failed to create data file {}: {}", path.display(), e);
          return Err(Errors::FailedToOpenDataFile);
        }
      }
    }
  }

  /// Opens an existing data file through the chosen I/O backend.
  pub fn open<P>(dir: P, file_id: u32, io_type: IOManagerType) -> Result<DataFile>
  where
    P: AsRef<Path>,
  {
    let path = data_file_path(&dir, file_id);
    let io = new_io_manager(&path, io_type)?;
    let write_off = AtomicU64::new(io.size());
    Ok(DataFile {
      file_id,
      write_off,
      io,
    })
  }

  pub fn file_id(&self) -> u32 {
    self.file_id
  }

  pub fn write_off(&self) -> u64 {
    self.write_off.load(Ordering::SeqCst)
  }

  pub fn file_name(&self) -> String {
    data_file_name(self.file_id)
  }

  /// Whether appending `record_len` more bytes would push the file past
  /// `max_file_size`. An empty file never wraps, so an oversize record
  /// can always be written somewhere.
  pub fn check_write(&self, record_len: u64, max_file_size: u64) -> bool {
    let off = self.write_off();
    off != 0 && off + record_len > max_file_size
  }

  /// Appends an encoded record and returns the offset of its first byte.
  pub fn write(&self, enc: &[u8]) -> Result<u64> {
    let written = self.io.write(enc)?;
    let off = self.write_off.fetch_add(written as u64, Ordering::SeqCst);
    Ok(off)
  }

  /// Reads and validates the record starting at `offset`, returning it
  /// with its total on-disk size. `ReadDataFileEOF` means no complete
  /// record lies at `offset`: either the end of the file, or the torn
  /// tail a killed writer leaves behind.
  pub fn read_record(&self, offset: u64) -> Result<(LogRecord, u64)> {
    let mut header_buf = [0u8; RECORD_HEADER_SIZE as usize];
    self.io.read(&mut header_buf, offset)?;
    let header = RecordHeader::decode(&header_buf);

    let key_size = header.key_size as u64;
    let value_size = header.value_size as u64;
    let total_size = RECORD_HEADER_SIZE + key_size + value_size;
    if offset + total_size > self.io.size() {
      return Err(Errors::ReadDataFileEOF);
    }

    let mut body = vec![0u8; (key_size + value_size) as usize];
    self.io.read(&mut body, offset + RECORD_HEADER_SIZE)?;
    let (key, value) = body.split_at(key_size as usize);

    if header.expected_crc(key, value) != header.crc {
      return Err(Errors::InvalidRecordCrc);
    }

    Ok((
      LogRecord {
        key: key.to_vec(),
        value: value.to_vec(),
        tstamp: header.tstamp,
      },
      total_size,
    ))
  }

  /// Scans the file from the start, handing each record to `f` along with
  /// the offset of its value bytes and its total size. A truncated tail
  /// record ends the scan cleanly; a crc failure on a fully-present
  /// record aborts it.
  pub fn fold<F>(&self, mut f: F) -> Result<()>
  where
    F: FnMut(LogRecord, u64, u64) -> Result<()>,
  {
    let mut offset = 0u64;
    loop {
      match self.read_record(offset) {
        Ok((record, total_size)) => {
          let value_offset = offset + RECORD_HEADER_SIZE + record.key.len() as u64;
          f(record, value_offset, total_size)?;
          offset += total_size;
        }
        Err(Errors::ReadDataFileEOF) => return Ok(()),
        Err(e) => return Err(e),
      }
    }
  }

  pub fn sync(&self) -> Result<()> {
    self.io.sync()
  }
}

pub fn data_file_name(file_id: u32) -> String {
  format!("{}{}", file_id, DATA_FILE_SUFFIX)
}

pub fn data_file_path<P: AsRef<Path>>(dir: P, file_id: u32) -> PathBuf {
  dir.as_ref().join(data_file_name(file_id))
}

pub fn hint_file_path<P: AsRef<Path>>(dir: P, file_id: u32) -> PathBuf {
  dir.as_ref().join(format!("{}{}", file_id, HINT_FILE_SUFFIX))
}

pub fn merging_hint_path<P: AsRef<Path>>(dir: P, file_id: u32) -> PathBuf {
  dir.as_ref().join(format!("{}{}", file_id, MERGING_HINT_SUFFIX))
}

/// Parses `<digits>.bitcask.data` into a file id; anything else is not a
/// data file.
pub fn parse_file_id(file_name: &str) -> Option<u32> {
  let stem = file_name.strip_suffix(DATA_FILE_SUFFIX)?;
  if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
    return None;
  }
  stem.parse().ok()
}

/// Ids of every data file in `dir`, newest first.
pub fn list_file_ids<P: AsRef<Path>>(dir: P) -> Result<Vec<u32>> {
  let entries = fs::read_dir(dir).map_err(|e| {
    error!("failed to read database directory: {}", e);
    Errors::FailedToReadDatabaseDir
  })?;

  let mut ids = Vec::new();
  for entry in entries.flatten() {
    if let Some(name) = entry.file_name().to_str() {
      if let Some(id) = parse_file_id(name) {
        ids.push(id);
      }
    }
  }
  ids.sort_unstable_by(|a, b| b.cmp(a));
  Ok(ids)
}
