use std::{fs, path::Path};

use bytes::{Buf, BufMut, BytesMut};
use log::error;

use crate::{
  errors::{Errors, Result},
  fio::{new_io_manager, IOManager},
  keydir::KeydirEntry,
  option::IOManagerType,
};

use super::{
  data_file::{hint_file_path, merging_hint_path},
  log_record::RECORD_HEADER_SIZE,
};

/// tstamp(4) + key_size(4) + value_size(4) + value_offset(8)
pub const HINT_HEADER_SIZE: u64 = 20;

/// Sidecar summarising the live entries of one data file, so the next
/// open can rebuild the keydir without replaying every value.
///
/// Absence of a hint file is never an error; it only costs a full rescan.
pub struct HintFile {
  io: Box<dyn IOManager>,
}

impl HintFile {
  /// Starts a transient `<file_id>.bitcask.hint.merging` file, replacing
  /// any leftover from an interrupted merge.
  pub fn create<P: AsRef<Path>>(dir: P, file_id: u32) -> Result<HintFile> {
    let path = merging_hint_path(&dir, file_id);
    if path.exists() {
      let _ = fs::remove_file(&path);
    }
    let io = new_io_manager(&path, IOManagerType::StandardFileIO)?;
    Ok(HintFile { io })
  }

  /// Opens the published hint file for `file_id`.
  pub fn open<P: AsRef<Path>>(dir: P, file_id: u32) -> Result<HintFile> {
    let io = new_io_manager(&hint_file_path(&dir, file_id), IOManagerType::StandardFileIO)?;
    Ok(HintFile { io })
  }

  /// Appends one `tstamp | key_size | value_size | value_offset | key`
  /// entry, big-endian.
  pub fn write_entry(&self, key: &[u8], entry: &KeydirEntry) -> Result<()> {
    let value_size = entry.total_size - RECORD_HEADER_SIZE - key.len() as u64;
    let mut buf = BytesMut::with_capacity(HINT_HEADER_SIZE as usize + key.len());
    buf.put_u32(entry.tstamp);
    buf.put_u32(key.len() as u32);
    buf.put_u32(value_size as u32);
    buf.put_u64(entry.value_offset);
    buf.extend_from_slice(key);
    self.io.write(&buf)?;
    Ok(())
  }

  /// Replays every entry, handing `f` the key and the keydir entry it
  /// implies for `file_id`. A truncated tail is treated as the end.
  pub fn fold<F>(&self, file_id: u32, mut f: F) -> Result<()>
  where
    F: FnMut(Vec<u8>, KeydirEntry) -> Result<()>,
  {
    let mut offset = 0u64;
    loop {
      let mut header = [0u8; HINT_HEADER_SIZE as usize];
      match self.io.read(&mut header, offset) {
        Ok(_) => {}
        Err(Errors::ReadDataFileEOF) => return Ok(()),
        Err(e) => return Err(e),
      }

      let mut buf = &header[..];
      let tstamp = buf.get_u32();
      let key_size = buf.get_u32();
      let value_size = buf.get_u32();
      let value_offset = buf.get_u64();

      let mut key = vec![0u8; key_size as usize];
      match self.io.read(&mut key, offset + HINT_HEADER_SIZE) {
        Ok(_) => {}
        Err(Errors::ReadDataFileEOF) => return Ok(()),
        Err(e) => return Err(e),
      }

      let entry = KeydirEntry {
        file_id,
        total_size: RECORD_HEADER_SIZE + key_size as u64 + value_size as u64,
        value_offset,
        tstamp,
      };
      f(key, entry)?;
      offset += HINT_HEADER_SIZE + key_size as u64;
    }
  }

  pub fn sync(&self) -> Result<()> {
    self.io.sync()
  }

  /// Syncs and renames the transient file to its final
  /// `<file_id>.bitcask.hint` name.
  pub fn finish<P: AsRef<Path>>(self, dir: P, file_id: u32) -> Result<()> {
    self.sync()?;
    let src = merging_hint_path(&dir, file_id);
    let dst = hint_file_path(&dir, file_id);
    fs::rename(&src, &dst).map_err(|e| {
      error!("failed to publish hint file {}: {}", dst.display(), e);
      Errors::FailedToWriteDataFile
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_write_finish_reload() {
    let dir = tempfile::tempdir().unwrap();
    let file_id = 99;

    let hint = HintFile::create(dir.path(), file_id).unwrap();
    let entries = vec![
      (
        b"alpha".to_vec(),
        KeydirEntry {
          file_id,
          total_size: RECORD_HEADER_SIZE + 5 + 11,
          value_offset: 21,
          tstamp: 100,
        },
      ),
      (
        b"beta".to_vec(),
        KeydirEntry {
          file_id,
          total_size: RECORD_HEADER_SIZE + 4 + 7,
          value_offset: 72,
          tstamp: 101,
        },
      ),
    ];
    for (key, entry) in &entries {
      hint.write_entry(key, entry).unwrap();
    }
    hint.finish(dir.path(), file_id).unwrap();

    assert!(hint_file_path(dir.path(), file_id).is_file());
    assert!(!merging_hint_path(dir.path(), file_id).exists());

    let hint = HintFile::open(dir.path(), file_id).unwrap();
    let mut got = Vec::new();
    hint
      .fold(file_id, |key, entry| {
        got.push((key, entry));
        Ok(())
      })
      .unwrap();
    assert_eq!(got, entries);
  }

  #[test]
  fn test_truncated_hint_is_tolerated() {
    let dir = tempfile::tempdir().unwrap();
    let file_id = 7;

    let hint = HintFile::create(dir.path(), file_id).unwrap();
    let entry = KeydirEntry {
      file_id,
      total_size: RECORD_HEADER_SIZE + 3 + 5,
      value_offset: 19,
      tstamp: 5,
    };
    hint.write_entry(b"key", &entry).unwrap();
    hint.finish(dir.path(), file_id).unwrap();

    // chop into the entry's key bytes
    let path = hint_file_path(dir.path(), file_id);
    let len = fs::metadata(&path).unwrap().len();
    let f = fs::OpenOptions::new().write(true).open(&path).unwrap();
    f.set_len(len - 2).unwrap();

    let hint = HintFile::open(dir.path(), file_id).unwrap();
    let mut count = 0;
    hint
      .fold(file_id, |_, _| {
        count += 1;
        Ok(())
      })
      .unwrap();
    assert_eq!(count, 0);
  }
}
