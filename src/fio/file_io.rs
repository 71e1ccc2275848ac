use std::{
  fs::{File, OpenOptions},
  io::Write,
  path::Path,
  sync::Arc,
};

use log::error;
use parking_lot::RwLock;

use crate::errors::{Errors, Result};

use super::IOManager;

/// Standard file I/O: positioned reads, append-only writes.
pub struct FileIO {
  fd: Arc<RwLock<File>>,
}

impl FileIO {
  pub fn new<P>(file_name: P) -> Result<Self>
  where
    P: AsRef<Path>,
  {
    match OpenOptions::new()
      .create(true)
      .read(true)
      .append(true)
      .open(file_name)
    {
      Ok(file) => Ok(FileIO {
        fd: Arc::new(RwLock::new(file)),
      }),
      Err(e) => {
        error!("failed to open data file: {}", e);
        Err(Errors::FailedToOpenDataFile)
      }
    }
  }
}

impl IOManager for FileIO {
  #[cfg(unix)]
  fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
    use std::os::unix::fs::FileExt;

    let fd = self.fd.read();
    match fd.read_exact_at(buf, offset) {
      Ok(()) => Ok(buf.len()),
      Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(Errors::ReadDataFileEOF),
      Err(e) => {
        error!("failed to read from data file: {}", e);
        Err(Errors::FailedToReadDataFile)
      }
    }
  }

  #[cfg(windows)]
  fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
    use std::os::windows::fs::FileExt;

    let fd = self.fd.read();
    let mut read = 0;
    while read < buf.len() {
      match fd.seek_read(&mut buf[read..], offset + read as u64) {
        Ok(0) => return Err(Errors::ReadDataFileEOF),
        Ok(n) => read += n,
        Err(e) => {
          error!("failed to read from data file: {}", e);
          return Err(Errors::FailedToReadDataFile);
        }
      }
    }
    Ok(read)
  }

  fn write(&self, buf: &[u8]) -> Result<usize> {
    let mut fd = self.fd.write();
    match fd.write_all(buf) {
      Ok(()) => Ok(buf.len()),
      Err(e) => {
        error!("failed to write to data file: {}", e);
        Err(Errors::FailedToWriteDataFile)
      }
    }
  }

  fn sync(&self) -> Result<()> {
    let fd = self.fd.read();
    if let Err(e) = fd.sync_all() {
      error!("failed to sync data file: {}", e);
      return Err(Errors::FailedToSyncDataFile);
    }
    Ok(())
  }

  fn size(&self) -> u64 {
    let fd = self.fd.read();
    fd.metadata().map(|m| m.len()).unwrap_or(0)
  }
}
