use std::{fs::OpenOptions, path::Path, sync::Arc};

use log::error;
use memmap2::Mmap;
use parking_lot::Mutex;

use crate::errors::{Errors, Result};

use super::IOManager;

/// Read-only memory-mapped I/O.
///
/// Only used to accelerate the open-time keydir rebuild; the active write
/// file and the post-open read path always go through [`super::file_io::FileIO`].
pub struct MMapIO {
  map: Arc<Mutex<Mmap>>,
}

impl MMapIO {
  pub fn new<P>(file_name: P) -> Result<Self>
  where
    P: AsRef<Path>,
  {
    let file = OpenOptions::new()
      .create(true)
      .read(true)
      .append(true)
      .open(file_name)
      .map_err(|e| {
        error!("failed to open data file: {}", e);
        Errors::FailedToOpenDataFile
      })?;

    let map = unsafe {
      Mmap::map(&file).map_err(|e| {
        error!("failed to map data file: {}", e);
        Errors::FailedToOpenDataFile
      })?
    };

    Ok(MMapIO {
      map: Arc::new(Mutex::new(map)),
    })
  }
}

impl IOManager for MMapIO {
  fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
    let map = self.map.lock();
    let start = offset as usize;
    let end = start.checked_add(buf.len()).ok_or(Errors::ReadDataFileEOF)?;
    if end > map.len() {
      return Err(Errors::ReadDataFileEOF);
    }

    buf.copy_from_slice(&map[start..end]);
    Ok(buf.len())
  }

  // the map is a scan-only view; the active file never goes through it
  fn write(&self, _buf: &[u8]) -> Result<usize> {
    unreachable!("memory-mapped files are read-only")
  }

  fn sync(&self) -> Result<()> {
    unreachable!("memory-mapped files are read-only")
  }

  fn size(&self) -> u64 {
    self.map.lock().len() as u64
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fio::file_io::FileIO;

  #[test]
  fn test_mmap_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mmap.data");

    // empty file maps to an empty view
    let mmap_io = MMapIO::new(&path).unwrap();
    let mut buf = [0u8; 10];
    assert_eq!(
      mmap_io.read(&mut buf, 0).err(),
      Some(Errors::ReadDataFileEOF)
    );

    let fio = FileIO::new(&path).unwrap();
    fio.write(b"hello world").unwrap();
    fio.write(b"good morning").unwrap();
    fio.sync().unwrap();

    // remap to pick up the appended bytes
    let mmap_io = MMapIO::new(&path).unwrap();
    let mut buf = [0u8; 11];
    mmap_io.read(&mut buf, 0).unwrap();
    assert_eq!(&buf, b"hello world");

    let mut buf = [0u8; 12];
    mmap_io.read(&mut buf, 11).unwrap();
    assert_eq!(&buf, b"good morning");
  }

  #[test]
  fn test_mmap_size() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("size.data");

    let mmap_io = MMapIO::new(&path).unwrap();
    assert_eq!(mmap_io.size(), 0);

    let fio = FileIO::new(&path).unwrap();
    fio.write(b"hello world").unwrap();

    let mmap_io = MMapIO::new(&path).unwrap();
    assert_eq!(mmap_io.size(), 11);
  }
}
