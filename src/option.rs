/// Tuning knobs for an open store.
#[derive(Debug, Clone)]
pub struct Options {
  /// Open for writing. Takes the directory's write lock and creates a
  /// fresh active file. Defaults to a read-only view.
  pub read_write: bool,

  /// Rotate the active file once it holds this many bytes.
  pub max_file_size: u64,

  /// Fsync after every write.
  pub sync_writes: bool,

  /// Fsync after this many bytes have accumulated. Zero disables the
  /// threshold. Ignored when `sync_writes` is set.
  pub bytes_per_sync: u64,

  pub keydir_type: KeydirType,

  /// Scan data files through a memory map when rebuilding the keydir at
  /// open. Reads after open always go through standard file I/O.
  pub mmap_at_startup: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeydirType {
  BTree,

  SkipList,
}

impl Default for Options {
  fn default() -> Self {
    Self {
      read_write: false,
      max_file_size: 2 * 1024 * 1024 * 1024, // 2GiB
      sync_writes: false,
      bytes_per_sync: 0,
      keydir_type: KeydirType::BTree,
      mmap_at_startup: true,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IOManagerType {
  StandardFileIO,

  MemoryMap,
}
