use thiserror::Error;

/// Everything that can go wrong inside the store.
///
/// Variants are deliberately payload-free so call sites and tests can
/// compare them with `==`; the underlying cause of an I/O failure is
/// logged where it happens.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errors {
  #[error("key is empty")]
  KeyIsEmpty,

  #[error("key exceeds the maximum encodable size")]
  KeyTooLarge,

  #[error("value exceeds the maximum encodable size")]
  ValueTooLarge,

  #[error("value collides with the reserved tombstone sentinel")]
  ValueIsReserved,

  #[error("key not found in store")]
  KeyNotFound,

  #[error("store was opened in read-only mode")]
  ReadOnly,

  #[error("another live process holds the write lock")]
  WriteLocked,

  #[error("another live process holds the merge lock")]
  MergeLocked,

  #[error("max_file_size must be greater than zero")]
  InvalidMaxFileSize,

  #[error("failed to create the database directory")]
  FailedToCreateDatabaseDir,

  #[error("failed to read the database directory")]
  FailedToReadDatabaseDir,

  #[error("failed to create lock file")]
  FailedToCreateLockFile,

  #[error("failed to open data file")]
  FailedToOpenDataFile,

  #[error("failed to read from data file")]
  FailedToReadDataFile,

  #[error("failed to write to data file")]
  FailedToWriteDataFile,

  #[error("failed to sync data file")]
  FailedToSyncDataFile,

  #[error("failed to delete data file")]
  FailedToDeleteDataFile,

  #[error("data file referenced by the keydir is missing")]
  DataFileNotFound,

  #[error("record failed crc validation")]
  InvalidRecordCrc,

  #[error("reached the end of the data file")]
  ReadDataFileEOF,
}

pub type Result<T> = std::result::Result<T, Errors>;
