use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Value reserved to mark a key as deleted. `put` refuses it; merge
/// compacts it out.
pub const TOMBSTONE: &[u8] = b"bitcask_tombstone";

/// crc(4) + tstamp(4) + key_size(4) + value_size(4)
pub const RECORD_HEADER_SIZE: u64 = 16;

/// One framed entry in a data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
  pub key: Vec<u8>,
  pub value: Vec<u8>,
  pub tstamp: u32,
}

impl LogRecord {
  pub fn is_tombstone(&self) -> bool {
    self.value == TOMBSTONE
  }

  pub fn encoded_len(&self) -> u64 {
    RECORD_HEADER_SIZE + self.key.len() as u64 + self.value.len() as u64
  }

  /// Encodes the record as `crc | tstamp | key_size | value_size | key |
  /// value`, integers u32 big-endian. The crc covers everything after
  /// itself.
  pub fn encode(&self) -> Bytes {
    let mut buf = BytesMut::with_capacity(self.encoded_len() as usize);
    buf.put_u32(0); // crc, back-filled below
    buf.put_u32(self.tstamp);
    buf.put_u32(self.key.len() as u32);
    buf.put_u32(self.value.len() as u32);
    buf.extend_from_slice(&self.key);
    buf.extend_from_slice(&self.value);

    let crc = crc32(&buf[4..]);
    buf[0..4].copy_from_slice(&crc.to_be_bytes());
    buf.freeze()
  }
}

/// Fixed-width front of a record, decoded ahead of the payload.
#[derive(Debug, Clone, Copy)]
pub struct RecordHeader {
  pub crc: u32,
  pub tstamp: u32,
  pub key_size: u32,
  pub value_size: u32,
}

impl RecordHeader {
  pub fn decode(mut buf: &[u8]) -> RecordHeader {
    RecordHeader {
      crc: buf.get_u32(),
      tstamp: buf.get_u32(),
      key_size: buf.get_u32(),
      value_size: buf.get_u32(),
    }
  }

  /// Recomputes the crc this header and payload should carry.
  pub fn expected_crc(&self, key: &[u8], value: &[u8]) -> u32 {
    let mut meta = [0u8; 12];
    meta[0..4].copy_from_slice(&self.tstamp.to_be_bytes());
    meta[4..8].copy_from_slice(&self.key_size.to_be_bytes());
    meta[8..12].copy_from_slice(&self.value_size.to_be_bytes());

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&meta);
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
  }
}

pub(crate) fn crc32(data: &[u8]) -> u32 {
  let mut hasher = crc32fast::Hasher::new();
  hasher.update(data);
  hasher.finalize()
}
