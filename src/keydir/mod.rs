pub mod btree;
pub mod skiplist;

use crate::option::KeydirType;

/// Location of the most recent value written for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeydirEntry {
  /// Data file holding the record.
  pub file_id: u32,
  /// Full record length, header included, so the whole record can be
  /// re-read and its crc checked.
  pub total_size: u64,
  /// Offset of the value bytes inside the file.
  pub value_offset: u64,
  pub tstamp: u32,
}

impl KeydirEntry {
  /// Version ordering between two sightings of the same key: the later
  /// timestamp wins, ties fall to the larger file id, then to the later
  /// offset within the file.
  pub fn supersedes(&self, other: &KeydirEntry) -> bool {
    (self.tstamp, self.file_id, self.value_offset)
      > (other.tstamp, other.file_id, other.value_offset)
  }
}

/// Concurrent map from key to the location of its newest value.
///
/// `put` enforces the "most recent wins" rule on its own: an entry only
/// replaces an existing one it supersedes. That lets the open scan and the
/// merge sweep feed records in any file order without losing the winner.
/// Operations are linearizable per key; no ordering holds across keys.
pub trait Keydir: Sync + Send {
  /// Installs `entry` unless the current entry for `key` supersedes it.
  /// Returns whether the entry was installed.
  fn put(&self, key: Vec<u8>, entry: KeydirEntry) -> bool;

  fn get(&self, key: &[u8]) -> Option<KeydirEntry>;

  fn remove(&self, key: &[u8]) -> Option<KeydirEntry>;

  /// Discards every entry. Used when the store session ends.
  fn clear(&self);

  fn len(&self) -> usize;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

pub fn new_keydir(keydir_type: KeydirType) -> Box<dyn Keydir> {
  match keydir_type {
    KeydirType::BTree => Box::new(btree::BTree::new()),
    KeydirType::SkipList => Box::new(skiplist::SkipList::new()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry(file_id: u32, value_offset: u64, tstamp: u32) -> KeydirEntry {
    KeydirEntry {
      file_id,
      total_size: 33,
      value_offset,
      tstamp,
    }
  }

  fn check_monotonic_rule(keydir: &dyn Keydir) {
    let key = b"k".to_vec();

    // first sighting installs
    assert!(keydir.put(key.clone(), entry(1, 20, 100)));

    // older timestamp loses
    assert!(!keydir.put(key.clone(), entry(2, 20, 99)));
    assert_eq!(keydir.get(&key), Some(entry(1, 20, 100)));

    // newer timestamp wins
    assert!(keydir.put(key.clone(), entry(1, 80, 101)));

    // same timestamp, larger file id wins
    assert!(keydir.put(key.clone(), entry(3, 20, 101)));
    assert!(!keydir.put(key.clone(), entry(2, 999, 101)));

    // same timestamp and file, later offset wins
    assert!(keydir.put(key.clone(), entry(3, 60, 101)));
    assert!(!keydir.put(key.clone(), entry(3, 40, 101)));

    assert_eq!(keydir.get(&key), Some(entry(3, 60, 101)));

    assert_eq!(keydir.remove(&key), Some(entry(3, 60, 101)));
    assert_eq!(keydir.get(&key), None);
    assert_eq!(keydir.remove(&key), None);
  }

  #[test]
  fn test_btree_monotonic_rule() {
    check_monotonic_rule(&btree::BTree::new());
  }

  #[test]
  fn test_skiplist_monotonic_rule() {
    check_monotonic_rule(&skiplist::SkipList::new());
  }

  #[test]
  fn test_len() {
    for keydir_type in [KeydirType::BTree, KeydirType::SkipList] {
      let keydir = new_keydir(keydir_type);
      assert!(keydir.is_empty());
      for i in 0..10u32 {
        keydir.put(i.to_be_bytes().to_vec(), entry(1, i as u64, i));
      }
      assert_eq!(keydir.len(), 10);
      keydir.remove(&0u32.to_be_bytes());
      assert_eq!(keydir.len(), 9);
      keydir.clear();
      assert!(keydir.is_empty());
      assert_eq!(keydir.get(&1u32.to_be_bytes()), None);
    }
  }
}
