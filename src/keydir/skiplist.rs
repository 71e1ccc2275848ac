use crossbeam_skiplist::SkipMap;

use super::{Keydir, KeydirEntry};

/// Lock-free keydir backed by a crossbeam skip list. The monotonic
/// version rule runs atomically inside `compare_insert`.
pub struct SkipList {
  map: SkipMap<Vec<u8>, KeydirEntry>,
}

impl SkipList {
  pub fn new() -> Self {
    Self { map: SkipMap::new() }
  }
}

impl Default for SkipList {
  fn default() -> Self {
    Self::new()
  }
}

impl Keydir for SkipList {
  fn put(&self, key: Vec<u8>, entry: KeydirEntry) -> bool {
    let stored = self
      .map
      .compare_insert(key, entry, |current| entry.supersedes(current));
    *stored.value() == entry
  }

  fn get(&self, key: &[u8]) -> Option<KeydirEntry> {
    self.map.get(key).map(|e| *e.value())
  }

  fn remove(&self, key: &[u8]) -> Option<KeydirEntry> {
    self.map.remove(key).map(|e| *e.value())
  }

  fn clear(&self) {
    while self.map.pop_front().is_some() {}
  }

  fn len(&self) -> usize {
    self.map.len()
  }
}
