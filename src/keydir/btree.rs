use std::{collections::BTreeMap, sync::Arc};

use parking_lot::RwLock;

use super::{Keydir, KeydirEntry};

/// Keydir backed by a `BTreeMap` behind a read/write lock.
pub struct BTree {
  tree: Arc<RwLock<BTreeMap<Vec<u8>, KeydirEntry>>>,
}

impl BTree {
  pub fn new() -> Self {
    Self {
      tree: Arc::new(RwLock::new(BTreeMap::new())),
    }
  }
}

impl Default for BTree {
  fn default() -> Self {
    Self::new()
  }
}

impl Keydir for BTree {
  fn put(&self, key: Vec<u8>, entry: KeydirEntry) -> bool {
    let mut tree = self.tree.write();
    match tree.get(&key) {
      Some(current) if !entry.supersedes(current) => false,
      _ => {
        tree.insert(key, entry);
        true
      }
    }
  }

  fn get(&self, key: &[u8]) -> Option<KeydirEntry> {
    self.tree.read().get(key).copied()
  }

  fn remove(&self, key: &[u8]) -> Option<KeydirEntry> {
    self.tree.write().remove(key)
  }

  fn clear(&self) {
    self.tree.write().clear();
  }

  fn len(&self) -> usize {
    self.tree.read().len()
  }
}
