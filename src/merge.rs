use std::{collections::HashMap, fs, path::Path};

use log::{error, warn};

use crate::{
  data::{
    data_file::{self, DataFile},
    hint_file::HintFile,
    log_record::RECORD_HEADER_SIZE,
  },
  db::Engine,
  errors::{Errors, Result},
  keydir::KeydirEntry,
  lock::{self, LockGuard, LockKind},
  option::Options,
};

/// Compacts the store in `dir`: rewrites the live entries of every
/// immutable data file into fresh output files, emits a hint sidecar per
/// output, and deletes the sources.
///
/// Runs against a read-only view, so readers of that view keep working
/// throughout and a live writer's active file is never touched. Fails
/// with `MergeLocked` when another merge holds the merge lock.
///
/// Scan order does not matter for correctness: every record is checked
/// against the view's keydir, which already knows the newest version of
/// each key, before it is allowed into an output.
pub fn merge<P>(dir: P) -> Result<()>
where
  P: AsRef<Path>,
{
  let dir = dir.as_ref();
  let view = Engine::open(
    dir,
    Options {
      read_write: false,
      ..Options::default()
    },
  )?;
  let merge_lock = lock::acquire(dir, LockKind::Merge)?;

  let mut source_ids: Vec<u32> = view.read_files.read().keys().copied().collect();
  source_ids.sort_unstable();
  if source_ids.is_empty() {
    return Ok(());
  }
  let max_source_id = source_ids.last().copied().unwrap_or(0);
  let max_file_size = view.options.max_file_size;

  let mut output = new_output(dir, max_source_id.saturating_add(1), &merge_lock)?;
  // (file id, live entries) for every sealed output, serialised into hint
  // files once the sources are gone
  let mut sealed: Vec<(u32, HashMap<Vec<u8>, KeydirEntry>)> = Vec::new();
  // live entries already written into the current output
  let mut hint_keydir: HashMap<Vec<u8>, KeydirEntry> = HashMap::new();
  // keys whose most recent sighting so far is a tombstone
  let mut del_keydir: HashMap<Vec<u8>, KeydirEntry> = HashMap::new();

  for &file_id in &source_ids {
    // the read set already holds an open handle for every source; the
    // scan shares it with the view's read path
    let read_files = view.read_files.read();
    let source = read_files.get(&file_id).ok_or(Errors::DataFileNotFound)?;
    source.fold(|record, value_offset, total_size| {
      let candidate = KeydirEntry {
        file_id,
        total_size,
        value_offset,
        tstamp: record.tstamp,
      };

      // out-of-date check: anything that already knows a newer version
      // of this key makes the record on disk garbage
      let out_of_date = view
        .keydir
        .get(&record.key)
        .map_or(false, |e| e.supersedes(&candidate))
        || hint_keydir
          .get(&record.key)
          .map_or(false, |e| e.supersedes(&candidate))
        || del_keydir
          .get(&record.key)
          .map_or(false, |e| e.supersedes(&candidate));
      if out_of_date {
        return Ok(());
      }

      if record.is_tombstone() {
        // the newest version of this key is a deletion; drop it from the
        // view and keep only the tombstone's version for later checks
        view.keydir.remove(&record.key);
        del_keydir.insert(record.key, candidate);
        return Ok(());
      }

      del_keydir.remove(&record.key);

      let enc = record.encode();
      if output.check_write(enc.len() as u64, max_file_size) {
        output.sync()?;
        let next = new_output(dir, output.file_id().saturating_add(1), &merge_lock)?;
        let full = std::mem::replace(&mut output, next);
        sealed.push((full.file_id(), std::mem::take(&mut hint_keydir)));
      }

      let write_off = output.write(&enc)?;
      let rewritten = KeydirEntry {
        file_id: output.file_id(),
        total_size: enc.len() as u64,
        value_offset: write_off + RECORD_HEADER_SIZE + record.key.len() as u64,
        tstamp: record.tstamp,
      };
      // concurrent readers of the view follow the record to its new home
      view.keydir.put(record.key.clone(), rewritten);
      hint_keydir.insert(record.key, rewritten);
      Ok(())
    })?;
  }

  output.sync()?;
  let final_id = output.file_id();
  if output.write_off() == 0 {
    // every record in the sources was stale or tombstoned
    drop(output);
    if let Err(e) = fs::remove_file(data_file::data_file_path(dir, final_id)) {
      warn!("failed to remove empty merge output: {}", e);
    }
  } else {
    drop(output);
    sealed.push((final_id, hint_keydir));
  }

  // every live record now exists in an output; retire the sources
  {
    let mut read_files = view.read_files.write();
    for &file_id in &source_ids {
      read_files.remove(&file_id);
      let data_path = data_file::data_file_path(dir, file_id);
      if let Err(e) = fs::remove_file(&data_path) {
        error!("failed to delete merged data file {}: {}", data_path.display(), e);
        return Err(Errors::FailedToDeleteDataFile);
      }
      let hint_path = data_file::hint_file_path(dir, file_id);
      if hint_path.is_file() {
        if let Err(e) = fs::remove_file(&hint_path) {
          warn!("failed to delete stale hint file {}: {}", hint_path.display(), e);
        }
      }
    }
  }

  drop(merge_lock);

  // hint emission is best-effort: a missing hint only costs the next
  // open a full scan of that file
  for (file_id, entries) in sealed {
    if let Err(e) = write_hint_file(dir, file_id, &entries) {
      warn!("failed to emit hint file for {}: {}", file_id, e);
    }
  }

  Ok(())
}

fn new_output(dir: &Path, floor: u32, merge_lock: &LockGuard) -> Result<DataFile> {
  let file = DataFile::create(dir, floor)?;
  merge_lock.update(&file.file_name())?;
  Ok(file)
}

fn write_hint_file(
  dir: &Path,
  file_id: u32,
  entries: &HashMap<Vec<u8>, KeydirEntry>,
) -> Result<()> {
  let hint = HintFile::create(dir, file_id)?;
  for (key, entry) in entries {
    hint.write_entry(key, entry)?;
  }
  hint.finish(dir, file_id)
}

#[cfg(test)]
mod tests {
  use bytes::Bytes;

  use super::*;
  use crate::util::rand_kv::{get_test_key, get_test_value};

  fn rw_options() -> Options {
    Options {
      read_write: true,
      ..Options::default()
    }
  }

  fn data_file_count(dir: &Path) -> usize {
    data_file::list_file_ids(dir).expect("failed to list data files").len()
  }

  #[test]
  fn test_merge_empty_store() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");

    let engine = Engine::open(dir.path(), rw_options()).expect("failed to open engine");
    engine.close().expect("failed to close engine");
    drop(engine);

    // the only file is the empty active; merge sweeps it away
    merge(dir.path()).expect("merge failed");
    assert_eq!(data_file_count(dir.path()), 0);
  }

  #[test]
  fn test_merge_compacts_to_one_file() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");

    let mut options = rw_options();
    options.max_file_size = 1;
    let engine = Engine::open(dir.path(), options).expect("failed to open engine");
    engine.put(Bytes::from("k"), Bytes::from("v")).expect("put failed");
    engine.put(Bytes::from("k2"), Bytes::from("v2")).expect("put failed");
    engine.put(Bytes::from("k3"), Bytes::from("v3")).expect("put failed");
    engine.close().expect("failed to close engine");
    drop(engine);

    assert_eq!(data_file_count(dir.path()), 4);

    merge(dir.path()).expect("merge failed");
    assert_eq!(data_file_count(dir.path()), 1);

    let engine = Engine::open(dir.path(), Options::default()).expect("failed to reopen");
    assert_eq!(engine.get(Bytes::from("k")).expect("get failed"), Bytes::from("v"));
    assert_eq!(engine.get(Bytes::from("k2")).expect("get failed"), Bytes::from("v2"));
    assert_eq!(engine.get(Bytes::from("k3")).expect("get failed"), Bytes::from("v3"));
  }

  #[test]
  fn test_merge_emits_usable_hint_files() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");

    let engine = Engine::open(dir.path(), rw_options()).expect("failed to open engine");
    for i in 0..100 {
      engine.put(get_test_key(i), get_test_value(i)).expect("put failed");
    }
    engine.close().expect("failed to close engine");
    drop(engine);

    merge(dir.path()).expect("merge failed");

    let ids = data_file::list_file_ids(dir.path()).expect("failed to list data files");
    assert_eq!(ids.len(), 1);
    assert!(data_file::hint_file_path(dir.path(), ids[0]).is_file());

    // the reopened keydir comes from the hint file; every value must
    // still resolve through it
    let engine = Engine::open(dir.path(), Options::default()).expect("failed to reopen");
    for i in 0..100 {
      assert_eq!(engine.get(get_test_key(i)).expect("get failed"), get_test_value(i));
    }
  }

  #[test]
  fn test_merge_drops_deleted_keys() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");

    let engine = Engine::open(dir.path(), rw_options()).expect("failed to open engine");
    engine.put(Bytes::from("k"), Bytes::from("v1")).expect("put failed");
    engine.delete(Bytes::from("k")).expect("delete failed");
    assert_eq!(engine.get(Bytes::from("k")).err(), Some(Errors::KeyNotFound));
    engine.close().expect("failed to close engine");
    drop(engine);

    merge(dir.path()).expect("merge failed");

    // nothing was live, so nothing survives: no data files at all
    assert_eq!(data_file_count(dir.path()), 0);

    let engine = Engine::open(dir.path(), Options::default()).expect("failed to reopen");
    assert_eq!(engine.get(Bytes::from("k")).err(), Some(Errors::KeyNotFound));
  }

  #[test]
  fn test_merge_keeps_newest_versions() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");

    let mut options = rw_options();
    options.max_file_size = 512;
    let engine = Engine::open(dir.path(), options).expect("failed to open engine");
    for i in 0..500 {
      engine.put(get_test_key(i), get_test_value(i)).expect("put failed");
    }
    for i in 0..100 {
      engine.put(get_test_key(i), Bytes::from("rewritten")).expect("put failed");
    }
    for i in 400..500 {
      engine.delete(get_test_key(i)).expect("delete failed");
    }
    engine.close().expect("failed to close engine");
    drop(engine);

    let before = data_file_count(dir.path());
    merge(dir.path()).expect("merge failed");
    assert!(data_file_count(dir.path()) <= before);

    let engine = Engine::open(dir.path(), Options::default()).expect("failed to reopen");
    for i in 0..100 {
      assert_eq!(engine.get(get_test_key(i)).expect("get failed"), Bytes::from("rewritten"));
    }
    for i in 100..400 {
      assert_eq!(engine.get(get_test_key(i)).expect("get failed"), get_test_value(i));
    }
    for i in 400..500 {
      assert_eq!(engine.get(get_test_key(i)).err(), Some(Errors::KeyNotFound));
    }
  }

  #[test]
  fn test_merge_locked_while_merge_lock_held() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");

    let engine = Engine::open(dir.path(), rw_options()).expect("failed to open engine");
    engine.put(Bytes::from("k"), Bytes::from("v")).expect("put failed");
    engine.close().expect("failed to close engine");
    drop(engine);

    let guard = lock::acquire(dir.path(), LockKind::Merge).expect("failed to take merge lock");
    assert_eq!(merge(dir.path()).err(), Some(Errors::MergeLocked));
    drop(guard);

    merge(dir.path()).expect("merge failed");
  }

  #[test]
  fn test_merge_alongside_live_writer() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");

    let mut options = rw_options();
    options.max_file_size = 128;
    let engine = Engine::open(dir.path(), options).expect("failed to open engine");
    for i in 0..20 {
      engine.put(get_test_key(i), get_test_value(i)).expect("put failed");
    }

    // compacts the sealed files; the writer's active file is excluded
    merge(dir.path()).expect("merge failed");

    // the writer keeps serving reads through its own handles
    for i in 0..20 {
      assert_eq!(engine.get(get_test_key(i)).expect("get failed"), get_test_value(i));
    }
    engine.close().expect("failed to close engine");
    drop(engine);

    let engine = Engine::open(dir.path(), Options::default()).expect("failed to reopen");
    for i in 0..20 {
      assert_eq!(engine.get(get_test_key(i)).expect("get failed"), get_test_value(i));
    }
  }
}
