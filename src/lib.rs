//! Embercask: an embeddable log-structured key/value store in the Bitcask
//! mould.
//!
//! Values live in append-only data files inside a single directory. A
//! resident keydir maps every key to the location of its newest value, so
//! a read costs at most one seek and a write is always a sequential
//! append. Space held by overwritten and deleted entries is reclaimed by
//! an explicit [`merge::merge`] pass, which also emits hint files that
//! speed up the next open.
//!
//! # Features
//!
//! * One seek per read, one append per write
//! * Crash-tolerant open: a torn tail record from a killed writer is
//!   skipped, never fatal
//! * Directory-level write and merge locks with stale-owner reclaim
//! * Pluggable keydir backends (b-tree or lock-free skip list)
//! * Optional memory-mapped scanning for fast startup
//!
//! # Basic Usage
//!
//! ```
//! use bytes::Bytes;
//! use embercask::{db::Engine, option::Options};
//!
//! let dir = tempfile::tempdir().expect("failed to create temp dir");
//! let mut opts = Options::default();
//! opts.read_write = true;
//! let engine = Engine::open(dir.path(), opts).expect("failed to open store");
//!
//! let key = Bytes::from(b"hello".to_vec());
//! let value = Bytes::from(b"world".to_vec());
//! engine.put(key.clone(), value.clone()).expect("failed to put");
//!
//! assert_eq!(engine.get(key.clone()).expect("failed to get"), value);
//!
//! engine.delete(key).expect("failed to delete");
//! ```

mod data;

mod fio;
mod keydir;
mod lock;

pub mod db;
pub mod errors;
pub mod merge;
pub mod option;
pub mod util;
