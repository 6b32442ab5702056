//! Graft Storage: the key-value capability the installer persists through.
//!
//! The installer never reaches into a global options table. Instead it is
//! handed a [`KvStore`] and keeps everything it needs under one namespace:
//!
//! - [`MemoryKvStore`]: process-local, for tests and embedding hosts that
//!   persist elsewhere.
//! - [`FileKvStore`]: a single TOML document on disk, written atomically
//!   (temp file + rename) under an advisory `fs2` lock, so read-modify-write
//!   of one key is safe across processes.
//!
//! Values are UTF-8 strings; callers serialize structured records themselves.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod error;
pub mod file;
pub mod kv;

pub use error::{StorageError, StorageResult};
pub use file::{FileKvStore, STORE_FILE_NAME};
pub use kv::{KvStore, MemoryKvStore, UpdateFn, validate_key};
