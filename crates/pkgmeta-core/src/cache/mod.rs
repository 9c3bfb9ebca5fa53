//! Durable, multi-process record cache.
//!
//! - `directory`: the key-to-file cache with its loader, writer and reconciler
//! - `file_lock`: named cross-process locks per record
//! - `atomic`: temp-file-and-rename persistence
//! - `watcher`: change hints from the OS

mod atomic;
mod directory;
mod file_lock;
mod watcher;

pub use atomic::{atomic_read_json, atomic_write_json};
pub use directory::{CacheEvent, DirectoryCacheOptions, DurableDirectoryCache, EntryState};
pub use file_lock::{sanitize_lock_name, FileLockGuard, LockWait, NamedFileLock};
