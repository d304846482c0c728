//! TideFS environment adapter
//!
//! The synchronous filesystem surface a database embeds against. Managed
//! paths ride the cache and the reactor bridge into the engine; everything
//! else is plain POSIX. See `tidefs-reactor` for the threading model.

pub mod env;
pub mod file;
pub mod posix;

pub use env::TideEnv;
pub use file::{Directory, FileLock, RandomAccessFile, SequentialFile, WritableFile};
pub use tidefs_cache::Priority;
