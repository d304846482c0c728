//! POSIX fallback file I/O
//!
//! Used verbatim for every path outside the managed namespace, and as the
//! fallback target when the engine reports not-found for metadata
//! operations. Plain `std::fs` plus `flock` for lock files.

use bytes::Bytes;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::io::Write as _;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use tidefs_common::{Error, Result};

/// Sequential reader over a local file.
pub struct PosixSequential {
    file: File,
}

impl PosixSequential {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            file: File::open(path)?,
        })
    }

    /// Read up to `n` bytes from the cursor; short or empty at end of file.
    pub fn read(&mut self, n: usize) -> Result<Bytes> {
        let mut buf = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            match self.file.read(&mut buf[filled..])? {
                0 => break,
                got => filled += got,
            }
        }
        buf.truncate(filled);
        Ok(Bytes::from(buf))
    }

    /// Advance the cursor by `n` bytes.
    pub fn skip(&mut self, n: u64) -> Result<()> {
        self.file.seek(SeekFrom::Current(n as i64))?;
        Ok(())
    }
}

/// Positional reader over a local file.
pub struct PosixRandom {
    file: File,
}

impl PosixRandom {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            file: File::open(path)?,
        })
    }

    /// Read up to `n` bytes at `offset`; short or empty at end of file.
    pub fn read_at(&self, offset: u64, n: usize) -> Result<Bytes> {
        let mut buf = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            match self.file.read_at(&mut buf[filled..], offset + filled as u64)? {
                0 => break,
                got => filled += got,
            }
        }
        buf.truncate(filled);
        Ok(Bytes::from(buf))
    }
}

/// Append-only writer over a local file.
pub struct PosixWritable {
    file: File,
    path: PathBuf,
}

impl PosixWritable {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self {
            file,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Reopen `path` for appending, keeping existing content.
    pub fn reopen(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = OpenOptions::new().write(true).read(true).open(&path)?;
        file.seek(SeekFrom::End(0))?;
        Ok(Self {
            file,
            path: path.as_ref().to_path_buf(),
        })
    }

    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        self.file.write_all(data)?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    pub fn fsync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    pub fn truncate(&mut self, size: u64) -> Result<()> {
        self.file.set_len(size)?;
        self.file.seek(SeekFrom::Start(size))?;
        Ok(())
    }

    /// Extend-only preallocation, mirroring the managed path.
    pub fn allocate(&mut self, offset: u64, len: u64) -> Result<()> {
        let end = offset + len;
        if end > self.file_size()? {
            self.file.set_len(end)?;
        }
        Ok(())
    }

    pub fn file_size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Held lock on a local lock file; unlocks on drop.
pub struct PosixLock {
    _lock: Flock<File>,
}

impl PosixLock {
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let lock = Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(|(_, errno)| {
            Error::Io(std::io::Error::from_raw_os_error(errno as i32))
        })?;
        Ok(Self { _lock: lock })
    }
}

/// Names of the entries directly under `dir`.
pub fn list_dir(dir: impl AsRef<Path>) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        names.push(entry?.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

pub fn exists(path: impl AsRef<Path>) -> bool {
    path.as_ref().exists()
}

pub fn file_size(path: impl AsRef<Path>) -> Result<u64> {
    Ok(std::fs::metadata(path)?.len())
}

pub fn delete(path: impl AsRef<Path>) -> Result<()> {
    std::fs::remove_file(path)?;
    Ok(())
}

pub fn rename(old: impl AsRef<Path>, new: impl AsRef<Path>) -> Result<()> {
    std::fs::rename(old, new)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sequential_read_and_skip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seq");
        std::fs::write(&path, b"0123456789").unwrap();

        let mut file = PosixSequential::open(&path).unwrap();
        assert_eq!(&file.read(4).unwrap()[..], b"0123");
        file.skip(2).unwrap();
        assert_eq!(&file.read(4).unwrap()[..], b"6789");
        // Past end of file: empty, not an error.
        assert!(file.read(4).unwrap().is_empty());
    }

    #[test]
    fn test_random_read_at() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rand");
        std::fs::write(&path, b"abcdefgh").unwrap();

        let file = PosixRandom::open(&path).unwrap();
        assert_eq!(&file.read_at(2, 3).unwrap()[..], b"cde");
        assert_eq!(&file.read_at(6, 10).unwrap()[..], b"gh");
    }

    #[test]
    fn test_writable_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("w");

        let mut file = PosixWritable::create(&path).unwrap();
        file.append(b"hello").unwrap();
        file.sync().unwrap();
        assert_eq!(file.file_size().unwrap(), 5);
        file.truncate(3).unwrap();
        file.allocate(0, 2).unwrap(); // within size: no-op
        assert_eq!(file.file_size().unwrap(), 3);

        drop(file);
        assert_eq!(std::fs::read(&path).unwrap(), b"hel");
    }

    #[test]
    fn test_lock_is_exclusive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("LOCK");

        let held = PosixLock::acquire(&path).unwrap();
        assert!(PosixLock::acquire(&path).is_err());
        drop(held);
        PosixLock::acquire(&path).unwrap();
    }

    #[test]
    fn test_list_dir() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("b"), b"").unwrap();
        std::fs::write(dir.path().join("a"), b"").unwrap();
        assert_eq!(list_dir(dir.path()).unwrap(), vec!["a", "b"]);
    }
}
