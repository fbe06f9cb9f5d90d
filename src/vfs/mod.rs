//! Filesystem abstraction used to persist segments and the manifest
//!
//! - `FileSystem`: named files under one root, exclusive locks, atomic writes
//! - `LocalFileSystem`: implementation over a local directory

mod local;

use std::io::{self, Read, Seek, Write};
use std::path::Path;

use crate::error::{FpIndexError, Result};

pub use local::LocalFileSystem;

/// File opened for reading
pub trait InputFile: Read + Seek + Send {}

impl<T: Read + Seek + Send> InputFile for T {}

/// File opened for writing
pub trait OutputFile: Write + Send {
    /// Flush buffered data and sync it to stable storage
    fn sync(&mut self) -> Result<()>;
}

/// File that only becomes visible under its name once committed
pub trait AtomicOutputFile: OutputFile {
    /// Sync and publish the file. Fails with `AlreadyCommitted` if called twice.
    fn commit(&mut self) -> Result<()>;
}

/// Held exclusive lock, released on drop
pub trait LockGuard: Send + Sync {}

pub trait FileSystem: Send + Sync {
    /// Acquire an exclusive lock on `name`
    fn lock(&self, name: &str) -> Result<Box<dyn LockGuard>>;

    /// Absolute path to the root of the filesystem
    fn path(&self) -> &Path;

    /// Names of all regular files, sorted
    fn list(&self) -> Result<Vec<String>>;

    /// Open an existing file for reading
    fn open_file(&self, name: &str) -> Result<Box<dyn InputFile>>;

    /// Open a file for writing. An existing file is truncated only if
    /// `overwrite` is set, otherwise an error is returned.
    fn create_file(&self, name: &str, overwrite: bool) -> Result<Box<dyn OutputFile>>;

    /// Open a file for writing that is invisible under `name` until committed
    fn create_atomic_file(&self, name: &str) -> Result<Box<dyn AtomicOutputFile>>;

    /// Move `from` to `to`, replacing `to` if it exists
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    fn remove(&self, name: &str) -> Result<()>;

    fn exists(&self, name: &str) -> bool;

    /// Read a whole file into memory
    fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        let mut file = self.open_file(name)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(data)
    }
}

pub fn is_locked(err: &FpIndexError) -> bool {
    matches!(err, FpIndexError::Locked(_))
}

pub fn is_not_found(err: &FpIndexError) -> bool {
    matches!(err, FpIndexError::Io(e) if e.kind() == io::ErrorKind::NotFound)
}

pub fn is_already_exists(err: &FpIndexError) -> bool {
    matches!(err, FpIndexError::Io(e) if e.kind() == io::ErrorKind::AlreadyExists)
}
