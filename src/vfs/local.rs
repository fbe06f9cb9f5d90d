use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use fs2::FileExt;
use tracing::{debug, warn};

use super::{AtomicOutputFile, FileSystem, InputFile, LockGuard, OutputFile};
use crate::error::{FpIndexError, Result};

/// Prefix of in-progress atomic files; such files are hidden from `list`
const TEMP_PREFIX: &str = ".tmp-";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Filesystem rooted at a local directory
#[derive(Clone, Debug)]
pub struct LocalFileSystem {
    root: PathBuf,
}

impl LocalFileSystem {
    /// Open the directory at `root`, creating it if missing
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.canonicalize()?,
        })
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn sync_dir(&self) {
        // not supported on every platform
        if let Ok(dir) = File::open(&self.root) {
            let _ = dir.sync_all();
        }
    }
}

impl FileSystem for LocalFileSystem {
    /// Take an advisory lock on `name`, creating the file if needed.
    ///
    /// The OS drops the lock when the process exits, so a lock file left by
    /// a crashed process does not block later opens.
    fn lock(&self, name: &str) -> Result<Box<dyn LockGuard>> {
        let path = self.file_path(name);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        if let Err(e) = file.try_lock_exclusive() {
            if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                return Err(FpIndexError::Locked(path.display().to_string()));
            }
            return Err(e.into());
        }

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.sync_all()?;
        debug!("Acquired lock {}", path.display());
        Ok(Box::new(LocalLock { file, path }))
    }

    fn path(&self) -> &Path {
        &self.root
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with(TEMP_PREFIX) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn open_file(&self, name: &str) -> Result<Box<dyn InputFile>> {
        let file = File::open(self.file_path(name))?;
        Ok(Box::new(file))
    }

    fn create_file(&self, name: &str, overwrite: bool) -> Result<Box<dyn OutputFile>> {
        let mut options = OpenOptions::new();
        options.write(true);
        if overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }
        let file = options.open(self.file_path(name))?;
        Ok(Box::new(LocalOutputFile {
            writer: BufWriter::new(file),
        }))
    }

    fn create_atomic_file(&self, name: &str) -> Result<Box<dyn AtomicOutputFile>> {
        let temp_name = format!(
            "{}{}-{}-{}",
            TEMP_PREFIX,
            name,
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let temp_path = self.file_path(&temp_name);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;

        Ok(Box::new(LocalAtomicFile {
            writer: BufWriter::new(file),
            temp_path,
            target_path: self.file_path(name),
            fs: self.clone(),
            committed: false,
        }))
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        fs::rename(self.file_path(from), self.file_path(to))?;
        self.sync_dir();
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        fs::remove_file(self.file_path(name))?;
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        self.file_path(name).exists()
    }
}

/// Held lock. The lock file is only unlocked, never removed.
struct LocalLock {
    file: File,
    path: PathBuf,
}

impl LockGuard for LocalLock {}

impl Drop for LocalLock {
    fn drop(&mut self) {
        match FileExt::unlock(&self.file) {
            Ok(()) => debug!("Released lock {}", self.path.display()),
            Err(e) => warn!("Failed to release lock {}: {}", self.path.display(), e),
        }
    }
}

struct LocalOutputFile {
    writer: BufWriter<File>,
}

impl Write for LocalOutputFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl OutputFile for LocalOutputFile {
    fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}

struct LocalAtomicFile {
    writer: BufWriter<File>,
    temp_path: PathBuf,
    target_path: PathBuf,
    fs: LocalFileSystem,
    committed: bool,
}

impl Write for LocalAtomicFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.committed {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "write to a committed file",
            ));
        }
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl OutputFile for LocalAtomicFile {
    fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}

impl AtomicOutputFile for LocalAtomicFile {
    fn commit(&mut self) -> Result<()> {
        if self.committed {
            return Err(FpIndexError::AlreadyCommitted(
                self.target_path.display().to_string(),
            ));
        }
        self.sync()?;
        fs::rename(&self.temp_path, &self.target_path)?;
        self.fs.sync_dir();
        self.committed = true;
        Ok(())
    }
}

impl Drop for LocalAtomicFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.temp_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::{is_already_exists, is_locked, is_not_found};
    use tempfile::TempDir;

    #[test]
    fn test_lock() {
        let tmp = TempDir::new().unwrap();
        let fs = LocalFileSystem::open(tmp.path()).unwrap();

        let guard = fs.lock("index.lock").unwrap();
        let err = fs.lock("index.lock").err().unwrap();
        assert!(is_locked(&err));

        drop(guard);
        assert!(fs.lock("index.lock").is_ok());
    }

    #[test]
    fn test_stale_lock_file_is_reused() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("index.lock"), b"4194304\n").unwrap();
        let fs = LocalFileSystem::open(tmp.path()).unwrap();

        let guard = fs.lock("index.lock").unwrap();
        let owner = std::fs::read_to_string(tmp.path().join("index.lock")).unwrap();
        assert_eq!(owner.trim(), std::process::id().to_string());
        assert!(is_locked(&fs.lock("index.lock").err().unwrap()));

        drop(guard);
        assert!(tmp.path().join("index.lock").exists());
        assert!(fs.lock("index.lock").is_ok());
    }

    #[test]
    fn test_atomic_file_commit() {
        let tmp = TempDir::new().unwrap();
        let fs = LocalFileSystem::open(tmp.path()).unwrap();

        let mut file = fs.create_atomic_file("data").unwrap();
        file.write_all(b"hello").unwrap();
        assert!(!fs.exists("data"));
        assert!(fs.list().unwrap().is_empty());

        file.commit().unwrap();
        assert_eq!(fs.read_file("data").unwrap(), b"hello");

        let err = file.commit().unwrap_err();
        assert!(matches!(err, FpIndexError::AlreadyCommitted(_)));
    }

    #[test]
    fn test_atomic_file_replaces_target() {
        let tmp = TempDir::new().unwrap();
        let fs = LocalFileSystem::open(tmp.path()).unwrap();

        for content in [&b"one"[..], &b"two"[..]] {
            let mut file = fs.create_atomic_file("data").unwrap();
            file.write_all(content).unwrap();
            file.commit().unwrap();
        }
        assert_eq!(fs.read_file("data").unwrap(), b"two");
        assert_eq!(fs.list().unwrap(), vec!["data".to_string()]);
    }

    #[test]
    fn test_atomic_file_dropped_uncommitted() {
        let tmp = TempDir::new().unwrap();
        let fs = LocalFileSystem::open(tmp.path()).unwrap();

        {
            let mut file = fs.create_atomic_file("data").unwrap();
            file.write_all(b"partial").unwrap();
        }
        assert!(!fs.exists("data"));
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_create_file_overwrite() {
        let tmp = TempDir::new().unwrap();
        let fs = LocalFileSystem::open(tmp.path()).unwrap();

        let mut file = fs.create_file("a", false).unwrap();
        file.write_all(b"first").unwrap();
        file.sync().unwrap();
        drop(file);

        let err = fs.create_file("a", false).err().unwrap();
        assert!(is_already_exists(&err));

        let mut file = fs.create_file("a", true).unwrap();
        file.write_all(b"2").unwrap();
        file.sync().unwrap();
        drop(file);
        assert_eq!(fs.read_file("a").unwrap(), b"2");
    }

    #[test]
    fn test_rename_remove() {
        let tmp = TempDir::new().unwrap();
        let fs = LocalFileSystem::open(tmp.path()).unwrap();

        let mut file = fs.create_file("a", false).unwrap();
        file.sync().unwrap();
        drop(file);

        fs.rename("a", "b").unwrap();
        assert_eq!(fs.list().unwrap(), vec!["b".to_string()]);

        fs.remove("b").unwrap();
        let err = fs.open_file("b").err().unwrap();
        assert!(is_not_found(&err));
    }
}
