/*!
This module contains file system wrappers for disk-based file systems.
*/

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use super::traits::{
    FileLock, FileSystem, RandomAccessFile, ReadonlyRandomAccessFile, UnlockableFile,
};

impl ReadonlyRandomAccessFile for File {
    #[cfg(target_family = "windows")]
    fn read_from(&self, buf: &mut [u8], offset: usize) -> io::Result<usize> {
        use std::os::windows::prelude::FileExt;

        self.seek_read(buf, offset as u64)
    }

    #[cfg(target_family = "unix")]
    fn read_from(&self, buf: &mut [u8], offset: usize) -> io::Result<usize> {
        use std::os::unix::prelude::FileExt;

        self.read_at(buf, offset as u64)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }
}

impl RandomAccessFile for File {
    fn append(&mut self, buf: &[u8]) -> io::Result<usize> {
        // Seek to the end first
        self.seek(SeekFrom::End(0))?;
        self.write(buf)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

/// File system implementation that delegates I/O to the operating system.
pub struct OsFileSystem {}

/// Public methods.
impl OsFileSystem {
    /// Create an instance of the [`OsFileSystem`].
    pub fn new() -> Self {
        OsFileSystem {}
    }
}

impl Default for OsFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Private methods.
impl OsFileSystem {
    /// Opens a file on disk in readonly mode.
    fn open_disk_file(&self, path: &Path) -> io::Result<File> {
        File::open(path)
    }
}

impl FileSystem for OsFileSystem {
    fn get_name(&self) -> String {
        "OsFileSystem".to_string()
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut entries = fs::read_dir(path)?
            .map(|maybe_entry| maybe_entry.map(|entry| entry.path()))
            .collect::<Result<Vec<_>, io::Error>>()?;
        entries.sort();
        Ok(entries)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn open_file(&self, path: &Path) -> io::Result<Box<dyn ReadonlyRandomAccessFile>> {
        let file = self.open_disk_file(path)?;
        Ok(Box::new(file))
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn create_file(&self, path: &Path, append: bool) -> io::Result<Box<dyn RandomAccessFile>> {
        // O_APPEND is deliberately avoided: log recycling rewinds a reused file and overwrites
        // it in place, which O_APPEND would silently turn back into appends
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(!append)
            .open(path)?;
        if append {
            file.seek(SeekFrom::End(0))?;
        }

        Ok(Box::new(file))
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn get_file_size(&self, path: &Path) -> io::Result<u64> {
        Ok(fs::metadata(path)?.len())
    }

    fn truncate(&self, path: &Path, size: u64) -> io::Result<()> {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(size)
    }

    fn sync_dir(&self, path: &Path) -> io::Result<()> {
        // Windows cannot open directory handles for syncing and rename durability is handled by
        // the OS there
        #[cfg(target_family = "unix")]
        {
            let dir = File::open(path)?;
            dir.sync_all()?;
        }
        #[cfg(not(target_family = "unix"))]
        {
            let _ = path;
        }

        Ok(())
    }

    fn lock_file(&self, path: &Path) -> io::Result<FileLock> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        file.try_lock_exclusive()?;

        Ok(FileLock::new(Box::new(LockedDiskFile { file })))
    }
}

/// A disk file holding an advisory `flock`.
struct LockedDiskFile {
    file: File,
}

impl UnlockableFile for LockedDiskFile {
    fn unlock(&self) -> io::Result<()> {
        self.file.unlock()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn create_file_creates_a_file_we_can_write_to() {
        let test_dir = TempDir::new().unwrap();
        let file_system = OsFileSystem::new();
        let file_path = test_dir.path().join("testing_file");

        let mut file = file_system.create_file(&file_path, false).unwrap();
        assert!(file.write(b"Hello World").is_ok());
        assert!(file.flush().is_ok());

        assert_eq!(file_system.list_dir(test_dir.path()).unwrap().len(), 1);
        assert_eq!(file_system.get_file_size(&file_path).unwrap(), 11);
    }

    #[test]
    fn truncate_shortens_a_file() {
        let test_dir = TempDir::new().unwrap();
        let file_system = OsFileSystem::new();
        let file_path = test_dir.path().join("truncate_me");

        let mut file = file_system.create_file(&file_path, false).unwrap();
        file.write_all(b"Hello World").unwrap();
        file.flush().unwrap();

        file_system.truncate(&file_path, 5).unwrap();
        assert_eq!(file_system.get_file_size(&file_path).unwrap(), 5);
    }

    #[test]
    fn lock_file_excludes_a_second_locker() {
        let test_dir = TempDir::new().unwrap();
        let file_system = OsFileSystem::new();
        let lock_path = test_dir.path().join("LOCK");

        let held_lock = file_system.lock_file(&lock_path).unwrap();
        assert!(file_system.lock_file(&lock_path).is_err());

        drop(held_lock);
        assert!(file_system.lock_file(&lock_path).is_ok());
    }
}
