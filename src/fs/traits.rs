/*!
File system wrappers to enable different implementations of file systems to be used.

The primary purpose of this wrapper is to make the open-and-recover machinery testable with an
in-memory file system and to keep environment capabilities (directory syncing, file locking,
direct I/O support) explicit dependencies rather than ambient globals.
*/

use core::fmt::Debug;
use std::io::{Read, Result, Seek, Write};
use std::path::{Path, PathBuf};

/**
Supertrait that wraps a source of binary content that is readonly and can read from arbitrary
offsets into the content.
*/
pub trait ReadonlyRandomAccessFile: Read + Seek + Send + Sync {
    /// Read a number of bytes starting from a given offset.
    fn read_from(&self, buf: &mut [u8], offset: usize) -> Result<usize>;

    /// Get the length of the file.
    fn len(&self) -> Result<u64>;

    /// Return true if the file is empty. Otherwise, false.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/**
Supertrait that wraps a source of binary content that is readable and writable and can operate on
arbitrary offsets into the content.
*/
pub trait RandomAccessFile: ReadonlyRandomAccessFile + Write {
    /// Append the buffer `buf` to the end of this writer.
    fn append(&mut self, buf: &[u8]) -> Result<usize>;

    /**
    Hint that `bytes` of space will be written so the file system can reserve it up front.

    Providers without preallocation support may treat this as a no-op.
    */
    fn preallocate(&mut self, bytes: u64) -> Result<()> {
        let _ = bytes;
        Ok(())
    }

    /// Flush file contents to durable storage.
    fn sync(&mut self) -> Result<()> {
        self.flush()
    }
}

/// An interface for common file system operations.
pub trait FileSystem: Send + Sync {
    /// Return the name of file system wrapper being used.
    fn get_name(&self) -> String;

    /// Recursively create a directory and all of its parent components if they are missing.
    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// List the contents of the given `path`.
    fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Check whether a file exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Open a file in read-only mode.
    fn open_file(&self, path: &Path) -> Result<Box<dyn ReadonlyRandomAccessFile>>;

    /**
    Rename a file or directory. For files, it will attempt to replace a file if it already exists
    at the destination name.

    This corresponds to the [`std::fs::rename`] function when used for disk-based implementations.
    It has the same caveats for platform-specific behavior.
    */
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /**
    Open a file in read/write mode.

    This function will create the file if it doesn't exist. Setting the `append` parameter to true
    will start appending to an existing file, otherwise an existing file is truncated to length 0.
    */
    fn create_file(&self, path: &Path, append: bool) -> Result<Box<dyn RandomAccessFile>>;

    /// Remove a file from the filesystem.
    fn remove_file(&self, path: &Path) -> Result<()>;

    /// Get the size of the file at the specified path.
    fn get_file_size(&self, path: &Path) -> Result<u64>;

    /// Shorten the file at `path` to at most `size` bytes.
    fn truncate(&self, path: &Path, size: u64) -> Result<()>;

    /**
    Flush directory metadata for `path` to durable storage.

    Metadata operations (file creation, rename) within a directory are only durable once the
    directory itself has been synced on POSIX systems.
    */
    fn sync_dir(&self, path: &Path) -> Result<()>;

    /**
    Whether this provider can serve direct (page-cache-bypassing) reads.

    Open uses this as a compatibility probe when the user requests direct I/O. Providers that
    cannot honor the request must return false so that open fails up front instead of surfacing an
    obscure read error later.
    */
    fn supports_direct_reads(&self) -> bool {
        false
    }

    /**
    Place an exclusive lock on the file at the specified path.

    This lock can only be relied on to be advisory. For POSIX, an `flock()` is used (via the `fs2`
    crate).
    */
    fn lock_file(&self, path: &Path) -> Result<FileLock>;
}

impl Debug for dyn FileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.get_name())
    }
}

/**
An opaque handle for locked files.

The underlying file will be unlocked when the handle is dropped.
*/
pub struct FileLock {
    inner: Box<dyn UnlockableFile>,
}

impl FileLock {
    /// Create a new instance of [`FileLock`].
    pub fn new(file: Box<dyn UnlockableFile>) -> Self {
        Self { inner: file }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(unlock_error) = self.inner.unlock() {
            log::error!(
                "There was an error trying to release the database lock during shutdown. Error: \
                {error}",
                error = unlock_error
            );
        }
    }
}

impl Debug for FileLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FileLock")
    }
}

/// A file that can be unlocked.
pub trait UnlockableFile: Send + Sync {
    /// Unlock the file.
    fn unlock(&self) -> Result<()>;
}
