/*!
This module contains a wrapper for an in-memory file system implementation.
*/

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::traits::{
    FileLock, FileSystem, RandomAccessFile, ReadonlyRandomAccessFile, UnlockableFile,
};

/// File system implementation that is backed by memory.
pub struct InMemoryFileSystem {
    /// The files on the file system.
    files: Arc<RwLock<HashMap<PathBuf, SharedInMemoryFile>>>,

    /// Paths that currently hold an exclusive advisory lock.
    locked_paths: Arc<RwLock<HashSet<PathBuf>>>,
}

impl InMemoryFileSystem {
    /// Create a new instance of the in-memory file system.
    pub fn new() -> Self {
        InMemoryFileSystem {
            files: Arc::new(RwLock::new(HashMap::new())),
            locked_paths: Arc::new(RwLock::new(HashSet::new())),
        }
    }
}

impl Default for InMemoryFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Private methods.
impl InMemoryFileSystem {
    /**
    Open the file at the specified `path`.

    This method returns the internal representation of an in-memory file and is meant for use as a
    utility since the trait implementations return supertypes.
    */
    fn open_mem_file(&self, path: &Path) -> io::Result<SharedInMemoryFile> {
        let files = self.files.read();
        match files.get(path) {
            Some(file) => {
                // Make sure to reset the cursor on a newly opened file. Multiple handles to the
                // same file share a cursor; recovery code never holds more than one handle to a
                // file at a time so this is acceptable for a test-oriented file system.
                file.0.write().cursor = 0;

                Ok(file.clone())
            }
            None => {
                let error_message = format!(
                    "Could not find the file with path {path}",
                    path = path.to_string_lossy()
                );
                Err(io::Error::new(io::ErrorKind::NotFound, error_message))
            }
        }
    }
}

impl FileSystem for InMemoryFileSystem {
    fn get_name(&self) -> String {
        "InMemoryFileSystem".to_string()
    }

    fn create_dir_all(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let files = self.files.read();
        // Iterate the file system map and get all keys that have the specified path as the direct
        // parent. Intermediate directories are synthesized for children nested deeper.
        let children: Vec<PathBuf> = files
            .keys()
            .filter(|key| key.starts_with(path))
            .cloned()
            .collect();

        let mut deduped_children: HashSet<PathBuf> = HashSet::new();
        for child in children {
            let target_path_is_parent = child.parent().map_or(false, |parent| parent == path);

            if target_path_is_parent {
                deduped_children.insert(child);
                continue;
            }

            let mut ancestor = child.as_path();
            while let Some(parent) = ancestor.parent() {
                if parent == path {
                    deduped_children.insert(ancestor.to_owned());
                    break;
                }

                ancestor = parent;
            }
        }

        let mut results: Vec<PathBuf> = deduped_children.into_iter().collect();
        results.sort();

        Ok(results)
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.read().contains_key(path)
    }

    fn open_file(&self, path: &Path) -> io::Result<Box<dyn ReadonlyRandomAccessFile>> {
        Ok(Box::new(self.open_mem_file(path)?))
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut files = self.files.write();
        match files.remove(from) {
            Some(file) => {
                files.insert(to.to_path_buf(), file);
            }
            None => {
                let error_message = format!(
                    "Could not find the file with path {path}",
                    path = from.to_string_lossy()
                );
                return Err(io::Error::new(io::ErrorKind::NotFound, error_message));
            }
        }

        Ok(())
    }

    fn create_file(&self, path: &Path, append: bool) -> io::Result<Box<dyn RandomAccessFile>> {
        let mut files = self.files.write();
        if let Some(file) = files.get_mut(path) {
            if append {
                let mut file_guard = file.0.write();
                file_guard.cursor = file_guard.len();
                return Ok(Box::new(file.clone()));
            }
        }

        let new_file = SharedInMemoryFile::new();
        files.insert(path.to_path_buf(), new_file);
        let file = files.get(path).unwrap();

        Ok(Box::new(file.clone()))
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        let mut files = self.files.write();
        match files.remove(path) {
            Some(_removed_file) => Ok(()),
            None => {
                let error_message = format!(
                    "Could not find the file with path {path}",
                    path = path.to_string_lossy()
                );
                Err(io::Error::new(io::ErrorKind::NotFound, error_message))
            }
        }
    }

    fn get_file_size(&self, path: &Path) -> io::Result<u64> {
        let files = self.files.read();
        match files.get(path) {
            Some(file) => Ok(file.0.read().len()),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!(
                    "Could not find the file with path {path}",
                    path = path.to_string_lossy()
                ),
            )),
        }
    }

    fn truncate(&self, path: &Path, size: u64) -> io::Result<()> {
        let files = self.files.read();
        match files.get(path) {
            Some(file) => {
                let mut file_guard = file.0.write();
                if (size as usize) < file_guard.contents.len() {
                    file_guard.contents.truncate(size as usize);
                    file_guard.cursor = file_guard.cursor.min(size);
                }

                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!(
                    "Could not find the file with path {path}",
                    path = path.to_string_lossy()
                ),
            )),
        }
    }

    fn sync_dir(&self, _path: &Path) -> io::Result<()> {
        // Memory is as durable as this file system gets
        Ok(())
    }

    fn lock_file(&self, path: &Path) -> io::Result<FileLock> {
        {
            let mut files = self.files.write();
            files
                .entry(path.to_path_buf())
                .or_insert_with(SharedInMemoryFile::new);
        }

        let mut locked_paths = self.locked_paths.write();
        if !locked_paths.insert(path.to_path_buf()) {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                format!(
                    "The file at {path} is already locked.",
                    path = path.to_string_lossy()
                ),
            ));
        }

        Ok(FileLock::new(Box::new(InMemoryFileLock {
            locked_paths: Arc::clone(&self.locked_paths),
            path: path.to_path_buf(),
        })))
    }
}

/// Tracks a held lock so that dropping the handle releases the path for other lockers.
struct InMemoryFileLock {
    locked_paths: Arc<RwLock<HashSet<PathBuf>>>,
    path: PathBuf,
}

impl UnlockableFile for InMemoryFileLock {
    fn unlock(&self) -> io::Result<()> {
        self.locked_paths.write().remove(&self.path);

        Ok(())
    }
}

/// Represents a file in the in-memory file system.
struct InMemoryFile {
    /// The contents of the file.
    contents: Vec<u8>,
    /// The current position in the file.
    cursor: u64,
}

impl InMemoryFile {
    /// Create an instance of [`InMemoryFile`].
    fn new() -> Self {
        Self {
            contents: vec![],
            cursor: 0,
        }
    }

    /// Get the size of the file in bytes.
    fn len(&self) -> u64 {
        self.contents.len() as u64
    }
}

/// A handle to an in-memory file. Handles to the same path share the backing contents.
struct SharedInMemoryFile(Arc<RwLock<InMemoryFile>>);

impl SharedInMemoryFile {
    /// Create an instance of [`SharedInMemoryFile`].
    fn new() -> Self {
        SharedInMemoryFile(Arc::new(RwLock::new(InMemoryFile::new())))
    }

    /// Make an `Arc` clone of the file.
    fn clone(&self) -> SharedInMemoryFile {
        SharedInMemoryFile(Arc::clone(&self.0))
    }
}

impl Read for SharedInMemoryFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut file = self.0.write();
        let contents_len = file.contents.len();
        let cursor = file.cursor as usize;
        if cursor >= contents_len {
            return Ok(0);
        }

        let num_bytes_to_read = buf.len().min(contents_len - cursor);
        buf[..num_bytes_to_read].copy_from_slice(&file.contents[cursor..cursor + num_bytes_to_read]);
        file.cursor += num_bytes_to_read as u64;

        Ok(num_bytes_to_read)
    }
}

impl Write for SharedInMemoryFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut file = self.0.write();
        let cursor = file.cursor as usize;

        if cursor < file.contents.len() {
            // Overwrite existing contents from the cursor position
            let overlap = buf.len().min(file.contents.len() - cursor);
            file.contents[cursor..cursor + overlap].copy_from_slice(&buf[..overlap]);
            file.contents.extend_from_slice(&buf[overlap..]);
        } else {
            file.contents.extend_from_slice(buf);
        }

        file.cursor += buf.len() as u64;

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for SharedInMemoryFile {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let mut file = self.0.write();

        let mut offset: u64 = match pos {
            SeekFrom::Start(off) => off,
            SeekFrom::Current(off) => {
                if off < 0 {
                    let backwards = off.unsigned_abs();
                    if backwards > file.cursor {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidInput,
                            "Cannot seek before the start of the file.",
                        ));
                    }

                    file.cursor - backwards
                } else {
                    (off as u64) + file.cursor
                }
            }
            SeekFrom::End(off) => {
                if off > 0 {
                    file.len()
                } else {
                    file.len().saturating_sub(off.unsigned_abs())
                }
            }
        };

        // Truncate `offset` if it is too long. We only allow seeking to the end of the file.
        offset = offset.min(file.len());

        file.cursor = offset;
        Ok(offset)
    }
}

impl ReadonlyRandomAccessFile for SharedInMemoryFile {
    fn read_from(&self, buf: &mut [u8], offset: usize) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let file = self.0.read();

        if offset >= file.contents.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "The provided offset goes beyond the end of the file.",
            ));
        }

        let bytes_to_read = buf.len().min(file.contents.len() - offset);
        buf[..bytes_to_read].copy_from_slice(&file.contents[offset..offset + bytes_to_read]);

        Ok(bytes_to_read)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.0.read().len())
    }
}

impl RandomAccessFile for SharedInMemoryFile {
    fn append(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut file = self.0.write();
        file.contents.extend_from_slice(buf);
        file.cursor = file.contents.len() as u64;

        Ok(buf.len())
    }
}
