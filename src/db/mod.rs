/*!
The database module contains the primary API for interacting with the key-value store.

The open-and-recover pipeline lives in the [`open`] submodule; this module holds the database
struct itself, the shared state it guards, and the steady-state surface (writes, reads, close)
that the recovery scenarios exercise end to end.
*/

use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::batch::{insert_into, WriteBatch};
use crate::errors::{SquallError, SquallResult};
use crate::file_names::{FileNameHandler, ParsedFileType};
use crate::fs::{FileLock, FileSystem, RandomAccessFile};
use crate::key::Operation;
use crate::memtable::MemTable;
use crate::options::{ColumnFamilyDescriptor, DbOptions, WriteOptions};
use crate::tables::{build_table, read_table_entries, TableFileCreationReason};
use crate::versioning::version_edit::VersionEdit;
use crate::versioning::version_set::VersionSet;

mod open;

#[cfg(test)]
mod db_test;
#[cfg(test)]
mod test_utils;

/// A write-ahead log that is still live, by number and byte size.
#[derive(Clone, Copy, Debug)]
pub(crate) struct LogFileNumberSize {
    pub(crate) number: u64,
    pub(crate) size: u64,
}

impl LogFileNumberSize {
    pub(crate) fn new(number: u64) -> Self {
        Self { number, size: 0 }
    }
}

/**
Database state that requires the database mutex to access.

# Legacy

RocksDB guards the analogous fields with `DBImpl::mutex_`.
*/
pub(crate) struct GuardedDbFields {
    /// The versioned file layout of the database.
    pub(crate) version_set: VersionSet,

    /**
    File numbers reserved by in-flight writers.

    Files with numbers in this set must not be reclaimed by obsolete-file sweeps even though the
    manifest does not reference them yet.
    */
    pub(crate) pending_outputs: HashSet<u64>,

    /// Whether the reserved statistics column family was present in the recovered manifest.
    pub(crate) persistent_stats_cfd_exists: bool,

    /// The exclusive lock on the database directory. Held for the lifetime of the database.
    pub(crate) db_lock: Option<FileLock>,

    /// Set once the open pipeline has fully completed.
    pub(crate) opened_successfully: bool,
}

/**
Write-ahead log state.

This lives behind its own mutex so that, with `two_write_queues`, log appends only contend with
other log appends.

# Legacy

RocksDB guards `logs_` and `alive_log_files_` with `DBImpl::log_write_mutex_` when two write
queues are in use.
*/
pub(crate) struct WalState {
    /// The writer for the live write-ahead log.
    pub(crate) wal: Option<crate::logs::LogWriter>,

    /// The file number of the live write-ahead log.
    pub(crate) logfile_number: u64,

    /// Write-ahead logs that may still hold unflushed data, oldest first.
    pub(crate) alive_log_files: Vec<LogFileNumberSize>,

    /// The cumulative size of the alive logs.
    pub(crate) total_log_size: u64,
}

/// An embedded LSM key-value store.
pub struct DB {
    /// Options for configuring the operation of the database. Sanitized at open.
    options: DbOptions,

    /// A reference to the file system provider in use by the database.
    filesystem_provider: Arc<dyn FileSystem>,

    /// Handler for file names used by the database.
    file_name_handler: Arc<FileNameHandler>,

    /// Directory paths whose metadata is fsynced at go-live.
    directories: Directories,

    /// Fields guarded by the database mutex.
    guarded_fields: Mutex<GuardedDbFields>,

    /// Write-ahead log state guarded by its own mutex.
    wal_state: Mutex<WalState>,

    /**
    Whether the error handler may automatically retry after out-of-space errors.

    Auto-recovery is only sound when the database is stored in a single path.
    */
    auto_recovery_enabled: bool,
}

impl std::fmt::Debug for DB {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DB").finish_non_exhaustive()
    }
}

/// Public methods
impl DB {
    /**
    Open a database with the default column family.

    When `persist_stats_to_disk` is set, the reserved statistics column family is opened
    alongside the default one.
    */
    pub fn open(options: DbOptions) -> SquallResult<DB> {
        let mut column_families = vec![ColumnFamilyDescriptor::new(
            crate::config::DEFAULT_COLUMN_FAMILY_NAME,
            Default::default(),
        )];
        if options.persist_stats_to_disk {
            column_families.push(ColumnFamilyDescriptor::new(
                crate::config::PERSISTENT_STATS_COLUMN_FAMILY_NAME,
                Default::default(),
            ));
        }

        DB::open_with_column_families(options, column_families)
    }

    /// Apply the operations queued in `batch` atomically.
    pub fn write(&self, write_options: WriteOptions, batch: WriteBatch) -> SquallResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut fields_guard = self.guarded_fields.lock();
        self.write_internal(&mut fields_guard, write_options, batch)
    }

    /// Insert a key-value pair into the default column family.
    pub fn put(&self, key: &[u8], value: &[u8]) -> SquallResult<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(WriteOptions::default(), batch)
    }

    /// Remove a key from the default column family.
    pub fn delete(&self, key: &[u8]) -> SquallResult<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(WriteOptions::default(), batch)
    }

    /// Get the most recent value for a key in the default column family.
    pub fn get(&self, key: &[u8]) -> SquallResult<Option<Vec<u8>>> {
        self.get_cf(crate::batch::DEFAULT_COLUMN_FAMILY_ID, key)
    }

    /// Get the most recent value for a key in the specified column family.
    pub fn get_cf(&self, column_family_id: u32, key: &[u8]) -> SquallResult<Option<Vec<u8>>> {
        let fields_guard = self.guarded_fields.lock();
        self.get_for_recovery(&fields_guard, column_family_id, key)
    }

    /// The most recently used sequence number.
    pub fn last_sequence(&self) -> u64 {
        self.guarded_fields.lock().version_set.get_last_sequence()
    }

    /// The database id recorded in the manifest and the IDENTITY file.
    pub fn db_id(&self) -> String {
        self.guarded_fields.lock().version_set.get_db_id().to_string()
    }

    /// The id of the column family with the specified name, if it exists.
    pub fn column_family_id(&self, name: &str) -> Option<u32> {
        self.guarded_fields
            .lock()
            .version_set
            .column_families()
            .get_id_by_name(name)
    }

    /// The number of column families the database is serving.
    pub fn num_column_families(&self) -> usize {
        self.guarded_fields
            .lock()
            .version_set
            .column_families()
            .num_column_families()
    }

    /// The number of table files at the specified level of the default column family.
    pub fn num_files_at_level(&self, level: usize) -> usize {
        self.guarded_fields
            .lock()
            .version_set
            .column_families()
            .default_cf()
            .num_files_at_level(level)
    }

    /**
    Flush in-memory state and close the database.

    Every non-empty memtable is materialized as a level-0 table file, each column family's log
    number is advanced past the live write-ahead log, and the lock on the database directory is
    released. A subsequent open replays nothing.
    */
    pub fn close(self) -> SquallResult<()> {
        log::info!("Closing the database at {}.", &self.options.db_path);
        let mut fields_guard = self.guarded_fields.lock();
        debug_assert!(fields_guard.opened_successfully);
        let next_log_number = self.wal_state.lock().logfile_number + 1;
        fields_guard
            .version_set
            .mark_file_number_used(next_log_number);

        let column_family_ids: Vec<u32> = fields_guard
            .version_set
            .column_families()
            .iter()
            .map(|column_family| column_family.get_id())
            .collect();

        let mut edits: Vec<VersionEdit> = vec![];
        for column_family_id in column_family_ids {
            let mut edit = VersionEdit::for_column_family(column_family_id);
            let memtable = fields_guard
                .version_set
                .column_families()
                .get(column_family_id)
                .unwrap()
                .mem();
            if !memtable.is_empty() {
                self.write_level0_table(
                    &mut fields_guard,
                    column_family_id,
                    &mut edit,
                    TableFileCreationReason::Flush,
                )?;
                let last_sequence = fields_guard.version_set.get_last_sequence();
                fields_guard
                    .version_set
                    .column_families_mut()
                    .get_mut(column_family_id)
                    .unwrap()
                    .create_new_memtable(last_sequence);
            }

            edit.log_number = Some(next_log_number);
            edits.push(edit);
        }

        fields_guard
            .version_set
            .log_and_apply(edits, /* new_descriptor_log */ false)?;

        self.delete_obsolete_files(&mut fields_guard);

        let mut wal_state = self.wal_state.lock();
        wal_state.wal = None;
        drop(wal_state);

        fields_guard.db_lock = None;

        Ok(())
    }
}

/// Crate-only methods
impl DB {
    /**
    Atomically point the `CURRENT` file at the specified manifest.

    The pointer contents are staged in a temp file which is then renamed over `CURRENT`, so
    readers always observe either the old pointer or the new one.
    */
    pub(crate) fn set_current_file(
        filesystem_provider: Arc<dyn FileSystem>,
        file_name_handler: &FileNameHandler,
        manifest_file_number: u64,
    ) -> SquallResult<()> {
        log::info!("Installing manifest file {manifest_file_number} as the CURRENT manifest.");
        let contents = FileNameHandler::manifest_file_contents(manifest_file_number);
        let temp_path = file_name_handler.get_temp_file_path(manifest_file_number);

        let mut temp_file = filesystem_provider.create_file(&temp_path, false)?;
        temp_file.write_all(contents.as_bytes())?;
        temp_file.sync()?;
        drop(temp_file);

        let current_path = file_name_handler.get_current_file_path();
        if let Err(rename_err) = filesystem_provider.rename(&temp_path, &current_path) {
            filesystem_provider.remove_file(&temp_path).ok();
            return Err(rename_err.into());
        }

        Ok(())
    }

    /**
    Append a batch to the live write-ahead log and apply it to the memtables.

    The batch is assigned the next free sequence numbers. Recovery-time replay does not use this
    path; it applies already-sequenced batches directly.
    */
    pub(crate) fn write_internal(
        &self,
        fields_guard: &mut MutexGuard<GuardedDbFields>,
        write_options: WriteOptions,
        mut batch: WriteBatch,
    ) -> SquallResult<()> {
        let starting_sequence = fields_guard.version_set.get_last_sequence() + 1;
        batch.set_sequence_number(starting_sequence);
        let encoded = batch.encode();

        let mut wal_state = self.wal_state.lock();
        let log_number = wal_state.logfile_number;
        let wal = wal_state.wal.as_mut().ok_or_else(|| {
            SquallError::Aborted("The write-ahead log has been closed.".to_string())
        })?;
        wal.append(&encoded)?;
        if write_options.sync {
            wal.sync()?;
        }

        if let Some(live_log) = wal_state.alive_log_files.last_mut() {
            live_log.size += encoded.len() as u64;
        }
        wal_state.total_log_size += encoded.len() as u64;
        drop(wal_state);

        let mut next_sequence = crate::config::MAX_SEQUENCE_NUMBER;
        insert_into(
            &batch,
            fields_guard.version_set.column_families(),
            log_number,
            &mut next_sequence,
        );

        fields_guard
            .version_set
            .set_last_sequence(starting_sequence + batch.count() as u64 - 1);

        Ok(())
    }

    /**
    Read the most recent value for a key, consulting the memtable and then level-0 table files
    newest first.

    This read surface exists for recovery internals (the persistent-stats version probe) and for
    verifying recovered state; the steady-state read path with its caches and filters is a
    separate concern.
    */
    pub(crate) fn get_for_recovery(
        &self,
        fields_guard: &MutexGuard<GuardedDbFields>,
        column_family_id: u32,
        key: &[u8],
    ) -> SquallResult<Option<Vec<u8>>> {
        let column_family = fields_guard
            .version_set
            .column_families()
            .get(column_family_id)
            .ok_or_else(|| {
                SquallError::NotFound(format!("Column family not found: {column_family_id}"))
            })?;

        // Reads go through the installed super-version bundle; before go-live has installed one
        // (recovery internals) the column family's own state is consulted directly
        let (memtable, files): (Arc<crate::memtable::SkipListMemTable>, Vec<_>) =
            match column_family.get_super_version() {
                Some(super_version) => (
                    Arc::clone(&super_version.memtable),
                    super_version.files[0].clone(),
                ),
                None => (column_family.mem(), column_family.get_files(0).to_vec()),
            };

        if let Some(memtable_hit) = memtable.get(key) {
            return Ok(memtable_hit);
        }

        // Level-0 files may overlap; newer files hold newer data and files are numbered in
        // creation order, so scan from the highest file number down
        let mut level0_files: Vec<(u64, u32)> = files
            .iter()
            .map(|file| (file.file_number(), file.path_id()))
            .collect();
        level0_files.sort_unstable_by(|a, b| b.0.cmp(&a.0));

        for (file_number, path_id) in level0_files {
            let data_path = self.data_path(path_id);
            let entries = read_table_entries(
                Arc::clone(&self.filesystem_provider),
                self.file_name_handler.as_ref(),
                &data_path,
                file_number,
            )?;

            let mut most_recent: Option<(u64, Operation, Vec<u8>)> = None;
            for (internal_key, value) in entries {
                if internal_key.get_user_key().as_slice() != key {
                    continue;
                }

                let is_newer = most_recent
                    .as_ref()
                    .map_or(true, |(sequence, _, _)| {
                        internal_key.get_sequence_number() > *sequence
                    });
                if is_newer {
                    most_recent = Some((
                        internal_key.get_sequence_number(),
                        internal_key.get_operation(),
                        value,
                    ));
                }
            }

            match most_recent {
                Some((_, Operation::Delete, _)) => return Ok(None),
                Some((_, Operation::Put, value)) => return Ok(Some(value)),
                None => {}
            }
        }

        Ok(None)
    }

    /**
    Materialize a column family's memtable as a level-0 table file and record the addition on the
    provided edit.

    The database mutex is released for the duration of the table build since it is long-running
    I/O. The output file number is held in the pending-outputs set for that window so concurrent
    obsolete-file sweeps cannot reclaim it.
    */
    pub(crate) fn write_level0_table(
        &self,
        fields_guard: &mut MutexGuard<GuardedDbFields>,
        column_family_id: u32,
        edit: &mut VersionEdit,
        reason: TableFileCreationReason,
    ) -> SquallResult<()> {
        let file_number = fields_guard.version_set.new_file_number();
        fields_guard.pending_outputs.insert(file_number);

        let column_family = fields_guard
            .version_set
            .column_families()
            .get(column_family_id)
            .unwrap();
        let column_family_name = column_family.get_name().to_string();
        let memtable = column_family.mem();

        log::debug!(
            "[{column_family_name}] Level-0 table #{file_number}: started",
        );

        let filesystem_provider = Arc::clone(&self.filesystem_provider);
        let file_name_handler = Arc::clone(&self.file_name_handler);
        let data_path = self.data_path(0);
        let entries = memtable.entries();

        // Release the database mutex during the table build; the pending-outputs reservation
        // keeps the file number safe in the meantime
        let build_result = MutexGuard::unlocked_fair(fields_guard, || {
            build_table(
                filesystem_provider,
                file_name_handler.as_ref(),
                &data_path,
                file_number,
                &entries,
                reason,
            )
        });

        fields_guard.pending_outputs.remove(&file_number);
        let metadata = build_result?;

        log::debug!(
            "[{column_family_name}] Level-0 table #{file_number}: {num_bytes} bytes",
            num_bytes = metadata.get_file_size()
        );

        // A zero-size output means the memtable was effectively empty after filtering; it has
        // already been discarded and must not be added to the manifest
        if metadata.get_file_size() > 0 {
            log::info!(
                "[{column_family_name}] Level-0 table #{file_number} spans sequence numbers \
                {smallest}..={largest}.",
                smallest = metadata.smallest_sequence(),
                largest = metadata.largest_sequence()
            );

            if let Some(sst_file_manager) = &self.options.sst_file_manager {
                sst_file_manager.on_add_file(
                    self.file_name_handler
                        .get_table_file_path(&self.data_path(0), file_number),
                    metadata.get_file_size(),
                );
            }

            edit.added_files.push((0, metadata));
        }

        Ok(())
    }

    /**
    Delete files that are no longer referenced by any live state: table files absent from every
    version, manifests older than the current one, write-ahead logs every column family has been
    flushed past, stale options dumps, and temp files.
    */
    pub(crate) fn delete_obsolete_files(&self, fields_guard: &mut MutexGuard<GuardedDbFields>) {
        let live_files = fields_guard.version_set.get_live_files();
        let pending_outputs = fields_guard.pending_outputs.clone();
        let min_log_number = fields_guard.version_set.min_log_number_to_keep();
        let manifest_file_number = fields_guard.version_set.get_manifest_file_number();
        let current_log_number = self.wal_state.lock().logfile_number;

        let candidate_dirs = self.directories.all_dirs();

        // Stale options dumps: everything but the newest is obsolete
        let mut newest_options_file: u64 = 0;
        for dir in &candidate_dirs {
            let children = match self.filesystem_provider.list_dir(dir) {
                Ok(children) => children,
                Err(_list_err) => continue,
            };
            for child in children {
                if let Ok(ParsedFileType::OptionsFile(number)) =
                    FileNameHandler::get_file_type_from_name(&child)
                {
                    newest_options_file = newest_options_file.max(number);
                }
            }
        }

        for dir in &candidate_dirs {
            let children = match self.filesystem_provider.list_dir(dir) {
                Ok(children) => children,
                Err(_list_err) => continue,
            };

            for child in children {
                let is_obsolete = match FileNameHandler::get_file_type_from_name(&child) {
                    Ok(ParsedFileType::TableFile(number)) => {
                        !live_files.contains(&number) && !pending_outputs.contains(&number)
                    }
                    Ok(ParsedFileType::WriteAheadLog(number)) => {
                        number < min_log_number && number != current_log_number
                    }
                    Ok(ParsedFileType::ManifestFile(number)) => number < manifest_file_number,
                    Ok(ParsedFileType::OptionsFile(number)) => number < newest_options_file,
                    Ok(ParsedFileType::TempFile(_)) => true,
                    _ => false,
                };

                if is_obsolete {
                    log::info!("Deleting obsolete file at {child:?}.");
                    if let Err(remove_err) = self.filesystem_provider.remove_file(&child) {
                        log::warn!(
                            "Failed to delete obsolete file at {child:?}. Error: {remove_err}"
                        );
                    }
                }
            }
        }
    }

    /// The directory that table files with the specified path id are placed in.
    pub(crate) fn data_path(&self, path_id: u32) -> PathBuf {
        self.options
            .db_paths
            .get(path_id as usize)
            .map(|db_path| db_path.path.clone())
            .unwrap_or_else(|| self.file_name_handler.get_db_path())
    }

    /// Whether out-of-space auto-recovery was enabled for this database.
    pub(crate) fn is_auto_recovery_enabled(&self) -> bool {
        self.auto_recovery_enabled
    }

    /// The numbers of the write-ahead logs currently registered as alive, oldest first.
    pub(crate) fn alive_wal_numbers(&self) -> Vec<u64> {
        self.wal_state
            .lock()
            .alive_log_files
            .iter()
            .map(|live_log| live_log.number)
            .collect()
    }
}

/**
The directories the database spans, created at open and fsynced at go-live so that file creations
and renames within them are durable.
*/
pub(crate) struct Directories {
    db_dir: PathBuf,
    wal_dir: Option<PathBuf>,
    data_dirs: Vec<PathBuf>,
}

impl Directories {
    /// Ensure all database directories exist and retain their paths for later syncing.
    pub(crate) fn open(
        filesystem_provider: &Arc<dyn FileSystem>,
        db_path: &str,
        wal_dir: &str,
        data_paths: &[crate::options::DbPath],
    ) -> SquallResult<Self> {
        let db_dir = PathBuf::from(db_path);
        filesystem_provider.create_dir_all(&db_dir)?;

        let wal_dir_path = PathBuf::from(wal_dir);
        let wal_dir = if !wal_dir.is_empty() && wal_dir_path != db_dir {
            filesystem_provider.create_dir_all(&wal_dir_path)?;
            Some(wal_dir_path)
        } else {
            None
        };

        let mut data_dirs: Vec<PathBuf> = vec![];
        for data_path in data_paths {
            if data_path.path != db_dir {
                filesystem_provider.create_dir_all(&data_path.path)?;
                data_dirs.push(data_path.path.clone());
            }
        }

        Ok(Self {
            db_dir,
            wal_dir,
            data_dirs,
        })
    }

    /// Fsync the primary database directory.
    pub(crate) fn fsync_db_dir(&self, filesystem_provider: &Arc<dyn FileSystem>) -> SquallResult<()> {
        filesystem_provider.sync_dir(&self.db_dir)?;

        Ok(())
    }

    /// Every directory the database spans, starting with the primary database directory.
    pub(crate) fn all_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = vec![self.db_dir.clone()];
        if let Some(wal_dir) = &self.wal_dir {
            dirs.push(wal_dir.clone());
        }
        for data_dir in &self.data_dirs {
            if !dirs.contains(data_dir) {
                dirs.push(data_dir.clone());
            }
        }

        dirs
    }
}
