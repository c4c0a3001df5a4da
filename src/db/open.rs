/*!
The open-and-recover pipeline.

Opening a database is a strictly sequenced state machine: options are validated and normalized,
directories and the database lock are acquired, the manifest is bootstrapped (for a fresh
database) or replayed, write-ahead logs are discovered and replayed under the configured recovery
mode, recovered memtables are materialized as level-0 table files, the accumulated version edits
are committed in one batch, and finally the database goes live with a fresh write-ahead log and
per-column-family super-versions.
*/

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::batch::{insert_into, WriteBatch, WRITE_BATCH_HEADER_BYTES};
use crate::config::{
    MAX_NUM_LEVELS, MAX_SEQUENCE_NUMBER, PERSISTENT_STATS_COLUMN_FAMILY_NAME,
    STATS_COMPATIBLE_VERSION_KEY, STATS_FORMAT_VERSION_COMPATIBLE, STATS_FORMAT_VERSION_CURRENT,
    STATS_FORMAT_VERSION_KEY,
};
use crate::errors::{DBIOError, LogIOError, SquallError, SquallResult};
use crate::file_names::{FileNameHandler, ParsedFileType};
use crate::fs::{FileSystem, RandomAccessFile};
use crate::logs::{LogReader, LogWriter};
use crate::memtable::MemTable;
use crate::options::{
    validate_options, ColumnFamilyDescriptor, ColumnFamilyOptions, CompactionStyle, DbOptions,
    WalRecoveryMode, WriteOptions,
};
use crate::tables::TableFileCreationReason;
use crate::versioning::version_edit::VersionEdit;
use crate::versioning::version_set::VersionSet;
use crate::wal_filter::WalProcessingOption;

use super::{Directories, GuardedDbFields, LogFileNumberSize, WalState, DB};

/// Public methods
impl DB {
    /**
    Open a database with an explicit set of column families.

    Every column family recorded in the database's manifest must be named here; families named
    here but absent from the manifest are created when `create_missing_column_families` is set
    and rejected otherwise.
    */
    pub fn open_with_column_families(
        user_options: DbOptions,
        column_families: Vec<ColumnFamilyDescriptor>,
    ) -> SquallResult<DB> {
        // Reject incompatible combinations before any disk mutation
        validate_options(&user_options, &column_families)?;
        let options = user_options.sanitize()?;
        let filesystem_provider = options.filesystem_provider();

        log::info!(
            "Opening the database at {db_path} with {num_column_families} column families.",
            db_path = &options.db_path,
            num_column_families = column_families.len()
        );

        let max_write_buffer_size = column_families
            .iter()
            .map(|descriptor| descriptor.options.write_buffer_size)
            .max()
            .unwrap_or_else(|| ColumnFamilyOptions::default().write_buffer_size);

        let file_name_handler = Arc::new(FileNameHandler::new(
            options.db_path.clone(),
            options.wal_dir.clone(),
        ));

        let directories = Directories::open(
            &filesystem_provider,
            &options.db_path,
            &options.wal_dir,
            &options.db_paths,
        )?;

        // Recovery from out-of-space errors can only be handled automatically when the database
        // is stored in a single path
        let auto_recovery_enabled = options.db_paths.len() <= 1;

        let version_set = VersionSet::new(
            options.clone(),
            Arc::clone(&file_name_handler),
            &column_families,
        );
        let db = DB {
            options,
            filesystem_provider,
            file_name_handler,
            directories,
            guarded_fields: Mutex::new(GuardedDbFields {
                version_set,
                pending_outputs: HashSet::new(),
                persistent_stats_cfd_exists: false,
                db_lock: None,
                opened_successfully: false,
            }),
            wal_state: Mutex::new(WalState {
                wal: None,
                logfile_number: 0,
                alive_log_files: vec![],
                total_log_size: 0,
            }),
            auto_recovery_enabled,
        };

        let mut fields_guard = db.guarded_fields.lock();
        let recovered_seq = match db.recover(&mut fields_guard, &column_families, false) {
            Ok(recovered_seq) => recovered_seq,
            Err(recover_err) => {
                drop(fields_guard);
                return Err(recover_err);
            }
        };

        let go_live_result = db.go_live(
            &mut fields_guard,
            &column_families,
            recovered_seq,
            max_write_buffer_size,
        );
        match go_live_result {
            Ok(()) => {
                fields_guard.opened_successfully = true;
                db.maybe_schedule_flush_or_compaction(&fields_guard);
                drop(fields_guard);
                db.notify_sst_file_manager();

                Ok(db)
            }
            Err(go_live_err) => {
                // Tear down the new write-ahead log if one was created
                let mut wal_state = db.wal_state.lock();
                if wal_state.wal.take().is_some() {
                    let wal_path = db
                        .file_name_handler
                        .get_wal_file_path(wal_state.logfile_number);
                    db.filesystem_provider.remove_file(&wal_path).ok();
                }
                drop(wal_state);
                drop(fields_guard);

                Err(go_live_err)
            }
        }
    }
}

/// Crate-only methods: the recovery pipeline
impl DB {
    /**
    Bring the durable state of the database into memory.

    Handles `create_if_missing` and `error_if_exists`, acquires the database lock, replays the
    manifest, reconciles the IDENTITY file, and replays the write-ahead logs.

    Returns the sequence number the go-live handshake should anchor in the new write-ahead log,
    or [`MAX_SEQUENCE_NUMBER`] when the database has no recovered write history.
    */
    pub(crate) fn recover(
        &self,
        fields_guard: &mut MutexGuard<GuardedDbFields>,
        column_families: &[ColumnFamilyDescriptor],
        read_only: bool,
    ) -> SquallResult<u64> {
        let mut is_new_db = false;
        let current_file_path = self.file_name_handler.get_current_file_path();

        if !read_only {
            debug_assert!(fields_guard.db_lock.is_none());
            let lock_file_path = self.file_name_handler.get_lock_file_path();
            let db_lock = self
                .filesystem_provider
                .lock_file(&lock_file_path)
                .map_err(|lock_err| {
                    if lock_err.kind() == std::io::ErrorKind::WouldBlock {
                        SquallError::Busy(format!(
                            "The database at {db_path} is locked by another holder.",
                            db_path = &self.options.db_path
                        ))
                    } else {
                        lock_err.into()
                    }
                })?;
            fields_guard.db_lock = Some(db_lock);

            if !self.filesystem_provider.exists(&current_file_path) {
                if !self.options.create_if_missing {
                    return Err(SquallError::InvalidArgument(format!(
                        "{current_file_path:?} does not exist (create_if_missing is false)"
                    )));
                }

                self.new_db()?;
                is_new_db = true;
            } else if self.options.error_if_exists {
                return Err(SquallError::InvalidArgument(format!(
                    "{db_path} exists (error_if_exists is true)",
                    db_path = &self.options.db_path
                )));
            }

            // Verify compatibility of the configured I/O flags and the file system
            if (self.options.use_direct_reads
                || self.options.use_direct_io_for_flush_and_compaction)
                && !self.filesystem_provider.supports_direct_reads()
            {
                return Err(SquallError::InvalidArgument(
                    "Direct I/O is not supported by the specified DB.".to_string(),
                ));
            }
            if let Err(probe_err) = self.filesystem_provider.open_file(&current_file_path) {
                return Err(SquallError::InvalidArgument(format!(
                    "Found options incompatible with filesystem: {probe_err}"
                )));
            }
        }

        fields_guard.version_set.recover(column_families)?;
        self.reconcile_identity(fields_guard)?;

        if self.options.persist_stats_to_disk {
            self.init_persist_stats_column_family(fields_guard)?;
        }

        // Recover from all write-ahead logs newer than the ones named in the manifest (newer
        // logs may have been added by the previous incarnation without being registered there)
        let wal_dir = self.file_name_handler.get_wal_dir();
        let wal_dir_children = self
            .filesystem_provider
            .list_dir(&wal_dir)
            .map_err(|list_err| {
                if list_err.kind() == std::io::ErrorKind::NotFound {
                    SquallError::InvalidArgument(format!("wal_dir not found: {wal_dir:?}"))
                } else {
                    list_err.into()
                }
            })?;

        let mut log_numbers: Vec<u64> = vec![];
        for child in wal_dir_children {
            if let Ok(ParsedFileType::WriteAheadLog(log_number)) =
                FileNameHandler::get_file_type_from_name(&child)
            {
                if is_new_db {
                    return Err(SquallError::Corruption(format!(
                        "While creating a new Db, wal_dir contains existing log file: {child:?}"
                    )));
                }

                log_numbers.push(log_number);
            }
        }

        if !log_numbers.is_empty() {
            if self.options.error_if_log_file_exist {
                return Err(SquallError::Corruption(
                    "The db was opened with the error_if_log_file_exist flag but a log file \
                    already exists."
                        .to_string(),
                ));
            }

            if self.options.error_if_data_exists_in_logs {
                for &log_number in &log_numbers {
                    let log_file_path = self.file_name_handler.get_wal_file_path(log_number);
                    let num_bytes = self.filesystem_provider.get_file_size(&log_file_path)?;
                    if num_bytes > 0 {
                        return Err(SquallError::Corruption(
                            "error_if_data_exists_in_logs is set but there are data in log files."
                                .to_string(),
                        ));
                    }
                }
            }
        }

        if !log_numbers.is_empty() {
            // Recover in the order in which the logs were generated
            log_numbers.sort_unstable();
            let mut next_sequence = MAX_SEQUENCE_NUMBER;
            let replay_result =
                self.recover_log_files(fields_guard, &log_numbers, &mut next_sequence, read_only);
            if let Err(replay_err) = replay_result {
                // Clear the memtables so a retry does not see half-replayed state
                for column_family in fields_guard.version_set.column_families_mut().iter_mut() {
                    column_family.create_new_memtable(MAX_SEQUENCE_NUMBER);
                }

                return Err(replay_err);
            }
        }

        // Any recovered write history anchors a dummy record in the new write-ahead log so the
        // next open can tell log truncation from a cleanly short log
        let last_sequence = fields_guard.version_set.get_last_sequence();
        let recovered_seq = if last_sequence > 0 {
            last_sequence
        } else {
            MAX_SEQUENCE_NUMBER
        };

        Ok(recovered_seq)
    }

    /**
    Bootstrap a fresh database.

    Writes the IDENTITY file, creates manifest #1 holding a single genesis edit, and atomically
    publishes the `CURRENT` pointer. A half-written manifest is deleted if any step fails.
    */
    pub(crate) fn new_db(&self) -> SquallResult<()> {
        log::info!(
            "Creating a new database at {db_path}.",
            db_path = &self.options.db_path
        );

        let db_id = Uuid::new_v4().to_string();
        DB::write_identity_file(
            &self.filesystem_provider,
            self.file_name_handler.as_ref(),
            &db_id,
        )?;

        let mut genesis_edit = VersionEdit::default();
        genesis_edit.log_number = Some(0);
        genesis_edit.next_file_number = Some(2);
        genesis_edit.last_sequence = Some(0);
        if self.options.write_dbid_to_manifest {
            // The id is read back from the IDENTITY file rather than reusing the local value so
            // that the manifest always reflects what landed on disk
            let written_db_id = DB::read_identity_file(
                &self.filesystem_provider,
                self.file_name_handler.as_ref(),
            )?;
            genesis_edit.db_id = Some(written_db_id);
        }

        log::info!("Creating manifest 1.");
        let manifest_file_path = self.file_name_handler.get_manifest_file_path(1);
        let write_result: SquallResult<()> = (|| {
            let mut manifest_file = LogWriter::new(
                Arc::clone(&self.filesystem_provider),
                &manifest_file_path,
                /* is_appending */ false,
            )?;
            manifest_file.preallocate(self.options.manifest_preallocation_size)?;
            manifest_file.append(&Vec::<u8>::from(&genesis_edit))?;
            manifest_file.sync()?;

            DB::set_current_file(
                Arc::clone(&self.filesystem_provider),
                self.file_name_handler.as_ref(),
                1,
            )
        })();

        if write_result.is_err() {
            self.filesystem_provider
                .remove_file(&manifest_file_path)
                .ok();
        }

        write_result
    }

    /**
    Reconcile the IDENTITY file with the database id surfaced by the manifest.

    On disagreement the manifest wins and IDENTITY is rewritten. A manifest without an id adopts
    the IDENTITY file's id (creating the file if necessary) and, when `write_dbid_to_manifest` is
    set, persists it through one manifest edit.
    */
    fn reconcile_identity(
        &self,
        fields_guard: &mut MutexGuard<GuardedDbFields>,
    ) -> SquallResult<()> {
        let manifest_db_id = fields_guard.version_set.get_db_id().to_string();
        if !manifest_db_id.is_empty() {
            DB::write_identity_file(
                &self.filesystem_provider,
                self.file_name_handler.as_ref(),
                &manifest_db_id,
            )?;

            return Ok(());
        }

        // Typically the IDENTITY file is created during bootstrap; if it has gone missing since
        // then, the id is regenerated here
        let identity_file_path = self.file_name_handler.get_identity_file_path();
        if !self.filesystem_provider.exists(&identity_file_path) {
            DB::write_identity_file(
                &self.filesystem_provider,
                self.file_name_handler.as_ref(),
                &Uuid::new_v4().to_string(),
            )?;
        }

        let identity_db_id =
            DB::read_identity_file(&self.filesystem_provider, self.file_name_handler.as_ref())?;
        fields_guard.version_set.set_db_id(identity_db_id.clone());

        if self.options.write_dbid_to_manifest {
            let mut edit = VersionEdit::default();
            edit.db_id = Some(identity_db_id);
            fields_guard
                .version_set
                .log_and_apply(vec![edit], /* new_descriptor_log */ false)?;
        }

        Ok(())
    }

    /**
    Replay the discovered write-ahead logs in ascending number order.

    This is the heart of recovery: every surviving committed batch is re-applied to the
    column-family memtables, over-budget memtables are flushed incrementally, and the configured
    [`WalRecoveryMode`] decides what corrupt or truncated records mean.

    `log_numbers` must be sorted in ascending order.
    */
    pub(crate) fn recover_log_files(
        &self,
        fields_guard: &mut MutexGuard<GuardedDbFields>,
        log_numbers: &[u64],
        next_sequence: &mut u64,
        read_only: bool,
    ) -> SquallResult<()> {
        let wal_recovery_mode = self.options.wal_recovery_mode;

        // One pending edit per column family; a single manifest commit drains them at the end
        let mut version_edits: BTreeMap<u32, VersionEdit> = BTreeMap::new();
        for column_family in fields_guard.version_set.column_families().iter() {
            version_edits.insert(
                column_family.get_id(),
                VersionEdit::for_column_family(column_family.get_id()),
            );
        }

        if let Some(wal_filter) = &self.options.wal_filter {
            let mut cf_log_numbers: HashMap<u32, u64> = HashMap::new();
            let mut cf_name_to_id: HashMap<String, u32> = HashMap::new();
            for column_family in fields_guard.version_set.column_families().iter() {
                cf_log_numbers.insert(column_family.get_id(), column_family.get_log_number());
                cf_name_to_id.insert(
                    column_family.get_name().to_string(),
                    column_family.get_id(),
                );
            }

            wal_filter.column_family_log_number_map(&cf_log_numbers, &cf_name_to_id);
        }

        let mut stop_replay_by_wal_filter = false;
        let mut stop_replay_for_corruption = false;
        let mut flushed = false;
        let mut corrupted_log_number: u64 = MAX_SEQUENCE_NUMBER;
        let min_log_number = fields_guard.version_set.min_log_number_to_keep();

        for &log_number in log_numbers {
            if log_number < min_log_number {
                log::info!(
                    "Skipping log #{log_number} since it is older than the minimum log to keep \
                    #{min_log_number}."
                );
                // The counter must still never hand this number out again
                fields_guard.version_set.mark_file_number_used(log_number);
                continue;
            }

            // The previous incarnation may not have written any manifest records after
            // allocating this log number, so update the allocation counter manually
            fields_guard.version_set.mark_file_number_used(log_number);

            let log_file_path = self.file_name_handler.get_wal_file_path(log_number);
            if stop_replay_by_wal_filter {
                self.log_file_dropped(&log_file_path);
                continue;
            }

            log::info!("Recovering log #{log_number} with mode {wal_recovery_mode:?}.");
            let mut reader = match LogReader::new(
                Arc::clone(&self.filesystem_provider),
                &log_file_path,
            ) {
                Ok(reader) => reader,
                Err(open_err) => {
                    if self.options.paranoid_checks {
                        return Err(open_err.into());
                    }

                    // Failing on one log file is tolerable; try the next one
                    log::warn!(
                        "(ignoring error) Failed to open log #{log_number} for replay. Error: \
                        {open_err}"
                    );
                    continue;
                }
            };

            let mut file_status: SquallResult<()> = Ok(());
            loop {
                if stop_replay_by_wal_filter {
                    break;
                }

                let record = match reader.read_record() {
                    Ok(Some(record)) => record,
                    Ok(None) => break,
                    Err(LogIOError::Truncation(truncation_msg)) => {
                        match wal_recovery_mode {
                            WalRecoveryMode::AbsoluteConsistency => {
                                file_status = Err(SquallError::Corruption(truncation_msg));
                            }
                            WalRecoveryMode::PointInTimeRecovery => {
                                /*
                                A torn tail ends this log. Replay may still resume in the next
                                log: if its first record carries exactly the next expected
                                sequence number, the stream is contiguous and nothing was lost.
                                */
                                stop_replay_for_corruption = true;
                                corrupted_log_number = log_number;
                                log::warn!(
                                    "Log #{log_number} ends in a torn record; point-in-time \
                                    recovery stops here unless the next log continues the \
                                    sequence stream. {truncation_msg}"
                                );
                            }
                            _ => {
                                log::warn!(
                                    "Log #{log_number} ends in a torn record; accepting the \
                                    records read so far. {truncation_msg}"
                                );
                            }
                        }

                        break;
                    }
                    Err(read_err) => {
                        // Checksum or framing corruption, or a low-level read failure
                        if wal_recovery_mode == WalRecoveryMode::SkipAnyCorruptedRecords {
                            log::warn!(
                                "(ignoring error) Dropping a corrupt record from log \
                                #{log_number}. Error: {read_err}"
                            );
                            continue;
                        }

                        file_status = Err(read_err.into());
                        break;
                    }
                };

                if record.len() < WRITE_BATCH_HEADER_BYTES {
                    if self.report_record_corruption(
                        &mut file_status,
                        log_number,
                        &SquallError::Corruption("log record too small".to_string()),
                    ) {
                        continue;
                    }
                    break;
                }

                let mut batch = match WriteBatch::decode(&record) {
                    Ok(batch) => batch,
                    Err(decode_err) => {
                        if self.report_record_corruption(&mut file_status, log_number, &decode_err)
                        {
                            continue;
                        }
                        break;
                    }
                };
                let sequence = batch.get_sequence_number();

                if wal_recovery_mode == WalRecoveryMode::PointInTimeRecovery {
                    /*
                    If the sequence stream is contiguous across the earlier corruption, keep
                    rolling forward. This can happen after a previous open wrote to a database
                    that had recovered across a torn record.
                    */
                    if sequence == *next_sequence {
                        stop_replay_for_corruption = false;
                    }

                    if stop_replay_for_corruption {
                        self.log_file_dropped(&log_file_path);
                        break;
                    }
                }

                if let Some(wal_filter) = &self.options.wal_filter {
                    let decision = wal_filter.log_record_found(
                        log_number,
                        &log_file_path.to_string_lossy(),
                        &batch,
                    );

                    match decision.option {
                        WalProcessingOption::ContinueProcessing => {}
                        WalProcessingOption::IgnoreCurrentRecord => continue,
                        WalProcessingOption::StopReplay => {
                            stop_replay_by_wal_filter = true;
                            continue;
                        }
                        WalProcessingOption::CorruptedRecord => {
                            let filter_corruption = SquallError::Corruption(format!(
                                "Corruption reported by Wal Filter {filter_name}",
                                filter_name = wal_filter.name()
                            ));
                            if self.options.paranoid_checks {
                                if self.report_record_corruption(
                                    &mut file_status,
                                    log_number,
                                    &filter_corruption,
                                ) {
                                    continue;
                                }
                                break;
                            }

                            // Without paranoid checks the record is still processed
                            log::warn!("(ignoring error) {filter_corruption}");
                        }
                    }

                    if let Some(replacement_batch) = decision.new_batch {
                        // The replacement must stay within the original record's count so that
                        // sequence accounting stays intact
                        if replacement_batch.count() > batch.count() {
                            log::error!(
                                "Recovering log #{log_number} mode {wal_recovery_mode:?}: log \
                                filter {filter_name} returned more records \
                                ({replacement_count}) than original ({original_count}), which \
                                is not allowed. Aborting recovery.",
                                filter_name = wal_filter.name(),
                                replacement_count = replacement_batch.count(),
                                original_count = batch.count(),
                            );

                            return Err(SquallError::NotSupported(format!(
                                "More than original # of records returned by Wal Filter \
                                {filter_name}",
                                filter_name = wal_filter.name()
                            )));
                        }

                        // The replacement carries the original record's starting sequence number
                        // regardless of what the filter set
                        let mut replacement_batch = replacement_batch;
                        replacement_batch.set_sequence_number(sequence);
                        batch = replacement_batch;
                    }
                }

                /*
                Operations referencing a column family that no longer exists are silently
                skipped; the family may have been dropped after the batch was logged. Likewise,
                families whose log number shows they were already flushed past this log ignore
                the write.
                */
                let has_valid_writes = insert_into(
                    &batch,
                    fields_guard.version_set.column_families(),
                    log_number,
                    next_sequence,
                );

                if has_valid_writes && !read_only {
                    // Flush any over-budget memtable now; recovery is single-threaded so this is
                    // the flush scheduler of the open path
                    let over_budget: Vec<u32> = fields_guard
                        .version_set
                        .column_families()
                        .iter()
                        .filter(|column_family| column_family.should_flush())
                        .map(|column_family| column_family.get_id())
                        .collect();

                    for column_family_id in over_budget {
                        debug_assert!(
                            fields_guard
                                .version_set
                                .column_families()
                                .get(column_family_id)
                                .unwrap()
                                .get_log_number()
                                <= log_number
                        );

                        let edit = version_edits.get_mut(&column_family_id).unwrap();
                        // Surface errors immediately so conditions like a full file system make
                        // the open fail
                        self.write_level0_table(
                            fields_guard,
                            column_family_id,
                            edit,
                            TableFileCreationReason::Recovery,
                        )?;
                        flushed = true;

                        let rotate_at = *next_sequence;
                        fields_guard
                            .version_set
                            .column_families_mut()
                            .get_mut(column_family_id)
                            .unwrap()
                            .create_new_memtable(rotate_at);
                    }
                }
            }

            if let Err(file_err) = file_status {
                if file_err.is_not_supported() {
                    // NotSupported is never downgraded to corruption; it signals a write-ahead
                    // log produced by an incompatible version of the code
                    return Err(file_err);
                }

                match wal_recovery_mode {
                    WalRecoveryMode::SkipAnyCorruptedRecords => {
                        log::warn!(
                            "(ignoring error) Errors in log #{log_number} were skipped. Last \
                            error: {file_err}"
                        );
                    }
                    WalRecoveryMode::PointInTimeRecovery => {
                        stop_replay_for_corruption = true;
                        corrupted_log_number = log_number;
                        log::info!(
                            "Point in time recovered to log #{log_number} seq \
                            #{next_sequence_number}.",
                            next_sequence_number = *next_sequence
                        );
                    }
                    WalRecoveryMode::TolerateCorruptedTailRecords
                    | WalRecoveryMode::AbsoluteConsistency => {
                        return Err(file_err);
                    }
                }
            }

            if *next_sequence != MAX_SEQUENCE_NUMBER {
                let last_sequence = *next_sequence - 1;
                if fields_guard.version_set.get_last_sequence() <= last_sequence {
                    fields_guard.version_set.set_last_sequence(last_sequence);
                }
            }
        }

        /*
        Compare the corrupted log number to every column family's log number. If any column
        family was flushed past the corruption point, its table files contain data the replayed
        prefix does not, and no consistent state can be reconstructed.
        */
        if stop_replay_for_corruption
            && matches!(
                wal_recovery_mode,
                WalRecoveryMode::PointInTimeRecovery
                    | WalRecoveryMode::TolerateCorruptedTailRecords
            )
        {
            for column_family in fields_guard.version_set.column_families().iter() {
                if column_family.get_log_number() > corrupted_log_number {
                    log::error!(
                        "Column family inconsistency: table file contains data beyond the point \
                        of corruption."
                    );
                    return Err(SquallError::Corruption("SST file is ahead of WALs".to_string()));
                }
            }
        }

        // True if any write-ahead log still holds data that only lives in memory
        let mut data_seen = false;
        if !read_only {
            let max_log_number = *log_numbers.last().unwrap();
            let column_family_ids: Vec<u32> = fields_guard
                .version_set
                .column_families()
                .iter()
                .map(|column_family| column_family.get_id())
                .collect();

            for column_family_id in column_family_ids {
                let edit = version_edits.get_mut(&column_family_id).unwrap();
                let (cf_log_number, memtable_was_empty) = {
                    let column_family = fields_guard
                        .version_set
                        .column_families()
                        .get(column_family_id)
                        .unwrap();
                    (
                        column_family.get_log_number(),
                        column_family.mem().is_empty(),
                    )
                };

                if cf_log_number > max_log_number {
                    /*
                    This column family was already flushed past all the replayed logs. Its
                    memtable must be empty because updates were filtered by log number during
                    insertion, and its pending edit must carry no files.
                    */
                    debug_assert!(memtable_was_empty);
                    debug_assert_eq!(edit.num_entries(), 0);
                    continue;
                }

                if !memtable_was_empty {
                    /*
                    Flush the final memtable. If an incremental flush already happened in the
                    middle of replay, the tail must be flushed too or the manifest would need to
                    record where replay last flushed, which complicates the bookkeeping.
                    */
                    if flushed || !self.options.avoid_flush_during_recovery {
                        self.write_level0_table(
                            fields_guard,
                            column_family_id,
                            edit,
                            TableFileCreationReason::Recovery,
                        )?;
                        flushed = true;

                        let last_sequence = fields_guard.version_set.get_last_sequence();
                        fields_guard
                            .version_set
                            .column_families_mut()
                            .get_mut(column_family_id)
                            .unwrap()
                            .create_new_memtable(last_sequence);
                    }

                    data_seen = true;
                }

                /*
                Recording `max(log_numbers) + 1` as the column family's log number makes every
                replayed log obsolete on the next boot. That is only sound once nothing in
                memory depends on them.
                */
                if flushed || memtable_was_empty {
                    edit.log_number = Some(max_log_number + 1);
                }
            }

            // The next log number must be marked used even though no file carries it yet; the
            // file number counter must stay strictly greater than any log number
            fields_guard
                .version_set
                .mark_file_number_used(max_log_number + 1);

            // One manifest commit carries all the accumulated edits and rotates the descriptor
            let edits: Vec<VersionEdit> = version_edits.into_values().collect();
            fields_guard
                .version_set
                .log_and_apply(edits, /* new_descriptor_log */ true)?;
        }

        if data_seen && !flushed {
            self.restore_alive_log_files(log_numbers)?;
        }

        Ok(())
    }

    /**
    Register the replayed write-ahead logs as alive.

    Used when recovery kept all replayed data in memory: the logs still hold the only durable
    copy and must survive obsolete-file sweeps until their column families flush.
    */
    pub(crate) fn restore_alive_log_files(&self, log_numbers: &[u64]) -> SquallResult<()> {
        if log_numbers.is_empty() {
            return Ok(());
        }

        debug_assert!(self.options.avoid_flush_during_recovery);

        let mut wal_state = self.wal_state.lock();
        wal_state.total_log_size = 0;
        for &log_number in log_numbers {
            let log_file_path = self.file_name_handler.get_wal_file_path(log_number);
            let size = self.filesystem_provider.get_file_size(&log_file_path)?;
            wal_state.total_log_size += size;
            wal_state
                .alive_log_files
                .push(LogFileNumberSize { number: log_number, size });

            /*
            Space is preallocated for logs, but after a crash and restart the preallocated
            space is no longer needed. It is likely only the last log has such slack, so only
            the last log is truncated.
            */
            if log_number == *log_numbers.last().unwrap() {
                if let Err(truncate_err) =
                    self.filesystem_provider.truncate(&log_file_path, size)
                {
                    // Not a critical error if the truncate fails
                    log::warn!("Failed to truncate log #{log_number}: {truncate_err}");
                }
            }
        }

        Ok(())
    }

    /**
    Create a write-ahead log file.

    With `recycle_log_number` set, the named old log is renamed into place and overwritten from
    the start instead of creating a fresh file.
    */
    pub(crate) fn create_wal(
        &self,
        new_log_number: u64,
        recycle_log_number: u64,
        preallocate_bytes: u64,
    ) -> SquallResult<LogWriter> {
        let log_file_path = self.file_name_handler.get_wal_file_path(new_log_number);
        let recycling = recycle_log_number > 0;

        if recycling {
            log::info!("Reusing log #{recycle_log_number} from the recycle list.");
            let old_log_file_path = self.file_name_handler.get_wal_file_path(recycle_log_number);
            self.filesystem_provider
                .rename(&old_log_file_path, &log_file_path)?;
        }

        let mut wal = LogWriter::for_wal(
            Arc::clone(&self.filesystem_provider),
            &log_file_path,
            /* recycle_mode */ self.options.recycle_log_file_num > 0 && recycling,
            self.options.manual_wal_flush,
        )?;
        if wal.is_recycling() {
            log::debug!("Log #{new_log_number} overwrites a recycled file in place.");
        }
        wal.preallocate(preallocate_bytes)?;

        Ok(wal)
    }

    /**
    The go-live handshake: create the first post-recovery write-ahead log, bind or create the
    requested column families, install super-versions, clean up obsolete files, anchor the
    recovered sequence, reconcile persistent stats, and persist the options dump.
    */
    fn go_live(
        &self,
        fields_guard: &mut MutexGuard<GuardedDbFields>,
        column_families: &[ColumnFamilyDescriptor],
        recovered_seq: u64,
        max_write_buffer_size: usize,
    ) -> SquallResult<()> {
        let new_log_number = fields_guard.version_set.new_file_number();
        let preallocate_bytes = DB::get_wal_preallocate_block_size(max_write_buffer_size);
        let new_log = self.create_wal(new_log_number, 0, preallocate_bytes)?;
        {
            let mut wal_state = self.wal_state.lock();
            wal_state.logfile_number = new_log_number;
            wal_state.wal = Some(new_log);
        }

        // Bind requested column families, creating the missing ones when allowed
        for descriptor in column_families {
            if fields_guard
                .version_set
                .column_families()
                .get_by_name(&descriptor.name)
                .is_some()
            {
                continue;
            }

            if !self.options.create_missing_column_families {
                return Err(SquallError::InvalidArgument(format!(
                    "Column family not found: {name}",
                    name = &descriptor.name
                )));
            }

            self.create_column_family(fields_guard, &descriptor.name, descriptor.options.clone())?;
        }

        for column_family in fields_guard.version_set.column_families_mut().iter_mut() {
            column_family.install_super_version();
        }

        {
            let mut wal_state = self.wal_state.lock();
            let logfile_number = wal_state.logfile_number;
            wal_state
                .alive_log_files
                .push(LogFileNumberSize::new(logfile_number));
        }

        self.delete_obsolete_files(fields_guard);
        self.directories.fsync_db_dir(&self.filesystem_provider)?;

        if self.is_auto_recovery_enabled() {
            log::debug!("Automatic retry of out-of-space errors is enabled.");
        }

        /*
        Write a dummy record carrying the recovered sequence number to the new log. The next
        open's point-in-time detection sees the first record of this log at the expected
        sequence and can tell a corrupted-but-recovered history from a record that went
        missing across the open boundary.
        */
        if recovered_seq != MAX_SEQUENCE_NUMBER {
            let mut empty_batch = WriteBatch::new();
            empty_batch.set_sequence_number(recovered_seq);
            let encoded = empty_batch.encode();

            let mut wal_state = self.wal_state.lock();
            let wal = wal_state.wal.as_mut().unwrap();
            wal.append(&encoded)?;
            wal.sync()?;
            if let Some(live_log) = wal_state.alive_log_files.last_mut() {
                live_log.size += encoded.len() as u64;
            }
            wal_state.total_log_size += encoded.len() as u64;

            log::info!(
                "Anchored recovered sequence {recovered_seq} in the new write-ahead log."
            );
        }

        if self.options.persist_stats_to_disk {
            self.persistent_stats_process_format_version(fields_guard)?;
        }

        // FIFO compaction deletes whole files in insertion order, which is only coherent when
        // every file lives at level 0
        for column_family in fields_guard.version_set.column_families().iter() {
            if column_family.get_options().compaction_style == CompactionStyle::Fifo {
                for level in 1..MAX_NUM_LEVELS {
                    if column_family.num_files_at_level(level) > 0 {
                        return Err(SquallError::InvalidArgument(
                            "Not all files are at level 0. Cannot open with FIFO compaction \
                            style."
                                .to_string(),
                        ));
                    }
                }
            }
        }

        if let Err(persist_err) = self.persist_options_file(fields_guard) {
            // A database that cannot persist its options dump is demoted to a failed open
            return Err(SquallError::IO(DBIOError::new(
                std::io::ErrorKind::Other,
                format!("Unable to persist Options file: {persist_err}"),
            )));
        }

        Ok(())
    }

    /// Create a column family, persist its creation to the manifest, and install its first
    /// super-version.
    pub(crate) fn create_column_family(
        &self,
        fields_guard: &mut MutexGuard<GuardedDbFields>,
        name: &str,
        cf_options: ColumnFamilyOptions,
    ) -> SquallResult<u32> {
        log::info!("Creating column family {name}.");
        let column_family_id = fields_guard
            .version_set
            .column_families_mut()
            .create_column_family(name, cf_options)?;

        let logfile_number = self.wal_state.lock().logfile_number;
        let mut edit = VersionEdit::for_column_family(column_family_id);
        edit.column_family_name = Some(name.to_string());
        edit.is_column_family_add = true;
        // A fresh column family has no data in any log below the live one
        edit.log_number = Some(logfile_number);
        fields_guard
            .version_set
            .log_and_apply(vec![edit], /* new_descriptor_log */ false)?;

        fields_guard
            .version_set
            .column_families_mut()
            .get_mut(column_family_id)
            .unwrap()
            .install_super_version();

        Ok(column_family_id)
    }

    /// Bind the reserved statistics column family, creating it on first use.
    fn init_persist_stats_column_family(
        &self,
        fields_guard: &mut MutexGuard<GuardedDbFields>,
    ) -> SquallResult<()> {
        let stats_cf_exists = fields_guard
            .version_set
            .column_families()
            .get_by_name(PERSISTENT_STATS_COLUMN_FAMILY_NAME)
            .is_some();
        fields_guard.persistent_stats_cfd_exists = stats_cf_exists;

        if !stats_cf_exists {
            self.create_column_family(
                fields_guard,
                PERSISTENT_STATS_COLUMN_FAMILY_NAME,
                ColumnFamilyOptions::default(),
            )?;
        }

        Ok(())
    }

    /**
    Check the recovered statistics column family's format version for compatibility.

    The column family is dropped and recreated when its version keys are unreadable or when the
    data was written by a release that is newer than both this build's format and its
    compatibility floor. The version keys are (re)written whenever the column family is fresh.
    */
    fn persistent_stats_process_format_version(
        &self,
        fields_guard: &mut MutexGuard<GuardedDbFields>,
    ) -> SquallResult<()> {
        // The version keys only need persisting when the stats column family did not survive
        // from a previous incarnation
        let mut should_persist_format_version = !fields_guard.persistent_stats_cfd_exists;

        if fields_guard.persistent_stats_cfd_exists {
            let format_version =
                self.decode_persistent_stats_version(fields_guard, STATS_FORMAT_VERSION_KEY);
            let compatible_version =
                self.decode_persistent_stats_version(fields_guard, STATS_COMPATIBLE_VERSION_KEY);

            let incompatible = match (&format_version, &compatible_version) {
                (Ok(format), Ok(compatible)) => {
                    *format > STATS_FORMAT_VERSION_CURRENT
                        && *compatible > STATS_FORMAT_VERSION_COMPATIBLE
                }
                _ => true,
            };

            if incompatible {
                if format_version.is_err() || compatible_version.is_err() {
                    log::info!(
                        "Reading persistent stats version keys failed. Format key: {format:?}, \
                        compatible key: {compatible:?}.",
                        format = format_version.err(),
                        compatible = compatible_version.err()
                    );
                } else {
                    log::info!(
                        "Disabling persistent stats due to a corrupted or incompatible format \
                        version."
                    );
                }

                let stats_cf_id = fields_guard
                    .version_set
                    .column_families()
                    .get_by_name(PERSISTENT_STATS_COLUMN_FAMILY_NAME)
                    .unwrap()
                    .get_id();
                let mut drop_edit = VersionEdit::for_column_family(stats_cf_id);
                drop_edit.is_column_family_drop = true;
                fields_guard
                    .version_set
                    .log_and_apply(vec![drop_edit], /* new_descriptor_log */ false)?;

                self.create_column_family(
                    fields_guard,
                    PERSISTENT_STATS_COLUMN_FAMILY_NAME,
                    ColumnFamilyOptions::default(),
                )?;
                should_persist_format_version = true;
            }
        }

        if should_persist_format_version {
            let stats_cf_id = fields_guard
                .version_set
                .column_families()
                .get_by_name(PERSISTENT_STATS_COLUMN_FAMILY_NAME)
                .unwrap()
                .get_id();

            let mut batch = WriteBatch::new();
            batch.put_cf(
                stats_cf_id,
                STATS_FORMAT_VERSION_KEY,
                STATS_FORMAT_VERSION_CURRENT.to_string().as_bytes(),
            );
            batch.put_cf(
                stats_cf_id,
                STATS_COMPATIBLE_VERSION_KEY,
                STATS_FORMAT_VERSION_COMPATIBLE.to_string().as_bytes(),
            );

            let write_options = WriteOptions {
                sync: false,
                low_pri: true,
                no_slowdown: true,
            };
            self.write_internal(fields_guard, write_options, batch)?;
        }

        Ok(())
    }

    /// Read one of the reserved version keys of the statistics column family as a `u64`.
    fn decode_persistent_stats_version(
        &self,
        fields_guard: &MutexGuard<GuardedDbFields>,
        key: &[u8],
    ) -> SquallResult<u64> {
        let stats_cf_id = fields_guard
            .version_set
            .column_families()
            .get_by_name(PERSISTENT_STATS_COLUMN_FAMILY_NAME)
            .unwrap()
            .get_id();

        let value = self
            .get_for_recovery(fields_guard, stats_cf_id, key)?
            .ok_or_else(|| {
                SquallError::NotFound(format!(
                    "The persistent stats key {key} was not found.",
                    key = String::from_utf8_lossy(key)
                ))
            })?;

        String::from_utf8(value)
            .ok()
            .and_then(|text| text.parse::<u64>().ok())
            .ok_or_else(|| {
                SquallError::Corruption(
                    "The persistent stats version value failed to parse.".to_string(),
                )
            })
    }

    /// Persist a text dump of the active options next to the data files.
    fn persist_options_file(
        &self,
        fields_guard: &mut MutexGuard<GuardedDbFields>,
    ) -> SquallResult<()> {
        let options_file_number = fields_guard.version_set.new_file_number();
        let options_file_path = self
            .file_name_handler
            .get_options_file_path(options_file_number);
        log::info!("Persisting the options dump to {options_file_path:?}.");

        let mut options_file = self
            .filesystem_provider
            .create_file(&options_file_path, false)?;
        options_file.write_all(self.render_options_dump().as_bytes())?;
        options_file.sync()?;

        Ok(())
    }

    /**
    Schedule the initial background work.

    The flush/compaction worker pool is an external collaborator that is attached after open
    returns; this surfaces what it would be asked to do.
    */
    fn maybe_schedule_flush_or_compaction(&self, fields_guard: &MutexGuard<GuardedDbFields>) {
        let bg_job_limits = self.options.get_bg_job_limits();
        for column_family in fields_guard.version_set.column_families().iter() {
            let super_version = match column_family.get_super_version() {
                Some(super_version) => super_version,
                None => continue,
            };

            if super_version.memtable.approximate_memory_usage()
                >= super_version.options.write_buffer_size
            {
                log::info!(
                    "Column family {name} (super-version {version_number}) has an over-budget \
                    memtable; requesting a flush.",
                    name = column_family.get_name(),
                    version_number = super_version.version_number
                );
            }
        }

        log::debug!(
            "Background scheduling enabled with {max_flushes} flush slots and \
            {max_compactions} compaction slots. Next file number: {next_file_number}.",
            max_flushes = bg_job_limits.max_flushes,
            max_compactions = bg_job_limits.max_compactions,
            next_file_number = fields_guard.version_set.peek_next_file_number()
        );
    }

    /// Tell the sst-file-manager about the table files already present in the data paths.
    fn notify_sst_file_manager(&self) {
        let sst_file_manager = match &self.options.sst_file_manager {
            Some(sst_file_manager) => sst_file_manager,
            None => return,
        };

        for db_path in &self.options.db_paths {
            let children = match self.filesystem_provider.list_dir(&db_path.path) {
                Ok(children) => children,
                Err(_list_err) => continue,
            };

            for child in children {
                if let Ok(ParsedFileType::TableFile(_table_number)) =
                    FileNameHandler::get_file_type_from_name(&child)
                {
                    if let Ok(file_size) = self.filesystem_provider.get_file_size(&child) {
                        sst_file_manager.on_add_file(child, file_size);
                    }
                }
            }
        }
    }
}

/// Private helpers
impl DB {
    /// Write the database id to the IDENTITY file.
    fn write_identity_file(
        filesystem_provider: &Arc<dyn FileSystem>,
        file_name_handler: &FileNameHandler,
        db_id: &str,
    ) -> SquallResult<()> {
        let identity_file_path = file_name_handler.get_identity_file_path();
        let mut identity_file = filesystem_provider.create_file(&identity_file_path, false)?;
        identity_file.write_all(db_id.as_bytes())?;
        identity_file.sync()?;

        Ok(())
    }

    /// Read the database id from the IDENTITY file.
    fn read_identity_file(
        filesystem_provider: &Arc<dyn FileSystem>,
        file_name_handler: &FileNameHandler,
    ) -> SquallResult<String> {
        let identity_file_path = file_name_handler.get_identity_file_path();
        let mut identity_file = filesystem_provider.open_file(&identity_file_path)?;
        let mut contents = String::new();
        std::io::Read::read_to_string(&mut identity_file, &mut contents)?;

        Ok(contents.trim().to_string())
    }

    /// The number of bytes to preallocate when creating a write-ahead log.
    fn get_wal_preallocate_block_size(max_write_buffer_size: usize) -> u64 {
        (max_write_buffer_size / 10 + max_write_buffer_size) as u64
    }

    /// Log that a write-ahead log's remaining contents are being dropped.
    fn log_file_dropped(&self, log_file_path: &Path) {
        if let Ok(num_bytes) = self.filesystem_provider.get_file_size(log_file_path) {
            log::warn!("{log_file_path:?}: dropping {num_bytes} bytes");
        }
    }

    /**
    Record a per-record corruption according to the reporter policy: without paranoid checks (or
    under the skip-everything mode) the record is dropped and replay continues; otherwise the
    file's status becomes the corruption and replay of this file stops.

    Returns true when the caller should continue with the next record.
    */
    fn report_record_corruption(
        &self,
        file_status: &mut SquallResult<()>,
        log_number: u64,
        corruption: &SquallError,
    ) -> bool {
        if !self.options.paranoid_checks
            || self.options.wal_recovery_mode == WalRecoveryMode::SkipAnyCorruptedRecords
        {
            log::warn!("(ignoring error) log #{log_number}: {corruption}");
            return true;
        }

        log::warn!("log #{log_number}: {corruption}");
        *file_status = Err(corruption.clone());

        false
    }

    /// Render the options dump written next to the data files at every successful open.
    fn render_options_dump(&self) -> String {
        let options = &self.options;
        format!(
            "[DBOptions]\n\
            create_if_missing={create_if_missing}\n\
            create_missing_column_families={create_missing_column_families}\n\
            error_if_exists={error_if_exists}\n\
            paranoid_checks={paranoid_checks}\n\
            wal_recovery_mode={wal_recovery_mode:?}\n\
            avoid_flush_during_recovery={avoid_flush_during_recovery}\n\
            allow_2pc={allow_2pc}\n\
            write_dbid_to_manifest={write_dbid_to_manifest}\n\
            persist_stats_to_disk={persist_stats_to_disk}\n\
            recycle_log_file_num={recycle_log_file_num}\n\
            manual_wal_flush={manual_wal_flush}\n\
            max_open_files={max_open_files}\n\
            db_write_buffer_size={db_write_buffer_size}\n\
            max_background_jobs={max_background_jobs}\n\
            bytes_per_sync={bytes_per_sync}\n\
            delayed_write_rate={delayed_write_rate}\n\
            wal_dir={wal_dir}\n\
            manifest_preallocation_size={manifest_preallocation_size}\n",
            create_if_missing = options.create_if_missing,
            create_missing_column_families = options.create_missing_column_families,
            error_if_exists = options.error_if_exists,
            paranoid_checks = options.paranoid_checks,
            wal_recovery_mode = options.wal_recovery_mode,
            avoid_flush_during_recovery = options.avoid_flush_during_recovery,
            allow_2pc = options.allow_2pc,
            write_dbid_to_manifest = options.write_dbid_to_manifest,
            persist_stats_to_disk = options.persist_stats_to_disk,
            recycle_log_file_num = options.recycle_log_file_num,
            manual_wal_flush = options.manual_wal_flush,
            max_open_files = options.max_open_files,
            db_write_buffer_size = options.db_write_buffer_size,
            max_background_jobs = options.max_background_jobs,
            bytes_per_sync = options.bytes_per_sync,
            delayed_write_rate = options.delayed_write_rate,
            wal_dir = options.wal_dir,
            manifest_preallocation_size = options.manifest_preallocation_size,
        )
    }
}
