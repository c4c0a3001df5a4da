use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;

use pretty_assertions::assert_eq;

use crate::batch::WriteBatch;
use crate::errors::SquallError;
use crate::options::{ColumnFamilyDescriptor, ColumnFamilyOptions, WalRecoveryMode, WriteOptions};
use crate::wal_filter::{WalFilter, WalProcessingOption, WalRecordDecision};

use super::test_utils::*;
use super::DB;

#[test]
fn opening_a_new_database_with_create_if_missing_true_succeeds() {
    setup();
    let options = memory_options();
    let fs = fs_of(&options);

    let db = DB::open(options.clone()).unwrap();

    // Bootstrap cleanliness: one manifest, CURRENT referencing it, a 36-byte IDENTITY, and
    // exactly one write-ahead log in the log directory
    let mut current_contents = String::new();
    fs.open_file(&PathBuf::from("/squall/CURRENT"))
        .unwrap()
        .read_to_string(&mut current_contents)
        .unwrap();
    assert_eq!(current_contents, "MANIFEST-000001\n");
    assert!(fs.exists(&PathBuf::from("/squall/MANIFEST-000001")));
    assert_eq!(
        fs.get_file_size(&PathBuf::from("/squall/IDENTITY")).unwrap(),
        36
    );
    assert_eq!(
        wal_file_numbers(&fs, &PathBuf::from("/squall")),
        vec![3],
        "file number 2 is reserved for the next manifest so the first log is #3"
    );
    assert_eq!(db.last_sequence(), 0);
    assert!(db.is_auto_recovery_enabled());

    // A database with no write history gets no anchor record in its log
    assert!(read_wal_batches(&fs, &wal_path(&options, 3)).is_empty());
}

#[test]
fn opening_non_existent_database_with_create_if_missing_false_fails() {
    setup();
    let mut options = memory_options();
    options.create_if_missing = false;

    let error = DB::open(options).unwrap_err();
    assert!(error.is_invalid_argument(), "unexpected error: {error}");
}

#[test]
fn opening_an_existing_database_with_error_if_exists_true_fails() {
    setup();
    let options = memory_options();
    DB::open(options.clone()).unwrap().close().unwrap();

    let mut reopen_options = options;
    reopen_options.error_if_exists = true;
    let error = DB::open(reopen_options).unwrap_err();
    assert!(error.is_invalid_argument(), "unexpected error: {error}");
}

#[test]
fn incompatible_options_are_rejected_before_any_files_are_created() {
    setup();
    let mut options = memory_options();
    options.allow_mmap_reads = true;
    options.use_direct_reads = true;
    let fs = fs_of(&options);

    let error = DB::open(options.clone()).unwrap_err();
    assert!(error.is_not_supported(), "unexpected error: {error}");
    assert_eq!(
        fs.list_dir(&PathBuf::from("/squall")).unwrap().len(),
        0,
        "a validation failure must leave no trace on disk"
    );

    // The lock was never taken either, so a corrected open goes through
    let mut corrected = options;
    corrected.allow_mmap_reads = false;
    corrected.use_direct_reads = false;
    assert!(DB::open(corrected).is_ok());
}

#[test]
fn direct_io_is_rejected_when_the_file_system_cannot_serve_it() {
    setup();
    let mut options = memory_options();
    options.use_direct_reads = true;

    let error = DB::open(options).unwrap_err();
    assert!(error.is_invalid_argument(), "unexpected error: {error}");
    assert!(error.to_string().contains("Direct I/O is not supported"));
}

#[test]
fn the_database_lock_excludes_a_second_opener() {
    setup();
    let options = memory_options();

    let db = DB::open(options.clone()).unwrap();
    let second_open_error = DB::open(options.clone()).unwrap_err();
    assert!(
        matches!(second_open_error, SquallError::Busy(_)),
        "unexpected error: {second_open_error}"
    );

    drop(db);
    assert!(DB::open(options).is_ok());
}

#[test]
fn a_clean_reopen_replays_nothing() {
    setup();
    let options = memory_options();
    let fs = fs_of(&options);

    let db = DB::open(options.clone()).unwrap();
    db.put(b"k1", b"v1").unwrap();
    let mut batch = WriteBatch::new();
    batch.put(b"k2", b"v2");
    batch.put(b"k3", b"v3");
    db.write(WriteOptions::default(), batch).unwrap();
    db.put(b"k4", b"v4").unwrap();
    assert_eq!(db.last_sequence(), 4);
    db.close().unwrap();

    let db = DB::open(options.clone()).unwrap();
    assert_eq!(db.last_sequence(), 4);
    assert_eq!(
        db.num_files_at_level(0),
        1,
        "the only table file is the one written by the clean close; recovery wrote none"
    );

    let wal_numbers = wal_file_numbers(&fs, &PathBuf::from("/squall"));
    assert_eq!(wal_numbers.len(), 1, "exactly one new write-ahead log");
    assert_eq!(db.alive_wal_numbers(), wal_numbers);

    // The new log is anchored with an empty record carrying the recovered sequence
    let batches = read_wal_batches(&fs, &wal_path(&options, wal_numbers[0]));
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].count(), 0);
    assert_eq!(batches[0].get_sequence_number(), 4);

    assert_eq!(db.get(b"k3").unwrap(), Some(b"v3".to_vec()));
}

#[test]
fn a_crash_reopen_replays_the_write_ahead_log() {
    setup();
    let options = memory_options();
    let fs = fs_of(&options);

    let db = DB::open(options.clone()).unwrap();
    db.put(b"k1", b"v1").unwrap();
    let mut batch = WriteBatch::new();
    batch.put(b"k2", b"v2");
    batch.put(b"k3", b"v3");
    db.write(WriteOptions::default(), batch).unwrap();
    db.put(b"k4", b"v4").unwrap();
    drop(db); // crash without closing

    let db = DB::open(options.clone()).unwrap();
    assert_eq!(db.last_sequence(), 4);
    assert_eq!(
        db.num_files_at_level(0),
        1,
        "replayed writes are materialized as a single level-0 table file"
    );

    let wal_numbers = wal_file_numbers(&fs, &PathBuf::from("/squall"));
    assert_eq!(
        wal_numbers.len(),
        1,
        "the replayed log is obsolete once its contents are on disk"
    );
    assert!(wal_numbers[0] > 3);

    for (key, value) in [(b"k1", b"v1"), (b"k2", b"v2"), (b"k3", b"v3"), (b"k4", b"v4")] {
        assert_eq!(db.get(key).unwrap(), Some(value.to_vec()));
    }
}

#[test]
fn a_torn_tail_is_dropped_under_the_default_mode() {
    setup();
    let options = memory_options();
    let fs = fs_of(&options);

    let db = DB::open(options.clone()).unwrap();
    db.put(b"k1", b"v1").unwrap();
    db.put(b"k2", b"v2").unwrap();
    db.put(b"k3", b"v3").unwrap();
    drop(db);

    // Shear the tail off the last record, as if the writer died mid-write
    let log_path = wal_path(&options, 3);
    let log_size = fs.get_file_size(&log_path).unwrap();
    fs.truncate(&log_path, log_size - 4).unwrap();

    let db = DB::open(options).unwrap();
    assert_eq!(db.last_sequence(), 2);
    assert_eq!(db.get(b"k2").unwrap(), Some(b"v2".to_vec()));
    assert_eq!(db.get(b"k3").unwrap(), None);
}

#[test]
fn absolute_consistency_rejects_a_torn_tail() {
    setup();
    let options = memory_options();
    let fs = fs_of(&options);

    let db = DB::open(options.clone()).unwrap();
    db.put(b"k1", b"v1").unwrap();
    drop(db);

    let log_path = wal_path(&options, 3);
    let log_size = fs.get_file_size(&log_path).unwrap();
    fs.truncate(&log_path, log_size - 4).unwrap();

    let mut strict_options = options;
    strict_options.wal_recovery_mode = WalRecoveryMode::AbsoluteConsistency;
    let error = DB::open(strict_options).unwrap_err();
    assert!(error.is_corruption(), "unexpected error: {error}");
}

#[test]
fn interior_corruption_fails_the_default_mode_and_is_skipped_by_skip_mode() {
    setup();
    let options = memory_options();
    let fs = fs_of(&options);

    let db = DB::open(options.clone()).unwrap();
    db.put(b"k1", b"v1").unwrap();
    db.put(b"k2", b"v2").unwrap();
    db.put(b"k3", b"v3").unwrap();
    drop(db);

    // Garble the payload of the middle record; every record here is 36 bytes on disk
    let log_path = wal_path(&options, 3);
    let mut log_file = fs.create_file(&log_path, true).unwrap();
    log_file.seek(SeekFrom::Start(36 + 7 + 2)).unwrap();
    log_file.write_all(&[0xff, 0xff]).unwrap();
    drop(log_file);

    let error = DB::open(options.clone()).unwrap_err();
    assert!(error.is_corruption(), "unexpected error: {error}");

    let mut skip_options = options;
    skip_options.wal_recovery_mode = WalRecoveryMode::SkipAnyCorruptedRecords;
    let db = DB::open(skip_options).unwrap();
    assert_eq!(db.last_sequence(), 3);
    assert_eq!(db.get(b"k1").unwrap(), Some(b"v1".to_vec()));
    assert_eq!(db.get(b"k2").unwrap(), None, "the garbled record is dropped");
    assert_eq!(db.get(b"k3").unwrap(), Some(b"v3".to_vec()));
}

#[test]
fn point_in_time_recovery_stops_at_cross_log_corruption() {
    setup();
    let options = memory_options();
    let fs = fs_of(&options);

    // Bootstrap, then craft the log layout by hand: log #3 ends at sequence 100 and log #4
    // carries 101..=103 with its third record corrupted
    drop(DB::open(options.clone()).unwrap());
    let first_log = wal_path(&options, 3);
    let entries: Vec<(String, String)> = (1..=100)
        .map(|i| (format!("k{i:03}"), format!("v{i:03}")))
        .collect();
    let entry_refs: Vec<(&[u8], &[u8])> = entries
        .iter()
        .map(|(key, value)| (key.as_bytes(), value.as_bytes()))
        .collect();
    append_batch(&fs, &first_log, 1, &entry_refs);

    let second_log = wal_path(&options, 4);
    append_batch(&fs, &second_log, 101, &[(b"k101", b"v101")]);
    append_batch(&fs, &second_log, 102, &[(b"k102", b"v102")]);
    let pre_corruption_size = fs.get_file_size(&second_log).unwrap();
    append_batch(&fs, &second_log, 103, &[(b"k103", b"v103")]);

    let mut log_file = fs.create_file(&second_log, true).unwrap();
    log_file
        .seek(SeekFrom::Start(pre_corruption_size + 9))
        .unwrap();
    log_file.write_all(&[0xff, 0xff]).unwrap();
    drop(log_file);

    let mut pit_options = options;
    pit_options.wal_recovery_mode = WalRecoveryMode::PointInTimeRecovery;
    let db = DB::open(pit_options).unwrap();
    assert_eq!(db.last_sequence(), 102);
    assert_eq!(db.get(b"k100").unwrap(), Some(b"v100".to_vec()));
    assert_eq!(db.get(b"k102").unwrap(), Some(b"v102".to_vec()));
    assert_eq!(db.get(b"k103").unwrap(), None);
}

#[test]
fn point_in_time_recovery_resumes_across_a_contiguous_torn_tail() {
    setup();
    let options = memory_options();
    let fs = fs_of(&options);

    drop(DB::open(options.clone()).unwrap());
    let first_log = wal_path(&options, 3);
    append_batch(&fs, &first_log, 1, &[(b"k1", b"v1"), (b"k2", b"v2")]);
    append_batch(&fs, &first_log, 3, &[(b"torn", b"torn")]);
    let log_size = fs.get_file_size(&first_log).unwrap();
    fs.truncate(&first_log, log_size - 3).unwrap();

    // The second log opens exactly at the next expected sequence, so the stream is contiguous
    // and replay rolls forward across the torn record
    let second_log = wal_path(&options, 4);
    append_batch(&fs, &second_log, 3, &[(b"k3", b"v3")]);

    let mut pit_options = options;
    pit_options.wal_recovery_mode = WalRecoveryMode::PointInTimeRecovery;
    let db = DB::open(pit_options).unwrap();
    assert_eq!(db.last_sequence(), 3);
    assert_eq!(db.get(b"k3").unwrap(), Some(b"v3".to_vec()));
}

#[test]
fn point_in_time_recovery_drops_noncontiguous_later_logs() {
    setup();
    let options = memory_options();
    let fs = fs_of(&options);

    drop(DB::open(options.clone()).unwrap());
    let first_log = wal_path(&options, 3);
    append_batch(&fs, &first_log, 1, &[(b"k1", b"v1"), (b"k2", b"v2")]);
    append_batch(&fs, &first_log, 3, &[(b"torn", b"torn")]);
    let log_size = fs.get_file_size(&first_log).unwrap();
    fs.truncate(&first_log, log_size - 3).unwrap();

    // The second log starts one past the expected sequence; a record is missing, so nothing
    // after the corruption point may be replayed
    let second_log = wal_path(&options, 4);
    append_batch(&fs, &second_log, 4, &[(b"k4", b"v4")]);

    let mut pit_options = options;
    pit_options.wal_recovery_mode = WalRecoveryMode::PointInTimeRecovery;
    let db = DB::open(pit_options).unwrap();
    assert_eq!(db.last_sequence(), 2);
    assert_eq!(db.get(b"k2").unwrap(), Some(b"v2".to_vec()));
    assert_eq!(db.get(b"k4").unwrap(), None);
}

#[test]
fn an_empty_write_ahead_log_still_advances_the_log_number() {
    setup();
    let options = memory_options();
    let fs = fs_of(&options);

    drop(DB::open(options.clone()).unwrap());
    fs.create_file(&wal_path(&options, 9), false).unwrap();

    let db = DB::open(options.clone()).unwrap();
    assert_eq!(db.last_sequence(), 0);

    let wal_numbers = wal_file_numbers(&fs, &PathBuf::from("/squall"));
    assert_eq!(wal_numbers.len(), 1);
    assert!(
        wal_numbers[0] > 9,
        "the file number counter must be nudged past every observed log"
    );
}

#[test]
fn a_zero_length_record_is_corruption_under_strict_modes() {
    setup();
    let options = memory_options();
    let fs = fs_of(&options);

    drop(DB::open(options.clone()).unwrap());
    // A record shorter than the batch header cannot be a committed batch
    {
        let mut writer =
            crate::logs::LogWriter::new(Arc::clone(&fs), wal_path(&options, 3), true).unwrap();
        writer.append(b"").unwrap();
    }

    let error = DB::open(options.clone()).unwrap_err();
    assert!(error.is_corruption(), "unexpected error: {error}");

    let mut skip_options = options;
    skip_options.wal_recovery_mode = WalRecoveryMode::SkipAnyCorruptedRecords;
    let db = DB::open(skip_options).unwrap();
    assert_eq!(db.last_sequence(), 0);
}

struct PassthroughFilter;

impl WalFilter for PassthroughFilter {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn log_record_found(&self, _: u64, _: &str, _: &WriteBatch) -> WalRecordDecision {
        WalRecordDecision::continue_processing()
    }
}

struct DropEverythingFilter;

impl WalFilter for DropEverythingFilter {
    fn name(&self) -> &str {
        "drop-everything"
    }

    fn log_record_found(&self, _: u64, _: &str, _: &WriteBatch) -> WalRecordDecision {
        WalRecordDecision {
            option: WalProcessingOption::IgnoreCurrentRecord,
            new_batch: None,
        }
    }
}

struct StopAtSequenceFilter {
    stop_at: u64,
}

impl WalFilter for StopAtSequenceFilter {
    fn name(&self) -> &str {
        "stop-at-sequence"
    }

    fn log_record_found(&self, _: u64, _: &str, batch: &WriteBatch) -> WalRecordDecision {
        if batch.get_sequence_number() >= self.stop_at {
            WalRecordDecision {
                option: WalProcessingOption::StopReplay,
                new_batch: None,
            }
        } else {
            WalRecordDecision::continue_processing()
        }
    }
}

/// Rewrites every batch down to its first operation.
struct FirstOperationOnlyFilter;

impl WalFilter for FirstOperationOnlyFilter {
    fn name(&self) -> &str {
        "first-operation-only"
    }

    fn log_record_found(&self, _: u64, _: &str, batch: &WriteBatch) -> WalRecordDecision {
        let mut replacement = WriteBatch::new();
        if let Some(element) = batch.get_elements().first() {
            match &element.value {
                Some(value) => replacement.put_cf(element.column_family_id, &element.key, value),
                None => replacement.delete_cf(element.column_family_id, &element.key),
            }
        }

        WalRecordDecision {
            option: WalProcessingOption::ContinueProcessing,
            new_batch: Some(replacement),
        }
    }
}

/// Illegally returns more operations than the original record carried.
struct OverstuffingFilter;

impl WalFilter for OverstuffingFilter {
    fn name(&self) -> &str {
        "overstuffing"
    }

    fn log_record_found(&self, _: u64, _: &str, batch: &WriteBatch) -> WalRecordDecision {
        let mut replacement = batch.clone();
        replacement.put(b"smuggled", b"extra");

        WalRecordDecision {
            option: WalProcessingOption::ContinueProcessing,
            new_batch: Some(replacement),
        }
    }
}

struct RejectEverythingFilter;

impl WalFilter for RejectEverythingFilter {
    fn name(&self) -> &str {
        "reject-everything"
    }

    fn log_record_found(&self, _: u64, _: &str, _: &WriteBatch) -> WalRecordDecision {
        WalRecordDecision {
            option: WalProcessingOption::CorruptedRecord,
            new_batch: None,
        }
    }
}

/// Crash a database with a known little history: k1@1, then {k2@2, k3@3}, then k4@4.
fn crash_with_history(options: &crate::options::DbOptions) {
    let db = DB::open(options.clone()).unwrap();
    db.put(b"k1", b"v1").unwrap();
    let mut batch = WriteBatch::new();
    batch.put(b"k2", b"v2");
    batch.put(b"k3", b"v3");
    db.write(WriteOptions::default(), batch).unwrap();
    db.put(b"k4", b"v4").unwrap();
    drop(db);
}

#[test]
fn a_passthrough_wal_filter_does_not_change_recovery() {
    setup();
    let options = memory_options();
    crash_with_history(&options);

    let mut filtered_options = options;
    filtered_options.wal_filter = Some(Arc::new(PassthroughFilter));
    let db = DB::open(filtered_options).unwrap();

    assert_eq!(db.last_sequence(), 4);
    for (key, value) in [(b"k1", b"v1"), (b"k2", b"v2"), (b"k3", b"v3"), (b"k4", b"v4")] {
        assert_eq!(db.get(key).unwrap(), Some(value.to_vec()));
    }
}

#[test]
fn a_wal_filter_can_skip_records() {
    setup();
    let options = memory_options();
    crash_with_history(&options);

    let mut filtered_options = options;
    filtered_options.wal_filter = Some(Arc::new(DropEverythingFilter));
    let db = DB::open(filtered_options).unwrap();

    assert_eq!(db.last_sequence(), 0);
    assert_eq!(db.get(b"k1").unwrap(), None);
}

#[test]
fn a_wal_filter_can_stop_replay() {
    setup();
    let options = memory_options();
    crash_with_history(&options);

    let mut filtered_options = options;
    filtered_options.wal_filter = Some(Arc::new(StopAtSequenceFilter { stop_at: 2 }));
    let db = DB::open(filtered_options).unwrap();

    assert_eq!(db.last_sequence(), 1);
    assert_eq!(db.get(b"k1").unwrap(), Some(b"v1".to_vec()));
    assert_eq!(db.get(b"k2").unwrap(), None);
}

#[test]
fn a_wal_filter_rewrite_keeps_the_original_sequence() {
    setup();
    let options = memory_options();
    crash_with_history(&options);

    let mut filtered_options = options;
    filtered_options.wal_filter = Some(Arc::new(FirstOperationOnlyFilter));
    let db = DB::open(filtered_options).unwrap();

    // The two-operation batch was cut down to just k2; later sequence numbers still follow the
    // original history
    assert_eq!(db.last_sequence(), 4);
    assert_eq!(db.get(b"k2").unwrap(), Some(b"v2".to_vec()));
    assert_eq!(db.get(b"k3").unwrap(), None);
    assert_eq!(db.get(b"k4").unwrap(), Some(b"v4".to_vec()));
}

#[test]
fn a_wal_filter_may_not_grow_a_record() {
    setup();
    let options = memory_options();
    crash_with_history(&options);

    let mut filtered_options = options;
    filtered_options.wal_filter = Some(Arc::new(OverstuffingFilter));
    let error = DB::open(filtered_options).unwrap_err();
    assert!(error.is_not_supported(), "unexpected error: {error}");
}

#[test]
fn a_wal_filter_corruption_verdict_follows_the_recovery_mode() {
    setup();
    let options = memory_options();
    crash_with_history(&options);

    let mut rejecting_options = options.clone();
    rejecting_options.wal_filter = Some(Arc::new(RejectEverythingFilter));
    let error = DB::open(rejecting_options).unwrap_err();
    assert!(error.is_corruption(), "unexpected error: {error}");

    // Without paranoid checks the verdict is logged and the record is still processed
    let mut relaxed_options = options;
    relaxed_options.wal_filter = Some(Arc::new(RejectEverythingFilter));
    relaxed_options.paranoid_checks = false;
    let db = DB::open(relaxed_options).unwrap();
    assert_eq!(db.get(b"k1").unwrap(), Some(b"v1".to_vec()));
}

#[test]
fn the_identity_file_is_reconciled_from_the_manifest() {
    setup();
    let mut options = memory_options();
    options.write_dbid_to_manifest = true;
    let fs = fs_of(&options);

    let db = DB::open(options.clone()).unwrap();
    let db_id = db.db_id();
    assert_eq!(db_id.len(), 36);
    drop(db);

    // Scribble over the IDENTITY file; the manifest's id must win on the next open
    let identity_path = PathBuf::from("/squall/IDENTITY");
    let mut identity_file = fs.create_file(&identity_path, false).unwrap();
    identity_file.write_all(b"not-a-database-id").unwrap();
    drop(identity_file);

    let db = DB::open(options).unwrap();
    assert_eq!(db.db_id(), db_id);

    let mut rewritten = String::new();
    fs.open_file(&identity_path)
        .unwrap()
        .read_to_string(&mut rewritten)
        .unwrap();
    assert_eq!(rewritten.trim(), db_id);
}

#[test]
fn the_persistent_stats_column_family_is_created_and_versioned() {
    setup();
    let mut options = memory_options();
    options.persist_stats_to_disk = true;

    let db = DB::open(options.clone()).unwrap();
    assert_eq!(db.num_column_families(), 2);
    let stats_cf_id = db
        .column_family_id(crate::config::PERSISTENT_STATS_COLUMN_FAMILY_NAME)
        .unwrap();
    assert_eq!(
        db.get_cf(stats_cf_id, b"format_version").unwrap(),
        Some(b"1".to_vec())
    );
    assert_eq!(
        db.get_cf(stats_cf_id, b"compatible_version").unwrap(),
        Some(b"1".to_vec())
    );
    drop(db); // crash

    let db = DB::open(options).unwrap();
    assert_eq!(db.num_column_families(), 2);
    let stats_cf_id = db
        .column_family_id(crate::config::PERSISTENT_STATS_COLUMN_FAMILY_NAME)
        .unwrap();
    assert_eq!(
        db.get_cf(stats_cf_id, b"format_version").unwrap(),
        Some(b"1".to_vec())
    );
}

#[test]
fn missing_column_families_are_created_only_on_request() {
    setup();
    let mut options = memory_options();
    options.create_missing_column_families = true;

    let descriptors = vec![
        ColumnFamilyDescriptor::new("default", ColumnFamilyOptions::default()),
        ColumnFamilyDescriptor::new("gusts", ColumnFamilyOptions::default()),
    ];

    let db = DB::open_with_column_families(options.clone(), descriptors.clone()).unwrap();
    let gusts_id = db.column_family_id("gusts").unwrap();
    let mut batch = WriteBatch::new();
    batch.put_cf(gusts_id, b"beaufort", b"9");
    db.write(WriteOptions::default(), batch).unwrap();
    drop(db); // crash

    // Reopening with the full set recovers the per-family data
    let db = DB::open_with_column_families(options.clone(), descriptors.clone()).unwrap();
    let gusts_id = db.column_family_id("gusts").unwrap();
    assert_eq!(db.get_cf(gusts_id, b"beaufort").unwrap(), Some(b"9".to_vec()));

    // Every recorded column family must be named at open
    drop(db);
    let partial = vec![ColumnFamilyDescriptor::new(
        "default",
        ColumnFamilyOptions::default(),
    )];
    let error = DB::open_with_column_families(options.clone(), partial).unwrap_err();
    assert!(error.is_invalid_argument(), "unexpected error: {error}");

    // And without the create flag, unknown families are rejected
    let mut strict_options = options;
    strict_options.create_missing_column_families = false;
    let mut with_unknown = descriptors;
    with_unknown.push(ColumnFamilyDescriptor::new(
        "unknown",
        ColumnFamilyOptions::default(),
    ));
    let error = DB::open_with_column_families(strict_options, with_unknown).unwrap_err();
    assert!(error.is_invalid_argument(), "unexpected error: {error}");
}

#[test]
fn avoiding_flushes_during_recovery_keeps_data_in_memory() {
    setup();
    let options = memory_options();
    let fs = fs_of(&options);
    crash_with_history(&options);

    let mut in_memory_options = options.clone();
    in_memory_options.avoid_flush_during_recovery = true;
    let db = DB::open(in_memory_options).unwrap();

    assert_eq!(db.last_sequence(), 4);
    assert_eq!(total_table_files(&db), 0, "nothing was flushed");
    assert_eq!(db.get(b"k2").unwrap(), Some(b"v2".to_vec()));

    let wal_numbers = wal_file_numbers(&fs, &PathBuf::from("/squall"));
    assert_eq!(
        wal_numbers.len(),
        2,
        "the replayed log still holds the only durable copy and must survive"
    );
    assert_eq!(wal_numbers[0], 3);
    assert_eq!(
        db.alive_wal_numbers(),
        wal_numbers,
        "retained logs are registered as alive alongside the new one"
    );
    drop(db);

    // Two-phase commit forbids in-memory recovery; the flush happens despite the option
    let mut two_pc_options = options;
    two_pc_options.avoid_flush_during_recovery = true;
    two_pc_options.allow_2pc = true;
    let db = DB::open(two_pc_options).unwrap();
    assert!(total_table_files(&db) > 0);
}

#[test]
fn opening_a_cleanly_closed_database_is_idempotent() {
    setup();
    let options = memory_options();

    let db = DB::open(options.clone()).unwrap();
    db.put(b"anemometer", b"spinning").unwrap();
    db.put(b"barograph", b"falling").unwrap();
    db.close().unwrap();

    let db = DB::open(options.clone()).unwrap();
    let first_reopen = (
        db.last_sequence(),
        db.num_column_families(),
        total_table_files(&db),
    );
    db.close().unwrap();

    let db = DB::open(options).unwrap();
    let second_reopen = (
        db.last_sequence(),
        db.num_column_families(),
        total_table_files(&db),
    );

    assert_eq!(first_reopen, second_reopen);
    assert_eq!(db.get(b"anemometer").unwrap(), Some(b"spinning".to_vec()));
}

#[test]
fn strict_open_gates_reject_existing_logs() {
    setup();
    let options = memory_options();
    crash_with_history(&options);

    let mut no_logs_options = options.clone();
    no_logs_options.error_if_log_file_exist = true;
    let error = DB::open(no_logs_options).unwrap_err();
    assert!(error.is_corruption(), "unexpected error: {error}");

    let mut no_data_options = options;
    no_data_options.error_if_data_exists_in_logs = true;
    let error = DB::open(no_data_options).unwrap_err();
    assert!(error.is_corruption(), "unexpected error: {error}");
}

#[test]
fn sequence_numbers_assigned_during_replay_are_monotonic() {
    setup();
    let options = memory_options();

    let db = DB::open(options.clone()).unwrap();
    for i in 0..50u32 {
        db.put(format!("key{i:03}").as_bytes(), format!("val{i}").as_bytes())
            .unwrap();
    }
    assert_eq!(db.last_sequence(), 50);
    drop(db);

    let db = DB::open(options).unwrap();
    assert_eq!(db.last_sequence(), 50);

    // New writes continue the recovered sequence stream
    db.put(b"key999", b"val999").unwrap();
    assert_eq!(db.last_sequence(), 51);
}
