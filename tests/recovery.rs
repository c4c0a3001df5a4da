/*!
End-to-end open-and-recover tests against the real operating system file system.

The in-memory file system used by the unit tests is convenient but these tests make sure the
on-disk layout and the crash story hold up with actual files, locks, and renames.
*/

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use rand::distributions::{Alphanumeric, DistString};
use rand::Rng;
use tempfile::TempDir;

use squall::{DbOptions, SquallError, WriteBatch, WriteOptions, DB};

fn setup() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::max())
        .is_test(true)
        .try_init();
}

fn disk_options(db_dir: &TempDir) -> DbOptions {
    let mut options = DbOptions::default();
    options.db_path = db_dir.path().to_str().unwrap().to_string();
    options.create_if_missing = true;

    options
}

/// The write-ahead log files currently in `dir`, sorted by name.
fn wal_files(dir: &Path) -> Vec<PathBuf> {
    let mut logs: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().map_or(false, |ext| ext == "log"))
        .collect();
    logs.sort();

    logs
}

#[test]
fn a_fresh_open_creates_the_expected_layout() {
    setup();
    let db_dir = TempDir::new().unwrap();
    let db = DB::open(disk_options(&db_dir)).unwrap();

    let current_contents = fs::read_to_string(db_dir.path().join("CURRENT")).unwrap();
    assert_eq!(current_contents, "MANIFEST-000001\n");
    assert!(db_dir.path().join("MANIFEST-000001").exists());
    assert!(db_dir.path().join("LOCK").exists());

    let identity_contents = fs::read_to_string(db_dir.path().join("IDENTITY")).unwrap();
    assert_eq!(identity_contents.trim().len(), 36);

    let logs = wal_files(db_dir.path());
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].file_name().unwrap(), "000003.log");

    assert_eq!(db.last_sequence(), 0);
    db.close().unwrap();
}

#[test]
fn committed_writes_survive_a_crash() {
    setup();
    let db_dir = TempDir::new().unwrap();
    let options = disk_options(&db_dir);

    let mut rng = rand::thread_rng();
    let mut expected: HashMap<String, String> = HashMap::new();

    let db = DB::open(options.clone()).unwrap();
    for _ in 0..200 {
        let key = Alphanumeric.sample_string(&mut rng, 12);
        let value_length = rng.gen_range(1..64);
        let value = Alphanumeric.sample_string(&mut rng, value_length);
        db.put(key.as_bytes(), value.as_bytes()).unwrap();
        expected.insert(key, value);
    }
    let sequence_at_crash = db.last_sequence();
    drop(db); // crash without closing

    let db = DB::open(options.clone()).unwrap();
    assert_eq!(db.last_sequence(), sequence_at_crash);
    for (key, value) in &expected {
        assert_eq!(
            db.get(key.as_bytes()).unwrap(),
            Some(value.clone().into_bytes()),
            "key {key} lost its committed value across the crash"
        );
    }

    // The database keeps working: write more, close cleanly, and read everything back again
    let mut batch = WriteBatch::new();
    batch.put(b"after-recovery", b"still-writable");
    db.write(WriteOptions::default(), batch).unwrap();
    expected.insert("after-recovery".to_string(), "still-writable".to_string());
    db.close().unwrap();

    let db = DB::open(options).unwrap();
    for (key, value) in &expected {
        assert_eq!(
            db.get(key.as_bytes()).unwrap(),
            Some(value.clone().into_bytes())
        );
    }
    db.close().unwrap();
}

#[test]
fn the_lock_file_excludes_concurrent_openers() {
    setup();
    let db_dir = TempDir::new().unwrap();
    let options = disk_options(&db_dir);

    let db = DB::open(options.clone()).unwrap();
    let second_open_error = DB::open(options.clone()).unwrap_err();
    assert!(
        matches!(second_open_error, SquallError::Busy(_) | SquallError::IO(_)),
        "unexpected error: {second_open_error}"
    );

    db.close().unwrap();
    DB::open(options).unwrap().close().unwrap();
}

#[test]
fn a_truncated_log_recovers_the_committed_prefix() {
    setup();
    let db_dir = TempDir::new().unwrap();
    let options = disk_options(&db_dir);

    let db = DB::open(options.clone()).unwrap();
    for i in 0..20u32 {
        db.put(format!("key{i:02}").as_bytes(), format!("val{i:02}").as_bytes())
            .unwrap();
    }
    drop(db); // crash

    // Tear a few bytes off the end of the log, as a crash mid-write would
    let logs = wal_files(db_dir.path());
    assert_eq!(logs.len(), 1);
    let log_size = fs::metadata(&logs[0]).unwrap().len();
    let log_file = fs::OpenOptions::new().write(true).open(&logs[0]).unwrap();
    log_file.set_len(log_size - 5).unwrap();
    drop(log_file);

    let db = DB::open(options).unwrap();
    assert_eq!(db.last_sequence(), 19, "the torn record is dropped");
    assert_eq!(db.get(b"key18").unwrap(), Some(b"val18".to_vec()));
    assert_eq!(db.get(b"key19").unwrap(), None);
    db.close().unwrap();
}
