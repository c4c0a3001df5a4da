use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::batch::WriteBatch;
use crate::file_names::{FileNameHandler, ParsedFileType};
use crate::fs::FileSystem;
use crate::logs::{LogReader, LogWriter};
use crate::options::DbOptions;

use super::DB;

/// Initialize test logging, ignoring errors if tests race to configure it.
pub(crate) fn setup() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::max())
        .is_test(true)
        .try_init();
}

/// Options backed by a shared in-memory file system with creation enabled.
pub(crate) fn memory_options() -> DbOptions {
    let mut options = DbOptions::with_memory_env();
    options.create_if_missing = true;

    options
}

/// The file system provider behind a set of options.
pub(crate) fn fs_of(options: &DbOptions) -> Arc<dyn FileSystem> {
    options.filesystem_provider()
}

/// The numbers of the write-ahead logs currently present in the log directory, ascending.
pub(crate) fn wal_file_numbers(fs: &Arc<dyn FileSystem>, wal_dir: &Path) -> Vec<u64> {
    let mut numbers: Vec<u64> = fs
        .list_dir(wal_dir)
        .unwrap_or_default()
        .into_iter()
        .filter_map(
            |path| match FileNameHandler::get_file_type_from_name(&path) {
                Ok(ParsedFileType::WriteAheadLog(number)) => Some(number),
                _ => None,
            },
        )
        .collect();
    numbers.sort_unstable();

    numbers
}

/// Decode every record of a write-ahead log as a write batch.
pub(crate) fn read_wal_batches(fs: &Arc<dyn FileSystem>, wal_path: &Path) -> Vec<WriteBatch> {
    let mut reader = LogReader::new(Arc::clone(fs), wal_path).unwrap();
    let mut batches: Vec<WriteBatch> = vec![];
    while let Some(record) = reader.read_record().unwrap() {
        batches.push(WriteBatch::decode(&record).unwrap());
    }

    batches
}

/// Append a batch of puts with an explicit starting sequence number to a log file.
pub(crate) fn append_batch(
    fs: &Arc<dyn FileSystem>,
    wal_path: &Path,
    sequence: u64,
    entries: &[(&[u8], &[u8])],
) {
    let mut batch = WriteBatch::new();
    for (key, value) in entries {
        batch.put(key, value);
    }
    batch.set_sequence_number(sequence);

    let is_appending = fs.exists(wal_path);
    let mut writer = LogWriter::new(Arc::clone(fs), wal_path, is_appending).unwrap();
    writer.append(&batch.encode()).unwrap();
}

/// The path of the write-ahead log with the specified number under the default test layout.
pub(crate) fn wal_path(options: &DbOptions, wal_number: u64) -> PathBuf {
    let mut path = PathBuf::from(&options.db_path);
    path.push(format!("{wal_number:06}.log"));

    path
}

/// Get the total number of table files that make up the default column family.
pub(crate) fn total_table_files(db: &DB) -> usize {
    let mut total: usize = 0;
    for level in 0..crate::config::MAX_NUM_LEVELS {
        total += db.num_files_at_level(level);
    }

    total
}
