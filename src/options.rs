/*!
This module holds the various option structures that can be passed to Squall operations, plus the
sanitization and validation passes that run before a database open touches the disk.

There is a mix of options to configure here that are reminiscent of those configurable in LevelDB
and RocksDB. Only knobs that change open-and-recover behavior are surfaced; steady-state tuning
knobs live in [`crate::config`] as constants.
*/

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use std::collections::HashMap;

use crate::config::{
    DEFAULT_BYTES_PER_SYNC, DEFAULT_DELAYED_WRITE_RATE, DEFAULT_DIRECT_READ_COMPACTION_READAHEAD,
    MAX_OPEN_FILES_CEILING, MAX_OPEN_FILES_FLOOR,
};
use crate::errors::{SquallError, SquallResult};
use crate::file_names::{FileNameHandler, ParsedFileType};
use crate::fs::{FileSystem, InMemoryFileSystem, OsFileSystem};
use crate::wal_filter::WalFilter;

/**
The policy applied when write-ahead log replay encounters a corrupt or truncated record.

# Legacy

These correspond one-to-one with RocksDB's `WALRecoveryMode` values.
*/
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WalRecoveryMode {
    /**
    Fail on interior corruption but accept an incomplete record at the tail of the last log,
    which is the expected artifact of a crash mid-write. This is the default.
    */
    TolerateCorruptedTailRecords,

    /// Fail on any irregularity, including a torn tail record.
    AbsoluteConsistency,

    /**
    Stop replay at the first irregularity and recover the longest self-consistent prefix of the
    write history.
    */
    PointInTimeRecovery,

    /// Skip anything unreadable and keep going.
    SkipAnyCorruptedRecords,
}

impl Default for WalRecoveryMode {
    fn default() -> Self {
        WalRecoveryMode::TolerateCorruptedTailRecords
    }
}

/// A data path and the cumulative bytes of table files it is targeted to hold.
#[derive(Clone, Debug)]
pub struct DbPath {
    /// The directory table files may be placed in.
    pub path: PathBuf,

    /// The target cumulative size of the table files in this path.
    pub target_size: u64,
}

/// The shape of compaction applied to a column family.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompactionStyle {
    /// Classic leveled compaction.
    Level,
    /// First-in-first-out deletion of whole files. Requires every file to live at level 0.
    Fifo,
}

/// Options scoped to a single column family.
#[derive(Clone, Debug)]
pub struct ColumnFamilyOptions {
    /**
    The maximum size that the column family's memtable can reach before it is flushed to disk.

    **This defaults to 4 MiB.**
    */
    pub write_buffer_size: usize,

    /// The maximum number of memtables the column family may hold in memory at once.
    pub max_write_buffer_number: usize,

    /// The compaction shape for this column family.
    pub compaction_style: CompactionStyle,
}

impl Default for ColumnFamilyOptions {
    fn default() -> Self {
        Self {
            write_buffer_size: 4 * 1024 * 1024,
            max_write_buffer_number: 2,
            compaction_style: CompactionStyle::Level,
        }
    }
}

impl ColumnFamilyOptions {
    /// Reject option combinations this column family cannot run with.
    pub(crate) fn validate(&self, name: &str) -> SquallResult<()> {
        if self.write_buffer_size == 0 {
            return Err(SquallError::InvalidArgument(format!(
                "write_buffer_size must be greater than 0 (column family {name})."
            )));
        }

        if self.max_write_buffer_number == 0 {
            return Err(SquallError::InvalidArgument(format!(
                "max_write_buffer_number must be greater than 0 (column family {name})."
            )));
        }

        Ok(())
    }
}

/// A named column family paired with the options it should be opened with.
#[derive(Clone, Debug)]
pub struct ColumnFamilyDescriptor {
    /// The unique name of the column family.
    pub name: String,

    /// Options for the column family.
    pub options: ColumnFamilyOptions,
}

impl ColumnFamilyDescriptor {
    /// Create a new instance of [`ColumnFamilyDescriptor`].
    pub fn new(name: impl Into<String>, options: ColumnFamilyOptions) -> Self {
        Self {
            name: name.into(),
            options,
        }
    }
}

/// Caps the aggregate memory used by memtables across all column families.
#[derive(Debug)]
pub struct WriteBufferManager {
    buffer_size: usize,
}

impl WriteBufferManager {
    /// Create a manager with the specified aggregate budget. Zero means unlimited.
    pub fn new(buffer_size: usize) -> Self {
        Self { buffer_size }
    }

    /// The aggregate memtable budget in bytes. Zero means unlimited.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

/// Throttles the rate background work may write at.
#[derive(Debug)]
pub struct RateLimiter {
    bytes_per_second: u64,
}

impl RateLimiter {
    /// Create a limiter allowing `bytes_per_second` of background writes.
    pub fn new(bytes_per_second: u64) -> Self {
        Self { bytes_per_second }
    }

    /// The configured write rate.
    pub fn get_bytes_per_second(&self) -> u64 {
        self.bytes_per_second
    }
}

/**
Tracks the table files known to the database for disk accounting and out-of-space recovery.

Only the bookkeeping surface that open interacts with is modeled here; deletion scheduling is the
concern of the background machinery.
*/
#[derive(Debug, Default)]
pub struct SstFileManager {
    tracked_files: Mutex<HashMap<PathBuf, u64>>,
}

impl SstFileManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        SstFileManager::default()
    }

    /// Record a table file and its size.
    pub(crate) fn on_add_file(&self, path: PathBuf, file_size: u64) {
        self.tracked_files.lock().insert(path, file_size);
    }

    /// The cumulative size of all tracked table files.
    pub fn get_total_size(&self) -> u64 {
        self.tracked_files.lock().values().sum()
    }

    /// The number of tracked table files.
    pub fn num_tracked_files(&self) -> usize {
        self.tracked_files.lock().len()
    }
}

/// The number of background jobs of each kind the worker pools should accommodate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BgJobLimits {
    /// The maximum number of concurrent flush jobs.
    pub max_flushes: usize,

    /// The maximum number of concurrent compaction jobs.
    pub max_compactions: usize,
}

impl BgJobLimits {
    /**
    Derive the background job limits from `max_background_jobs` and the legacy per-kind knobs.

    A positive legacy value wins over the derived split. With `parallelize_compactions` unset the
    compaction pool is held at one job.
    */
    pub(crate) fn from_options(
        max_background_flushes: i32,
        max_background_compactions: i32,
        max_background_jobs: i32,
        parallelize_compactions: bool,
    ) -> Self {
        let total_jobs = max_background_jobs.max(0) as usize;
        let derived_flushes = std::cmp::max(1, total_jobs / 4);
        let derived_compactions = std::cmp::max(1, total_jobs.saturating_sub(derived_flushes));

        let max_flushes = if max_background_flushes > 0 {
            max_background_flushes as usize
        } else {
            derived_flushes
        };
        let max_compactions = if max_background_compactions > 0 {
            max_background_compactions as usize
        } else if parallelize_compactions {
            derived_compactions
        } else {
            1
        };

        Self {
            max_flushes,
            max_compactions,
        }
    }
}

/**
Holds options to control database behavior.

Construct with [`DbOptions::default`] (OS file system rooted at the current working directory) or
[`DbOptions::with_memory_env`] (in-memory file system, useful for tests), then adjust the public
fields. [`DbOptions::sanitize`] normalizes a configuration into the canonical form that open
consumes.
*/
#[derive(Clone, Debug)]
pub struct DbOptions {
    /**
    The path of the directory to use for the database's operations.

    **This defaults to the current working directory.**
    */
    pub db_path: String,

    /**
    The directory write-ahead logs are placed in.

    **Defaults to `db_path` when left empty.**
    */
    pub wal_dir: String,

    /// Additional data paths table files may be spread over. Path 0 is the default. Max 4 paths.
    pub db_paths: Vec<DbPath>,

    /// If true, the database will be created if it is missing.
    pub create_if_missing: bool,

    /// If true, column families named at open but absent from the manifest are created.
    pub create_missing_column_families: bool,

    /// If true, an error is raised if the database already exists.
    pub error_if_exists: bool,

    /// If true, the implementation does aggressive checking of the data it is processing.
    pub paranoid_checks: bool,

    /// The policy applied to corrupt or truncated write-ahead log records during recovery.
    pub wal_recovery_mode: WalRecoveryMode,

    /**
    If true, recovered memtables that fit in memory are kept there instead of being flushed to
    level-0 table files, and the replayed logs are retained.
    */
    pub avoid_flush_during_recovery: bool,

    /**
    Enables two-phase-commit write-ahead log encoding. 2PC logs may carry non-contiguous sequence
    numbers, which forces `avoid_flush_during_recovery` off.
    */
    pub allow_2pc: bool,

    /// If true, the database id is persisted in the manifest in addition to the IDENTITY file.
    pub write_dbid_to_manifest: bool,

    /// If true, the reserved statistics column family is maintained.
    pub persist_stats_to_disk: bool,

    /// The number of write-ahead logs kept around for reuse instead of being deleted.
    pub recycle_log_file_num: usize,

    /// If true, write-ahead log buffers are only flushed when explicitly asked to.
    pub manual_wal_flush: bool,

    /// An optional hook shown every write-ahead log record during recovery.
    pub wal_filter: Option<Arc<dyn WalFilter>>,

    /// Strict-open gate: fail if any write-ahead log exists.
    pub error_if_log_file_exist: bool,

    /// Strict-open gate: fail if any write-ahead log contains data.
    pub error_if_data_exists_in_logs: bool,

    /// Maximum open files. `-1` means unbounded; other values are clamped during sanitization.
    pub max_open_files: i32,

    /// Aggregate memtable budget used to size a default [`WriteBufferManager`].
    pub db_write_buffer_size: usize,

    /// Shared cap on aggregate memtable memory. Built from `db_write_buffer_size` when absent.
    pub write_buffer_manager: Option<Arc<WriteBufferManager>>,

    /// Combined background job budget that the flush/compaction split is derived from.
    pub max_background_jobs: i32,

    /// Legacy explicit flush job budget. Positive values win over the derived split.
    pub max_background_flushes: i32,

    /// Legacy explicit compaction job budget. Positive values win over the derived split.
    pub max_background_compactions: i32,

    /// Optional throttle for background writes.
    pub rate_limiter: Option<Arc<RateLimiter>>,

    /// Incrementally sync written data every this many bytes. Zero disables incremental syncing.
    pub bytes_per_sync: u64,

    /// The rate writes are throttled to when the database is close to stalling.
    pub delayed_write_rate: u64,

    /// Time-to-live for archived write-ahead logs. Non-zero disables log recycling.
    pub wal_ttl_seconds: u64,

    /// Size cap for archived write-ahead logs. Non-zero disables log recycling.
    pub wal_size_limit_mb: u64,

    /// If true, data files are read without going through the OS page cache.
    pub use_direct_reads: bool,

    /// If true, flush and compaction output is written without going through the OS page cache.
    pub use_direct_io_for_flush_and_compaction: bool,

    /// Readahead applied to compaction inputs. Zero lets sanitization pick a default.
    pub compaction_readahead_size: usize,

    /// Derived: whether compactions open dedicated table readers for their inputs.
    pub new_table_reader_for_compaction_inputs: bool,

    /// If true, data files may be read through memory maps.
    pub allow_mmap_reads: bool,

    /// If true, data files may be written through memory maps.
    pub allow_mmap_writes: bool,

    /// The number of info log files to keep. Must be positive.
    pub keep_log_file_num: usize,

    /// If true, writes may be reordered for throughput.
    pub unordered_write: bool,

    /// If true, multiple writers may insert into a memtable concurrently.
    pub allow_concurrent_memtable_write: bool,

    /// If true, WAL append and memtable insert are pipelined.
    pub enable_pipelined_write: bool,

    /// If true, all column families are flushed atomically together.
    pub atomic_flush: bool,

    /// If true, WAL writes and memtable writes are issued from separate queues.
    pub two_write_queues: bool,

    /// Derived: whether table file sizes are re-verified against the manifest at open.
    pub skip_checking_sst_file_sizes_on_db_open: bool,

    /// Tracks table files for disk accounting. A default manager is built when absent.
    pub sst_file_manager: Option<Arc<SstFileManager>>,

    /// The number of bytes to preallocate for manifest files.
    pub manifest_preallocation_size: u64,

    /**
    A wrapper around a particular file system to use.

    **A default [`OsFileSystem`] is synthesized during sanitization when unset.**
    */
    pub filesystem_provider: Option<Arc<dyn FileSystem>>,
}

impl Default for DbOptions {
    fn default() -> Self {
        DbOptions {
            db_path: std::env::current_dir()
                .unwrap()
                .to_str()
                .unwrap()
                .to_owned(),
            wal_dir: String::new(),
            db_paths: vec![],
            create_if_missing: false,
            create_missing_column_families: false,
            error_if_exists: false,
            paranoid_checks: true,
            wal_recovery_mode: WalRecoveryMode::default(),
            avoid_flush_during_recovery: false,
            allow_2pc: false,
            write_dbid_to_manifest: false,
            persist_stats_to_disk: false,
            recycle_log_file_num: 0,
            manual_wal_flush: false,
            wal_filter: None,
            error_if_log_file_exist: false,
            error_if_data_exists_in_logs: false,
            max_open_files: -1,
            db_write_buffer_size: 0,
            write_buffer_manager: None,
            max_background_jobs: 2,
            max_background_flushes: -1,
            max_background_compactions: -1,
            rate_limiter: None,
            bytes_per_sync: 0,
            delayed_write_rate: 0,
            wal_ttl_seconds: 0,
            wal_size_limit_mb: 0,
            use_direct_reads: false,
            use_direct_io_for_flush_and_compaction: false,
            compaction_readahead_size: 0,
            new_table_reader_for_compaction_inputs: false,
            allow_mmap_reads: false,
            allow_mmap_writes: false,
            keep_log_file_num: 1000,
            unordered_write: false,
            allow_concurrent_memtable_write: true,
            enable_pipelined_write: false,
            atomic_flush: false,
            two_write_queues: false,
            skip_checking_sst_file_sizes_on_db_open: false,
            sst_file_manager: None,
            manifest_preallocation_size: 4 * 1024 * 1024,
            filesystem_provider: None,
        }
    }
}

/// Public methods
impl DbOptions {
    /// Options backed by an in-memory file system, rooted at a fixed virtual path.
    pub fn with_memory_env() -> Self {
        DbOptions {
            db_path: "/squall".to_string(),
            filesystem_provider: Some(Arc::new(InMemoryFileSystem::new())),
            ..DbOptions::default()
        }
    }

    /// Get a strong reference to the file system provider.
    ///
    /// # Panics
    ///
    /// Panics when called before sanitization filled in a default provider.
    pub fn filesystem_provider(&self) -> Arc<dyn FileSystem> {
        Arc::clone(self.filesystem_provider.as_ref().unwrap())
    }

    /**
    Normalize this configuration into the canonical form open consumes.

    Each rule is a contract inherited from the original engine; they are applied in order. The
    only disk side effect permitted here is the cleanup of soft-deleted `*.log.trash` files when
    the write-ahead log directory is separate from the primary data path.
    */
    pub fn sanitize(mut self) -> SquallResult<DbOptions> {
        if self.filesystem_provider.is_none() {
            self.filesystem_provider = Some(Arc::new(OsFileSystem::new()));
        }

        // `max_open_files == -1` means an "unbounded" number of open files
        if self.max_open_files != -1 {
            self.max_open_files = self
                .max_open_files
                .clamp(MAX_OPEN_FILES_FLOOR, MAX_OPEN_FILES_CEILING);
        }

        if self.write_buffer_manager.is_none() {
            self.write_buffer_manager =
                Some(Arc::new(WriteBufferManager::new(self.db_write_buffer_size)));
        }

        // Size the background pools now; the workers themselves are only started after a
        // successful open
        let bg_job_limits = self.get_bg_job_limits();
        log::debug!(
            "Sized background pools to {num_flushes} flush jobs and {num_compactions} compaction \
            jobs.",
            num_flushes = bg_job_limits.max_flushes,
            num_compactions = bg_job_limits.max_compactions
        );

        if let Some(rate_limiter) = &self.rate_limiter {
            if self.bytes_per_sync == 0 {
                self.bytes_per_sync = DEFAULT_BYTES_PER_SYNC;
            }

            if self.delayed_write_rate == 0 {
                self.delayed_write_rate = rate_limiter.get_bytes_per_second();
            }
        }
        if self.delayed_write_rate == 0 {
            self.delayed_write_rate = DEFAULT_DELAYED_WRITE_RATE;
        }

        // Log recycling is incompatible with bounded log retention
        if self.wal_ttl_seconds > 0 || self.wal_size_limit_mb > 0 {
            self.recycle_log_file_num = 0;
        }

        /*
        Point-in-time recovery defines the end of the log as the first corrupt record it
        encounters. A recycled log's tail bytes are stale but structurally valid, which defeats
        that definition. Absolute consistency cannot work either since even a clean shutdown
        leaves old junk at the end of a recycled file.
        */
        if self.recycle_log_file_num > 0
            && matches!(
                self.wal_recovery_mode,
                WalRecoveryMode::PointInTimeRecovery | WalRecoveryMode::AbsoluteConsistency
            )
        {
            self.recycle_log_file_num = 0;
        }

        if self.wal_dir.is_empty() {
            self.wal_dir = self.db_path.clone();
        }
        while self.wal_dir.len() > 1 && self.wal_dir.ends_with('/') {
            self.wal_dir.truncate(self.wal_dir.len() - 1);
        }

        if self.db_paths.is_empty() {
            self.db_paths.push(DbPath {
                path: PathBuf::from(&self.db_path),
                target_size: u64::MAX,
            });
        }

        if self.use_direct_reads && self.compaction_readahead_size == 0 {
            self.compaction_readahead_size = DEFAULT_DIRECT_READ_COMPACTION_READAHEAD;
        }

        if self.compaction_readahead_size > 0 || self.use_direct_reads {
            self.new_table_reader_for_compaction_inputs = true;
        }

        // With 2PC there is no guarantee that consecutive log files have consecutive sequence
        // numbers, which makes in-memory recovery bookkeeping unsound
        if self.allow_2pc {
            self.avoid_flush_during_recovery = false;
        }

        if !self.wal_dir_same_as_db_path() {
            self.delete_stale_trash_logs();
        }

        if self.sst_file_manager.is_none() {
            self.sst_file_manager = Some(Arc::new(SstFileManager::new()));
        }

        if !self.paranoid_checks {
            self.skip_checking_sst_file_sizes_on_db_open = true;
            log::info!("File size check will be skipped during open.");
        }

        Ok(self)
    }

    /// The background job limits derived from the configured budgets.
    pub fn get_bg_job_limits(&self) -> BgJobLimits {
        BgJobLimits::from_options(
            self.max_background_flushes,
            self.max_background_compactions,
            self.max_background_jobs,
            /* parallelize_compactions */ true,
        )
    }

    /// Whether the write-ahead log directory and the primary data path are provably the same.
    pub(crate) fn wal_dir_same_as_db_path(&self) -> bool {
        if self.wal_dir.is_empty() {
            return true;
        }

        let wal_dir = PathBuf::from(&self.wal_dir);
        let primary_path = self
            .db_paths
            .first()
            .map(|db_path| db_path.path.clone())
            .unwrap_or_else(|| PathBuf::from(&self.db_path));

        wal_dir == primary_path
    }
}

/// Private methods
impl DbOptions {
    /**
    Unlink `*.log.trash` files left behind in a separate write-ahead log directory.

    When the log directory doubles as a data path the trash files are owned by the deletion
    scheduler instead and must be left alone here.
    */
    fn delete_stale_trash_logs(&self) {
        let fs = self.filesystem_provider();
        let wal_dir = PathBuf::from(&self.wal_dir);
        let children = match fs.list_dir(&wal_dir) {
            Ok(children) => children,
            // The directory may legitimately not exist yet
            Err(_list_err) => return,
        };

        for child in children {
            if let Ok(ParsedFileType::TrashWriteAheadLog(log_number)) =
                FileNameHandler::get_file_type_from_name(&child)
            {
                log::info!(
                    "Deleting stale trash log #{log_number} at {child:?} from the write-ahead \
                    log directory."
                );
                if let Err(remove_err) = fs.remove_file(&child) {
                    log::warn!("Failed to delete trash log at {child:?}. Error: {remove_err}");
                }
            }
        }
    }
}

/**
Reject option combinations the engine cannot run with.

All failures here are raised before any disk mutation so a failed open leaves no trace.
*/
pub(crate) fn validate_options(
    db_options: &DbOptions,
    column_families: &[ColumnFamilyDescriptor],
) -> SquallResult<()> {
    for descriptor in column_families {
        descriptor.options.validate(&descriptor.name)?;
    }

    if db_options.db_paths.len() > 4 {
        return Err(SquallError::NotSupported(
            "More than four DB paths are not supported yet.".to_string(),
        ));
    }

    if db_options.allow_mmap_reads && db_options.use_direct_reads {
        return Err(SquallError::NotSupported(
            "If memory mapped reads (allow_mmap_reads) are enabled then direct I/O reads \
            (use_direct_reads) must be disabled."
                .to_string(),
        ));
    }

    if db_options.allow_mmap_writes && db_options.use_direct_io_for_flush_and_compaction {
        return Err(SquallError::NotSupported(
            "If memory mapped writes (allow_mmap_writes) are enabled then direct I/O writes \
            (use_direct_io_for_flush_and_compaction) must be disabled."
                .to_string(),
        ));
    }

    if db_options.keep_log_file_num == 0 {
        return Err(SquallError::InvalidArgument(
            "keep_log_file_num must be greater than 0".to_string(),
        ));
    }

    if db_options.unordered_write && !db_options.allow_concurrent_memtable_write {
        return Err(SquallError::InvalidArgument(
            "unordered_write is incompatible with !allow_concurrent_memtable_write".to_string(),
        ));
    }

    if db_options.unordered_write && db_options.enable_pipelined_write {
        return Err(SquallError::InvalidArgument(
            "unordered_write is incompatible with enable_pipelined_write".to_string(),
        ));
    }

    if db_options.atomic_flush && db_options.enable_pipelined_write {
        return Err(SquallError::InvalidArgument(
            "atomic_flush is incompatible with enable_pipelined_write".to_string(),
        ));
    }

    Ok(())
}

/// Options for write operations.
#[derive(Clone, Copy, Debug, Default)]
pub struct WriteOptions {
    /// Sync the write-ahead log before the write is acknowledged.
    pub sync: bool,

    /// Mark the write as low priority so it yields to user traffic.
    pub low_pri: bool,

    /// Fail instead of waiting if the write would have to stall.
    pub no_slowdown: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sanitize_fills_in_defaults() {
        let mut options = DbOptions::with_memory_env();
        options.db_path = "/storm/system".to_string();
        options.max_open_files = 5;

        let sanitized = options.sanitize().unwrap();

        assert_eq!(sanitized.max_open_files, 20);
        assert_eq!(sanitized.wal_dir, "/storm/system");
        assert_eq!(sanitized.db_paths.len(), 1);
        assert_eq!(sanitized.db_paths[0].target_size, u64::MAX);
        assert_eq!(sanitized.delayed_write_rate, DEFAULT_DELAYED_WRITE_RATE);
        assert!(sanitized.write_buffer_manager.is_some());
        assert!(sanitized.sst_file_manager.is_some());
    }

    #[test]
    fn sanitize_disables_recycling_under_point_in_time_recovery() {
        let mut options = DbOptions::with_memory_env();
        options.recycle_log_file_num = 4;
        options.wal_recovery_mode = WalRecoveryMode::PointInTimeRecovery;

        let sanitized = options.sanitize().unwrap();
        assert_eq!(sanitized.recycle_log_file_num, 0);

        let mut options = DbOptions::with_memory_env();
        options.recycle_log_file_num = 4;
        options.wal_ttl_seconds = 60;

        let sanitized = options.sanitize().unwrap();
        assert_eq!(sanitized.recycle_log_file_num, 0);
    }

    #[test]
    fn sanitize_forces_recovery_flushes_under_two_phase_commit() {
        let mut options = DbOptions::with_memory_env();
        options.allow_2pc = true;
        options.avoid_flush_during_recovery = true;

        let sanitized = options.sanitize().unwrap();
        assert!(!sanitized.avoid_flush_during_recovery);
    }

    #[test]
    fn sanitize_derives_direct_read_settings() {
        let mut options = DbOptions::with_memory_env();
        options.use_direct_reads = true;

        let sanitized = options.sanitize().unwrap();
        assert_eq!(
            sanitized.compaction_readahead_size,
            DEFAULT_DIRECT_READ_COMPACTION_READAHEAD
        );
        assert!(sanitized.new_table_reader_for_compaction_inputs);
    }

    #[test]
    fn sanitize_inherits_sync_settings_from_the_rate_limiter() {
        let mut options = DbOptions::with_memory_env();
        options.rate_limiter = Some(Arc::new(RateLimiter::new(8 * 1024 * 1024)));

        let sanitized = options.sanitize().unwrap();
        assert_eq!(sanitized.bytes_per_sync, DEFAULT_BYTES_PER_SYNC);
        assert_eq!(sanitized.delayed_write_rate, 8 * 1024 * 1024);
    }

    #[test]
    fn validation_rejects_incompatible_combinations() {
        let cases: Vec<(fn(&mut DbOptions), bool)> = vec![
            (
                |options| {
                    options.allow_mmap_reads = true;
                    options.use_direct_reads = true;
                },
                true,
            ),
            (
                |options| {
                    options.allow_mmap_writes = true;
                    options.use_direct_io_for_flush_and_compaction = true;
                },
                true,
            ),
            (|options| options.keep_log_file_num = 0, false),
            (
                |options| {
                    options.unordered_write = true;
                    options.allow_concurrent_memtable_write = false;
                },
                false,
            ),
            (
                |options| {
                    options.unordered_write = true;
                    options.enable_pipelined_write = true;
                },
                false,
            ),
            (
                |options| {
                    options.atomic_flush = true;
                    options.enable_pipelined_write = true;
                },
                false,
            ),
        ];

        for (mutate, expect_not_supported) in cases {
            let mut options = DbOptions::with_memory_env();
            mutate(&mut options);
            let result = validate_options(&options, &[]);
            let error = result.expect_err("the combination should have been rejected");
            if expect_not_supported {
                assert!(error.is_not_supported(), "unexpected error: {error}");
            } else {
                assert!(error.is_invalid_argument(), "unexpected error: {error}");
            }
        }
    }

    #[test]
    fn validation_enforces_the_data_path_limit() {
        let mut options = DbOptions::with_memory_env();
        options.db_paths = (0..4)
            .map(|i| DbPath {
                path: PathBuf::from(format!("/storm/path{i}")),
                target_size: 1024,
            })
            .collect();
        assert!(validate_options(&options, &[]).is_ok());

        options.db_paths.push(DbPath {
            path: PathBuf::from("/storm/path4"),
            target_size: 1024,
        });
        let error = validate_options(&options, &[]).unwrap_err();
        assert!(error.is_not_supported());
    }

    #[test]
    fn background_job_limits_derive_from_the_combined_budget() {
        let limits = BgJobLimits::from_options(-1, -1, 8, true);
        assert_eq!(
            limits,
            BgJobLimits {
                max_flushes: 2,
                max_compactions: 6
            }
        );

        // Legacy values win when set
        let limits = BgJobLimits::from_options(3, 5, 2, true);
        assert_eq!(
            limits,
            BgJobLimits {
                max_flushes: 3,
                max_compactions: 5
            }
        );
    }
}
