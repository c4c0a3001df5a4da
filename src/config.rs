/*!
This module contains global configuration constants for Squall.

These values correspond to knobs that RocksDB and LevelDB leave configurable but that do not
affect recovery decisions. To keep the option surface focused on open-and-recover behavior, they
are kept static here.
*/

/// The maximum number of table file levels that is allowed.
pub(crate) const MAX_NUM_LEVELS: usize = 7;

/// The name of the column family that always exists.
pub const DEFAULT_COLUMN_FAMILY_NAME: &str = "default";

/// The reserved name of the column family that holds persisted statistics.
pub const PERSISTENT_STATS_COLUMN_FAMILY_NAME: &str = "__system_stats__";

/// Reserved key holding the on-disk format version of the persistent stats column family.
pub(crate) const STATS_FORMAT_VERSION_KEY: &[u8] = b"format_version";

/// Reserved key holding the oldest format version the stats column family is compatible with.
pub(crate) const STATS_COMPATIBLE_VERSION_KEY: &[u8] = b"compatible_version";

/// The newest persistent stats format this build writes.
pub(crate) const STATS_FORMAT_VERSION_CURRENT: u64 = 1;

/// The oldest persistent stats format this build can still read.
pub(crate) const STATS_FORMAT_VERSION_COMPATIBLE: u64 = 1;

/**
A sequence number this high is never assigned to a write. It doubles as the "nothing recovered"
sentinel during write-ahead log replay.
*/
pub(crate) const MAX_SEQUENCE_NUMBER: u64 = u64::MAX;

/// The hard ceiling applied when clamping `max_open_files` during option sanitization.
pub(crate) const MAX_OPEN_FILES_CEILING: i32 = 0x0040_0000;

/// The floor applied when clamping `max_open_files` during option sanitization.
pub(crate) const MAX_OPEN_FILES_FLOOR: i32 = 20;

/// Default `bytes_per_sync` applied when a rate limiter is configured, 1 MiB.
pub(crate) const DEFAULT_BYTES_PER_SYNC: u64 = 1024 * 1024;

/// Default write throttle rate when none can be derived, 16 MiB/s.
pub(crate) const DEFAULT_DELAYED_WRITE_RATE: u64 = 16 * 1024 * 1024;

/// Default compaction readahead applied when direct reads are requested, 2 MiB.
pub(crate) const DEFAULT_DIRECT_READ_COMPACTION_READAHEAD: usize = 2 * 1024 * 1024;
