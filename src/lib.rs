pub mod fs;

mod batch;
mod column_family;
mod config;
mod errors;
mod file_names;
mod key;
mod logs;
mod memtable;
mod tables;
mod utils;
mod versioning;

pub mod db;
pub use db::DB;

pub use batch::WriteBatch;
pub use config::{DEFAULT_COLUMN_FAMILY_NAME, PERSISTENT_STATS_COLUMN_FAMILY_NAME};
pub use errors::{SquallError, SquallResult};

pub mod options;
pub use options::{
    ColumnFamilyDescriptor, ColumnFamilyOptions, DbOptions, WalRecoveryMode, WriteOptions,
};

pub mod wal_filter;
pub use wal_filter::{WalFilter, WalProcessingOption, WalRecordDecision};
