use bincode::Options;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;

use crate::errors::{SquallError, SquallResult};

use super::file_metadata::FileMetadata;

/**
A delta to be applied to the version state of the database.

Version edits are the record type of the manifest file. Replaying every edit of a manifest in
order reconstructs the column-family set, the per-level file layout of each column family, and the
file-number/sequence-number high-water marks.

# Legacy

This is synonymous to RocksDB's `VersionEdit` (and LevelDB's of the same name).
*/
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub(crate) struct VersionEdit {
    /// The column family the edit applies to. Edits without an id target the default family.
    pub(crate) column_family_id: Option<u32>,

    /// The name of the column family being added. Only set with `is_column_family_add`.
    pub(crate) column_family_name: Option<String>,

    /// True when this edit records the creation of a column family.
    pub(crate) is_column_family_add: bool,

    /// True when this edit records the removal of a column family.
    pub(crate) is_column_family_drop: bool,

    /**
    The write-ahead log number the column family has been flushed through. Logs with strictly
    smaller numbers hold no live data for this column family.
    */
    pub(crate) log_number: Option<u64>,

    /// A snapshot of the file number counter, persisted for recovery.
    pub(crate) next_file_number: Option<u64>,

    /// A snapshot of the most recently used sequence number, persisted for recovery.
    pub(crate) last_sequence: Option<u64>,

    /// The database id, when the configuration persists it in the manifest.
    pub(crate) db_id: Option<String>,

    /// Files added to the version with the level each file should be added at.
    pub(crate) added_files: Vec<(u32, FileMetadata)>,

    /// Files removed from the version as `(level, file_number)` pairs.
    pub(crate) deleted_files: Vec<(u32, u64)>,
}

/// Crate-only methods
impl VersionEdit {
    /// Create an empty edit targeting the specified column family.
    pub(crate) fn for_column_family(column_family_id: u32) -> Self {
        VersionEdit {
            column_family_id: Some(column_family_id),
            ..VersionEdit::default()
        }
    }

    /// The number of file additions and deletions carried by this edit.
    pub(crate) fn num_entries(&self) -> usize {
        self.added_files.len() + self.deleted_files.len()
    }
}

impl TryFrom<&[u8]> for VersionEdit {
    type Error = SquallError;

    fn try_from(value: &[u8]) -> SquallResult<VersionEdit> {
        bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .deserialize(value)
            .map_err(|decode_err| {
                SquallError::Corruption(format!(
                    "Failed to decode a manifest record into a version edit. Error: {decode_err}"
                ))
            })
    }
}

impl From<&VersionEdit> for Vec<u8> {
    fn from(value: &VersionEdit) -> Vec<u8> {
        bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .serialize(value)
            .unwrap()
    }
}
