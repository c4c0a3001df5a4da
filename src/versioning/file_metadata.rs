use serde::{Deserialize, Serialize};

use crate::key::InternalKey;

/// Metadata about a table file.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub(crate) struct FileMetadata {
    /// The globally increasing, sequential number for on-disk data files.
    file_number: u64,

    /// The index into the configured data paths that the file lives in.
    path_id: u32,

    /// The size of the table file in bytes.
    file_size: u64,

    /// The smallest internal key served by the table.
    smallest_key: Option<InternalKey>,

    /// The largest internal key served by the table.
    largest_key: Option<InternalKey>,

    /// The smallest sequence number stored in the table.
    smallest_sequence: u64,

    /// The largest sequence number stored in the table.
    largest_sequence: u64,

    /// True if the file was flagged for compaction before it was persisted.
    marked_for_compaction: bool,

    /// The number of the oldest blob file this table references, or zero.
    oldest_blob_file_number: u64,

    /// The creation time of the oldest ancestor of the data in this file, as a UNIX timestamp.
    oldest_ancester_time: u64,

    /// The creation time of the file itself, as a UNIX timestamp.
    file_creation_time: u64,
}

/// Public methods
impl FileMetadata {
    /// Create a new instance of [`FileMetadata`] for the file with the provided number.
    pub fn new(file_number: u64) -> Self {
        Self {
            file_number,
            path_id: 0,
            file_size: 0,
            smallest_key: None,
            largest_key: None,
            smallest_sequence: 0,
            largest_sequence: 0,
            marked_for_compaction: false,
            oldest_blob_file_number: 0,
            oldest_ancester_time: 0,
            file_creation_time: 0,
        }
    }

    pub fn file_number(&self) -> u64 {
        self.file_number
    }

    pub fn path_id(&self) -> u32 {
        self.path_id
    }

    pub fn get_file_size(&self) -> u64 {
        self.file_size
    }

    pub fn set_file_size(&mut self, file_size: u64) {
        self.file_size = file_size;
    }

    /**
    Get the smallest key served by the table file.

    # Panics

    The field must have been set before access.
    */
    pub fn smallest_key(&self) -> &InternalKey {
        self.smallest_key.as_ref().unwrap()
    }

    pub fn set_smallest_key(&mut self, key: Option<InternalKey>) {
        self.smallest_key = key;
    }

    /**
    Get the largest key served by the table file.

    # Panics

    The field must have been set before access.
    */
    pub fn largest_key(&self) -> &InternalKey {
        self.largest_key.as_ref().unwrap()
    }

    pub fn set_largest_key(&mut self, key: Option<InternalKey>) {
        self.largest_key = key;
    }

    pub fn smallest_sequence(&self) -> u64 {
        self.smallest_sequence
    }

    pub fn set_smallest_sequence(&mut self, sequence_number: u64) {
        self.smallest_sequence = sequence_number;
    }

    pub fn largest_sequence(&self) -> u64 {
        self.largest_sequence
    }

    pub fn set_largest_sequence(&mut self, sequence_number: u64) {
        self.largest_sequence = sequence_number;
    }

    pub fn set_oldest_ancester_time(&mut self, timestamp: u64) {
        self.oldest_ancester_time = timestamp;
    }

    pub fn set_file_creation_time(&mut self, timestamp: u64) {
        self.file_creation_time = timestamp;
    }
}
