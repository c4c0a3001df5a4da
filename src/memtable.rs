/*!
The memtable is the in-memory sorted structure that receives writes until it is flushed to a
level-0 table file.
*/

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crossbeam_skiplist::SkipMap;

use crate::key::{InternalKey, Operation};

/// The interface that a data structure must implement to be used as a memtable in Squall.
pub(crate) trait MemTable: Send + Sync {
    /// Returns the approximate memory usage of the memtable in bytes.
    fn approximate_memory_usage(&self) -> usize;

    /// Insert a new key-value pair into the memtable.
    fn insert(&self, key: InternalKey, value: Vec<u8>);

    /**
    Get the most recent value for the given user key.

    Returns `None` if the user key does not exist in the memtable. A `Some(None)` means the most
    recent operation on the key was a deletion.
    */
    fn get(&self, user_key: &[u8]) -> Option<Option<Vec<u8>>>;

    /**
    The sequence number of the first operation inserted into this memtable, or zero if the
    memtable is empty.

    Recovery uses zero as the "never written to" marker, mirroring the fact that sequence number
    zero is never assigned to a user write.
    */
    fn first_sequence_number(&self) -> u64;

    /// Whether the memtable has received any writes.
    fn is_empty(&self) -> bool {
        self.first_sequence_number() == 0
    }

    /// All entries in internal key order. Used to materialize the memtable as a table file.
    fn entries(&self) -> Vec<(InternalKey, Vec<u8>)>;
}

/// A memtable that is backed by a lock-free skiplist.
pub(crate) struct SkipListMemTable {
    store: SkipMap<InternalKey, Vec<u8>>,

    /// A running estimate of the memory used by stored keys and values.
    approximate_memory_usage: AtomicUsize,

    /// The sequence number of the first inserted operation. Zero while the memtable is empty.
    first_sequence_number: AtomicU64,
}

/// Public methods
impl SkipListMemTable {
    pub fn new() -> Self {
        Self {
            store: SkipMap::new(),
            approximate_memory_usage: AtomicUsize::new(0),
            first_sequence_number: AtomicU64::new(0),
        }
    }
}

impl MemTable for SkipListMemTable {
    fn approximate_memory_usage(&self) -> usize {
        self.approximate_memory_usage.load(Ordering::Acquire)
    }

    fn insert(&self, key: InternalKey, value: Vec<u8>) {
        // Charge for the user bytes plus the fixed key metadata (sequence number + operation tag)
        let charged_bytes = key.get_user_key().len() + value.len() + 9;

        self.first_sequence_number
            .compare_exchange(
                0,
                key.get_sequence_number(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok();
        self.store.insert(key, value);
        self.approximate_memory_usage
            .fetch_add(charged_bytes, Ordering::AcqRel);
    }

    fn get(&self, user_key: &[u8]) -> Option<Option<Vec<u8>>> {
        // Entries with the same user key are ordered by ascending sequence number so the last
        // entry for the user key is the most recent operation
        let mut most_recent: Option<(Operation, Vec<u8>)> = None;
        let range_start = InternalKey::new(user_key.to_vec(), 0, Operation::Delete);
        for entry in self.store.range(range_start..) {
            if entry.key().get_user_key().as_slice() != user_key {
                break;
            }

            most_recent = Some((entry.key().get_operation(), entry.value().clone()));
        }

        match most_recent {
            None => None,
            Some((Operation::Delete, _)) => Some(None),
            Some((Operation::Put, value)) => Some(Some(value)),
        }
    }

    fn first_sequence_number(&self) -> u64 {
        self.first_sequence_number.load(Ordering::Acquire)
    }

    fn entries(&self) -> Vec<(InternalKey, Vec<u8>)> {
        self.store
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}
