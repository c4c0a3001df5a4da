/*!
This module contains the pluggable hook that is offered a look at every write-ahead log record
during recovery.
*/

use std::collections::HashMap;

use crate::batch::WriteBatch;

/// What replay should do with the record a [`WalFilter`] was shown.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WalProcessingOption {
    /// Continue replaying the (possibly rewritten) record normally.
    ContinueProcessing,
    /// Skip the current record and continue with the next one.
    IgnoreCurrentRecord,
    /// Skip the current record and stop replaying this and all later write-ahead logs.
    StopReplay,
    /// Treat the current record as corrupted and apply the recovery mode's corruption policy.
    CorruptedRecord,
}

/// The verdict a [`WalFilter`] returns for a single record.
pub struct WalRecordDecision {
    /// What replay should do next.
    pub option: WalProcessingOption,

    /**
    A replacement batch when the filter rewrote the record.

    The replacement must not contain more operations than the original record; its starting
    sequence number is forced to match the original regardless of what the filter set.
    */
    pub new_batch: Option<WriteBatch>,
}

impl WalRecordDecision {
    /// Shorthand for a decision that passes the record through untouched.
    pub fn continue_processing() -> Self {
        WalRecordDecision {
            option: WalProcessingOption::ContinueProcessing,
            new_batch: None,
        }
    }
}

/**
A hook that may inspect, rewrite, skip, or reject every record replayed from the write-ahead logs
during recovery.
*/
pub trait WalFilter: Send + Sync {
    /// A name identifying the filter in log messages and error statuses.
    fn name(&self) -> &str;

    /**
    Called once before replay starts with the mapping of column family ids to the log number each
    column family has already been flushed through, plus the name-to-id mapping.
    */
    fn column_family_log_number_map(
        &self,
        _cf_log_numbers: &HashMap<u32, u64>,
        _cf_name_to_id: &HashMap<String, u32>,
    ) {
    }

    /// Called for every record read from a write-ahead log during recovery.
    fn log_record_found(
        &self,
        log_number: u64,
        log_file_name: &str,
        batch: &WriteBatch,
    ) -> WalRecordDecision;
}

impl std::fmt::Debug for dyn WalFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WalFilter({})", self.name())
    }
}
