/*!
This module contains the in-memory representation of column families.

A column family is an independently-keyed namespace within one database. All column families share
the write-ahead log and the manifest but own their memtable and their per-level table file layout.
*/

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::batch::DEFAULT_COLUMN_FAMILY_ID;
use crate::config::{DEFAULT_COLUMN_FAMILY_NAME, MAX_NUM_LEVELS};
use crate::errors::{SquallError, SquallResult};
use crate::memtable::{MemTable, SkipListMemTable};
use crate::options::ColumnFamilyOptions;
use crate::versioning::file_metadata::FileMetadata;

/**
An atomic bundle of the state a reader needs: the current memtable, the current table file
layout, and the options the column family runs with.

A fresh super-version is installed whenever any of the three changes.
*/
pub(crate) struct SuperVersion {
    /// The memtable receiving writes at install time.
    pub(crate) memtable: Arc<SkipListMemTable>,

    /// The per-level table file layout at install time.
    pub(crate) files: [Vec<Arc<FileMetadata>>; MAX_NUM_LEVELS],

    /// A monotonically increasing installation counter.
    pub(crate) version_number: u64,

    /// The options the column family was opened with.
    pub(crate) options: ColumnFamilyOptions,
}

/// The in-memory state of a single column family.
pub(crate) struct ColumnFamily {
    /// The unique, stable id of the column family.
    id: u32,

    /// The unique name of the column family.
    name: String,

    /// Options for the column family.
    options: ColumnFamilyOptions,

    /**
    The write-ahead log number this column family has been flushed through.

    Every log with a strictly smaller number holds no live data for this column family and can be
    ignored during recovery (and deleted once that holds for every column family).
    */
    log_number: u64,

    /// The memtable receiving writes.
    memtable: Arc<SkipListMemTable>,

    /// The current table file layout, one list of files per level.
    files: [Vec<Arc<FileMetadata>>; MAX_NUM_LEVELS],

    /// The most recently installed super-version, if any.
    super_version: Option<Arc<SuperVersion>>,

    /// Counter feeding [`SuperVersion::version_number`].
    super_version_number: u64,
}

/// Crate-only methods
impl ColumnFamily {
    /// Create a new instance of [`ColumnFamily`].
    pub(crate) fn new(id: u32, name: String, options: ColumnFamilyOptions) -> Self {
        Self {
            id,
            name,
            options,
            log_number: 0,
            memtable: Arc::new(SkipListMemTable::new()),
            files: Default::default(),
            super_version: None,
            super_version_number: 0,
        }
    }

    pub(crate) fn get_id(&self) -> u32 {
        self.id
    }

    pub(crate) fn get_name(&self) -> &str {
        &self.name
    }

    pub(crate) fn get_options(&self) -> &ColumnFamilyOptions {
        &self.options
    }

    pub(crate) fn get_log_number(&self) -> u64 {
        self.log_number
    }

    pub(crate) fn set_log_number(&mut self, log_number: u64) {
        self.log_number = log_number;
    }

    /// The memtable currently receiving writes.
    pub(crate) fn mem(&self) -> Arc<SkipListMemTable> {
        Arc::clone(&self.memtable)
    }

    /**
    Replace the active memtable with a fresh one.

    The sequence number is the high-water mark the retiring memtable was rotated at; it is logged
    for traceability only since the fresh memtable derives its own first-sequence marker from the
    writes it receives.
    */
    pub(crate) fn create_new_memtable(&mut self, rotated_at_sequence: u64) {
        log::info!(
            "Rotating the memtable of column family {name} at sequence number \
            {rotated_at_sequence}.",
            name = &self.name
        );
        self.memtable = Arc::new(SkipListMemTable::new());
    }

    pub(crate) fn get_files(&self, level: usize) -> &[Arc<FileMetadata>] {
        &self.files[level]
    }

    pub(crate) fn num_files_at_level(&self, level: usize) -> usize {
        self.files[level].len()
    }

    /// Add a table file to the specified level.
    pub(crate) fn add_file(&mut self, level: usize, file: FileMetadata) {
        self.files[level].push(Arc::new(file));
        // Newest level-0 files sort last by file number; higher levels stay key-ordered when
        // written by compaction
        self.files[level].sort_by_key(|file_metadata| file_metadata.file_number());
    }

    /// Remove the table file with the specified number from the specified level.
    pub(crate) fn delete_file(&mut self, level: usize, file_number: u64) {
        self.files[level].retain(|file_metadata| file_metadata.file_number() != file_number);
    }

    /// All file numbers referenced by this column family.
    pub(crate) fn live_file_numbers(&self) -> Vec<u64> {
        self.files
            .iter()
            .flat_map(|level_files| level_files.iter().map(|file| file.file_number()))
            .collect()
    }

    /// Whether the active memtable is over its configured write buffer budget.
    pub(crate) fn should_flush(&self) -> bool {
        self.memtable.approximate_memory_usage() >= self.options.write_buffer_size
    }

    /// Install a fresh super-version reflecting the current memtable and file layout.
    pub(crate) fn install_super_version(&mut self) {
        self.super_version_number += 1;
        self.super_version = Some(Arc::new(SuperVersion {
            memtable: Arc::clone(&self.memtable),
            files: self.files.clone(),
            version_number: self.super_version_number,
            options: self.options.clone(),
        }));
    }

    pub(crate) fn get_super_version(&self) -> Option<Arc<SuperVersion>> {
        self.super_version.as_ref().map(Arc::clone)
    }
}

/// The set of column families that make up the database.
pub(crate) struct ColumnFamilySet {
    /// Column families keyed by id. Iteration order is ascending id order.
    column_families: BTreeMap<u32, ColumnFamily>,

    /// Index from column family name to id.
    name_to_id: HashMap<String, u32>,

    /// The id to assign to the next created column family.
    next_column_family_id: u32,
}

/// Crate-only methods
impl ColumnFamilySet {
    /// Create a set holding only the default column family.
    pub(crate) fn new(default_cf_options: ColumnFamilyOptions) -> Self {
        let mut set = Self {
            column_families: BTreeMap::new(),
            name_to_id: HashMap::new(),
            next_column_family_id: DEFAULT_COLUMN_FAMILY_ID + 1,
        };
        set.insert(ColumnFamily::new(
            DEFAULT_COLUMN_FAMILY_ID,
            DEFAULT_COLUMN_FAMILY_NAME.to_string(),
            default_cf_options,
        ));

        set
    }

    /// Create a column family with the next free id. Fails if the name is taken.
    pub(crate) fn create_column_family(
        &mut self,
        name: &str,
        options: ColumnFamilyOptions,
    ) -> SquallResult<u32> {
        if self.name_to_id.contains_key(name) {
            return Err(SquallError::InvalidArgument(format!(
                "Column family already exists: {name}"
            )));
        }

        let id = self.next_column_family_id;
        self.next_column_family_id += 1;
        self.insert(ColumnFamily::new(id, name.to_string(), options));

        Ok(id)
    }

    /**
    Re-create a column family recorded in the manifest with its persisted id.

    Replaying a manifest must reproduce the exact ids that were handed out originally, so this
    bypasses the id counter and then bumps it past the restored id.
    */
    pub(crate) fn restore_column_family(
        &mut self,
        id: u32,
        name: String,
        options: ColumnFamilyOptions,
    ) {
        if self.column_families.contains_key(&id) {
            return;
        }

        self.insert(ColumnFamily::new(id, name, options));
        if self.next_column_family_id <= id {
            self.next_column_family_id = id + 1;
        }
    }

    /// Remove the column family with the specified id.
    pub(crate) fn drop_column_family(&mut self, id: u32) {
        if let Some(column_family) = self.column_families.remove(&id) {
            self.name_to_id.remove(column_family.get_name());
        }
    }

    pub(crate) fn get(&self, id: u32) -> Option<&ColumnFamily> {
        self.column_families.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: u32) -> Option<&mut ColumnFamily> {
        self.column_families.get_mut(&id)
    }

    pub(crate) fn get_by_name(&self, name: &str) -> Option<&ColumnFamily> {
        self.name_to_id
            .get(name)
            .and_then(|id| self.column_families.get(id))
    }

    pub(crate) fn get_id_by_name(&self, name: &str) -> Option<u32> {
        self.name_to_id.get(name).copied()
    }

    /// The default column family.
    ///
    /// # Panics
    ///
    /// The default column family always exists, so lookup failures are a programming error.
    pub(crate) fn default_cf(&self) -> &ColumnFamily {
        self.get(DEFAULT_COLUMN_FAMILY_ID).unwrap()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &ColumnFamily> {
        self.column_families.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut ColumnFamily> {
        self.column_families.values_mut()
    }

    pub(crate) fn num_column_families(&self) -> usize {
        self.column_families.len()
    }
}

/// Private methods
impl ColumnFamilySet {
    fn insert(&mut self, column_family: ColumnFamily) {
        self.name_to_id
            .insert(column_family.get_name().to_string(), column_family.get_id());
        self.column_families
            .insert(column_family.get_id(), column_family);
    }
}
