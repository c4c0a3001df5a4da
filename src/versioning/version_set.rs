use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::sync::Arc;

use crate::column_family::ColumnFamilySet;
use crate::config::DEFAULT_COLUMN_FAMILY_NAME;
use crate::errors::{SquallError, SquallResult};
use crate::file_names::{FileNameHandler, ParsedFileType};
use crate::fs::FileSystem;
use crate::logs::{LogReader, LogWriter};
use crate::options::{ColumnFamilyDescriptor, ColumnFamilyOptions, DbOptions};
use crate::DB;

use super::version_edit::VersionEdit;

/**
Manages the versioned file layout of the database.

The version set owns the column-family set, the file-number and sequence-number counters, and the
manifest file that persists changes to all of them.

# Legacy

This is a flattened analogue of RocksDB's `VersionSet`. Squall's open-and-recover core keeps the
current file layout directly on each column family instead of chaining immutable `Version`
objects, since no iterator pins old versions during open.
*/
pub(crate) struct VersionSet {
    /// Database options to refer to during manifest operations.
    options: DbOptions,

    /// A reference to the file system provider in use by the database.
    filesystem_provider: Arc<dyn FileSystem>,

    /// Handler for file names used by the database.
    file_name_handler: Arc<FileNameHandler>,

    /// Options requested for each column family at open, used when restoring families from the
    /// manifest.
    requested_cf_options: HashMap<String, ColumnFamilyOptions>,

    /// The column families that make up the database.
    column_families: ColumnFamilySet,

    /**
    The next file number to hand out.

    This counter is shared by every kind of numbered file: table files, write-ahead logs,
    manifests, options dumps. It must always be strictly greater than every file number ever
    observed so that numbers are never reused.
    */
    next_file_number: u64,

    /// The file number of the manifest that the next creation will write to.
    manifest_file_number: u64,

    /**
    The most recently used sequence number for an operation.

    This is a counter that is incremented as new operations are executed.
    */
    last_sequence: u64,

    /// The database id. Empty until read from the manifest or the IDENTITY file.
    db_id: String,

    /**
    The manifest file to persist version mutations to.

    # Legacy

    This field corresponds to RocksDB's `VersionSet::descriptor_log_` field.
    */
    maybe_manifest_file: Option<LogWriter>,
}

/// Crate-only methods
impl VersionSet {
    /// Create a new instance of [`VersionSet`].
    pub(crate) fn new(
        options: DbOptions,
        file_name_handler: Arc<FileNameHandler>,
        column_family_descriptors: &[ColumnFamilyDescriptor],
    ) -> Self {
        let filesystem_provider = options.filesystem_provider();
        let requested_cf_options: HashMap<String, ColumnFamilyOptions> = column_family_descriptors
            .iter()
            .map(|descriptor| (descriptor.name.clone(), descriptor.options.clone()))
            .collect();
        let default_cf_options = requested_cf_options
            .get(DEFAULT_COLUMN_FAMILY_NAME)
            .cloned()
            .unwrap_or_default();

        Self {
            options,
            filesystem_provider,
            file_name_handler,
            requested_cf_options,
            column_families: ColumnFamilySet::new(default_cf_options),
            // File number 1 is reserved for the bootstrap manifest
            next_file_number: 2,
            // This will be updated by [`VersionSet::recover`]
            manifest_file_number: 0,
            last_sequence: 0,
            db_id: String::new(),
            maybe_manifest_file: None,
        }
    }

    /// Returns a new file number. The counter is advanced past the returned number.
    pub(crate) fn new_file_number(&mut self) -> u64 {
        let file_number = self.next_file_number;
        self.next_file_number += 1;
        file_number
    }

    /// Mark the specified file number as used so it is never handed out again.
    pub(crate) fn mark_file_number_used(&mut self, file_number: u64) {
        if self.next_file_number <= file_number {
            self.next_file_number = file_number + 1;
        }
    }

    /// The next file number that would be handed out, without advancing the counter.
    pub(crate) fn peek_next_file_number(&self) -> u64 {
        self.next_file_number
    }

    /// Get the most recently used sequence number.
    pub(crate) fn get_last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Set the most recently used sequence number.
    pub(crate) fn set_last_sequence(&mut self, sequence_number: u64) {
        self.last_sequence = sequence_number;
    }

    /// The file number of the manifest currently being written to.
    pub(crate) fn get_manifest_file_number(&self) -> u64 {
        self.manifest_file_number
    }

    /// The database id surfaced by the manifest, or an empty string if it never recorded one.
    pub(crate) fn get_db_id(&self) -> &str {
        &self.db_id
    }

    /// Set the database id.
    pub(crate) fn set_db_id(&mut self, db_id: String) {
        self.db_id = db_id;
    }

    /// The column families that make up the database.
    pub(crate) fn column_families(&self) -> &ColumnFamilySet {
        &self.column_families
    }

    /// Mutable access to the column families that make up the database.
    pub(crate) fn column_families_mut(&mut self) -> &mut ColumnFamilySet {
        &mut self.column_families
    }

    /**
    The write-ahead log number below which every log is obsolete.

    A log is obsolete once every column family has been flushed past it, so this is the minimum of
    the per-column-family log numbers.
    */
    pub(crate) fn min_log_number_to_keep(&self) -> u64 {
        self.column_families
            .iter()
            .map(|column_family| column_family.get_log_number())
            .min()
            .unwrap_or(0)
    }

    /// A set of file numbers for table files that are referenced by any column family.
    pub(crate) fn get_live_files(&self) -> HashSet<u64> {
        let mut live_files: HashSet<u64> = HashSet::new();
        for column_family in self.column_families.iter() {
            live_files.extend(column_family.live_file_numbers());
        }

        live_files
    }

    /**
    Load version information stored in the manifest file on persistent storage.

    Rebuilds the column-family set, the per-level file layout of each column family, and the
    file-number/sequence-number high-water marks. The caller-supplied column families are checked
    against the set recorded in the manifest: a recorded family the caller did not name is an
    error, while a named family the manifest does not know is left for the caller to resolve via
    its `create_missing_column_families` logic.
    */
    pub(crate) fn recover(
        &mut self,
        column_family_descriptors: &[ColumnFamilyDescriptor],
    ) -> SquallResult<()> {
        let current_file_path = self.file_name_handler.get_current_file_path();
        let mut current_file = self.filesystem_provider.open_file(&current_file_path)?;
        let mut current_file_contents = String::new();
        current_file.read_to_string(&mut current_file_contents)?;

        if current_file_contents.is_empty() || !current_file_contents.ends_with('\n') {
            let error_msg = format!(
                "The CURRENT file ({file_size} bytes) was either empty or did not have a newline \
                at the end.",
                file_size = current_file_contents.len()
            );
            log::error!("{}", &error_msg);

            return Err(SquallError::Corruption(error_msg));
        }

        current_file_contents.truncate(current_file_contents.len() - 1);
        let manifest_file_number = match FileNameHandler::get_file_type_from_name(
            std::path::Path::new(&current_file_contents),
        ) {
            Ok(ParsedFileType::ManifestFile(manifest_number)) => manifest_number,
            _ => {
                let error_msg = format!(
                    "The CURRENT file does not name a manifest file. Contents: \
                    {current_file_contents:?}."
                );
                log::error!("{}", &error_msg);
                return Err(SquallError::Corruption(error_msg));
            }
        };

        let manifest_file_path = self
            .file_name_handler
            .get_manifest_file_path(manifest_file_number);
        if !self.filesystem_provider.exists(&manifest_file_path) {
            let error_msg = "The CURRENT file points at a non-existent manifest file.";
            log::error!("{}", error_msg);
            return Err(SquallError::Corruption(error_msg.to_string()));
        }

        let mut manifest_reader =
            LogReader::new(Arc::clone(&self.filesystem_provider), &manifest_file_path)?;

        // Aggregate state from the manifest file to apply back to the version set
        let mut maybe_next_file_number: Option<u64> = None;
        let mut maybe_last_sequence: Option<u64> = None;
        let mut manifest_records_read: usize = 0;

        loop {
            // Any irregularity in the manifest, including a torn tail, is fatal to open
            let record = match manifest_reader.read_record() {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(log_err) => {
                    log::error!(
                        "There was an error loading database state from disk. Read \
                        {manifest_records_read} manifest records. Error: {log_err}"
                    );
                    return Err(log_err.into());
                }
            };

            manifest_records_read += 1;
            let edit = VersionEdit::try_from(record.as_slice())?;

            if edit.next_file_number.is_some() {
                maybe_next_file_number = edit.next_file_number;
            }
            if edit.last_sequence.is_some() {
                maybe_last_sequence = edit.last_sequence;
            }

            self.apply_edit(&edit);
        }

        let next_file_number = maybe_next_file_number.ok_or_else(|| {
            SquallError::Corruption(
                "There was no next-file-number entry in the manifest.".to_string(),
            )
        })?;
        let last_sequence = maybe_last_sequence.ok_or_else(|| {
            SquallError::Corruption(
                "There was no last-sequence-number entry in the manifest.".to_string(),
            )
        })?;

        // The caller must account for every column family recorded in the manifest
        let requested_names: HashSet<&str> = column_family_descriptors
            .iter()
            .map(|descriptor| descriptor.name.as_str())
            .collect();
        let unopened: Vec<String> = self
            .column_families
            .iter()
            .filter(|column_family| !requested_names.contains(column_family.get_name()))
            .map(|column_family| column_family.get_name().to_string())
            .collect();
        if !unopened.is_empty() {
            return Err(SquallError::InvalidArgument(format!(
                "You have to open all column families. Column families not opened: {names}",
                names = unopened.join(", ")
            )));
        }

        self.mark_file_number_used(next_file_number.saturating_sub(1));
        for log_number in self
            .column_families
            .iter()
            .map(|column_family| column_family.get_log_number())
            .collect::<Vec<u64>>()
        {
            self.mark_file_number_used(log_number);
        }
        self.last_sequence = self.last_sequence.max(last_sequence);
        self.mark_file_number_used(manifest_file_number);

        // Reserve the number the next manifest rotation will be written under
        self.manifest_file_number = self.new_file_number();

        log::info!(
            "Recovered manifest #{manifest_file_number} with {manifest_records_read} records. \
            Column families: {num_column_families}, last sequence number: {last_sequence}, next \
            file number: {next_file_number}.",
            num_column_families = self.column_families.num_column_families(),
            last_sequence = self.last_sequence,
            next_file_number = self.next_file_number,
        );

        Ok(())
    }

    /**
    Persist the provided edits to the manifest as one batch and apply them to the in-memory
    state.

    With `new_descriptor_log` set (or on the first call after open), a fresh manifest file is
    created, a snapshot of the current state is written to it, the edits are appended, and the
    `CURRENT` pointer is atomically republished. On failure the half-written manifest is deleted.
    */
    pub(crate) fn log_and_apply(
        &mut self,
        mut edits: Vec<VersionEdit>,
        new_descriptor_log: bool,
    ) -> SquallResult<()> {
        assert!(!edits.is_empty());

        for edit in edits.iter_mut() {
            edit.next_file_number = Some(self.next_file_number);
            edit.last_sequence = Some(self.last_sequence);
        }

        let creating_new_manifest = self.maybe_manifest_file.is_none() || new_descriptor_log;
        if creating_new_manifest {
            if self.maybe_manifest_file.is_some() {
                // The reserved number was consumed by the manifest being rotated away from
                self.manifest_file_number = self.new_file_number();
            }

            if let Err(write_error) = self.create_new_manifest() {
                self.cleanup_failed_manifest();
                return Err(write_error);
            }
        }

        let append_result = self.append_edits_to_manifest(&edits);
        if let Err(append_error) = append_result {
            log::error!(
                "Failed to update the manifest file with the version changes. Cleaning up any \
                side effects. Original error: {append_error}."
            );
            if creating_new_manifest {
                self.cleanup_failed_manifest();
            }
            return Err(append_error);
        }

        if creating_new_manifest {
            if let Err(swap_error) = DB::set_current_file(
                Arc::clone(&self.filesystem_provider),
                self.file_name_handler.as_ref(),
                self.manifest_file_number,
            ) {
                self.cleanup_failed_manifest();
                return Err(swap_error);
            }
        }

        for edit in &edits {
            self.apply_edit(edit);
        }

        Ok(())
    }
}

/// Private methods
impl VersionSet {
    /// Apply a single edit to the in-memory state.
    fn apply_edit(&mut self, edit: &VersionEdit) {
        if edit.is_column_family_add {
            if let (Some(id), Some(name)) = (edit.column_family_id, &edit.column_family_name) {
                let cf_options = self
                    .requested_cf_options
                    .get(name)
                    .cloned()
                    .unwrap_or_default();
                self.column_families
                    .restore_column_family(id, name.clone(), cf_options);
            }
        }

        if edit.is_column_family_drop {
            if let Some(id) = edit.column_family_id {
                self.column_families.drop_column_family(id);
            }
        }

        let column_family_id = edit.column_family_id.unwrap_or(0);
        if let Some(column_family) = self.column_families.get_mut(column_family_id) {
            if let Some(log_number) = edit.log_number {
                column_family.set_log_number(log_number);
            }

            for (level, file) in &edit.added_files {
                column_family.add_file(*level as usize, file.clone());
            }

            for (level, file_number) in &edit.deleted_files {
                column_family.delete_file(*level as usize, *file_number);
            }
        }

        if let Some(next_file_number) = edit.next_file_number {
            self.mark_file_number_used(next_file_number.saturating_sub(1));
        }

        if let Some(last_sequence) = edit.last_sequence {
            self.last_sequence = self.last_sequence.max(last_sequence);
        }

        if let Some(db_id) = &edit.db_id {
            self.db_id = db_id.clone();
        }
    }

    /// Create a fresh manifest file seeded with a snapshot of the current state.
    fn create_new_manifest(&mut self) -> SquallResult<()> {
        let manifest_path = self
            .file_name_handler
            .get_manifest_file_path(self.manifest_file_number);

        log::info!(
            "Creating a new manifest file at {manifest_path:?} with a snapshot of the current \
            version set state."
        );
        let mut manifest_file = LogWriter::new(
            Arc::clone(&self.filesystem_provider),
            manifest_path,
            /* is_appending */ false,
        )?;
        manifest_file.preallocate(self.options.manifest_preallocation_size)?;
        self.write_snapshot(&mut manifest_file)?;
        self.maybe_manifest_file = Some(manifest_file);

        Ok(())
    }

    /// Append the provided edits to the live manifest and sync it.
    fn append_edits_to_manifest(&mut self, edits: &[VersionEdit]) -> SquallResult<()> {
        let manifest_file = self.maybe_manifest_file.as_mut().unwrap();
        for edit in edits {
            let serialized_edit: Vec<u8> = Vec::from(edit);
            manifest_file.append(&serialized_edit)?;
        }
        manifest_file.sync()?;

        Ok(())
    }

    /// Write a snapshot of the version set to the provided log file.
    fn write_snapshot(&mut self, manifest_file: &mut LogWriter) -> SquallResult<()> {
        let mut header = VersionEdit::default();
        header.next_file_number = Some(self.next_file_number);
        header.last_sequence = Some(self.last_sequence);
        if !self.db_id.is_empty() {
            header.db_id = Some(self.db_id.clone());
        }
        manifest_file.append(&Vec::<u8>::from(&header))?;

        for column_family in self.column_families.iter() {
            let mut edit = VersionEdit::for_column_family(column_family.get_id());
            edit.column_family_name = Some(column_family.get_name().to_string());
            edit.is_column_family_add = true;
            edit.log_number = Some(column_family.get_log_number());
            for level in 0..crate::config::MAX_NUM_LEVELS {
                for file in column_family.get_files(level) {
                    edit.added_files.push((level as u32, (**file).clone()));
                }
            }

            manifest_file.append(&Vec::<u8>::from(&edit))?;
        }

        Ok(())
    }

    /// Delete a half-written manifest after a failed commit.
    fn cleanup_failed_manifest(&mut self) {
        self.maybe_manifest_file = None;
        let manifest_path = self
            .file_name_handler
            .get_manifest_file_path(self.manifest_file_number);
        if let Err(remove_file_error) = self.filesystem_provider.remove_file(&manifest_path) {
            if remove_file_error.kind() != std::io::ErrorKind::NotFound {
                log::error!(
                    "There was an error cleaning up the newly created manifest file after \
                    encountering a different error. Error: {remove_file_error}."
                );
            }
        }
    }
}

impl std::fmt::Debug for VersionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionSet")
            .field("next_file_number", &self.next_file_number)
            .field("manifest_file_number", &self.manifest_file_number)
            .field("last_sequence", &self.last_sequence)
            .field(
                "num_column_families",
                &self.column_families.num_column_families(),
            )
            .finish()
    }
}
