/*!
This module contains utilities for managing file names used by the database.

Files are rooted at the `db_path` provided in the [database options](crate::DbOptions), except for
write-ahead logs which are rooted at the (possibly distinct) `wal_dir`.

Files (and their name formats) used by the database are as follows:

- Database lock file: `./LOCK`
- Current manifest pointer file: `./CURRENT`
- Database identity file: `./IDENTITY`
- Manifest files (a.k.a. descriptors): `./MANIFEST-[0-9]{6,}`
- Options dumps: `./OPTIONS-[0-9]{6,}`
- Write-ahead logs: `<wal_dir>/[0-9]{6,}.log`
- Soft-deleted write-ahead logs: `<wal_dir>/[0-9]{6,}.log.trash`
- Table files: `<data_path>/[0-9]{6,}.sst`
- Temp files: `./[0-9]{6,}.dbtmp`
*/

use std::path::{Path, PathBuf};

use crate::errors::{SquallError, SquallResult};

/// The name of the database lock file.
pub(crate) const LOCK_FILE_NAME: &str = "LOCK";

/// Name of the *CURRENT* manifest pointer file.
pub(crate) const CURRENT_FILE_NAME: &str = "CURRENT";

/// Name of the *IDENTITY* file holding the database id.
pub(crate) const IDENTITY_FILE_NAME: &str = "IDENTITY";

/// Suffix for write-ahead log files.
pub(crate) const WAL_EXT: &str = "log";

/// Suffix for table files.
pub(crate) const TABLE_EXT: &str = "sst";

/// The temp file extension.
pub(crate) const TEMP_FILE_EXT: &str = "dbtmp";

/// Full suffix for soft-deleted write-ahead logs awaiting unlink.
pub(crate) const TRASH_WAL_SUFFIX: &str = ".log.trash";

/**
Enum of file types used by Squall.

If appropriate, variants will hold the file number parsed from the file path.
*/
#[derive(Debug, Eq, PartialEq)]
pub(crate) enum ParsedFileType {
    WriteAheadLog(u64),
    TrashWriteAheadLog(u64),
    DBLockFile,
    CurrentFile,
    IdentityFile,
    TableFile(u64),
    /// Also known as a descriptor file in LevelDB parlance.
    ManifestFile(u64),
    OptionsFile(u64),
    TempFile(u64),
}

/// Various utilities for managing file and folder names that Squall uses.
#[derive(Debug)]
pub(crate) struct FileNameHandler {
    db_path: String,
    wal_dir: String,
}

/// Crate-only methods
impl FileNameHandler {
    /// Create a new instance of the [`FileNameHandler`].
    pub(crate) fn new(db_path: String, wal_dir: String) -> Self {
        FileNameHandler { db_path, wal_dir }
    }

    /// Get the path to the database directory as a [`PathBuf`].
    pub(crate) fn get_db_path(&self) -> PathBuf {
        PathBuf::from(&self.db_path)
    }

    /// Resolve the path to the write-ahead log directory.
    pub(crate) fn get_wal_dir(&self) -> PathBuf {
        PathBuf::from(&self.wal_dir)
    }

    /// Resolve the path to the write-ahead log with the specified number.
    pub(crate) fn get_wal_file_path(&self, wal_number: u64) -> PathBuf {
        let mut buf = self.get_wal_dir();
        buf.push(format!("{wal_number:06}"));
        buf.set_extension(WAL_EXT);

        buf
    }

    /// Resolve the path to a specific table file in the specified data path.
    pub(crate) fn get_table_file_path(&self, data_path: &Path, file_number: u64) -> PathBuf {
        let mut buf = data_path.to_path_buf();
        buf.push(format!("{file_number:06}"));
        buf.set_extension(TABLE_EXT);

        buf
    }

    /**
    Resolve the path to the manifest file with the specified number.

    # Legacy

    This is synonymous to RocksDB's `DescriptorFileName` free function.
    */
    pub(crate) fn get_manifest_file_path(&self, manifest_number: u64) -> PathBuf {
        let mut buf = PathBuf::from(&self.db_path);
        buf.push(format!("MANIFEST-{manifest_number:06}"));

        buf
    }

    /// The string the `CURRENT` file must contain to reference the specified manifest.
    pub(crate) fn manifest_file_contents(manifest_number: u64) -> String {
        format!("MANIFEST-{manifest_number:06}\n")
    }

    /// Resolve the path to the `CURRENT` file.
    pub(crate) fn get_current_file_path(&self) -> PathBuf {
        let mut buf = PathBuf::from(&self.db_path);
        buf.push(CURRENT_FILE_NAME);

        buf
    }

    /// Resolve the path to the `IDENTITY` file.
    pub(crate) fn get_identity_file_path(&self) -> PathBuf {
        let mut buf = PathBuf::from(&self.db_path);
        buf.push(IDENTITY_FILE_NAME);

        buf
    }

    /// Resolve the path to the options dump with the specified number.
    pub(crate) fn get_options_file_path(&self, options_number: u64) -> PathBuf {
        let mut buf = PathBuf::from(&self.db_path);
        buf.push(format!("OPTIONS-{options_number:06}"));

        buf
    }

    /// Resolve the path to a temp file.
    pub(crate) fn get_temp_file_path(&self, file_number: u64) -> PathBuf {
        let mut buf = PathBuf::from(&self.db_path);
        buf.push(format!("{file_number:06}"));
        buf.set_extension(TEMP_FILE_EXT);

        buf
    }

    /// Resolve the path to the LOCK file.
    pub(crate) fn get_lock_file_path(&self) -> PathBuf {
        let mut buf = PathBuf::from(&self.db_path);
        buf.push(LOCK_FILE_NAME);

        buf
    }

    /// Attempts to determine the Squall file type and file number (if any) from the provided path.
    pub(crate) fn get_file_type_from_name(file_path: &Path) -> SquallResult<ParsedFileType> {
        let file_name = match file_path.file_name().and_then(|name| name.to_str()) {
            Some(file_name) => file_name,
            None => {
                return Err(SquallError::InvalidArgument(format!(
                    "The provided file path is not a recognized Squall file type. Provided path: \
                    {file_path:?}."
                )))
            }
        };

        if file_name == CURRENT_FILE_NAME {
            return Ok(ParsedFileType::CurrentFile);
        }

        if file_name == IDENTITY_FILE_NAME {
            return Ok(ParsedFileType::IdentityFile);
        }

        if file_name == LOCK_FILE_NAME {
            return Ok(ParsedFileType::DBLockFile);
        }

        if let Some(manifest_suffix) = file_name.strip_prefix("MANIFEST-") {
            let file_number = FileNameHandler::parse_file_number(manifest_suffix)?;
            return Ok(ParsedFileType::ManifestFile(file_number));
        }

        if let Some(options_suffix) = file_name.strip_prefix("OPTIONS-") {
            let file_number = FileNameHandler::parse_file_number(options_suffix)?;
            return Ok(ParsedFileType::OptionsFile(file_number));
        }

        if let Some(trash_stem) = file_name.strip_suffix(TRASH_WAL_SUFFIX) {
            let file_number = FileNameHandler::parse_file_number(trash_stem)?;
            return Ok(ParsedFileType::TrashWriteAheadLog(file_number));
        }

        if let Some(file_extension) = file_path.extension() {
            let file_stem = match file_path.file_stem().and_then(|stem| stem.to_str()) {
                Some(stem) => stem,
                None => {
                    return Err(SquallError::InvalidArgument(format!(
                        "The provided file stem is not a recognized Squall file name pattern. \
                        Provided path: {file_path:?}."
                    )))
                }
            };

            if file_extension == WAL_EXT {
                let file_number = FileNameHandler::parse_file_number(file_stem)?;
                return Ok(ParsedFileType::WriteAheadLog(file_number));
            }

            if file_extension == TABLE_EXT {
                let file_number = FileNameHandler::parse_file_number(file_stem)?;
                return Ok(ParsedFileType::TableFile(file_number));
            }

            if file_extension == TEMP_FILE_EXT {
                let file_number = FileNameHandler::parse_file_number(file_stem)?;
                return Ok(ParsedFileType::TempFile(file_number));
            }
        }

        Err(SquallError::InvalidArgument(format!(
            "The provided file path is not a recognized Squall file type. Provided path: \
            {file_path:?}."
        )))
    }
}

/// Private methods
impl FileNameHandler {
    /// Attempts to parse a file number from the provided file name fragment.
    fn parse_file_number(fragment: &str) -> SquallResult<u64> {
        if fragment.is_empty() || !fragment.bytes().all(|byte| byte.is_ascii_digit()) {
            return Err(SquallError::InvalidArgument(format!(
                "The provided file name is not a recognized Squall file name pattern. Provided \
                fragment: {fragment:?}."
            )));
        }

        fragment.parse::<u64>().map_err(|_parse_err| {
            SquallError::InvalidArgument(format!(
                "The provided file name is not a recognized Squall file name pattern. Provided \
                fragment: {fragment:?}."
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn file_name_handler_gets_wal_paths_correctly() {
        let handler = FileNameHandler::new(
            "/storm/system".to_string(),
            "/storm/system/journal".to_string(),
        );

        let wal_dir = handler.get_wal_dir();
        assert!(wal_dir.ends_with("journal"));

        let wal_path = handler.get_wal_file_path(43);
        assert!(
            wal_path.starts_with(&wal_dir),
            "The generated path should be prefixed with the same generated path for the parent \
            directory."
        );
        assert_eq!(wal_path.file_name().unwrap(), "000043.log");
        assert_eq!(wal_path.extension().unwrap(), "log");
    }

    #[test]
    fn file_name_handler_gets_root_paths_correctly() {
        let db_path = "/storm/system".to_string();
        let handler = FileNameHandler::new(db_path.clone(), db_path);
        let saved_db_path = handler.get_db_path();

        let manifest_path = handler.get_manifest_file_path(43);
        assert!(manifest_path.starts_with(&saved_db_path));
        assert_eq!(manifest_path.file_name().unwrap(), "MANIFEST-000043");

        let current_path = handler.get_current_file_path();
        assert!(current_path.starts_with(&saved_db_path));
        assert_eq!(current_path.file_name().unwrap(), "CURRENT");

        let identity_path = handler.get_identity_file_path();
        assert_eq!(identity_path.file_name().unwrap(), "IDENTITY");

        let options_path = handler.get_options_file_path(7);
        assert_eq!(options_path.file_name().unwrap(), "OPTIONS-000007");

        let temp_path = handler.get_temp_file_path(43);
        assert_eq!(temp_path.file_name().unwrap(), "000043.dbtmp");

        let lock_path = handler.get_lock_file_path();
        assert_eq!(lock_path.file_name().unwrap(), "LOCK");
    }

    #[test]
    fn file_name_handler_pads_manifest_pointer_contents() {
        assert_eq!(
            FileNameHandler::manifest_file_contents(1),
            "MANIFEST-000001\n"
        );
        assert_eq!(
            FileNameHandler::manifest_file_contents(1_234_567),
            "MANIFEST-1234567\n"
        );
    }

    #[test]
    fn parser_can_correctly_parse_valid_file_paths() {
        let valid_paths = vec![
            ("000100.log", ParsedFileType::WriteAheadLog(100)),
            ("000000.log", ParsedFileType::WriteAheadLog(0)),
            ("LOCK", ParsedFileType::DBLockFile),
            ("CURRENT", ParsedFileType::CurrentFile),
            ("IDENTITY", ParsedFileType::IdentityFile),
            ("000043.sst", ParsedFileType::TableFile(43)),
            (
                "1238097123981723.sst",
                ParsedFileType::TableFile(1238097123981723),
            ),
            ("MANIFEST-001337", ParsedFileType::ManifestFile(1337)),
            ("MANIFEST-000055", ParsedFileType::ManifestFile(55)),
            ("OPTIONS-000002", ParsedFileType::OptionsFile(2)),
            ("000009.log.trash", ParsedFileType::TrashWriteAheadLog(9)),
            (
                "18446744073709551615.dbtmp",
                ParsedFileType::TempFile(18446744073709551615),
            ),
        ];

        for (path, expected) in valid_paths {
            let file_type = FileNameHandler::get_file_type_from_name(&PathBuf::from(path)).unwrap();
            assert_eq!(file_type, expected, "{path} should be parsed correctly.");
        }
    }

    #[test]
    fn parser_rejects_invalid_paths() {
        let invalid_paths = vec![
            "",
            "foo",
            "foo.log",
            "x100.log",
            "123-wal-123.log",
            "18446744073709551616.log",
            "184467440737095516150.log",
            ".log",
            "1231x.log",
            "manifest",
            "MANIFEST-",
            "MANIFEST-3x",
            "XMANIFEST-3",
            "OPTIONS-",
            "LOC",
            "LOCKx",
            "CURR",
            "CURRENTx",
            "100",
            "100.",
            "100.ss",
            ".log.trash",
            "abc.log.trash",
        ];

        for path in invalid_paths {
            let file_type_result = FileNameHandler::get_file_type_from_name(&PathBuf::from(path));
            assert!(
                file_type_result.is_err(),
                "{path} should cause the parser to raise an exception."
            );
        }
    }
}
