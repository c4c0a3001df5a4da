/*!
This module contains the table file writer used to materialize memtables as level-0 table files,
plus the flat entry scan that recovery-time probes use to read them back.

# Format

A table file has the following format:

1. A Snappy-framed compressed run of entries, each entry being a length-prefixed serialized
   internal key followed by a length-prefixed value
1. A fixed-length footer holding the byte length of the compressed run as an 8-byte fixed-size
   integer and a masked CRC-32 checksum of the compressed run

The full block/index/filter table format of the steady-state read path is the concern of the
table reader collaborator; the open-and-recover core only ever writes whole tables from sorted
memtable contents and scans whole tables back, so a single sorted run is sufficient here.
*/

use std::convert::TryFrom;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crc::{Crc, CRC_32_ISCSI};
use integer_encoding::FixedInt;
use snap::read::FrameDecoder;
use snap::write::FrameEncoder;

use crate::errors::{SquallError, SquallResult};
use crate::file_names::FileNameHandler;
use crate::fs::{FileSystem, RandomAccessFile, ReadonlyRandomAccessFile};
use crate::key::InternalKey;
use crate::utils::crc::{mask_checksum, unmask_checksum};
use crate::versioning::file_metadata::FileMetadata;

/// CRC calculator using the iSCSI polynomial, same as the log format.
const CRC_CALCULATOR: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// The length of the table file footer: an 8-byte length and a 4-byte masked checksum.
const FOOTER_LENGTH_BYTES: usize = 8 + 4;

/// Why a table file is being created. Recorded for event logging.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum TableFileCreationReason {
    /// The table is being written by a memtable flush during normal operation.
    Flush,
    /// The table is being written while replaying write-ahead logs at open.
    Recovery,
}

/**
Build a table file from the provided entries, which must be in ascending internal key order.

Returns the metadata of the built file. A build over zero entries never materializes a file and
is reported with a file size of zero; callers drop such outputs instead of recording them.
*/
pub(crate) fn build_table(
    fs: Arc<dyn FileSystem>,
    file_name_handler: &FileNameHandler,
    data_path: &std::path::Path,
    file_number: u64,
    entries: &[(InternalKey, Vec<u8>)],
    reason: TableFileCreationReason,
) -> SquallResult<FileMetadata> {
    let table_file_path = file_name_handler.get_table_file_path(data_path, file_number);
    log::info!(
        "Building table file #{file_number} at {table_file_path:?} with {num_entries} entries. \
        Reason: {reason:?}.",
        num_entries = entries.len()
    );

    let mut metadata = FileMetadata::new(file_number);
    let now = current_unix_timestamp();
    metadata.set_oldest_ancester_time(now);
    metadata.set_file_creation_time(now);

    if entries.is_empty() {
        return Ok(metadata);
    }

    let mut smallest_sequence = u64::MAX;
    let mut largest_sequence = 0;
    let mut encoder = FrameEncoder::new(Vec::new());
    for (key, value) in entries {
        let serialized_key = Vec::<u8>::from(key);
        encoder.write_all(&u32::encode_fixed_vec(serialized_key.len() as u32))?;
        encoder.write_all(&serialized_key)?;
        encoder.write_all(&u32::encode_fixed_vec(value.len() as u32))?;
        encoder.write_all(value)?;

        smallest_sequence = smallest_sequence.min(key.get_sequence_number());
        largest_sequence = largest_sequence.max(key.get_sequence_number());
    }
    let compressed_run = encoder.into_inner().map_err(|into_inner_err| {
        SquallError::IO(std::io::Error::from(into_inner_err.error().kind()).into())
    })?;

    let mut table_file = fs.create_file(&table_file_path, false)?;
    table_file.write_all(&compressed_run)?;
    table_file.write_all(&u64::encode_fixed_vec(compressed_run.len() as u64))?;
    table_file.write_all(&u32::encode_fixed_vec(mask_checksum(
        CRC_CALCULATOR.checksum(&compressed_run),
    )))?;
    table_file.sync()?;

    let file_size = table_file.len()?;
    metadata.set_file_size(file_size);
    metadata.set_smallest_key(Some(entries.first().unwrap().0.clone()));
    metadata.set_largest_key(Some(entries.last().unwrap().0.clone()));
    metadata.set_smallest_sequence(smallest_sequence);
    metadata.set_largest_sequence(largest_sequence);

    log::info!(
        "Finished building table file #{file_number} with size {file_size} bytes covering \
        sequence numbers {smallest_sequence}..={largest_sequence}."
    );

    Ok(metadata)
}

/// Read back every entry of a table file in internal key order.
pub(crate) fn read_table_entries(
    fs: Arc<dyn FileSystem>,
    file_name_handler: &FileNameHandler,
    data_path: &std::path::Path,
    file_number: u64,
) -> SquallResult<Vec<(InternalKey, Vec<u8>)>> {
    let table_file_path = file_name_handler.get_table_file_path(data_path, file_number);
    let mut table_file = fs.open_file(&table_file_path)?;

    let mut contents: Vec<u8> = vec![];
    table_file.read_to_end(&mut contents)?;
    if contents.len() < FOOTER_LENGTH_BYTES {
        return Err(SquallError::Corruption(format!(
            "The table file at {table_file_path:?} is smaller than its footer."
        )));
    }

    let footer_offset = contents.len() - FOOTER_LENGTH_BYTES;
    let run_length = u64::decode_fixed(&contents[footer_offset..footer_offset + 8]) as usize;
    let stored_checksum =
        unmask_checksum(u32::decode_fixed(&contents[footer_offset + 8..footer_offset + 12]));
    if run_length != footer_offset {
        return Err(SquallError::Corruption(format!(
            "The table file at {table_file_path:?} has a footer length of {run_length} bytes \
            but {footer_offset} bytes of data."
        )));
    }

    let compressed_run = &contents[..footer_offset];
    let calculated_checksum = CRC_CALCULATOR.checksum(compressed_run);
    if calculated_checksum != stored_checksum {
        return Err(SquallError::Corruption(format!(
            "The table file at {table_file_path:?} failed checksum verification. Expected \
            {stored_checksum} but got {calculated_checksum}."
        )));
    }

    let mut decoded_run: Vec<u8> = vec![];
    FrameDecoder::new(compressed_run).read_to_end(&mut decoded_run)?;

    let mut entries: Vec<(InternalKey, Vec<u8>)> = vec![];
    let mut cursor = 0;
    while cursor < decoded_run.len() {
        let key_bytes = read_length_prefixed(&decoded_run, &mut cursor, &table_file_path)?;
        let value = read_length_prefixed(&decoded_run, &mut cursor, &table_file_path)?;
        let key = InternalKey::try_from(key_bytes.as_slice()).map_err(|decode_err| {
            SquallError::Corruption(format!(
                "Failed to decode an internal key in the table file at {table_file_path:?}. \
                Error: {decode_err}"
            ))
        })?;

        entries.push((key, value));
    }

    Ok(entries)
}

fn read_length_prefixed(
    buf: &[u8],
    cursor: &mut usize,
    table_file_path: &std::path::Path,
) -> SquallResult<Vec<u8>> {
    if *cursor + 4 > buf.len() {
        return Err(SquallError::Corruption(format!(
            "The table file at {table_file_path:?} ended in the middle of a length prefix."
        )));
    }

    let length = u32::decode_fixed(&buf[*cursor..*cursor + 4]) as usize;
    *cursor += 4;
    if *cursor + length > buf.len() {
        return Err(SquallError::Corruption(format!(
            "The table file at {table_file_path:?} ended in the middle of an entry."
        )));
    }

    let bytes = buf[*cursor..*cursor + length].to_vec();
    *cursor += length;
    Ok(bytes)
}

/// The current wall clock time as seconds since the UNIX epoch.
pub(crate) fn current_unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::io::Seek;
    use std::path::PathBuf;

    use pretty_assertions::assert_eq;

    use crate::fs::InMemoryFileSystem;
    use crate::key::Operation;

    use super::*;

    #[test]
    fn tables_round_trip_through_the_table_format() {
        let fs: Arc<dyn FileSystem> = Arc::new(InMemoryFileSystem::new());
        let handler = FileNameHandler::new("/db".to_string(), "/db".to_string());
        let data_path = PathBuf::from("/db");

        let entries = vec![
            (
                InternalKey::new(b"anvil-cloud".to_vec(), 4, Operation::Put),
                b"towering".to_vec(),
            ),
            (
                InternalKey::new(b"microburst".to_vec(), 5, Operation::Delete),
                vec![],
            ),
            (
                InternalKey::new(b"wall-cloud".to_vec(), 6, Operation::Put),
                b"rotating".to_vec(),
            ),
        ];

        let metadata = build_table(
            Arc::clone(&fs),
            &handler,
            &data_path,
            9,
            &entries,
            TableFileCreationReason::Recovery,
        )
        .unwrap();

        assert_eq!(metadata.file_number(), 9);
        assert!(metadata.get_file_size() > 0);
        assert_eq!(metadata.smallest_key().get_user_key(), &b"anvil-cloud".to_vec());
        assert_eq!(metadata.largest_key().get_user_key(), &b"wall-cloud".to_vec());
        assert_eq!(metadata.smallest_sequence(), 4);
        assert_eq!(metadata.largest_sequence(), 6);

        let read_back = read_table_entries(Arc::clone(&fs), &handler, &data_path, 9).unwrap();
        assert_eq!(read_back.len(), 3);
        assert_eq!(read_back[0].1, b"towering".to_vec());
        assert_eq!(read_back[2].0.get_user_key(), &b"wall-cloud".to_vec());
    }

    #[test]
    fn an_empty_memtable_produces_a_zero_size_table() {
        let fs: Arc<dyn FileSystem> = Arc::new(InMemoryFileSystem::new());
        let handler = FileNameHandler::new("/db".to_string(), "/db".to_string());

        let metadata = build_table(
            Arc::clone(&fs),
            &handler,
            &PathBuf::from("/db"),
            10,
            &[],
            TableFileCreationReason::Recovery,
        )
        .unwrap();

        assert_eq!(metadata.get_file_size(), 0);
        assert!(!fs.exists(&handler.get_table_file_path(&PathBuf::from("/db"), 10)));
    }

    #[test]
    fn a_corrupted_table_fails_checksum_verification() {
        let fs: Arc<dyn FileSystem> = Arc::new(InMemoryFileSystem::new());
        let handler = FileNameHandler::new("/db".to_string(), "/db".to_string());
        let data_path = PathBuf::from("/db");

        let entries = vec![(
            InternalKey::new(b"shear".to_vec(), 1, Operation::Put),
            b"vertical".to_vec(),
        )];
        build_table(
            Arc::clone(&fs),
            &handler,
            &data_path,
            11,
            &entries,
            TableFileCreationReason::Flush,
        )
        .unwrap();

        let table_path = handler.get_table_file_path(&data_path, 11);
        let mut file = fs.create_file(&table_path, true).unwrap();
        file.seek(std::io::SeekFrom::Start(3)).unwrap();
        file.write_all(&[0xde, 0xad]).unwrap();

        let result = read_table_entries(Arc::clone(&fs), &handler, &data_path, 11);
        assert!(matches!(result, Err(SquallError::Corruption(_))));
    }
}
