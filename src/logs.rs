/*!
The log file format is used by both write-ahead logs and manifest files (a.k.a. descriptor logs).

The log file contents are series of 32 KiB blocks.

The current header of a block record is 7 bytes and consists of a 4 byte masked CRC-32 checksum, a
2 byte u16 length, and a 1 byte record type.

A record never starts within the last 6 bytes of a block (since it won't fit). Any leftover bytes
here form the trailer, which must consist entirely of zero bytes and must be skipped by readers.

Readers distinguish three terminal conditions and callers (most importantly write-ahead log
replay) decide policy per condition:

- a clean end of file at a record boundary,
- a *truncation* where the file ends inside a record (e.g. the writer died mid-write),
- a *corruption* where the record bytes are present but fail checksum or framing verification.
*/

use crc::{Crc, CRC_32_ISCSI};
use integer_encoding::FixedInt;
use std::convert::{TryFrom, TryInto};
use std::fmt;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::{
    LogCorruptionErrorMetadata, LogIOError, LogIOResult, LogSerializationErrorKind,
};
use crate::fs::{FileSystem, RandomAccessFile, ReadonlyRandomAccessFile};
use crate::utils::crc::{mask_checksum, unmask_checksum};

/**
The length of block record headers.

This is 7 bytes.
*/
const HEADER_LENGTH_BYTES: usize = 4 + 2 + 1;

/**
The size of blocks in the log file format.

This is set at 32 KiB.
*/
const BLOCK_SIZE_BYTES: usize = 32 * 1024;

/**
CRC calculator using the iSCSI polynomial.

LevelDB uses the [google/crc32c](https://github.com/google/crc32c) CRC implementation. This
implementation specifies using the iSCSI polynomial so that is what we use here as well.
*/
const CRC_CALCULATOR: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/**
Block record types denote whether the data contained in the block is split across multiple
blocks or if they contain all of the data for a single user record.

Note, the use of record is overloaded here. Be aware of the distinction between a block record
and the actual user record.
*/
#[repr(u8)]
#[derive(Clone, Copy, Debug)]
pub(crate) enum BlockType {
    /// Denotes that the block contains the entirety of a user record.
    Full = 0,
    /// Denotes the first fragment of a user record.
    First,
    /// Denotes the interior fragments of a user record.
    Middle,
    /// Denotes the last fragment of a user record.
    Last,
}

impl TryFrom<u8> for BlockType {
    type Error = LogIOError;

    fn try_from(value: u8) -> LogIOResult<BlockType> {
        let block_type = match value {
            0 => BlockType::Full,
            1 => BlockType::First,
            2 => BlockType::Middle,
            3 => BlockType::Last,
            _ => {
                return Err(LogIOError::Corruption(LogCorruptionErrorMetadata {
                    bytes_corrupted: 1,
                    reason: format!(
                        "There was a problem parsing the block type. The value received was \
                        {value}."
                    ),
                }))
            }
        };

        Ok(block_type)
    }
}

/**
A record that is stored in a particular block. It is potentially only a fragment of a full user
record.

# Serialization

When serialized to disk the block record will have the following format:

1. A 32-bit masked checksum of the data
1. The length as a 2-byte integer with a fixed-size encoding
1. The block type converted to a 1 byte integer with a fixed-size encoding
1. The data
*/
#[derive(Debug)]
pub(crate) struct BlockRecord {
    /// A checksum of the data in this block.
    checksum: u32,

    /// The size of the data within the block.
    length: u16,

    /// The [`BlockType`] of the block.
    block_type: BlockType,

    /// User data to be stored in a block.
    data: Vec<u8>,
}

/// Crate-only methods
impl BlockRecord {
    pub(crate) fn new(length: u16, block_type: BlockType, data: Vec<u8>) -> Self {
        let checksum = CRC_CALCULATOR.checksum(&data);

        Self {
            checksum,
            length,
            block_type,
            data,
        }
    }
}

impl From<&BlockRecord> for Vec<u8> {
    fn from(record: &BlockRecord) -> Self {
        let initial_capacity = HEADER_LENGTH_BYTES + record.data.len();
        let mut buf: Vec<u8> = Vec::with_capacity(initial_capacity);
        // Mask the checksum before storage in case there are other checksums being done
        buf.extend_from_slice(&u32::encode_fixed_vec(mask_checksum(record.checksum)));
        buf.extend_from_slice(&u16::encode_fixed_vec(record.length));
        buf.extend_from_slice(&[record.block_type as u8]);
        buf.extend_from_slice(&record.data);

        buf
    }
}

impl TryFrom<&Vec<u8>> for BlockRecord {
    type Error = LogIOError;

    fn try_from(buf: &Vec<u8>) -> LogIOResult<BlockRecord> {
        if buf.len() < HEADER_LENGTH_BYTES {
            let error_msg = format!(
                "Failed to deserialize the provided buffer to a log block record. The buffer was \
                expected to be at least the size of the header ({} bytes) but was {}.",
                HEADER_LENGTH_BYTES,
                buf.len()
            );
            return Err(LogIOError::Seralization(LogSerializationErrorKind::Other(
                error_msg,
            )));
        }

        // The first four bytes are the masked checksum of the data
        let checksum = u32::decode_fixed(&buf[0..4]);
        let unmasked_checksum = unmask_checksum(checksum);

        // The next two bytes are the length of the data
        let data_length = u16::decode_fixed(&buf[4..6]);

        // The last header byte is the block type
        let block_type: BlockType = buf[6].try_into()?;

        // Get data and check the integrity of the data. Checksums are always verified regardless
        // of any paranoia settings so that corrupt records are dropped as a unit instead of
        // propagating bad information (like overly large sequence numbers).
        let data = buf[HEADER_LENGTH_BYTES..].to_vec();
        let calculated_checksum = CRC_CALCULATOR.checksum(&data);
        if calculated_checksum != unmasked_checksum {
            return Err(LogIOError::Corruption(LogCorruptionErrorMetadata {
                bytes_corrupted: buf.len() as u64,
                reason: format!(
                    "The checksums of the data did not match. Expected {unmasked_checksum} but \
                    got {calculated_checksum}."
                ),
            }));
        }

        Ok(BlockRecord::new(data_length, block_type, data))
    }
}

/** Handles all write activity to a log file. */
pub(crate) struct LogWriter {
    /// The path to the log file.
    log_file_path: PathBuf,

    /// The underlying file representing the log.
    log_file: Box<dyn RandomAccessFile>,

    /**
    The offset in the current block being written to.

    This position is not necessarily aligned to a block i.e. it can be in the middle of a block
    during a write operation.
    */
    current_block_offset: usize,

    /**
    True when this writer was handed a recycled file and is overwriting stale contents in place
    rather than extending a fresh file.
    */
    recycle_mode: bool,

    /**
    When set, buffered contents are only pushed to the file system when [`LogWriter::sync`] is
    called rather than after every appended record.
    */
    manual_flush: bool,
}

/// Public methods
impl LogWriter {
    /// Construct a new [`LogWriter`].
    pub fn new<P: AsRef<Path>>(
        fs: Arc<dyn FileSystem>,
        log_file_path: P,
        is_appending: bool,
    ) -> LogIOResult<Self> {
        LogWriter::with_write_behavior(fs, log_file_path, is_appending, false, false)
    }

    /**
    Construct a [`LogWriter`] for a write-ahead log.

    When `recycle_mode` is set the file at `log_file_path` is expected to be a reused log whose
    stale contents are overwritten from the start of the file.
    */
    pub fn for_wal<P: AsRef<Path>>(
        fs: Arc<dyn FileSystem>,
        log_file_path: P,
        recycle_mode: bool,
        manual_flush: bool,
    ) -> LogIOResult<Self> {
        LogWriter::with_write_behavior(fs, log_file_path, recycle_mode, recycle_mode, manual_flush)
    }

    /// Append `data` to the log as one user record, fragmenting across blocks as necessary.
    pub fn append(&mut self, data: &[u8]) -> LogIOResult<()> {
        let mut data_to_write = data;
        let mut is_first_data_chunk = true;

        loop {
            let block_available_space = BLOCK_SIZE_BYTES - self.current_block_offset;
            if block_available_space < HEADER_LENGTH_BYTES {
                if block_available_space > 0 {
                    log::debug!(
                        "Log file {:?}. There is not enough remaining space in the current block \
                        for the header. Filling it with zeroes.",
                        self.log_file_path
                    );
                    self.log_file
                        .write_all(&vec![0; HEADER_LENGTH_BYTES - 1][0..block_available_space])?;
                }

                // Switch to a new block
                self.current_block_offset = 0;
            }

            let space_available_for_data =
                BLOCK_SIZE_BYTES - self.current_block_offset - HEADER_LENGTH_BYTES;

            // The length available for the next data chunk a.k.a. how much of the buffer can
            // actually be written
            let block_data_chunk_length = if data_to_write.len() < space_available_for_data {
                data_to_write.len()
            } else {
                space_available_for_data
            };

            let is_last_data_chunk = data_to_write.len() == block_data_chunk_length;
            let block_type = if is_first_data_chunk && is_last_data_chunk {
                BlockType::Full
            } else if is_first_data_chunk {
                BlockType::First
            } else if is_last_data_chunk {
                BlockType::Last
            } else {
                BlockType::Middle
            };

            self.emit_block(block_type, &data_to_write[0..block_data_chunk_length])?;
            // Remove chunk that was written from the front
            data_to_write = data_to_write.split_at(block_data_chunk_length).1;
            is_first_data_chunk = false;

            if data_to_write.is_empty() {
                // Use a do-while loop formulation so that we emit a zero-length block if asked to
                // append an empty buffer (same as in LevelDB)
                break;
            }
        }

        Ok(())
    }

    /// Push buffered contents down to durable storage.
    pub fn sync(&mut self) -> LogIOResult<()> {
        self.log_file.sync()?;

        Ok(())
    }

    /// Hint the expected size of the log so space can be reserved up front.
    pub fn preallocate(&mut self, bytes: u64) -> LogIOResult<()> {
        self.log_file.preallocate(bytes)?;

        Ok(())
    }

    /// Whether this writer is overwriting a recycled log file.
    pub fn is_recycling(&self) -> bool {
        self.recycle_mode
    }
}

/// Private methods
impl LogWriter {
    fn with_write_behavior<P: AsRef<Path>>(
        fs: Arc<dyn FileSystem>,
        log_file_path: P,
        is_appending: bool,
        recycle_mode: bool,
        manual_flush: bool,
    ) -> LogIOResult<Self> {
        log::info!(
            "Creating/appending to a log file at {}",
            log_file_path.as_ref().to_string_lossy()
        );
        let mut log_file = fs.create_file(log_file_path.as_ref(), is_appending)?;

        let mut block_offset = 0;
        if recycle_mode {
            // Stale contents of a reused log are overwritten in place from the start
            log_file.seek(SeekFrom::Start(0))?;
        } else {
            let log_file_size = log_file.len()? as usize;
            if log_file_size > 0 {
                block_offset = log_file_size % BLOCK_SIZE_BYTES;
            }
        }

        Ok(LogWriter {
            log_file_path: log_file_path.as_ref().to_path_buf(),
            log_file,
            current_block_offset: block_offset,
            recycle_mode,
            manual_flush,
        })
    }

    /// Write the block out to the underlying medium.
    fn emit_block(&mut self, block_type: BlockType, data_chunk: &[u8]) -> LogIOResult<()> {
        // Convert `usize` to `u16` so that it fits in our header format.
        let data_length = u16::try_from(data_chunk.len())?;
        let block = BlockRecord::new(data_length, block_type, data_chunk.to_vec());

        log::debug!(
            "Writing new record to log file at {:?} with length {} and block type {:?}.",
            self.log_file_path,
            data_length,
            block.block_type
        );
        self.log_file
            .write_all(Vec::<u8>::from(&block).as_slice())?;
        if !self.manual_flush {
            self.log_file.flush()?;
        }

        let bytes_written = HEADER_LENGTH_BYTES + data_chunk.len();
        self.current_block_offset += bytes_written;
        Ok(())
    }
}

impl fmt::Debug for LogWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogWriter")
            .field("log_file_path", &self.log_file_path)
            .finish()
    }
}

/** Handles all read activity to a log file. */
pub(crate) struct LogReader {
    /// The underlying file representing the log.
    log_file: Box<dyn ReadonlyRandomAccessFile>,

    /// The path to the log file.
    log_file_path: PathBuf,

    /// The offset in the current block being read from.
    current_block_offset: usize,
}

/// Public methods
impl LogReader {
    /**
    Construct a new [`LogReader`].

    * `fs`- The wrapped file system to use for I/O.
    * `log_file_path` - The path to the log file.
    */
    pub fn new<P: AsRef<Path>>(fs: Arc<dyn FileSystem>, log_file_path: P) -> LogIOResult<Self> {
        log::info!("Reading the log file at {:?}", log_file_path.as_ref());
        let log_file = fs.open_file(log_file_path.as_ref())?;

        let reader = Self {
            log_file,
            log_file_path: log_file_path.as_ref().to_path_buf(),
            current_block_offset: 0,
        };

        Ok(reader)
    }

    /**
    Read a record from the log file.

    Returns `None` once the end of the log file has been reached at a record boundary. A file that
    ends inside a record raises [`LogIOError::Truncation`]; a record that fails verification
    raises [`LogIOError::Corruption`].
    */
    pub fn read_record(&mut self) -> LogIOResult<Option<Vec<u8>>> {
        // A buffer consolidating all of the fragments retrieved from the log file.
        let mut data_buffer: Vec<u8> = vec![];
        let mut in_fragmented_record = false;

        loop {
            let record = match self.read_physical_record()? {
                Some(record) => record,
                None => {
                    if in_fragmented_record {
                        return Err(LogIOError::Truncation(format!(
                            "The log file at {log_file_path:?} ended in the middle of a \
                            fragmented record.",
                            log_file_path = self.log_file_path
                        )));
                    }

                    return Ok(None);
                }
            };

            match record.block_type {
                BlockType::Full => {
                    if in_fragmented_record {
                        return Err(LogIOError::Corruption(LogCorruptionErrorMetadata {
                            bytes_corrupted: data_buffer.len() as u64,
                            reason: "Found a full record in the middle of a fragmented record."
                                .to_string(),
                        }));
                    }

                    return Ok(Some(record.data));
                }
                BlockType::First => {
                    if in_fragmented_record {
                        return Err(LogIOError::Corruption(LogCorruptionErrorMetadata {
                            bytes_corrupted: data_buffer.len() as u64,
                            reason: "Found a first-fragment record in the middle of a fragmented \
                                record."
                                .to_string(),
                        }));
                    }

                    in_fragmented_record = true;
                    data_buffer.extend(record.data);
                }
                BlockType::Middle | BlockType::Last => {
                    if !in_fragmented_record {
                        return Err(LogIOError::Corruption(LogCorruptionErrorMetadata {
                            bytes_corrupted: record.data.len() as u64,
                            reason: "Found a continuation record without a preceding \
                                first-fragment record."
                                .to_string(),
                        }));
                    }

                    data_buffer.extend(record.data);
                    if matches!(record.block_type, BlockType::Last) {
                        return Ok(Some(data_buffer));
                    }
                }
            }
        }
    }
}

/// Private methods.
impl LogReader {
    /**
    Read the next physical record from the file system and parse it into a [`BlockRecord`].

    Returns `None` at a clean end of file.
    */
    fn read_physical_record(&mut self) -> LogIOResult<Option<BlockRecord>> {
        loop {
            let remaining_in_block = BLOCK_SIZE_BYTES - self.current_block_offset;
            if remaining_in_block < HEADER_LENGTH_BYTES {
                // The remaining bytes form the block trailer which consists of zeroes. Skip over
                // it to the start of the next block. The file may also just end here.
                let mut trailer_buffer = vec![0; remaining_in_block];
                self.read_fully(&mut trailer_buffer)?;
                self.current_block_offset = 0;
                continue;
            }

            // Read the header
            let mut header_buffer = [0; HEADER_LENGTH_BYTES];
            let header_bytes_read = self.read_fully(&mut header_buffer)?;
            if header_bytes_read == 0 {
                return Ok(None);
            }

            if header_bytes_read < HEADER_LENGTH_BYTES {
                // The end of the file was reached before we were able to read a full header. This
                // can occur if the log writer died in the middle of writing the record.
                return Err(LogIOError::Truncation(format!(
                    "Unexpectedly reached the end of the log file at {log_file_path:?} while \
                    attempting to read a header.",
                    log_file_path = self.log_file_path
                )));
            }
            self.current_block_offset += header_bytes_read;

            let data_length = u16::decode_fixed(&header_buffer[4..6]) as usize;

            // Read the payload
            let mut data_buffer = vec![0; data_length];
            let data_bytes_read = self.read_fully(&mut data_buffer)?;
            self.current_block_offset += data_bytes_read;

            if data_bytes_read < data_length {
                // The end of the file was reached before we were able to read a full data chunk.
                // This can occur if the log writer died in the middle of writing the record.
                return Err(LogIOError::Truncation(format!(
                    "Unexpectedly reached the end of the log file at {log_file_path:?} while \
                    attempting to read the data chunk.",
                    log_file_path = self.log_file_path
                )));
            }

            // Parse the payload
            let serialized_block = [header_buffer.to_vec(), data_buffer].concat();
            let block_record = BlockRecord::try_from(&serialized_block)?;

            return Ok(Some(block_record));
        }
    }

    /// Read until `buf` is full or the end of the file is reached. Returns the bytes read.
    fn read_fully(&mut self, buf: &mut [u8]) -> LogIOResult<usize> {
        let mut total_bytes_read = 0;
        while total_bytes_read < buf.len() {
            let bytes_read = self.log_file.read(&mut buf[total_bytes_read..])?;
            if bytes_read == 0 {
                break;
            }

            total_bytes_read += bytes_read;
        }

        Ok(total_bytes_read)
    }
}

impl fmt::Debug for LogReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogReader")
            .field("log_file_path", &self.log_file_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::fs::InMemoryFileSystem;

    use super::*;

    fn test_fs() -> Arc<dyn FileSystem> {
        Arc::new(InMemoryFileSystem::new())
    }

    #[test]
    fn records_round_trip_through_the_log_format() {
        let fs = test_fs();
        let log_path = PathBuf::from("/db/000005.log");

        let mut writer = LogWriter::new(Arc::clone(&fs), &log_path, false).unwrap();
        writer.append(b"first record").unwrap();
        writer.append(b"second record").unwrap();
        writer.append(&[0xab; 40 * 1024]).unwrap();
        drop(writer);

        let mut reader = LogReader::new(Arc::clone(&fs), &log_path).unwrap();
        assert_eq!(reader.read_record().unwrap().unwrap(), b"first record");
        assert_eq!(reader.read_record().unwrap().unwrap(), b"second record");
        assert_eq!(reader.read_record().unwrap().unwrap(), vec![0xab; 40 * 1024]);
        assert!(reader.read_record().unwrap().is_none());
    }

    #[test]
    fn a_truncated_tail_is_reported_as_truncation() {
        let fs = test_fs();
        let log_path = PathBuf::from("/db/000005.log");

        let mut writer = LogWriter::new(Arc::clone(&fs), &log_path, false).unwrap();
        writer.append(b"whole record").unwrap();
        writer.append(b"the torn record").unwrap();
        drop(writer);

        // Drop the last few bytes to simulate a writer dying mid-record
        let log_size = fs.get_file_size(&log_path).unwrap();
        fs.truncate(&log_path, log_size - 4).unwrap();

        let mut reader = LogReader::new(Arc::clone(&fs), &log_path).unwrap();
        assert_eq!(reader.read_record().unwrap().unwrap(), b"whole record");
        assert!(matches!(
            reader.read_record(),
            Err(LogIOError::Truncation(_))
        ));
    }

    #[test]
    fn a_corrupted_record_is_reported_as_corruption() {
        let fs = test_fs();
        let log_path = PathBuf::from("/db/000005.log");

        let mut writer = LogWriter::new(Arc::clone(&fs), &log_path, false).unwrap();
        writer.append(b"soon to be garbled").unwrap();
        drop(writer);

        // Flip bytes in the middle of the record payload
        let mut file = fs.create_file(&log_path, true).unwrap();
        file.seek(std::io::SeekFrom::Start(10)).unwrap();
        file.write_all(&[0xff, 0xff]).unwrap();

        let mut reader = LogReader::new(Arc::clone(&fs), &log_path).unwrap();
        assert!(matches!(
            reader.read_record(),
            Err(LogIOError::Corruption(_))
        ));
    }

    #[test]
    fn an_empty_append_round_trips_as_an_empty_record() {
        let fs = test_fs();
        let log_path = PathBuf::from("/db/000005.log");

        let mut writer = LogWriter::new(Arc::clone(&fs), &log_path, false).unwrap();
        writer.append(b"").unwrap();
        drop(writer);

        let mut reader = LogReader::new(Arc::clone(&fs), &log_path).unwrap();
        assert_eq!(reader.read_record().unwrap().unwrap(), Vec::<u8>::new());
        assert!(reader.read_record().unwrap().is_none());
    }
}
