/*!
This module contains the write batch representation and its wire format.

A write batch is the unit of atomicity for writes. The serialized form of a batch is exactly the
payload of one write-ahead log record, so recovery decodes log records straight into batches.

# Serialization

A serialized batch starts with a 12 byte header:

1. The starting sequence number of the batch as an 8-byte fixed-size integer
1. The number of operations in the batch as a 4-byte fixed-size integer

The header is followed by one entry per operation:

1. The target column family id as a 4-byte fixed-size integer
1. A 1-byte operation tag
1. The key length as a 4-byte fixed-size integer followed by the key bytes
1. For puts only, the value length as a 4-byte fixed-size integer followed by the value bytes
*/

use integer_encoding::FixedInt;

use crate::column_family::ColumnFamilySet;
use crate::errors::{SquallError, SquallResult};
use crate::key::{InternalKey, Operation};
use crate::memtable::MemTable;

/**
The size of the serialized write batch header.

This is 12 bytes: an 8 byte starting sequence number and a 4 byte operation count.
*/
pub(crate) const WRITE_BATCH_HEADER_BYTES: usize = 8 + 4;

/// The column family id of the default column family.
pub(crate) const DEFAULT_COLUMN_FAMILY_ID: u32 = 0;

/** Element of a batch operation. */
#[derive(Clone, Debug)]
pub(crate) struct BatchElement {
    /// The id of the column family the operation applies to.
    pub(crate) column_family_id: u32,
    /// The operation for this batch element.
    pub(crate) operation: Operation,
    /// The key of the record to perform the operation on.
    pub(crate) key: Vec<u8>,
    /// The value to set on the key for `Put` operations or `None` for delete operations.
    pub(crate) value: Option<Vec<u8>>,
}

/** A set of operations to perform atomically. */
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    /// The sequence number assigned to the first operation in the batch.
    sequence_number: u64,

    /// The operations of the batch in insertion order.
    elements: Vec<BatchElement>,
}

/// Public methods
impl WriteBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        WriteBatch::default()
    }

    /// Queue a key-value insertion on the default column family.
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.put_cf(DEFAULT_COLUMN_FAMILY_ID, key, value);
    }

    /// Queue a key-value insertion on the specified column family.
    pub fn put_cf(&mut self, column_family_id: u32, key: &[u8], value: &[u8]) {
        self.elements.push(BatchElement {
            column_family_id,
            operation: Operation::Put,
            key: key.to_vec(),
            value: Some(value.to_vec()),
        });
    }

    /// Queue a deletion of the specified key on the default column family.
    pub fn delete(&mut self, key: &[u8]) {
        self.delete_cf(DEFAULT_COLUMN_FAMILY_ID, key);
    }

    /// Queue a deletion of the specified key on the specified column family.
    pub fn delete_cf(&mut self, column_family_id: u32, key: &[u8]) {
        self.elements.push(BatchElement {
            column_family_id,
            operation: Operation::Delete,
            key: key.to_vec(),
            value: None,
        });
    }

    /// The number of operations queued in this batch.
    pub fn count(&self) -> usize {
        self.elements.len()
    }

    /// Whether this batch has any operations queued.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Crate-only methods
impl WriteBatch {
    /// The starting sequence number of the batch.
    pub(crate) fn get_sequence_number(&self) -> u64 {
        self.sequence_number
    }

    /// Set the starting sequence number of the batch.
    pub(crate) fn set_sequence_number(&mut self, sequence_number: u64) {
        self.sequence_number = sequence_number;
    }

    /// The operations of the batch in insertion order.
    pub(crate) fn get_elements(&self) -> &[BatchElement] {
        &self.elements
    }

    /// Serialize the batch to the write-ahead log wire format.
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf: Vec<u8> = Vec::with_capacity(WRITE_BATCH_HEADER_BYTES);
        buf.extend_from_slice(&u64::encode_fixed_vec(self.sequence_number));
        buf.extend_from_slice(&u32::encode_fixed_vec(self.elements.len() as u32));

        for element in &self.elements {
            buf.extend_from_slice(&u32::encode_fixed_vec(element.column_family_id));
            buf.push(element.operation as u8);
            buf.extend_from_slice(&u32::encode_fixed_vec(element.key.len() as u32));
            buf.extend_from_slice(&element.key);
            if let Some(value) = &element.value {
                buf.extend_from_slice(&u32::encode_fixed_vec(value.len() as u32));
                buf.extend_from_slice(value);
            }
        }

        buf
    }

    /// Deserialize a batch from the write-ahead log wire format.
    pub(crate) fn decode(buf: &[u8]) -> SquallResult<WriteBatch> {
        if buf.len() < WRITE_BATCH_HEADER_BYTES {
            return Err(SquallError::Corruption(format!(
                "The write batch record is too small. Expected at least \
                {WRITE_BATCH_HEADER_BYTES} bytes but got {num_bytes}.",
                num_bytes = buf.len()
            )));
        }

        let sequence_number = u64::decode_fixed(&buf[0..8]);
        let num_operations = u32::decode_fixed(&buf[8..12]) as usize;

        let mut elements: Vec<BatchElement> = Vec::with_capacity(num_operations);
        let mut cursor = WRITE_BATCH_HEADER_BYTES;
        for _ in 0..num_operations {
            let column_family_id = WriteBatch::decode_u32(buf, &mut cursor)?;
            let operation = match WriteBatch::decode_byte(buf, &mut cursor)? {
                0 => Operation::Delete,
                1 => Operation::Put,
                unknown_tag => {
                    return Err(SquallError::Corruption(format!(
                        "Unknown write batch operation tag {unknown_tag}."
                    )))
                }
            };
            let key = WriteBatch::decode_length_prefixed(buf, &mut cursor)?;
            let value = match operation {
                Operation::Put => Some(WriteBatch::decode_length_prefixed(buf, &mut cursor)?),
                Operation::Delete => None,
            };

            elements.push(BatchElement {
                column_family_id,
                operation,
                key,
                value,
            });
        }

        if cursor != buf.len() {
            return Err(SquallError::Corruption(format!(
                "The write batch record has {num_extra} trailing bytes after its \
                {num_operations} operations.",
                num_extra = buf.len() - cursor
            )));
        }

        Ok(WriteBatch {
            sequence_number,
            elements,
        })
    }
}

/// Private methods
impl WriteBatch {
    fn decode_byte(buf: &[u8], cursor: &mut usize) -> SquallResult<u8> {
        if *cursor + 1 > buf.len() {
            return Err(SquallError::Corruption(
                "The write batch record ended in the middle of an operation tag.".to_string(),
            ));
        }

        let byte = buf[*cursor];
        *cursor += 1;
        Ok(byte)
    }

    fn decode_u32(buf: &[u8], cursor: &mut usize) -> SquallResult<u32> {
        if *cursor + 4 > buf.len() {
            return Err(SquallError::Corruption(
                "The write batch record ended in the middle of an integer field.".to_string(),
            ));
        }

        let value = u32::decode_fixed(&buf[*cursor..*cursor + 4]);
        *cursor += 4;
        Ok(value)
    }

    fn decode_length_prefixed(buf: &[u8], cursor: &mut usize) -> SquallResult<Vec<u8>> {
        let length = WriteBatch::decode_u32(buf, cursor)? as usize;
        if *cursor + length > buf.len() {
            return Err(SquallError::Corruption(
                "The write batch record ended in the middle of a length-prefixed field."
                    .to_string(),
            ));
        }

        let bytes = buf[*cursor..*cursor + length].to_vec();
        *cursor += length;
        Ok(bytes)
    }
}

/**
Apply a batch to the column-family memtables.

Sequence numbers are taken from the batch itself: the first operation gets the batch's starting
sequence number and each subsequent operation the next one. `next_sequence` is left one past the
last consumed sequence number.

Two classes of operations are silently skipped rather than failing the batch:

- operations targeting a column family that no longer exists (it may have been dropped after the
  batch was logged), and
- during recovery, operations targeting a column family whose `log_number` shows it was already
  flushed past the log the batch came from.

Returns true if at least one operation was actually applied to a memtable.
*/
pub(crate) fn insert_into(
    batch: &WriteBatch,
    column_families: &ColumnFamilySet,
    log_number: u64,
    next_sequence: &mut u64,
) -> bool {
    let mut has_valid_writes = false;
    let mut sequence = batch.get_sequence_number();

    for element in batch.get_elements() {
        match column_families.get(element.column_family_id) {
            None => {
                log::debug!(
                    "Skipping a write to dropped column family {column_family_id}.",
                    column_family_id = element.column_family_id
                );
            }
            Some(column_family) => {
                if column_family.get_log_number() > log_number {
                    // The column family was already flushed past this log; replaying the write
                    // would resurrect data the manifest says is on disk
                } else {
                    column_family.mem().insert(
                        InternalKey::new(element.key.clone(), sequence, element.operation),
                        element.value.clone().unwrap_or_default(),
                    );
                    has_valid_writes = true;
                }
            }
        }

        sequence += 1;
    }

    *next_sequence = sequence;

    has_valid_writes
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn batches_round_trip_through_the_wire_format() {
        let mut batch = WriteBatch::new();
        batch.put(b"nimbus", b"stratus");
        batch.delete(b"cirrus");
        batch.put_cf(3, b"gale", b"force 9");
        batch.set_sequence_number(42);

        let encoded = batch.encode();
        let decoded = WriteBatch::decode(&encoded).unwrap();

        assert_eq!(decoded.get_sequence_number(), 42);
        assert_eq!(decoded.count(), 3);
        assert_eq!(decoded.get_elements()[0].key, b"nimbus".to_vec());
        assert_eq!(decoded.get_elements()[0].value, Some(b"stratus".to_vec()));
        assert_eq!(decoded.get_elements()[1].operation, Operation::Delete);
        assert_eq!(decoded.get_elements()[1].value, None);
        assert_eq!(decoded.get_elements()[2].column_family_id, 3);
    }

    #[test]
    fn undersized_records_are_rejected_as_corruption() {
        let result = WriteBatch::decode(&[0x01, 0x02, 0x03]);
        assert!(matches!(result, Err(SquallError::Corruption(_))));
    }

    #[test]
    fn truncated_entries_are_rejected_as_corruption() {
        let mut batch = WriteBatch::new();
        batch.put(b"squall-line", b"derecho");
        let mut encoded = batch.encode();
        encoded.truncate(encoded.len() - 3);

        let result = WriteBatch::decode(&encoded);
        assert!(matches!(result, Err(SquallError::Corruption(_))));
    }
}
