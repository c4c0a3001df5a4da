/*!
Entries in the database are represented by an internal key that adds additional metadata e.g. a
sequence number and the operation that was performed.

The sequence number is a global, monotonically increasing 64-bit unsigned int. It is never reset.
Because writes are append-only, there may be multiple records with the same user key and
operation. The sequence number is used to denote which of the stored records is the most recent
version.
*/

use bincode::Options;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;

/** This is the actual key used by Squall. It is the user provided key with additional metadata. */
#[derive(Clone, Debug, Deserialize, Eq, Serialize)]
pub struct InternalKey {
    /// The user supplied key.
    user_key: Vec<u8>,
    /// The sequence number of the operation associated with this generated key.
    sequence_number: u64,
    /// The operation being performed with this key.
    operation: Operation,
}

impl InternalKey {
    /// Construct a new `InternalKey`.
    pub(crate) fn new(user_key: Vec<u8>, sequence_number: u64, operation: Operation) -> Self {
        InternalKey {
            user_key,
            sequence_number,
            operation,
        }
    }

    /// Return the user key.
    pub(crate) fn get_user_key(&self) -> &Vec<u8> {
        &self.user_key
    }

    /// Return the sequence number embedded in the key.
    pub(crate) fn get_sequence_number(&self) -> u64 {
        self.sequence_number
    }

    /// Return the operation embedded in the key.
    pub(crate) fn get_operation(&self) -> Operation {
        self.operation
    }
}

impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Return ordering by the user provided keys if they are not equal
        if self.user_key.as_slice().ne(other.user_key.as_slice()) {
            return self.user_key.as_slice().cmp(other.user_key.as_slice());
        }

        // Check the sequence number if the keys are equal
        self.sequence_number.cmp(&other.sequence_number)
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for InternalKey {
    fn eq(&self, other: &Self) -> bool {
        // A sequence number is assigned per operation so equal sequence numbers should imply
        // equal operation tags. The operation is still checked to be safe.
        self.user_key.cmp(&other.user_key).is_eq()
            && self.sequence_number == other.sequence_number
            && self.operation == other.operation
    }
}

impl TryFrom<&[u8]> for InternalKey {
    type Error = bincode::Error;

    fn try_from(value: &[u8]) -> bincode::Result<InternalKey> {
        bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .deserialize(value)
    }
}

impl From<&InternalKey> for Vec<u8> {
    fn from(value: &InternalKey) -> Vec<u8> {
        bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .serialize(value)
            .unwrap()
    }
}

/// The operation that is being applied to an entry in the database.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Operation {
    /// This represents a tombstone. There should not be a value set for the operation.
    Delete = 0,
    /// Add a new key-value pair or updates an existing key-value pair.
    Put = 1,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn keys_order_by_user_key_then_sequence_number() {
        let key_a1 = InternalKey::new(b"alpha".to_vec(), 1, Operation::Put);
        let key_a9 = InternalKey::new(b"alpha".to_vec(), 9, Operation::Delete);
        let key_b2 = InternalKey::new(b"bravo".to_vec(), 2, Operation::Put);

        assert!(key_a1 < key_a9);
        assert!(key_a9 < key_b2);
        assert!(key_a1 < key_b2);
    }

    #[test]
    fn keys_round_trip_through_serialization() {
        let key = InternalKey::new(b"cumulonimbus".to_vec(), 88, Operation::Put);
        let serialized = Vec::<u8>::from(&key);
        let deserialized = InternalKey::try_from(serialized.as_slice()).unwrap();

        assert_eq!(key, deserialized);
    }
}
