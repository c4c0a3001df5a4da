//! Checksum helpers for the framed log and table file formats.

/// A constant delta for masking and unmasking checksums.
const CRC_MASKING_DELTA: u32 = 0xa282_ead8;

/**
Return a masked representation of the checksum.

Computing the CRC of a byte string that itself contains embedded CRCs is problematic, so
checksums are masked before being stored in a file.
*/
pub(crate) fn mask_checksum(checksum: u32) -> u32 {
    // Rotate right by 15 bits and add a constant.
    ((checksum.wrapping_shr(15)) | (checksum.wrapping_shl(17))).wrapping_add(CRC_MASKING_DELTA)
}

/**
Return the unmasked checksum.

The checksum must have been masked with [`mask_checksum`].
*/
pub(crate) fn unmask_checksum(masked_checksum: u32) -> u32 {
    let rotated = masked_checksum.wrapping_sub(CRC_MASKING_DELTA);
    (rotated.wrapping_shr(17)) | (rotated.wrapping_shl(15))
}
