/*!
This module contains various utilities e.g. checksum helpers.
*/

pub(crate) mod crc;
